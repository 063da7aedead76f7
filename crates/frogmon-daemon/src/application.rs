//! A dev server application launched through the daemon

use std::path::{Path, PathBuf};

use serde::ser::{Serialize, SerializeStruct, Serializer};

/// How much of an application's identity has been learned so far
///
/// Each stage carries everything learned before it. Values are only ever
/// added, in this order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ApplicationState {
    #[default]
    Pending,
    Identified {
        id: String,
    },
    Addressed {
        id: String,
        vm_service_uri: String,
    },
    Ready {
        id: String,
        vm_service_uri: String,
        address: String,
    },
}

impl ApplicationState {
    pub fn id(&self) -> Option<&str> {
        match self {
            ApplicationState::Pending => None,
            ApplicationState::Identified { id }
            | ApplicationState::Addressed { id, .. }
            | ApplicationState::Ready { id, .. } => Some(id),
        }
    }

    pub fn vm_service_uri(&self) -> Option<&str> {
        match self {
            ApplicationState::Addressed { vm_service_uri, .. }
            | ApplicationState::Ready { vm_service_uri, .. } => Some(vm_service_uri),
            _ => None,
        }
    }

    pub fn address(&self) -> Option<&str> {
        match self {
            ApplicationState::Ready { address, .. } => Some(address),
            _ => None,
        }
    }
}

/// A Dart Frog dev server started with `dev_server.start`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DartFrogApplication {
    project_path: PathBuf,
    port: u16,
    vm_service_port: u16,
    state: ApplicationState,
}

impl DartFrogApplication {
    pub fn new(project_path: impl Into<PathBuf>, port: u16, vm_service_port: u16) -> Self {
        Self {
            project_path: project_path.into(),
            port,
            vm_service_port,
            state: ApplicationState::Pending,
        }
    }

    pub fn project_path(&self) -> &Path {
        &self.project_path
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn vm_service_port(&self) -> u16 {
        self.vm_service_port
    }

    pub fn state(&self) -> &ApplicationState {
        &self.state
    }

    pub fn id(&self) -> Option<&str> {
        self.state.id()
    }

    pub fn vm_service_uri(&self) -> Option<&str> {
        self.state.vm_service_uri()
    }

    pub fn address(&self) -> Option<&str> {
        self.state.address()
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, ApplicationState::Ready { .. })
    }

    /// Record the application id. Ignored unless the application is pending.
    pub fn identify(&mut self, id: impl Into<String>) -> bool {
        if self.state != ApplicationState::Pending {
            return false;
        }
        self.state = ApplicationState::Identified { id: id.into() };
        true
    }

    /// Record the VM service URI. Ignored unless the application was just
    /// identified.
    pub fn attach_vm_service_uri(&mut self, uri: impl Into<String>) -> bool {
        let ApplicationState::Identified { id } = &self.state else {
            return false;
        };
        self.state = ApplicationState::Addressed {
            id: id.clone(),
            vm_service_uri: uri.into(),
        };
        true
    }

    /// Record the server address. Ignored unless the VM service URI is known
    /// and no address has been recorded yet.
    pub fn attach_address(&mut self, address: impl Into<String>) -> bool {
        let ApplicationState::Addressed { id, vm_service_uri } = &self.state else {
            return false;
        };
        self.state = ApplicationState::Ready {
            id: id.clone(),
            vm_service_uri: vm_service_uri.clone(),
            address: address.into(),
        };
        true
    }
}

impl Serialize for DartFrogApplication {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("DartFrogApplication", 6)?;
        s.serialize_field("projectPath", &self.project_path)?;
        s.serialize_field("port", &self.port)?;
        s.serialize_field("vmServicePort", &self.vm_service_port)?;
        match self.id() {
            Some(id) => s.serialize_field("id", id)?,
            None => s.skip_field("id")?,
        }
        match self.vm_service_uri() {
            Some(uri) => s.serialize_field("vmServiceUri", uri)?,
            None => s.skip_field("vmServiceUri")?,
        }
        match self.address() {
            Some(address) => s.serialize_field("address", address)?,
            None => s.skip_field("address")?,
        }
        s.end()
    }
}
