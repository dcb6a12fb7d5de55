use thiserror::Error;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CoreErrorKind {
    InvalidInput,
    InvalidConfig,
    ParseFailure,
    Io,
    ThreadSpawn,
    Internal,
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("{kind:?}: {message}")]
pub struct CoreError {
    pub device: Option<String>,
    pub kind: CoreErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            device: None,
            kind,
            message: message.into(),
        }
    }

    pub fn for_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }
}
