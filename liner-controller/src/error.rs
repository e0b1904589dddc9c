use crate::session::CharacteristicRole;

/// Errors surfaced to callers of the controller
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinerError {
    #[error("bluetooth permission denied")]
    PermissionDenied,
    #[error("bluetooth adapter unavailable")]
    AdapterUnavailable,
    #[error("bluetooth adapter disabled")]
    AdapterDisabled,
    #[error("bluetooth not initialized")]
    NotInitialized,
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device already connected: {0}")]
    AlreadyConnected(String),
    #[error("device not connected: {0}")]
    DeviceNotConnected(String),
    #[error("liner service not found")]
    ServiceNotFound,
    #[error("{0} characteristic not found")]
    CharacteristicNotFound(CharacteristicRole),
    #[error("failed to enable {0} notifications")]
    NotificationSetupFailed(CharacteristicRole),
    #[error("failed to write command: {0}")]
    WriteFailed(String),
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("a command is already pending for {0}")]
    Busy(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Errors a transport reports when it cannot even issue an operation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("bluetooth permission denied")]
    PermissionDenied,
    #[error("no bluetooth adapter")]
    AdapterUnavailable,
    #[error("bluetooth adapter is off")]
    AdapterDisabled,
    #[error("unknown peripheral: {0}")]
    UnknownPeripheral(String),
    #[error("{0}")]
    Failed(String),
}

impl TransportError {
    /// Map onto the caller taxonomy; `otherwise` classifies plain failures
    /// according to the operation that was being issued.
    pub fn classify(self, otherwise: impl FnOnce(String) -> LinerError) -> LinerError {
        match self {
            TransportError::PermissionDenied => LinerError::PermissionDenied,
            TransportError::AdapterUnavailable => LinerError::AdapterUnavailable,
            TransportError::AdapterDisabled => LinerError::AdapterDisabled,
            TransportError::UnknownPeripheral(id) => LinerError::DeviceNotFound(id),
            TransportError::Failed(reason) => otherwise(reason),
        }
    }
}
