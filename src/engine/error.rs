use ulid::Ulid;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    /// The slot already holds this active reservation.
    DuplicateSlot(Ulid),
    AlreadyCanceled(Ulid),
    CutoffPassed,
    InvalidSchedule(String),
    LimitExceeded(&'static str),
    WalError(String),
    Internal(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "reservation not found: {id}"),
            EngineError::DuplicateSlot(id) => {
                write!(f, "slot already reserved by {id}")
            }
            EngineError::AlreadyCanceled(id) => write!(f, "reservation already canceled: {id}"),
            EngineError::CutoffPassed => write!(f, "cutoff passed"),
            EngineError::InvalidSchedule(msg) => write!(f, "invalid schedule: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
            EngineError::Internal(e) => write!(f, "internal error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
