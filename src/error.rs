use thiserror::Error;

/// Native errno values reported through the status-code channel.
pub mod errno {
    pub const EBADF: i32 = -9;
    pub const ENOMEM: i32 = -12;
    pub const EINVAL: i32 = -22;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimerError {
    #[error("bad handle: timer is closed or was never initialized")]
    BadHandle,
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error("timer registration refused: {limit} armed timers already scheduled")]
    ResourceExhausted { limit: usize },
    #[error("event loop has been dropped")]
    LoopGone,
}

impl TimerError {
    /// The native status code for this error. Always negative.
    pub fn errno(&self) -> i32 {
        match self {
            TimerError::BadHandle | TimerError::LoopGone => errno::EBADF,
            TimerError::InvalidState(_) => errno::EINVAL,
            TimerError::ResourceExhausted { .. } => errno::ENOMEM,
        }
    }
}

/// Collapse an operation outcome into a host status code (0 = success).
pub fn status_code<T>(result: &Result<T, TimerError>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(err) => err.errno(),
    }
}
