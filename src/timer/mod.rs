pub mod event;
pub mod timer;

pub use event::{OnTimeout, TimerEvent};
pub use timer::TimerHandle;
