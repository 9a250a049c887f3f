mod cancellation;
mod core;
mod state;


pub use cancellation::{CancelHandle, CancellationToken};
pub use self::core::{crash_message, Supervisor, SupervisorBuilder};
pub use state::{Phase, StartOutcome};
