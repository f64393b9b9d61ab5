pub mod poller;
pub mod sync;

pub use poller::PollScheduler;
pub use sync::{SyncOrchestrator, SyncOutcome, SyncSession, SYNC_PHASES};
