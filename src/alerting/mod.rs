pub mod channel;
pub mod orchestrator;

pub use channel::{AlertChannel, DailySummary, LogChannel};
pub use orchestrator::AlertOrchestrator;
