pub mod analysis;
pub mod collection;

pub use analysis::{AnalysisOrchestrator, AnalysisOutcome, DatabaseAnalysisResult};
pub use collection::{CollectionOrchestrator, CollectionOutcome};
