pub mod filter;
pub mod merger;
pub mod normalize;
pub mod orchestrator;

pub use crate::utils::error::Result;
pub use filter::{Correlation, FilterEngine, FilterPredicate};
pub use merger::{MergeOutcome, RecordMerger};
pub use normalize::PhoneNormalizer;
pub use orchestrator::{Pipeline, PipelineOrchestrator, PipelineState, ProcessResult};
