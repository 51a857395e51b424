pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;
pub mod workbook;

#[cfg(feature = "cli")]
pub use config::cli::Cli;
pub use config::AppConfig;

pub use adapters::{HttpCallLogClient, LocalDrive, SpreadsheetFileSource};
pub use app::pipelines::{CreateFilterFilePipeline, CustomersImportPipeline, FilterRequest};
pub use core::orchestrator::{PipelineOrchestrator, ProcessResult};
pub use utils::error::{AutoCallerError, Result};
