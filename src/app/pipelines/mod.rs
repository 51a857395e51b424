pub mod create_filter_file;
pub mod customers_import;

pub use create_filter_file::{CreateFilterFilePipeline, FilterRequest};
pub use customers_import::CustomersImportPipeline;
