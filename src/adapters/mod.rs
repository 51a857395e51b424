// Adapters layer: concrete implementations of the domain ports (files, local drive, telephony http).

pub mod drive;
pub mod retry;
pub mod sheets;
pub mod telephony;

pub use drive::LocalDrive;
pub use sheets::SpreadsheetFileSource;
pub use telephony::HttpCallLogClient;
