use thiserror::Error;

/// 對帳與產檔流程的錯誤分類
///
/// 每個變體對應 JSON 輸出中的 `error_type`，由 [`AutoCallerError::kind`] 提供。
#[derive(Error, Debug)]
pub enum AutoCallerError {
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid configuration value for '{field}' ({value}): {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration field: {field}")]
    MissingConfigError { field: String },

    #[error("Fetch from {source_name} failed: {message}")]
    FetchError {
        source_name: String,
        message: String,
    },

    #[error("Merge error: {message}")]
    MergeError { message: String },

    #[error("Correlation error: {message}")]
    CorrelationError { message: String },

    #[error("Render error: {message}")]
    RenderError { message: String },

    #[error("Upload error: {message}")]
    UploadError { message: String },
}

pub type Result<T> = std::result::Result<T, AutoCallerError>;

impl AutoCallerError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    pub fn fetch(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FetchError {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    pub fn merge(message: impl Into<String>) -> Self {
        Self::MergeError {
            message: message.into(),
        }
    }

    pub fn correlation(message: impl Into<String>) -> Self {
        Self::CorrelationError {
            message: message.into(),
        }
    }

    pub fn render(message: impl Into<String>) -> Self {
        Self::RenderError {
            message: message.into(),
        }
    }

    pub fn upload(message: impl Into<String>) -> Self {
        Self::UploadError {
            message: message.into(),
        }
    }

    /// JSON 輸出用的錯誤種類名稱
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::MissingConfigError { .. } => "ConfigError",
            Self::FetchError { .. } => "FetchError",
            Self::MergeError { .. } => "MergeError",
            Self::CorrelationError { .. } => "CorrelationError",
            Self::RenderError { .. } => "RenderError",
            Self::UploadError { .. } => "UploadError",
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.kind() {
            "ConfigError" => "Check the TOML configuration file against the documented sections",
            "FetchError" => "Verify source files and telephony credentials, then rerun the whole job",
            "MergeError" => "Map the identity key and every required field in at least one source",
            "CorrelationError" => "Pass an end date strictly after the start date",
            "RenderError" => "Check free disk space and write permission on the output directory",
            _ => "Check the drive folder configuration and rerun the job",
        }
    }
}

impl From<toml::de::Error> for AutoCallerError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(format!("TOML parsing error: {}", err))
    }
}

impl From<zip::result::ZipError> for AutoCallerError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::render(format!("zip write failed: {}", err))
    }
}
