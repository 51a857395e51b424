#[cfg(feature = "cli")]
pub mod cli;

use crate::utils::error::{AutoCallerError, Result};
use crate::utils::validation::{
    validate_column_letter, validate_file_extension, validate_non_empty_string, validate_path,
    validate_positive_number, validate_range, validate_url, Validate,
};
use crate::workbook::spec::ColumnSpec;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 未指定 `--config` 時讀取的環境變數
pub const CONFIG_PATH_ENV: &str = "AUTO_CALLER_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "auto-caller.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub run: RunConfig,
    pub customers: CustomersConfig,
    #[serde(default)]
    pub normalization: NormalizationConfig,
    pub telephony: Option<TelephonyConfig>,
    #[serde(default)]
    pub filter: FilterPredicateConfig,
    #[serde(default)]
    pub drive: DriveConfig,
    pub layouts: LayoutsConfig,

    /// 相對路徑以設定檔所在目錄為基準
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomersConfig {
    pub key_field: String,
    #[serde(default)]
    pub required_fields: Vec<String>,
    #[serde(default)]
    pub immutable_fields: Vec<String>,
    pub sources: Vec<SourceConfig>,
}

/// 一個客戶資料來源（試算表檔案或其中一個工作表）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub path: String,
    pub sheet_name: Option<String>,
    /// 只保留此欄含有數字的列
    pub condition_column: Option<String>,
    /// 原始表頭 -> 標準欄位名稱
    pub mapping: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NormalizationConfig {
    pub expected_digits: Option<usize>,
    pub country_code: Option<String>,
    #[serde(default)]
    pub strip_trunk_zero: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelephonyConfig {
    pub api_url: String,
    pub username: String,
    pub password: String,
    pub account_id: String,
    #[serde(default = "default_page_limit")]
    pub page_limit: usize,
    #[serde(default = "default_order_by")]
    pub order_by: String,
    /// 部分 API 版本回傳的分頁是新到舊，需要反轉
    #[serde(default)]
    pub reverse_pages: bool,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub fields: CallFieldNames,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl TelephonyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// 通話記錄 JSON 欄位名稱
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallFieldNames {
    #[serde(default = "default_id_field")]
    pub id: String,
    #[serde(default = "default_start_field")]
    pub start: String,
    #[serde(default = "default_caller_field")]
    pub caller: String,
    #[serde(default = "default_status_field")]
    pub status: String,
    #[serde(default = "default_duration_field")]
    pub duration: String,
    #[serde(default = "default_name_field")]
    pub name: String,
}

impl Default for CallFieldNames {
    fn default() -> Self {
        Self {
            id: default_id_field(),
            start: default_start_field(),
            caller: default_caller_field(),
            status: default_status_field(),
            duration: default_duration_field(),
            name: default_name_field(),
        }
    }
}

/// 電話系統請求的重試策略；只有取得通話記錄會重試
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_retryable_status_codes")]
    pub retryable_status_codes: Vec<u16>,
    #[serde(default = "default_true")]
    pub retry_on_timeout: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_factor: default_backoff_factor(),
            retryable_status_codes: default_retryable_status_codes(),
            retry_on_timeout: true,
        }
    }
}

impl RetryPolicy {
    /// 第 `attempt` 次失敗（從 1 起算）之後的等待時間
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = self.initial_backoff_ms as f64 * self.backoff_factor.powi(exponent);
        Duration::from_millis(millis.min(u64::MAX as f64) as u64)
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_status_codes.contains(&status)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterPredicateConfig {
    #[serde(default)]
    pub accepted_statuses: Vec<String>,
    #[serde(default)]
    pub min_duration_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveConfig {
    #[serde(default = "default_drive_root")]
    pub root: String,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            root: default_drive_root(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutsConfig {
    pub intermediate: LayoutConfig,
    pub auto_dialer: LayoutConfig,
    pub filter: FilterLayoutConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutConfig {
    pub folder_id: String,
    pub file_name_pattern: String,
    #[serde(default = "default_sheet_name")]
    pub sheet_name: String,
    #[serde(default = "default_true")]
    pub right_to_left: bool,
    #[serde(default)]
    pub columns: Vec<ColumnSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerMode {
    /// 直接寫入比對結果的布林值
    #[default]
    Literal,
    /// 以 COUNTIF 對照通話工作表
    Formula,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkerConfig {
    pub letter: String,
    pub header: String,
    #[serde(default)]
    pub mode: MarkerMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterColumnConfig {
    pub letter: String,
    pub header: String,
    /// 未設定時依篩選條件組出預設公式
    pub template: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterLayoutConfig {
    pub folder_id: String,
    pub file_name_pattern: String,
    #[serde(default = "default_sheet_name")]
    pub sheet_name: String,
    #[serde(default = "default_true")]
    pub right_to_left: bool,
    #[serde(default)]
    pub columns: Vec<ColumnSpec>,
    pub marker: MarkerConfig,
    pub filter_column: FilterColumnConfig,
    #[serde(default = "default_calls_sheet_name")]
    pub calls_sheet_name: String,
    #[serde(default = "default_summary_sheet_name")]
    pub summary_sheet_name: String,
}

fn default_output_dir() -> String {
    "./output".to_string()
}

fn default_drive_root() -> String {
    "./drive".to_string()
}

fn default_page_limit() -> usize {
    500
}

fn default_order_by() -> String {
    "asc".to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_id_field() -> String {
    "ID".to_string()
}

fn default_start_field() -> String {
    "START".to_string()
}

fn default_caller_field() -> String {
    "CALLERID".to_string()
}

fn default_status_field() -> String {
    "STATUS".to_string()
}

fn default_duration_field() -> String {
    "DURATION".to_string()
}

fn default_name_field() -> String {
    "NAME".to_string()
}

fn default_max_attempts() -> u32 {
    4
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_retryable_status_codes() -> Vec<u16> {
    vec![500, 502, 503, 504]
}

fn default_true() -> bool {
    true
}

fn default_sheet_name() -> String {
    "Sheet1".to_string()
}

fn default_calls_sheet_name() -> String {
    "calls".to_string()
}

fn default_summary_sheet_name() -> String {
    "summary".to_string()
}

impl AppConfig {
    /// 設定檔路徑：`--config` 優先，其次是環境變數，最後是預設檔名
    pub fn locate(cli_path: Option<&Path>) -> PathBuf {
        if let Some(path) = cli_path {
            return path.to_path_buf();
        }
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
            _ => PathBuf::from(DEFAULT_CONFIG_PATH),
        }
    }

    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AutoCallerError::config(format!("cannot read config file {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_toml_str(&content)?;
        config.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(config)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed = Self::substitute_env_vars(content)?;
        Ok(toml::from_str(&processed)?)
    }

    /// 替換環境變數 (例如 ${PAYCALL_PASSWORD})；未定義的變數保持原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}]+)\}")
            .map_err(|e| AutoCallerError::config(format!("invalid substitution pattern: {}", e)))?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.into_owned())
    }

    pub fn resolve_path(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.resolve_path(&self.run.output_dir)
    }

    pub fn drive_root(&self) -> PathBuf {
        self.resolve_path(&self.drive.root)
    }

    pub fn telephony(&self) -> Result<&TelephonyConfig> {
        crate::utils::validation::validate_required_field("telephony", &self.telephony)
    }

    fn validate_customers(&self) -> Result<()> {
        let customers = &self.customers;
        validate_non_empty_string("customers.key_field", &customers.key_field)?;
        validate_positive_number("customers.sources", customers.sources.len(), 1)?;

        let mut names = HashSet::new();
        for (idx, source) in customers.sources.iter().enumerate() {
            let prefix = format!("customers.sources[{}]", idx);
            validate_non_empty_string(&format!("{}.name", prefix), &source.name)?;
            validate_path(&format!("{}.path", prefix), &source.path)?;
            validate_file_extension(
                &format!("{}.path", prefix),
                &source.path,
                &["csv", "xlsx", "xlsm", "xls"],
            )?;
            validate_positive_number(&format!("{}.mapping", prefix), source.mapping.len(), 1)?;
            if !names.insert(source.name.as_str()) {
                return Err(AutoCallerError::InvalidConfigValueError {
                    field: format!("{}.name", prefix),
                    value: source.name.clone(),
                    reason: "Source names must be unique".to_string(),
                });
            }
        }
        Ok(())
    }

    fn validate_telephony(telephony: &TelephonyConfig) -> Result<()> {
        validate_url("telephony.api_url", &telephony.api_url)?;
        validate_non_empty_string("telephony.username", &telephony.username)?;
        validate_non_empty_string("telephony.account_id", &telephony.account_id)?;
        validate_positive_number("telephony.page_limit", telephony.page_limit, 1)?;
        validate_positive_number(
            "telephony.timeout_seconds",
            telephony.timeout_seconds as usize,
            1,
        )?;
        validate_positive_number(
            "telephony.retry.max_attempts",
            telephony.retry.max_attempts as usize,
            1,
        )?;
        validate_range(
            "telephony.retry.backoff_factor",
            telephony.retry.backoff_factor,
            1.0,
            10.0,
        )?;
        if !matches!(telephony.order_by.as_str(), "asc" | "desc") {
            return Err(AutoCallerError::InvalidConfigValueError {
                field: "telephony.order_by".to_string(),
                value: telephony.order_by.clone(),
                reason: "Expected 'asc' or 'desc'".to_string(),
            });
        }
        Ok(())
    }

    fn validate_layout(name: &str, folder_id: &str, file_name_pattern: &str) -> Result<()> {
        validate_non_empty_string(&format!("layouts.{}.folder_id", name), folder_id)?;
        validate_non_empty_string(
            &format!("layouts.{}.file_name_pattern", name),
            file_name_pattern,
        )?;
        if file_name_pattern.contains(['/', '\\']) {
            return Err(AutoCallerError::InvalidConfigValueError {
                field: format!("layouts.{}.file_name_pattern", name),
                value: file_name_pattern.to_string(),
                reason: "File name pattern cannot contain path separators".to_string(),
            });
        }
        Ok(())
    }

    fn validate_filter_layout(filter: &FilterLayoutConfig) -> Result<()> {
        Self::validate_layout("filter", &filter.folder_id, &filter.file_name_pattern)?;
        validate_column_letter("layouts.filter.marker.letter", &filter.marker.letter)?;
        validate_column_letter(
            "layouts.filter.filter_column.letter",
            &filter.filter_column.letter,
        )?;
        if filter.marker.letter == filter.filter_column.letter {
            return Err(AutoCallerError::InvalidConfigValueError {
                field: "layouts.filter.filter_column.letter".to_string(),
                value: filter.filter_column.letter.clone(),
                reason: "Marker and filter columns must use different letters".to_string(),
            });
        }
        let sheets = [
            filter.sheet_name.as_str(),
            filter.calls_sheet_name.as_str(),
            filter.summary_sheet_name.as_str(),
        ];
        if sheets.iter().collect::<HashSet<_>>().len() != sheets.len() {
            return Err(AutoCallerError::config(
                "layouts.filter sheet, calls sheet and summary sheet need distinct names",
            ));
        }
        Ok(())
    }
}

impl Validate for AppConfig {
    fn validate(&self) -> Result<()> {
        validate_path("run.output_dir", &self.run.output_dir)?;
        validate_path("drive.root", &self.drive.root)?;
        self.validate_customers()?;

        if let Some(expected) = self.normalization.expected_digits {
            validate_positive_number("normalization.expected_digits", expected, 1)?;
        }
        if let Some(telephony) = &self.telephony {
            Self::validate_telephony(telephony)?;
        }

        let layouts = &self.layouts;
        Self::validate_layout(
            "intermediate",
            &layouts.intermediate.folder_id,
            &layouts.intermediate.file_name_pattern,
        )?;
        Self::validate_layout(
            "auto_dialer",
            &layouts.auto_dialer.folder_id,
            &layouts.auto_dialer.file_name_pattern,
        )?;
        Self::validate_filter_layout(&layouts.filter)?;

        Ok(())
    }
}
