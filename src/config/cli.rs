use crate::utils::error::{AutoCallerError, Result};
use chrono::NaiveDateTime;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// 命令列日期格式，例如 `28-12-2025 08:00:00`
pub const CLI_DATE_FORMAT: &str = "%d-%m-%Y %H:%M:%S";

#[derive(Debug, Clone, Parser)]
#[command(name = "auto-dialer-etl")]
#[command(about = "Builds auto-dialer and filter workbooks from customer sheets and call logs")]
pub struct Cli {
    /// TOML 設定檔路徑
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Log CPU and memory usage per stage")]
    pub monitor: bool,

    #[arg(long, global = true, help = "Write logs to stderr as JSON lines")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// 合併客戶資料並產生中繼檔與自動撥號檔
    ImportCustomers,
    /// 比對通話記錄並產生篩選檔
    CreateFilterFile(FilterArgs),
}

#[derive(Debug, Clone, Args)]
pub struct FilterArgs {
    #[arg(long)]
    pub caller_id: String,

    /// 開始時間（dd-mm-YYYY HH:MM:SS）
    #[arg(long, value_parser = parse_cli_datetime)]
    pub start_date: NaiveDateTime,

    /// 結束時間（不含）
    #[arg(long, value_parser = parse_cli_datetime)]
    pub end_date: NaiveDateTime,

    /// 本機的客戶檔；未指定時從雲端資料夾取最新的中繼檔
    #[arg(long)]
    pub customers_input_file: Option<PathBuf>,
}

impl Command {
    pub fn pipeline_name(&self) -> &'static str {
        match self {
            Self::ImportCustomers => "customers_import",
            Self::CreateFilterFile(_) => "create_filter_file",
        }
    }
}

pub fn parse_cli_datetime(value: &str) -> std::result::Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(value.trim(), CLI_DATE_FORMAT)
        .map_err(|e| format!("expected {} ({})", CLI_DATE_FORMAT, e))
}

impl FilterArgs {
    pub fn validate(&self) -> Result<()> {
        crate::utils::validation::validate_non_empty_string("caller_id", &self.caller_id)?;
        if let Some(path) = &self.customers_input_file {
            if !path.is_file() {
                return Err(AutoCallerError::fetch(
                    "customers_input_file",
                    format!("file not found: {}", path.display()),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_create_filter_file_arguments() {
        let cli = Cli::try_parse_from([
            "auto-dialer-etl",
            "--verbose",
            "create-filter-file",
            "--caller-id",
            "0501234567",
            "--start-date",
            "28-12-2025 00:00:00",
            "--end-date",
            "28-12-2025 23:59:00",
        ])
        .unwrap();

        assert!(cli.verbose);
        let Command::CreateFilterFile(args) = cli.command else {
            panic!("expected create-filter-file");
        };
        assert_eq!(args.caller_id, "0501234567");
        assert_eq!(args.start_date.to_string(), "2025-12-28 00:00:00");
        assert!(args.customers_input_file.is_none());
    }

    #[test]
    fn test_bad_date_format_is_rejected() {
        let result = Cli::try_parse_from([
            "auto-dialer-etl",
            "create-filter-file",
            "--caller-id",
            "1",
            "--start-date",
            "2025-12-28",
            "--end-date",
            "28-12-2025 23:59:00",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["auto-dialer-etl", "import-customers", "--monitor", "--json-logs"])
                .unwrap();
        assert!(cli.monitor);
        assert!(cli.json_logs);
        assert_eq!(cli.command.pipeline_name(), "customers_import");
    }
}
