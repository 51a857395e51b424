use auto_dialer_etl::config::cli::{Cli, Command};
use auto_dialer_etl::core::normalize::PhoneNormalizer;
use auto_dialer_etl::utils::logger::{self, LogFormat};
use auto_dialer_etl::utils::validation::Validate;
use auto_dialer_etl::workbook::artifact::ArtifactStore;
use auto_dialer_etl::{
    AppConfig, AutoCallerError, CreateFilterFilePipeline, CustomersImportPipeline, FilterRequest,
    HttpCallLogClient, LocalDrive, PipelineOrchestrator, ProcessResult, Result,
    SpreadsheetFileSource,
};
use chrono::Local;
use clap::Parser;
use serde_json::{Map, Value};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    // 初始化日誌
    logger::init_logger(LogFormat::from_flag(cli.json_logs), cli.verbose);

    tracing::info!("🚀 Starting auto-dialer-etl: {}", cli.command.pipeline_name());
    if cli.verbose {
        tracing::debug!("CLI arguments: {:?}", cli);
    }

    let result = match &cli.command {
        Command::ImportCustomers => import_customers(&cli).await,
        Command::CreateFilterFile(_) => create_filter_file(&cli).await,
    };

    let envelope = match result {
        Ok(fields) => ProcessResult::success(fields),
        Err(e) => ProcessResult::failure(&e),
    };

    // stdout 只輸出這一個 JSON 物件
    println!("{}", envelope.to_json());
    std::process::exit(envelope.exit_code());
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let path = AppConfig::locate(cli.config.as_deref());
    tracing::info!("⚙️ Loading configuration from {}", path.display());

    let config = AppConfig::from_file(&path).and_then(|config| {
        config.validate()?;
        Ok(config)
    });
    if let Err(e) = &config {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
    }
    config
}

async fn import_customers(cli: &Cli) -> Result<Map<String, Value>> {
    let config = load_config(cli)?;
    let store = ArtifactStore::new(config.output_dir())?;

    let pipeline = CustomersImportPipeline::new(
        &config,
        SpreadsheetFileSource::new(config.base_dir.clone()),
        LocalDrive::new(config.drive_root()),
        Local::now().naive_local(),
    )?;

    let report = PipelineOrchestrator::new(pipeline, store)
        .with_monitoring(cli.monitor)
        .run()
        .await?;
    Ok(report.fields)
}

async fn create_filter_file(cli: &Cli) -> Result<Map<String, Value>> {
    let Command::CreateFilterFile(args) = &cli.command else {
        return Err(AutoCallerError::config("create-filter-file arguments missing"));
    };
    args.validate()?;

    let config = load_config(cli)?;
    let store = ArtifactStore::new(config.output_dir())?;
    let calls = HttpCallLogClient::new(
        config.telephony()?,
        PhoneNormalizer::from_config(&config.normalization),
    )?;

    // 命令列給的相對路徑以目前目錄為準，不是設定檔目錄
    let customers_input = args
        .customers_input_file
        .as_deref()
        .map(std::path::absolute)
        .transpose()
        .map_err(|e| AutoCallerError::fetch("customers_input_file", e.to_string()))?;

    let request = FilterRequest {
        caller_id: args.caller_id.clone(),
        start: args.start_date,
        end: args.end_date,
        customers_input,
    };

    let pipeline = CreateFilterFilePipeline::new(
        &config,
        request,
        SpreadsheetFileSource::new(config.base_dir.clone()),
        LocalDrive::new(config.drive_root()),
        calls,
        Local::now().naive_local(),
    )?;

    let report = PipelineOrchestrator::new(pipeline, store)
        .with_monitoring(cli.monitor)
        .run()
        .await?;
    Ok(report.fields)
}
