use auto_dialer_etl::core::normalize::PhoneNormalizer;
use auto_dialer_etl::workbook::artifact::ArtifactStore;
use auto_dialer_etl::{
    AppConfig, CreateFilterFilePipeline, CustomersImportPipeline, FilterRequest, HttpCallLogClient,
    LocalDrive, PipelineOrchestrator, SpreadsheetFileSource,
};
use calamine::{open_workbook_auto, Data, Reader};
use chrono::{NaiveDate, NaiveDateTime};
use httpmock::prelude::*;
use serde_json::json;
use std::path::Path;
use tempfile::TempDir;

fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 12, day)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

fn write_config(dir: &Path, api_url: &str) -> anyhow::Result<AppConfig> {
    std::fs::write(
        dir.join("north.csv"),
        "Phone,Name,Group\n050-1234567,Dana,1\n077-1234567,Avi,2\n03-5551234,Nobody,\n",
    )?;
    std::fs::write(
        dir.join("south.csv"),
        "Tel,Full name\n+972 50 123 4567,Dana Levi\n0521112222,Roni\n",
    )?;

    let toml = format!(
        r#"
[run]
output_dir = "out"

[customers]
key_field = "phone"
required_fields = ["name"]
immutable_fields = ["name"]

[[customers.sources]]
name = "north"
path = "north.csv"
condition_column = "Group"
mapping = {{ "Phone" = "phone", "Name" = "name" }}

[[customers.sources]]
name = "south"
path = "south.csv"
mapping = {{ "Tel" = "phone", "Full name" = "name" }}

[normalization]
expected_digits = 9
country_code = "972"
strip_trunk_zero = true

[telephony]
api_url = "{api_url}"
username = "user"
password = "${{AUTO_DIALER_TEST_UNSET_PASSWORD}}"
account_id = "42"
timeout_seconds = 5

[telephony.retry]
max_attempts = 2
initial_backoff_ms = 1

[drive]
root = "drive"

[layouts.intermediate]
folder_id = "intermediate"
file_name_pattern = "customers {{date}}"
sheet_name = "customers"

[layouts.auto_dialer]
folder_id = "auto"
file_name_pattern = "auto dialer {{date}} {{time}}"
sheet_name = "dialer"

[layouts.filter]
folder_id = "filters"
file_name_pattern = "filter {{date}} {{time}}"
sheet_name = "main"
marker = {{ letter = "F", header = "Called" }}
filter_column = {{ letter = "H", header = "To call" }}
"#
    );
    let path = dir.join("auto-caller.toml");
    std::fs::write(&path, toml)?;
    Ok(AppConfig::from_file(&path)?)
}

async fn import(config: &AppConfig, started_at: NaiveDateTime) -> anyhow::Result<serde_json::Map<String, serde_json::Value>> {
    let pipeline = CustomersImportPipeline::new(
        config,
        SpreadsheetFileSource::new(config.base_dir.clone()),
        LocalDrive::new(config.drive_root()),
        started_at,
    )?;
    let store = ArtifactStore::new(config.output_dir())?;
    Ok(PipelineOrchestrator::new(pipeline, store).run().await?.fields)
}

#[tokio::test]
async fn test_customers_import_end_to_end() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let config = write_config(dir.path(), "http://localhost/unused")?;

    let fields = import(&config, at(28, 9, 30)).await?;

    // 無 Group 的列被條件欄位排除；兩個來源的 Dana 合併成一筆
    assert_eq!(fields["merged"], json!(3));
    assert_eq!(fields["skipped"], json!(1));

    let output_path = fields["output_path"].as_str().unwrap();
    assert!(output_path.ends_with("auto dialer 28.12.2025 09.30.xlsx"));

    let mut workbook = open_workbook_auto(output_path)?;
    let range = workbook.worksheet_range("dialer")?;
    assert_eq!(range.get_value((1, 0)), Some(&Data::String("501234567".to_string())));
    assert_eq!(range.get_value((1, 1)), Some(&Data::String("*501234567".to_string())));
    assert_eq!(range.get_value((3, 2)), Some(&Data::Float(3.0)));

    // 不可變欄位保留第一次看到的名字
    let intermediate = config
        .drive_root()
        .join("intermediate")
        .join("customers 28.12.2025.xlsx");
    let mut workbook = open_workbook_auto(&intermediate)?;
    let range = workbook.worksheet_range("customers")?;
    assert_eq!(range.get_value((0, 0)), Some(&Data::String("phone".to_string())));
    assert_eq!(range.get_value((1, 1)), Some(&Data::String("Dana".to_string())));
    Ok(())
}

#[tokio::test]
async fn test_repeated_import_never_overwrites_published_files() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let config = write_config(dir.path(), "http://localhost/unused")?;

    import(&config, at(28, 9, 30)).await?;
    let second = import(&config, at(28, 9, 30)).await?;

    assert!(second["output_path"]
        .as_str()
        .unwrap()
        .ends_with("auto dialer 28.12.2025 09.30_2.xlsx"));
    assert_eq!(
        second["file_ids"][0],
        json!("intermediate/customers 28.12.2025_2.xlsx")
    );
    Ok(())
}

#[tokio::test]
async fn test_filter_file_uses_latest_intermediate_and_call_log() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    let calls = server
        .mock_async(|when, then| {
            when.method(POST).path("/calls").body_contains("callerId=035551234");
            then.status(200).json_body(json!([
                {"ID": "10", "START": "2025-12-28 10:00:00", "CALLERID": "0501234567", "STATUS": "S", "DURATION": "35", "NAME": "Dana"},
                {"ID": "11", "START": "2025-12-28 11:00:00", "CALLERID": "0501234567", "STATUS": "S", "DURATION": "12", "NAME": "Dana"},
                {"ID": "12", "START": "2025-12-27 11:00:00", "CALLERID": "0771234567", "STATUS": "S", "DURATION": "12", "NAME": "Avi"}
            ]));
        })
        .await;

    let dir = TempDir::new()?;
    let config = write_config(dir.path(), &server.url("/calls"))?;
    import(&config, at(28, 7, 0)).await?;

    let telephony = HttpCallLogClient::new(
        config.telephony()?,
        PhoneNormalizer::from_config(&config.normalization),
    )?;
    let request = FilterRequest {
        caller_id: "035551234".to_string(),
        start: at(28, 0, 0),
        end: at(29, 0, 0),
        customers_input: None,
    };
    let pipeline = CreateFilterFilePipeline::new(
        &config,
        request,
        SpreadsheetFileSource::new(config.base_dir.clone()),
        LocalDrive::new(config.drive_root()),
        telephony,
        at(29, 8, 15),
    )?;
    let store = ArtifactStore::new(config.output_dir())?;
    let fields = PipelineOrchestrator::new(pipeline, store).run().await?.fields;

    calls.assert_hits_async(1).await;
    assert_eq!(fields["data"], json!(["771234567", "521112222"]));
    assert_eq!(fields["matched"], json!(1));
    assert_eq!(fields["total"], json!(3));
    assert_eq!(fields["file_name"], json!("filter 29.12.2025 08.15.xlsx"));
    assert_eq!(fields["file_id"], json!("filters/filter 29.12.2025 08.15.xlsx"));

    let output_path = fields["output_path"].as_str().unwrap();
    let mut workbook = open_workbook_auto(output_path)?;
    assert_eq!(workbook.sheet_names(), vec!["main", "calls", "summary"]);

    let main = workbook.worksheet_range("main")?;
    assert_eq!(main.get_value((0, 5)), Some(&Data::String("Called".to_string())));
    assert_eq!(main.get_value((1, 5)), Some(&Data::Bool(true)));
    assert_eq!(main.get_value((2, 5)), Some(&Data::Bool(false)));

    let formulas = workbook.worksheet_formula("main")?;
    assert_eq!(
        formulas.get_value((2, 7)).map(String::as_str),
        Some(r#"IF(F3,"",A3)"#)
    );

    let summary = workbook.worksheet_range("summary")?;
    assert_eq!(summary.get_value((0, 0)), Some(&Data::String("29.12.2025".to_string())));
    assert_eq!(summary.get_value((3, 0)), Some(&Data::String("035551234".to_string())));
    Ok(())
}

#[tokio::test]
async fn test_repeated_filter_run_renders_identical_workbook() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    let calls = server
        .mock_async(|when, then| {
            when.method(POST).path("/calls");
            then.status(200).json_body(json!([
                {"ID": "10", "START": "2025-12-28 10:00:00", "CALLERID": "0501234567", "STATUS": "S", "DURATION": "35", "NAME": "Dana"}
            ]));
        })
        .await;

    let dir = TempDir::new()?;
    let config = write_config(dir.path(), &server.url("/calls"))?;
    import(&config, at(28, 7, 0)).await?;

    let mut outputs = Vec::new();
    for _ in 0..2 {
        let telephony = HttpCallLogClient::new(
            config.telephony()?,
            PhoneNormalizer::from_config(&config.normalization),
        )?;
        let request = FilterRequest {
            caller_id: "035551234".to_string(),
            start: at(28, 0, 0),
            end: at(29, 0, 0),
            customers_input: None,
        };
        let pipeline = CreateFilterFilePipeline::new(
            &config,
            request,
            SpreadsheetFileSource::new(config.base_dir.clone()),
            LocalDrive::new(config.drive_root()),
            telephony,
            at(29, 8, 15),
        )?;
        let store = ArtifactStore::new(config.output_dir())?;
        let fields = PipelineOrchestrator::new(pipeline, store).run().await?.fields;
        outputs.push(fields);
    }

    calls.assert_hits_async(2).await;
    assert_eq!(outputs[0]["data"], outputs[1]["data"]);
    assert_eq!(outputs[1]["file_name"], json!("filter 29.12.2025 08.15_2.xlsx"));

    let first = std::fs::read(outputs[0]["output_path"].as_str().unwrap())?;
    let second = std::fs::read(outputs[1]["output_path"].as_str().unwrap())?;
    assert_eq!(first, second);
    Ok(())
}
