use crate::config::{AppConfig, SourceConfig};
use crate::core::filter::{Correlation, FilterEngine, FilterPredicate};
use crate::core::merger::{ColumnMapping, MergeSettings, RecordMerger, SourceRows};
use crate::core::normalize::PhoneNormalizer;
use crate::core::orchestrator::{Pipeline, PipelineState};
use crate::domain::model::{CallRecord, CustomerRecord, Row, Window};
use crate::domain::ports::{CallLogFetcher, Drive, RowSource};
use crate::utils::error::{AutoCallerError, Result};
use crate::workbook::artifact::{Artifact, ArtifactStore, PendingArtifact, UploadedArtifact};
use crate::workbook::{render, FilterLayout, IntermediateLayout, RenderInput, RunInfo};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

pub const PIPELINE_NAME: &str = "create_filter_file";

/// 建立篩選檔的參數
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterRequest {
    pub caller_id: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    /// 未指定時使用雲端中繼資料夾裡最新的客戶檔
    pub customers_input: Option<PathBuf>,
}

pub struct FilterInputs {
    pub customers_input: String,
    pub rows: Vec<Row>,
    pub calls: Vec<CallRecord>,
}

pub struct FilterData {
    pub records: Vec<CustomerRecord>,
    pub calls: Vec<CallRecord>,
    pub correlation: Correlation,
    pub run: RunInfo,
}

/// 比對客戶與通話記錄，產出標示未接觸客戶的篩選檔
pub struct CreateFilterFilePipeline<R: RowSource, D: Drive, F: CallLogFetcher> {
    request: FilterRequest,
    window: Window,
    reader: R,
    drive: D,
    calls: F,
    key_field: String,
    normalizer: PhoneNormalizer,
    engine: FilterEngine,
    intermediate: IntermediateLayout,
    intermediate_folder: String,
    intermediate_pattern: String,
    layout: FilterLayout,
    started_at: NaiveDateTime,
}

impl<R: RowSource, D: Drive, F: CallLogFetcher> CreateFilterFilePipeline<R, D, F> {
    pub fn new(
        config: &AppConfig,
        request: FilterRequest,
        reader: R,
        drive: D,
        calls: F,
        started_at: NaiveDateTime,
    ) -> Result<Self> {
        let window = Window::new(request.start, request.end)?;
        let key_field = config.customers.key_field.clone();
        let normalizer = PhoneNormalizer::from_config(&config.normalization);
        let predicate = FilterPredicate::from_config(&config.filter);
        let layout = FilterLayout::new(&config.layouts.filter, &key_field, &predicate)?;
        let intermediate = &config.layouts.intermediate;

        Ok(Self {
            window,
            reader,
            drive,
            calls,
            engine: FilterEngine::new(normalizer.clone(), predicate),
            normalizer,
            intermediate: IntermediateLayout::new(intermediate, &key_field)?,
            intermediate_folder: intermediate.folder_id.clone(),
            intermediate_pattern: intermediate.file_name_pattern.clone(),
            key_field,
            layout,
            started_at,
            request,
        })
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    async fn fetch_customers(&self) -> Result<(String, Vec<Row>)> {
        if let Some(path) = &self.request.customers_input {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            let source = SourceConfig {
                name: name.clone(),
                path: path.display().to_string(),
                sheet_name: None,
                condition_column: None,
                mapping: HashMap::new(),
            };
            tracing::info!("📄 Using local customers file {}", path.display());
            let rows = self.reader.read_rows(&source).await?;
            return Ok((name, rows));
        }

        let latest = self
            .drive
            .latest_file(&self.intermediate_folder, &self.intermediate_pattern)
            .await?
            .ok_or_else(|| {
                AutoCallerError::fetch(
                    "drive",
                    format!(
                        "no customers file matching '{}' in folder '{}'",
                        self.intermediate_pattern, self.intermediate_folder
                    ),
                )
            })?;
        tracing::info!("☁️ Using latest customers file {}", latest.name);
        let rows = self.drive.read_rows(&latest.id).await?;
        Ok((latest.name, rows))
    }

    /// 中繼檔讀回來的表頭轉成標準欄位；未設定欄位時表頭就是欄位名稱
    fn read_back_mapping(&self, rows: &[Row]) -> ColumnMapping {
        if self.intermediate.has_configured_columns() {
            return ColumnMapping::new(self.intermediate.read_back_mapping());
        }
        let headers: BTreeSet<&str> = rows
            .iter()
            .flat_map(|row| row.keys().map(String::as_str))
            .chain(std::iter::once(self.key_field.as_str()))
            .collect();
        ColumnMapping::new(headers.into_iter().map(|h| (h, h)))
    }
}

#[async_trait]
impl<R: RowSource, D: Drive, F: CallLogFetcher> Pipeline for CreateFilterFilePipeline<R, D, F> {
    type Fetched = FilterInputs;
    type Processed = FilterData;

    fn name(&self) -> &'static str {
        PIPELINE_NAME
    }

    fn process_state(&self) -> PipelineState {
        PipelineState::Correlating
    }

    async fn fetch(&self) -> Result<FilterInputs> {
        let (customers_input, rows) = self.fetch_customers().await?;
        let calls = self
            .calls
            .fetch_calls(&self.request.caller_id, &self.window)
            .await?;

        Ok(FilterInputs {
            customers_input,
            rows,
            calls,
        })
    }

    async fn process(&self, fetched: FilterInputs) -> Result<FilterData> {
        let mapping = self.read_back_mapping(&fetched.rows);
        let merger = RecordMerger::new(MergeSettings {
            key_field: self.key_field.clone(),
            required_fields: Vec::new(),
            immutable_fields: Vec::new(),
            normalizer: Some(self.normalizer.clone()),
        });
        let outcome = merger.merge(&[SourceRows::new(
            &fetched.customers_input,
            fetched.rows,
            mapping,
        )])?;

        let correlation = self
            .engine
            .correlate(&outcome.records, &fetched.calls, self.window);

        let mut run = RunInfo::new(PIPELINE_NAME, self.started_at);
        run.caller_id = Some(self.request.caller_id.clone());
        run.customers_input = Some(fetched.customers_input);
        run.window = Some(self.window);

        Ok(FilterData {
            records: outcome.records,
            calls: fetched.calls,
            correlation,
            run,
        })
    }

    fn render(&self, processed: &FilterData, store: &ArtifactStore) -> Result<Vec<PendingArtifact>> {
        let input = RenderInput {
            records: &processed.records,
            correlation: Some(&processed.correlation),
            calls: &processed.calls,
            run: &processed.run,
        };
        Ok(vec![render(&self.layout, &input, store)?])
    }

    async fn upload(&self, artifacts: Vec<Artifact>) -> Result<Vec<UploadedArtifact>> {
        let mut uploaded = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            let file_id = self.drive.upload(&artifact.path, &artifact.folder_id).await?;
            uploaded.push(UploadedArtifact { artifact, file_id });
        }
        Ok(uploaded)
    }

    fn summarize(&self, processed: &FilterData, uploaded: &[UploadedArtifact]) -> Map<String, Value> {
        let filter_file = uploaded.first();

        let mut fields = Map::new();
        fields.insert(
            "output_path".to_string(),
            json!(filter_file.map(|u| u.artifact.path.display().to_string())),
        );
        fields.insert("file_id".to_string(), json!(filter_file.map(|u| &u.file_id)));
        fields.insert(
            "file_name".to_string(),
            json!(filter_file.map(|u| &u.artifact.file_name)),
        );
        fields.insert("data".to_string(), json!(processed.correlation.missing_keys()));
        fields.insert("matched".to_string(), json!(processed.correlation.matched_count()));
        fields.insert("total".to_string(), json!(processed.correlation.len()));
        fields
    }
}
