use crate::config::{AppConfig, SourceConfig};
use crate::core::merger::{ColumnMapping, MergeOutcome, MergeSettings, RecordMerger, SourceRows};
use crate::core::normalize::PhoneNormalizer;
use crate::core::orchestrator::{Pipeline, PipelineState};
use crate::domain::ports::{Drive, RowSource};
use crate::utils::error::Result;
use crate::workbook::artifact::{Artifact, ArtifactStore, PendingArtifact, UploadedArtifact};
use crate::workbook::{auto_dialer, render, AutoDialerLayout, IntermediateLayout, RenderInput, RunInfo};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde_json::{json, Map, Value};

pub const PIPELINE_NAME: &str = "customers_import";

/// 匯入客戶：合併所有來源，產出中繼檔與撥號系統匯入檔並上傳
pub struct CustomersImportPipeline<R: RowSource, D: Drive> {
    sources: Vec<SourceConfig>,
    reader: R,
    drive: D,
    merger: RecordMerger,
    intermediate: IntermediateLayout,
    auto_dialer: AutoDialerLayout,
    run: RunInfo,
}

impl<R: RowSource, D: Drive> CustomersImportPipeline<R, D> {
    pub fn new(config: &AppConfig, reader: R, drive: D, started_at: NaiveDateTime) -> Result<Self> {
        let customers = &config.customers;
        let merger = RecordMerger::new(MergeSettings {
            key_field: customers.key_field.clone(),
            required_fields: customers.required_fields.clone(),
            immutable_fields: customers.immutable_fields.clone(),
            normalizer: Some(PhoneNormalizer::from_config(&config.normalization)),
        });

        Ok(Self {
            sources: customers.sources.clone(),
            reader,
            drive,
            merger,
            intermediate: IntermediateLayout::new(&config.layouts.intermediate, &customers.key_field)?,
            auto_dialer: AutoDialerLayout::new(&config.layouts.auto_dialer, &customers.key_field)?,
            run: RunInfo::new(PIPELINE_NAME, started_at),
        })
    }
}

#[async_trait]
impl<R: RowSource, D: Drive> Pipeline for CustomersImportPipeline<R, D> {
    type Fetched = Vec<SourceRows>;
    type Processed = MergeOutcome;

    fn name(&self) -> &'static str {
        PIPELINE_NAME
    }

    fn process_state(&self) -> PipelineState {
        PipelineState::Merging
    }

    async fn fetch(&self) -> Result<Vec<SourceRows>> {
        let mut fetched = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            let rows = self.reader.read_rows(source).await?;
            fetched.push(
                SourceRows::new(&source.name, rows, ColumnMapping::new(source.mapping.clone()))
                    .with_condition_column(source.condition_column.clone()),
            );
        }
        Ok(fetched)
    }

    async fn process(&self, fetched: Vec<SourceRows>) -> Result<MergeOutcome> {
        let outcome = self.merger.merge(&fetched)?;
        if outcome.records.is_empty() {
            tracing::warn!("⚠️ No customers left after merging, writing empty files");
        }
        Ok(outcome)
    }

    fn render(&self, processed: &MergeOutcome, store: &ArtifactStore) -> Result<Vec<PendingArtifact>> {
        let input = RenderInput::records(&processed.records, &self.run);
        Ok(vec![
            render(&self.intermediate, &input, store)?,
            render(&self.auto_dialer, &input, store)?,
        ])
    }

    async fn upload(&self, artifacts: Vec<Artifact>) -> Result<Vec<UploadedArtifact>> {
        let mut uploaded = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            let file_id = self.drive.upload(&artifact.path, &artifact.folder_id).await?;
            uploaded.push(UploadedArtifact { artifact, file_id });
        }
        Ok(uploaded)
    }

    fn summarize(&self, processed: &MergeOutcome, uploaded: &[UploadedArtifact]) -> Map<String, Value> {
        let output_path = uploaded
            .iter()
            .find(|u| u.artifact.layout == auto_dialer::LAYOUT_NAME)
            .map(|u| u.artifact.path.display().to_string());

        let mut fields = Map::new();
        fields.insert("output_path".to_string(), json!(output_path));
        fields.insert("artifacts".to_string(), json!(uploaded));
        fields.insert(
            "file_ids".to_string(),
            json!(uploaded.iter().map(|u| u.file_id.as_str()).collect::<Vec<_>>()),
        );
        fields.insert("merged".to_string(), json!(processed.records.len()));
        fields.insert("skipped".to_string(), json!(processed.skipped));
        fields
    }
}
