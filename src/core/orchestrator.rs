use crate::utils::error::{AutoCallerError, Result};
use crate::utils::monitor::StageMonitor;
use crate::workbook::artifact::{Artifact, ArtifactStore, PendingArtifact, UploadedArtifact};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Fetching,
    Merging,
    Correlating,
    Rendering,
    Uploading,
    Done,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fetching => "Fetching",
            Self::Merging => "Merging",
            Self::Correlating => "Correlating",
            Self::Rendering => "Rendering",
            Self::Uploading => "Uploading",
            Self::Done => "Done",
            Self::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// 記錄一次執行經過的狀態
#[derive(Debug)]
pub struct RunTracker {
    pipeline: &'static str,
    states: Vec<PipelineState>,
    started: Instant,
}

impl RunTracker {
    pub fn new(pipeline: &'static str) -> Self {
        Self {
            pipeline,
            states: Vec::new(),
            started: Instant::now(),
        }
    }

    pub fn current(&self) -> Option<PipelineState> {
        self.states.last().copied()
    }

    pub fn states(&self) -> &[PipelineState] {
        &self.states
    }

    pub fn enter(&mut self, state: PipelineState) {
        tracing::info!("🔄 [{}] {}", self.pipeline, state);
        self.states.push(state);
    }

    /// 進入 Failed；回傳失敗時所在的狀態
    pub fn fail(&mut self, err: &AutoCallerError) -> Option<PipelineState> {
        let failed_in = self.current();
        tracing::error!(
            "❌ [{}] failed during {}: {}",
            self.pipeline,
            failed_in.map(|s| s.to_string()).unwrap_or_default(),
            err
        );
        tracing::error!("💡 Suggestion: {}", err.recovery_suggestion());
        self.states.push(PipelineState::Failed);
        failed_in
    }

    pub fn finish(&mut self) {
        self.states.push(PipelineState::Done);
        tracing::info!(
            "✅ [{}] completed in {:.2?}",
            self.pipeline,
            self.started.elapsed()
        );
    }
}

/// 一條流程：取得資料、處理、產生活頁簿、上傳
#[async_trait]
pub trait Pipeline: Send + Sync {
    type Fetched: Send;
    type Processed: Send + Sync;

    fn name(&self) -> &'static str;

    /// 處理階段對應的狀態（合併或比對）
    fn process_state(&self) -> PipelineState;

    async fn fetch(&self) -> Result<Self::Fetched>;

    async fn process(&self, fetched: Self::Fetched) -> Result<Self::Processed>;

    fn render(
        &self,
        processed: &Self::Processed,
        store: &ArtifactStore,
    ) -> Result<Vec<PendingArtifact>>;

    async fn upload(&self, artifacts: Vec<Artifact>) -> Result<Vec<UploadedArtifact>>;

    /// 成功時輸出 JSON 的欄位
    fn summarize(
        &self,
        processed: &Self::Processed,
        uploaded: &[UploadedArtifact],
    ) -> Map<String, Value>;
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub pipeline: &'static str,
    pub states: Vec<PipelineState>,
    pub artifacts: Vec<UploadedArtifact>,
    pub fields: Map<String, Value>,
}

/// 依序執行流程各階段；任何階段失敗立即停止，錯誤原樣回傳
pub struct PipelineOrchestrator<P: Pipeline> {
    pipeline: P,
    store: ArtifactStore,
    monitor: StageMonitor,
}

impl<P: Pipeline> PipelineOrchestrator<P> {
    pub fn new(pipeline: P, store: ArtifactStore) -> Self {
        Self {
            pipeline,
            store,
            monitor: StageMonitor::default(),
        }
    }

    pub fn with_monitoring(mut self, enabled: bool) -> Self {
        if enabled {
            tracing::info!("🔍 Stage monitoring enabled");
        }
        self.monitor = StageMonitor::new(enabled);
        self
    }

    pub fn pipeline(&self) -> &P {
        &self.pipeline
    }

    pub fn monitor(&self) -> &StageMonitor {
        &self.monitor
    }

    pub async fn run(&self) -> Result<RunReport> {
        let mut tracker = RunTracker::new(self.pipeline.name());
        match self.drive(&mut tracker).await {
            Ok((artifacts, fields)) => {
                tracker.finish();
                Ok(RunReport {
                    pipeline: self.pipeline.name(),
                    states: tracker.states().to_vec(),
                    artifacts,
                    fields,
                })
            }
            Err(e) => {
                tracker.fail(&e);
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        tracker: &mut RunTracker,
    ) -> Result<(Vec<UploadedArtifact>, Map<String, Value>)> {
        self.transition(tracker, PipelineState::Fetching);
        let fetched = self.pipeline.fetch().await?;

        self.transition(tracker, self.pipeline.process_state());
        let processed = self.pipeline.process(fetched).await?;

        self.transition(tracker, PipelineState::Rendering);
        let pending = self.pipeline.render(&processed, &self.store)?;
        let published = pending
            .into_iter()
            .map(|p| self.store.publish(p))
            .collect::<Result<Vec<_>>>()?;

        self.transition(tracker, PipelineState::Uploading);
        let uploaded = self.pipeline.upload(published).await?;
        self.monitor.log_stage(&PipelineState::Uploading.to_string());

        let fields = self.pipeline.summarize(&processed, &uploaded);
        Ok((uploaded, fields))
    }

    fn transition(&self, tracker: &mut RunTracker, next: PipelineState) {
        if let Some(previous) = tracker.current() {
            self.monitor.log_stage(&previous.to_string());
        }
        tracker.enter(next);
    }
}

/// 寫到 stdout 的單一 JSON 物件
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessResult {
    pub success: bool,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ProcessResult {
    pub fn success(fields: Map<String, Value>) -> Self {
        Self {
            success: true,
            fields,
        }
    }

    pub fn failure(err: &AutoCallerError) -> Self {
        let mut fields = Map::new();
        fields.insert("error".to_string(), Value::String(err.to_string()));
        fields.insert("error_type".to_string(), Value::String(err.kind().to_string()));
        Self {
            success: false,
            fields,
        }
    }

    pub fn from_result(result: &Result<RunReport>) -> Self {
        match result {
            Ok(report) => Self::success(report.fields.clone()),
            Err(e) => Self::failure(e),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                r#"{{"success":false,"error":"cannot encode result: {}","error_type":"RenderError"}}"#,
                e
            )
        })
    }

    pub fn exit_code(&self) -> i32 {
        if self.success {
            0
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::CellValue;
    use crate::workbook::spec::CellStyle;
    use crate::workbook::{Cell, Sheet, Workbook};
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Clone, Copy, PartialEq)]
    enum FailAt {
        Nowhere,
        Fetch,
        Render,
        Upload,
    }

    struct MockPipeline {
        fail_at: FailAt,
        uploads: Mutex<Vec<String>>,
    }

    impl MockPipeline {
        fn new(fail_at: FailAt) -> Self {
            Self {
                fail_at,
                uploads: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Pipeline for MockPipeline {
        type Fetched = Vec<String>;
        type Processed = Vec<String>;

        fn name(&self) -> &'static str {
            "mock"
        }

        fn process_state(&self) -> PipelineState {
            PipelineState::Merging
        }

        async fn fetch(&self) -> Result<Vec<String>> {
            if self.fail_at == FailAt::Fetch {
                return Err(AutoCallerError::fetch("mock", "source unavailable"));
            }
            Ok(vec!["555".to_string()])
        }

        async fn process(&self, fetched: Vec<String>) -> Result<Vec<String>> {
            Ok(fetched)
        }

        fn render(
            &self,
            processed: &Vec<String>,
            store: &ArtifactStore,
        ) -> Result<Vec<PendingArtifact>> {
            if self.fail_at == FailAt::Render {
                return Err(AutoCallerError::render("disk full"));
            }
            let mut sheet = Sheet::new("s", false);
            for (idx, key) in processed.iter().enumerate() {
                sheet.set(idx as u32 + 1, 0, Cell::value(CellValue::text(key.clone()), CellStyle::Default));
            }
            let pending = store.write("mock", "folder", "mock.xlsx", &Workbook::new(vec![sheet]))?;
            Ok(vec![pending])
        }

        async fn upload(&self, artifacts: Vec<Artifact>) -> Result<Vec<UploadedArtifact>> {
            if self.fail_at == FailAt::Upload {
                return Err(AutoCallerError::upload("drive offline"));
            }
            let mut uploads = self.uploads.lock().unwrap();
            Ok(artifacts
                .into_iter()
                .map(|artifact| {
                    uploads.push(artifact.file_name.clone());
                    UploadedArtifact {
                        file_id: format!("id-{}", artifact.file_name),
                        artifact,
                    }
                })
                .collect())
        }

        fn summarize(&self, processed: &Vec<String>, uploaded: &[UploadedArtifact]) -> Map<String, Value> {
            let mut fields = Map::new();
            fields.insert("total".to_string(), json!(processed.len()));
            fields.insert("file_id".to_string(), json!(uploaded[0].file_id));
            fields
        }
    }

    fn orchestrator(fail_at: FailAt, dir: &std::path::Path) -> PipelineOrchestrator<MockPipeline> {
        PipelineOrchestrator::new(MockPipeline::new(fail_at), ArtifactStore::new(dir).unwrap())
    }

    #[tokio::test]
    async fn test_successful_run_walks_every_state() {
        let dir = tempfile::tempdir().unwrap();
        let report = orchestrator(FailAt::Nowhere, dir.path()).run().await.unwrap();

        assert_eq!(
            report.states,
            vec![
                PipelineState::Fetching,
                PipelineState::Merging,
                PipelineState::Rendering,
                PipelineState::Uploading,
                PipelineState::Done,
            ]
        );
        assert_eq!(report.artifacts.len(), 1);
        assert!(dir.path().join("mock.xlsx").exists());
        assert_eq!(report.fields["file_id"], json!("id-mock.xlsx"));
    }

    #[cfg(feature = "cli")]
    #[tokio::test]
    async fn test_monitor_logs_every_stage_including_upload() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(FailAt::Nowhere, dir.path()).with_monitoring(true);
        orchestrator.run().await.unwrap();

        assert_eq!(
            orchestrator.monitor().logged_stages(),
            vec!["Fetching", "Merging", "Rendering", "Uploading"]
        );
    }

    #[tokio::test]
    async fn test_monitor_is_silent_when_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(FailAt::Nowhere, dir.path());
        orchestrator.run().await.unwrap();
        assert!(orchestrator.monitor().logged_stages().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_error_is_returned_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let err = orchestrator(FailAt::Fetch, dir.path()).run().await.unwrap_err();
        assert_eq!(err.kind(), "FetchError");
        assert_eq!(err.to_string(), "Fetch from mock failed: source unavailable");
    }

    #[tokio::test]
    async fn test_render_failure_publishes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(FailAt::Render, dir.path());
        let err = orchestrator.run().await.unwrap_err();

        assert_eq!(err.kind(), "RenderError");
        assert!(!dir.path().join("mock.xlsx").exists());
        assert!(orchestrator.pipeline().uploads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_failure_keeps_published_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let err = orchestrator(FailAt::Upload, dir.path()).run().await.unwrap_err();
        assert_eq!(err.kind(), "UploadError");
        assert!(dir.path().join("mock.xlsx").exists());
    }

    #[test]
    fn test_tracker_records_failure_state() {
        let mut tracker = RunTracker::new("mock");
        tracker.enter(PipelineState::Fetching);
        let failed_in = tracker.fail(&AutoCallerError::fetch("x", "y"));
        assert_eq!(failed_in, Some(PipelineState::Fetching));
        assert_eq!(tracker.current(), Some(PipelineState::Failed));
        assert!(PipelineState::Failed.is_terminal());
    }

    #[test]
    fn test_envelope_shapes() {
        let mut fields = Map::new();
        fields.insert("output_path".to_string(), json!("/tmp/out.xlsx"));
        let ok: Value = serde_json::from_str(&ProcessResult::success(fields).to_json()).unwrap();
        assert_eq!(ok, json!({"success": true, "output_path": "/tmp/out.xlsx"}));

        let failure = ProcessResult::failure(&AutoCallerError::merge("key field not mapped"));
        assert_eq!(failure.exit_code(), 1);
        let err: Value = serde_json::from_str(&failure.to_json()).unwrap();
        assert_eq!(
            err,
            json!({
                "success": false,
                "error": "Merge error: key field not mapped",
                "error_type": "MergeError"
            })
        );
    }
}
