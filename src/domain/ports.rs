use crate::config::SourceConfig;
use crate::domain::model::{CallRecord, Row, Window};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::path::Path;

/// 讀取試算表來源的列，無副作用
#[async_trait]
pub trait RowSource: Send + Sync {
    async fn read_rows(&self, source: &SourceConfig) -> Result<Vec<Row>>;
}

/// 取得指定來電號碼在時間窗內的通話記錄
///
/// 重試由實作自行處理；重試用盡時回傳 `FetchError`。
#[async_trait]
pub trait CallLogFetcher: Send + Sync {
    async fn fetch_calls(&self, caller_id: &str, window: &Window) -> Result<Vec<CallRecord>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
}

/// 雲端硬碟：上傳產出檔並找回最近一次上傳的客戶檔
#[async_trait]
pub trait Drive: Send + Sync {
    async fn upload(&self, local_path: &Path, folder_id: &str) -> Result<String>;

    async fn latest_file(&self, folder_id: &str, file_name_pattern: &str)
        -> Result<Option<RemoteFile>>;

    async fn read_rows(&self, file_id: &str) -> Result<Vec<Row>>;
}
