use super::sheets::read_spreadsheet_rows;
use crate::domain::model::Row;
use crate::domain::ports::{Drive, RemoteFile};
use crate::utils::error::{AutoCallerError, Result};
use crate::workbook::artifact::ArtifactStore;
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

const SOURCE_NAME: &str = "drive";

/// 以本機目錄模擬雲端硬碟：資料夾 id 即子目錄名稱，檔案 id 為 `資料夾/檔名`
#[derive(Debug, Clone)]
pub struct LocalDrive {
    root: PathBuf,
}

impl LocalDrive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn folder(&self, folder_id: &str) -> Result<PathBuf> {
        Ok(self.root.join(checked_relative(folder_id)?))
    }
}

/// 拒絕絕對路徑與 `..`，檔案不能跑出根目錄
fn checked_relative(id: &str) -> Result<&Path> {
    let path = Path::new(id);
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if id.trim().is_empty() || escapes {
        return Err(AutoCallerError::config(format!(
            "invalid drive id '{}'",
            id
        )));
    }
    Ok(path)
}

#[async_trait]
impl Drive for LocalDrive {
    async fn upload(&self, local_path: &Path, folder_id: &str) -> Result<String> {
        let folder = self.folder(folder_id)?;
        tokio::fs::create_dir_all(&folder).await.map_err(|e| {
            AutoCallerError::upload(format!("cannot create folder {}: {}", folder.display(), e))
        })?;

        let file_name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                AutoCallerError::upload(format!("{} has no file name", local_path.display()))
            })?;

        let mut name = file_name.to_string();
        let mut n = 2u32;
        while tokio::fs::try_exists(folder.join(&name)).await.map_err(|e| {
            AutoCallerError::upload(format!(
                "cannot check {} in {}: {}",
                name,
                folder.display(),
                e
            ))
        })? {
            let stem = file_name.strip_suffix(".xlsx").unwrap_or(file_name);
            name = format!("{}_{}.xlsx", stem, n);
            n += 1;
        }

        let target = folder.join(&name);
        tokio::fs::copy(local_path, &target).await.map_err(|e| {
            AutoCallerError::upload(format!(
                "cannot upload {} to {}: {}",
                local_path.display(),
                target.display(),
                e
            ))
        })?;

        let file_id = format!("{}/{}", folder_id, name);
        tracing::info!("☁️ Uploaded {} as {}", local_path.display(), file_id);
        Ok(file_id)
    }

    async fn latest_file(
        &self,
        folder_id: &str,
        file_name_pattern: &str,
    ) -> Result<Option<RemoteFile>> {
        let folder = self.folder(folder_id)?;
        let matcher = ArtifactStore::file_name_regex(file_name_pattern)?;

        let mut entries = match tokio::fs::read_dir(&folder).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("⚠️ Drive folder {} does not exist", folder.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(AutoCallerError::fetch(
                    SOURCE_NAME,
                    format!("cannot list {}: {}", folder.display(), e),
                ))
            }
        };

        let mut latest: Option<(SystemTime, String)> = None;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    return Err(AutoCallerError::fetch(
                        SOURCE_NAME,
                        format!("cannot list {}: {}", folder.display(), e),
                    ))
                }
            };
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !matcher.is_match(&name) {
                continue;
            }
            let modified = entry
                .metadata()
                .await
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);

            let newer = latest
                .as_ref()
                .map_or(true, |(time, current)| (modified, &name) > (*time, current));
            if newer {
                latest = Some((modified, name));
            }
        }

        Ok(latest.map(|(_, name)| RemoteFile {
            id: format!("{}/{}", folder_id, name),
            name,
        }))
    }

    async fn read_rows(&self, file_id: &str) -> Result<Vec<Row>> {
        let path = self.root.join(checked_relative(file_id)?);
        tokio::task::spawn_blocking(move || {
            read_spreadsheet_rows(&path, None).map_err(|e| AutoCallerError::fetch(SOURCE_NAME, e))
        })
        .await
        .map_err(|e| AutoCallerError::fetch(SOURCE_NAME, format!("reader task failed: {}", e)))?
    }
}
