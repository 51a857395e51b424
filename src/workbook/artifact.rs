use super::{xlsx, RunInfo, Workbook};
use crate::utils::error::{AutoCallerError, Result};
use regex::Regex;
use serde::Serialize;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub const FILE_DATE_FORMAT: &str = "%d.%m.%Y";
pub const FILE_TIME_FORMAT: &str = "%H.%M";
const XLSX_EXTENSION: &str = ".xlsx";

/// 已寫完但尚未發佈的暫存檔
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingArtifact {
    pub layout: String,
    pub folder_id: String,
    pub file_name: String,
    pub temp_path: PathBuf,
}

/// 發佈後的產出檔
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub layout: String,
    pub folder_id: String,
    pub file_name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadedArtifact {
    #[serde(flatten)]
    pub artifact: Artifact,
    pub file_id: String,
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{(date|time|pipeline)\}").expect("valid file name regex"))
}

/// 產出檔的輸出目錄
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    output_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self> {
        let output_dir = output_dir.into();
        std::fs::create_dir_all(&output_dir).map_err(|e| {
            AutoCallerError::render(format!(
                "cannot create output directory {}: {}",
                output_dir.display(),
                e
            ))
        })?;
        Ok(Self { output_dir })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// 依樣板與執行時間產生檔名，例如 `filter 28.12.2025 09.30.xlsx`
    pub fn file_name(pattern: &str, run: &RunInfo) -> String {
        let name = placeholder_regex().replace_all(pattern, |caps: &regex::Captures| {
            match &caps[1] {
                "date" => run.started_at.format(FILE_DATE_FORMAT).to_string(),
                "time" => run.started_at.format(FILE_TIME_FORMAT).to_string(),
                _ => run.pipeline.clone(),
            }
        });
        if name.to_ascii_lowercase().ends_with(XLSX_EXTENSION) {
            name.into_owned()
        } else {
            format!("{}{}", name, XLSX_EXTENSION)
        }
    }

    /// 比對由同一個樣板產生的檔名（包含發佈時加上的 `_2` 之類後綴）
    pub fn file_name_regex(pattern: &str) -> Result<Regex> {
        let pattern = pattern
            .strip_suffix(XLSX_EXTENSION)
            .unwrap_or(pattern);

        let mut expr = String::from("^");
        let mut last = 0;
        for caps in placeholder_regex().captures_iter(pattern) {
            let Some(whole) = caps.get(0) else { continue };
            expr.push_str(&regex::escape(&pattern[last..whole.start()]));
            expr.push_str(match &caps[1] {
                "date" => r"\d{2}[.\-]\d{2}[.\-]\d{4}",
                "time" => r"\d{2}[:.\-]\d{2}",
                _ => r"[A-Za-z0-9_\-]+",
            });
            last = whole.end();
        }
        expr.push_str(&regex::escape(&pattern[last..]));
        expr.push_str(r"(?:_\d+)?\.xlsx$");

        Regex::new(&expr)
            .map_err(|e| AutoCallerError::config(format!("invalid file name pattern '{}': {}", pattern, e)))
    }

    /// 寫入輸出目錄中新的暫存檔；失敗時暫存檔留在原地方便檢查
    pub fn write(
        &self,
        layout: &str,
        folder_id: &str,
        file_name: &str,
        workbook: &Workbook,
    ) -> Result<PendingArtifact> {
        let temp = tempfile::Builder::new()
            .prefix(&format!(".{}.", layout))
            .suffix(".xlsx.tmp")
            .tempfile_in(&self.output_dir)
            .map_err(|e| AutoCallerError::render(format!("cannot create temporary file: {}", e)))?;
        let (file, temp_path) = temp
            .keep()
            .map_err(|e| AutoCallerError::render(format!("cannot keep temporary file: {}", e)))?;

        let written = xlsx::write_workbook(BufWriter::new(file), workbook).and_then(|mut writer| {
            writer
                .flush()
                .map_err(|e| AutoCallerError::render(format!("flush failed: {}", e)))?;
            let file = writer
                .into_inner()
                .map_err(|e| AutoCallerError::render(format!("flush failed: {}", e.error())))?;
            file.sync_all()
                .map_err(|e| AutoCallerError::render(format!("sync failed: {}", e)))
        });

        if let Err(e) = written {
            tracing::warn!(
                "⚠️ Rendering {} failed, partial file left at {}",
                layout,
                temp_path.display()
            );
            return Err(e);
        }

        tracing::debug!("📝 Wrote {} workbook to {}", layout, temp_path.display());

        Ok(PendingArtifact {
            layout: layout.to_string(),
            folder_id: folder_id.to_string(),
            file_name: file_name.to_string(),
            temp_path,
        })
    }

    /// 把暫存檔改名為最終檔名；同名檔案已存在時改用 `_2`、`_3`…
    pub fn publish(&self, pending: PendingArtifact) -> Result<Artifact> {
        let (path, file_name) = self.available_path(&pending.file_name)?;
        if file_name != pending.file_name {
            tracing::warn!(
                "⚠️ {} already exists, publishing as {}",
                pending.file_name,
                file_name
            );
        }

        std::fs::rename(&pending.temp_path, &path).map_err(|e| {
            AutoCallerError::render(format!(
                "cannot publish {} to {}: {}",
                pending.temp_path.display(),
                path.display(),
                e
            ))
        })?;

        tracing::info!("📁 Published {} artifact: {}", pending.layout, path.display());

        Ok(Artifact {
            layout: pending.layout,
            folder_id: pending.folder_id,
            file_name,
            path,
        })
    }

    fn available_path(&self, file_name: &str) -> Result<(PathBuf, String)> {
        let taken = |path: &Path| {
            path.try_exists().map_err(|e| {
                AutoCallerError::render(format!("cannot check {}: {}", path.display(), e))
            })
        };

        let candidate = self.output_dir.join(file_name);
        if !taken(candidate.as_path())? {
            return Ok((candidate, file_name.to_string()));
        }

        let stem = file_name.strip_suffix(XLSX_EXTENSION).unwrap_or(file_name);
        let mut n = 2u32;
        loop {
            let name = format!("{}_{}{}", stem, n, XLSX_EXTENSION);
            let candidate = self.output_dir.join(&name);
            if !taken(candidate.as_path())? {
                return Ok((candidate, name));
            }
            n += 1;
        }
    }
}
