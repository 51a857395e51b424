use crate::config::SourceConfig;
use crate::domain::model::{CellValue, Row};
use crate::domain::ports::RowSource;
use crate::utils::error::{AutoCallerError, Result};
use crate::workbook::xlsx::from_excel_serial;
use async_trait::async_trait;
use calamine::{open_workbook_auto, Data, Reader};
use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};

/// 從本機 CSV 或 Excel 檔讀取客戶資料
pub struct SpreadsheetFileSource {
    base_dir: PathBuf,
}

impl SpreadsheetFileSource {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

#[async_trait]
impl RowSource for SpreadsheetFileSource {
    async fn read_rows(&self, source: &SourceConfig) -> Result<Vec<Row>> {
        let path = self.resolve(&source.path);
        let sheet_name = source.sheet_name.clone();
        let name = source.name.clone();

        tracing::info!("📄 Reading source '{}' from {}", source.name, path.display());
        let rows = tokio::task::spawn_blocking(move || {
            read_spreadsheet_rows(&path, sheet_name.as_deref())
                .map_err(|e| AutoCallerError::fetch(&name, e))
        })
        .await
        .map_err(|e| AutoCallerError::fetch(&source.name, format!("reader task failed: {}", e)))??;

        tracing::debug!("Source '{}' has {} rows", source.name, rows.len());
        Ok(rows)
    }
}

/// 讀取整個工作表：第一列為表頭，完全空白的列略過
///
/// 錯誤以字串回傳，由呼叫端決定歸類（來源讀取或雲端檔案讀取）。
pub fn read_spreadsheet_rows(
    path: &Path,
    sheet_name: Option<&str>,
) -> std::result::Result<Vec<Row>, String> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "csv" => read_csv(path),
        "xlsx" | "xlsm" | "xls" => read_excel(path, sheet_name),
        other => Err(format!(
            "unsupported file type '{}' for {}",
            other,
            path.display()
        )),
    }
}

fn read_csv(path: &Path) -> std::result::Result<Vec<Row>, String> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| format!("cannot open {}: {}", path.display(), e))?;

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| format!("cannot read header of {}: {}", path.display(), e))?
        .iter()
        .map(|h| h.trim().trim_start_matches('\u{feff}').to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| format!("bad CSV row in {}: {}", path.display(), e))?;
        let cells = record.iter().map(|value| {
            if value.trim().is_empty() {
                CellValue::Empty
            } else {
                CellValue::text(value)
            }
        });
        if let Some(row) = build_row(&headers, cells) {
            rows.push(row);
        }
    }
    Ok(rows)
}

fn read_excel(path: &Path, sheet_name: Option<&str>) -> std::result::Result<Vec<Row>, String> {
    let mut workbook =
        open_workbook_auto(path).map_err(|e| format!("cannot open {}: {}", path.display(), e))?;

    let sheet = match sheet_name {
        Some(name) => name.to_string(),
        None => workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| format!("{} has no worksheets", path.display()))?,
    };

    let range = workbook
        .worksheet_range(&sheet)
        .map_err(|e| format!("cannot read sheet '{}' of {}: {}", sheet, path.display(), e))?;

    let mut lines = range.rows();
    let Some(header_line) = lines.next() else {
        return Ok(Vec::new());
    };
    let headers: Vec<String> = header_line
        .iter()
        .map(|cell| cell_value(cell).as_key_text())
        .collect();

    Ok(lines
        .filter_map(|line| build_row(&headers, line.iter().map(cell_value)))
        .collect())
}

/// 空白表頭的欄位不收；整列空白時回傳 None
fn build_row(headers: &[String], cells: impl Iterator<Item = CellValue>) -> Option<Row> {
    let row: Row = headers
        .iter()
        .zip(cells)
        .filter(|(header, _)| !header.is_empty())
        .map(|(header, value)| (header.clone(), value))
        .collect();

    if row.values().all(CellValue::is_blank) {
        None
    } else {
        Some(row)
    }
}

fn cell_value(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Empty,
        Data::String(s) if s.trim().is_empty() => CellValue::Empty,
        Data::String(s) => CellValue::text(s.as_str()),
        Data::Float(f) => CellValue::Number(*f),
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(dt) => from_excel_serial(dt.as_f64())
            .map(CellValue::DateTime)
            .unwrap_or(CellValue::Number(dt.as_f64())),
        Data::DateTimeIso(s) => NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
            .map(CellValue::DateTime)
            .unwrap_or_else(|_| CellValue::text(s.as_str())),
        Data::DurationIso(s) => CellValue::text(s.as_str()),
        Data::Error(e) => {
            tracing::debug!("Cell error {:?} read as empty", e);
            CellValue::Empty
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workbook::spec::CellStyle;
    use crate::workbook::{xlsx::write_workbook, Cell, Sheet, Workbook};
    use std::collections::HashMap;
    use std::fs::File;
    use tempfile::TempDir;

    fn source(name: &str, path: &str) -> SourceConfig {
        SourceConfig {
            name: name.to_string(),
            path: path.to_string(),
            sheet_name: None,
            condition_column: None,
            mapping: HashMap::from([("Phone".to_string(), "phone".to_string())]),
        }
    }

    #[tokio::test]
    async fn test_csv_keeps_leading_zeros_and_skips_blank_rows() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("a.csv"),
            "Phone,Name\n0501234567,Dana\n,\n035551234,\n",
        )
        .unwrap();

        let reader = SpreadsheetFileSource::new(dir.path());
        let rows = reader.read_rows(&source("a", "a.csv")).await.unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["Phone"], CellValue::text("0501234567"));
        assert_eq!(rows[1]["Name"], CellValue::Empty);
    }

    #[tokio::test]
    async fn test_xlsx_rows_keep_cell_types() {
        let dir = TempDir::new().unwrap();
        let mut sheet = Sheet::new("list", false);
        sheet.set(1, 0, Cell::value(CellValue::text("Phone"), CellStyle::Header));
        sheet.set(1, 1, Cell::value(CellValue::text("Debt"), CellStyle::Header));
        sheet.set(2, 0, Cell::value(CellValue::text("0501234567"), CellStyle::Default));
        sheet.set(2, 1, Cell::value(CellValue::Number(120.5), CellStyle::Default));
        let file = File::create(dir.path().join("b.xlsx")).unwrap();
        write_workbook(file, &Workbook::new(vec![sheet])).unwrap();

        let reader = SpreadsheetFileSource::new(dir.path());
        let rows = reader.read_rows(&source("b", "b.xlsx")).await.unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["Phone"], CellValue::text("0501234567"));
        assert_eq!(rows[0]["Debt"], CellValue::Number(120.5));
    }

    #[tokio::test]
    async fn test_missing_file_is_fetch_error_naming_the_source() {
        let dir = TempDir::new().unwrap();
        let reader = SpreadsheetFileSource::new(dir.path());

        let err = reader
            .read_rows(&source("branch-north", "missing.csv"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "FetchError");
        assert!(err.to_string().contains("branch-north"));
    }

    #[test]
    fn test_unsupported_extension() {
        let err = read_spreadsheet_rows(Path::new("list.txt"), None).unwrap_err();
        assert!(err.contains("unsupported file type"));
    }
}
