use crate::utils::error::{AutoCallerError, Result};
use crate::utils::validation::validate_column_letter;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

/// 欄位字母轉成 0 起算的欄位索引（A -> 0, AA -> 26）
pub fn column_index(letter: &str) -> Option<usize> {
    if letter.is_empty() || !letter.chars().all(|c| c.is_ascii_uppercase()) {
        return None;
    }
    letter
        .chars()
        .try_fold(0usize, |acc, c| {
            acc.checked_mul(26)?
                .checked_add((c as u8 - b'A') as usize + 1)
        })
        .map(|n| n - 1)
}

/// 0 起算的欄位索引轉回欄位字母
pub fn column_letter(index: usize) -> String {
    let mut n = index + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push((b'A' + rem as u8) as char);
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallAttribute {
    Id,
    StartedAt,
    Status,
    Duration,
    Name,
}

/// 欄位的內容來源
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ColumnSource {
    /// 原樣寫入記錄的欄位值
    Field { field: String },
    /// 固定前綴加上欄位文字，例如 `*1234`
    Prefixed { field: String, prefix: String },
    /// 資料列序號，從 1 開始
    Sequence,
    /// 公式樣板，每列展開 `{row}` 等佔位符
    Formula { template: String },
    /// 比對結果的 marker
    Marker,
    /// 最晚一通相符通話的屬性
    MatchedCall { attribute: CallAttribute },
}

impl ColumnSource {
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Field { field } | Self::Prefixed { field, .. } => Some(field),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Field { .. } => "field",
            Self::Prefixed { .. } => "prefixed",
            Self::Sequence => "sequence",
            Self::Formula { .. } => "formula",
            Self::Marker => "marker",
            Self::MatchedCall { .. } => "matched_call",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellStyle {
    #[default]
    Default,
    /// 表頭：粗體、自動換行
    Header,
    Date,
    /// 內容過長時不換行
    NoWrap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// 公式樣板引用此欄時使用的名稱，預設為欄位名稱
    #[serde(default)]
    pub id: Option<String>,
    pub letter: String,
    pub header: String,
    pub source: ColumnSource,
    #[serde(default)]
    pub style: CellStyle,
}

impl ColumnSpec {
    pub fn new(letter: impl Into<String>, header: impl Into<String>, source: ColumnSource) -> Self {
        Self {
            id: None,
            letter: letter.into(),
            header: header.into(),
            source,
            style: CellStyle::Default,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_style(mut self, style: CellStyle) -> Self {
        self.style = style;
        self
    }

    pub fn reference_id(&self) -> Option<&str> {
        self.id.as_deref().or_else(|| self.source.field())
    }

    pub fn index(&self) -> usize {
        column_index(&self.letter).unwrap_or_default()
    }
}

/// 一個工作表的欄位結構
#[derive(Debug, Clone, PartialEq)]
pub struct WorkbookSpec {
    pub sheet_name: String,
    pub right_to_left: bool,
    pub columns: Vec<ColumnSpec>,
}

impl WorkbookSpec {
    pub fn new(sheet_name: impl Into<String>, right_to_left: bool, columns: Vec<ColumnSpec>) -> Result<Self> {
        let spec = Self {
            sheet_name: sheet_name.into(),
            right_to_left,
            columns,
        };
        spec.check()?;
        Ok(spec)
    }

    fn check(&self) -> Result<()> {
        if self.sheet_name.trim().is_empty() || self.sheet_name.chars().count() > 31 {
            return Err(AutoCallerError::config(format!(
                "sheet name '{}' must be 1-31 characters",
                self.sheet_name
            )));
        }
        if self.columns.is_empty() {
            return Err(AutoCallerError::config(format!(
                "sheet '{}' has no columns",
                self.sheet_name
            )));
        }

        let mut letters = HashSet::new();
        let mut ids = HashSet::new();
        for column in &self.columns {
            validate_column_letter("column.letter", &column.letter)?;
            if !letters.insert(column.letter.as_str()) {
                return Err(AutoCallerError::config(format!(
                    "column letter {} is used twice in sheet '{}'",
                    column.letter, self.sheet_name
                )));
            }
            if let Some(id) = &column.id {
                if !ids.insert(id.as_str()) {
                    return Err(AutoCallerError::config(format!(
                        "column id '{}' is used twice in sheet '{}'",
                        id, self.sheet_name
                    )));
                }
            }
        }
        Ok(())
    }

    /// 樣板可引用的欄位 id -> 欄位字母
    pub fn letters_by_id(&self) -> HashMap<String, String> {
        self.columns
            .iter()
            .filter_map(|c| c.reference_id().map(|id| (id.to_string(), c.letter.clone())))
            .collect()
    }

    pub fn column_by_id(&self, id: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.reference_id() == Some(id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Row,
    FirstRow,
    LastRow,
    Text(String),
}

/// 解析過的公式樣板；未知佔位符在建立時就回報設定錯誤
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormulaTemplate {
    segments: Vec<Segment>,
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // 只比對以字母開頭的佔位符，`\d{4}` 這類正規式量詞維持原樣
    RE.get_or_init(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid placeholder regex"))
}

impl FormulaTemplate {
    /// `substitutions` 提供欄位 id 與其他固定名稱（例如 `calls_sheet`）的替換文字
    pub fn parse(template: &str, substitutions: &HashMap<String, String>) -> Result<Self> {
        let mut segments = Vec::new();
        let mut last = 0;

        for caps in placeholder_regex().captures_iter(template) {
            let whole = caps.get(0).expect("group 0 always present");
            if whole.start() > last {
                segments.push(Segment::Literal(template[last..whole.start()].to_string()));
            }
            let name = &caps[1];
            let segment = match name {
                "row" => Segment::Row,
                "first_row" => Segment::FirstRow,
                "last_row" => Segment::LastRow,
                other => match substitutions.get(other) {
                    Some(text) => Segment::Text(text.clone()),
                    None => {
                        return Err(AutoCallerError::config(format!(
                            "unknown placeholder '{{{}}}' in formula template '{}'",
                            other, template
                        )))
                    }
                },
            };
            segments.push(segment);
            last = whole.end();
        }
        if last < template.len() {
            segments.push(Segment::Literal(template[last..].to_string()));
        }

        Ok(Self { segments })
    }

    pub fn expand(&self, row: u32, first_row: u32, last_row: u32) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) | Segment::Text(s) => out.push_str(s),
                Segment::Row => out.push_str(&row.to_string()),
                Segment::FirstRow => out.push_str(&first_row.to_string()),
                Segment::LastRow => out.push_str(&last_row.to_string()),
            }
        }
        out
    }
}

/// 工作表名稱放進公式時需要加上單引號
pub fn quote_sheet_name(name: &str) -> String {
    format!("'{}'", name.replace('\'', "''"))
}
