// Workbook model, the layout builder trait and rendering to a temporary artifact.

pub mod artifact;
pub mod auto_dialer;
pub mod filter;
pub mod intermediate;
pub mod spec;
pub mod xlsx;

use crate::core::filter::Correlation;
use crate::domain::model::{CallRecord, CellValue, CustomerRecord, Window};
use crate::utils::error::{AutoCallerError, Result};
use artifact::{ArtifactStore, PendingArtifact};
use chrono::NaiveDateTime;
use spec::{CallAttribute, CellStyle, ColumnSource, FormulaTemplate, WorkbookSpec};
use std::collections::{BTreeMap, HashMap};

pub use auto_dialer::AutoDialerLayout;
pub use filter::FilterLayout;
pub use intermediate::IntermediateLayout;

/// 表頭所在列，資料從下一列開始
pub const HEADER_ROW: u32 = 1;
pub const FIRST_DATA_ROW: u32 = 2;

const MIN_COLUMN_WIDTH: f64 = 10.0;
const MAX_COLUMN_WIDTH: f64 = 30.0;
// 14pt 粗體表頭相對 11pt 預設字型，希伯來字元再放寬 1.2 倍
const HEADER_WIDTH_FACTOR: f64 = 14.0 / 11.0 * 1.2;

#[derive(Debug, Clone, PartialEq)]
pub enum CellContent {
    Value(CellValue),
    /// 以 `=` 開頭的公式文字
    Formula(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub content: CellContent,
    pub style: CellStyle,
}

impl Cell {
    pub fn value(value: CellValue, style: CellStyle) -> Self {
        Self {
            content: CellContent::Value(value),
            style,
        }
    }

    pub fn formula(formula: impl Into<String>, style: CellStyle) -> Self {
        Self {
            content: CellContent::Formula(formula.into()),
            style,
        }
    }

    pub fn as_value(&self) -> Option<&CellValue> {
        match &self.content {
            CellContent::Value(v) => Some(v),
            CellContent::Formula(_) => None,
        }
    }

    pub fn as_formula(&self) -> Option<&str> {
        match &self.content {
            CellContent::Formula(f) => Some(f),
            CellContent::Value(_) => None,
        }
    }
}

/// 一個工作表；列號從 1 起算，欄位以 0 起算的索引保存
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub name: String,
    pub right_to_left: bool,
    widths: BTreeMap<usize, f64>,
    rows: BTreeMap<u32, BTreeMap<usize, Cell>>,
}

impl Sheet {
    pub fn new(name: impl Into<String>, right_to_left: bool) -> Self {
        Self {
            name: name.into(),
            right_to_left,
            widths: BTreeMap::new(),
            rows: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, row: u32, column: usize, cell: Cell) {
        self.rows.entry(row).or_default().insert(column, cell);
    }

    pub fn set_width(&mut self, column: usize, width: f64) {
        self.widths.insert(column, width);
    }

    /// 依表頭文字長度設定欄寬，限制在 [10, 30]
    pub fn fit_header(&mut self, column: usize, header: &str) {
        let width = (header.chars().count() as f64 * HEADER_WIDTH_FACTOR)
            .clamp(MIN_COLUMN_WIDTH, MAX_COLUMN_WIDTH);
        self.set_width(column, width);
    }

    pub fn cell(&self, row: u32, column: usize) -> Option<&Cell> {
        self.rows.get(&row).and_then(|cells| cells.get(&column))
    }

    pub fn row(&self, row: u32) -> Option<&BTreeMap<usize, Cell>> {
        self.rows.get(&row)
    }

    pub fn rows(&self) -> impl Iterator<Item = (u32, &BTreeMap<usize, Cell>)> {
        self.rows.iter().map(|(r, cells)| (*r, cells))
    }

    pub fn widths(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.widths.iter().map(|(c, w)| (*c, *w))
    }

    pub fn last_row(&self) -> u32 {
        self.rows.keys().next_back().copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Workbook {
    pub sheets: Vec<Sheet>,
}

impl Workbook {
    pub fn new(sheets: Vec<Sheet>) -> Self {
        Self { sheets }
    }

    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name == name)
    }
}

/// 一次執行的共用資訊；時間由呼叫端注入，檔名與摘要都從這裡取
#[derive(Debug, Clone, PartialEq)]
pub struct RunInfo {
    pub pipeline: String,
    pub started_at: NaiveDateTime,
    pub caller_id: Option<String>,
    pub customers_input: Option<String>,
    pub window: Option<Window>,
}

impl RunInfo {
    pub fn new(pipeline: impl Into<String>, started_at: NaiveDateTime) -> Self {
        Self {
            pipeline: pipeline.into(),
            started_at,
            caller_id: None,
            customers_input: None,
            window: None,
        }
    }
}

pub struct RenderInput<'a> {
    pub records: &'a [CustomerRecord],
    pub correlation: Option<&'a Correlation>,
    pub calls: &'a [CallRecord],
    pub run: &'a RunInfo,
}

impl<'a> RenderInput<'a> {
    pub fn records(records: &'a [CustomerRecord], run: &'a RunInfo) -> Self {
        Self {
            records,
            correlation: None,
            calls: &[],
            run,
        }
    }
}

/// 把客戶記錄排進固定欄位結構的版面
pub trait WorkbookBuilder {
    fn layout_name(&self) -> &str;
    fn folder_id(&self) -> &str;
    fn file_name_pattern(&self) -> &str;
    fn build(&self, input: &RenderInput<'_>) -> Result<Workbook>;
}

/// 建立活頁簿並寫入輸出目錄中新的暫存檔
pub fn render<B: WorkbookBuilder + ?Sized>(
    builder: &B,
    input: &RenderInput<'_>,
    store: &ArtifactStore,
) -> Result<PendingArtifact> {
    let workbook = builder.build(input)?;
    let file_name = ArtifactStore::file_name(builder.file_name_pattern(), input.run);
    store.write(builder.layout_name(), builder.folder_id(), &file_name, &workbook)
}

/// 識別鍵排第一，其他欄位依第一次出現的順序
pub(crate) fn field_names(key_field: &str, records: &[CustomerRecord]) -> Vec<String> {
    let mut fields = vec![key_field.to_string()];
    for record in records {
        for (name, _) in record.fields.iter() {
            if !fields.iter().any(|f| f == name) {
                fields.push(name.to_string());
            }
        }
    }
    fields
}

/// 預先解析好公式樣板的欄位
#[derive(Debug, Clone)]
pub(crate) struct ColumnPlan {
    pub index: usize,
    pub header: String,
    pub source: ColumnSource,
    pub style: CellStyle,
    pub formula: Option<FormulaTemplate>,
}

pub(crate) fn plan_columns(
    spec: &WorkbookSpec,
    extra_substitutions: &HashMap<String, String>,
) -> Result<Vec<ColumnPlan>> {
    let mut substitutions = spec.letters_by_id();
    substitutions.extend(extra_substitutions.iter().map(|(k, v)| (k.clone(), v.clone())));

    spec.columns
        .iter()
        .map(|column| {
            let formula = match &column.source {
                ColumnSource::Formula { template } => {
                    Some(FormulaTemplate::parse(template, &substitutions)?)
                }
                _ => None,
            };
            Ok(ColumnPlan {
                index: column.index(),
                header: column.header.clone(),
                source: column.source.clone(),
                style: column.style,
                formula,
            })
        })
        .collect()
}

/// 表頭列加上每筆記錄一列
pub(crate) fn fill_sheet(
    sheet: &mut Sheet,
    plans: &[ColumnPlan],
    input: &RenderInput<'_>,
) -> Result<()> {
    for plan in plans {
        // 沒有標題的欄位保持空白，欄寬用預設值
        if plan.header.is_empty() {
            continue;
        }
        sheet.set(
            HEADER_ROW,
            plan.index,
            Cell::value(CellValue::text(plan.header.clone()), CellStyle::Header),
        );
        sheet.fit_header(plan.index, &plan.header);
    }

    let first_row = FIRST_DATA_ROW;
    let last_row = HEADER_ROW + input.records.len() as u32;

    for (offset, record) in input.records.iter().enumerate() {
        let row = FIRST_DATA_ROW + offset as u32;
        for plan in plans {
            let cell = data_cell(plan, record, offset, row, first_row, last_row, input)?;
            sheet.set(row, plan.index, cell);
        }
    }
    Ok(())
}

fn data_cell(
    plan: &ColumnPlan,
    record: &CustomerRecord,
    offset: usize,
    row: u32,
    first_row: u32,
    last_row: u32,
    input: &RenderInput<'_>,
) -> Result<Cell> {
    let cell = match &plan.source {
        ColumnSource::Field { field } => {
            Cell::value(record.get(field).cloned().unwrap_or_default(), plan.style)
        }
        ColumnSource::Prefixed { field, prefix } => {
            let text = record.get(field).map(CellValue::as_key_text).unwrap_or_default();
            if text.is_empty() {
                Cell::value(CellValue::Empty, plan.style)
            } else {
                Cell::value(CellValue::text(format!("{}{}", prefix, text)), plan.style)
            }
        }
        ColumnSource::Sequence => Cell::value(CellValue::Number((offset + 1) as f64), plan.style),
        ColumnSource::Formula { .. } => {
            let template = plan.formula.as_ref().ok_or_else(|| {
                AutoCallerError::render(format!("column '{}' has no parsed formula", plan.header))
            })?;
            Cell::formula(template.expand(row, first_row, last_row), plan.style)
        }
        ColumnSource::Marker => {
            let correlation = require_correlation(input, &plan.header)?;
            let marker = correlation.get(&record.key).is_some_and(|r| r.marker);
            Cell::value(CellValue::Bool(marker), plan.style)
        }
        ColumnSource::MatchedCall { attribute } => {
            let correlation = require_correlation(input, &plan.header)?;
            let matched = correlation.get(&record.key).and_then(|r| r.matched.as_ref());
            matched_call_cell(matched, *attribute, plan.style)
        }
    };
    Ok(cell)
}

fn require_correlation<'a>(input: &RenderInput<'a>, header: &str) -> Result<&'a Correlation> {
    input.correlation.ok_or_else(|| {
        AutoCallerError::render(format!(
            "column '{}' needs correlation results but none were given",
            header
        ))
    })
}

fn matched_call_cell(call: Option<&CallRecord>, attribute: CallAttribute, style: CellStyle) -> Cell {
    let Some(call) = call else {
        return Cell::value(CellValue::Empty, style);
    };
    match attribute {
        CallAttribute::Id => Cell::value(CellValue::text(call.id.clone()), style),
        CallAttribute::StartedAt => Cell::value(CellValue::DateTime(call.started_at), CellStyle::Date),
        CallAttribute::Status => Cell::value(CellValue::text(call.status.clone()), style),
        CallAttribute::Duration => Cell::value(
            call.duration_seconds
                .map(|d| CellValue::Number(d as f64))
                .unwrap_or_default(),
            style,
        ),
        CallAttribute::Name => Cell::value(CellValue::text(call.name.clone()), style),
    }
}
