use super::artifact::{FILE_DATE_FORMAT, FILE_TIME_FORMAT};
use super::spec::{
    column_index, column_letter, quote_sheet_name, CallAttribute, CellStyle, ColumnSource,
    ColumnSpec, WorkbookSpec,
};
use super::{
    field_names, fill_sheet, plan_columns, Cell, ColumnPlan, RenderInput, Sheet, Workbook,
    WorkbookBuilder, FIRST_DATA_ROW, HEADER_ROW,
};
use crate::config::{FilterLayoutConfig, MarkerMode};
use crate::core::filter::FilterPredicate;
use crate::domain::model::{CallRecord, CellValue, CustomerRecord};
use crate::utils::error::{AutoCallerError, Result};
use std::collections::{HashMap, HashSet};

pub const LAYOUT_NAME: &str = "filter";

/// 預設篩選公式會引用的欄位 id
pub const STATUS_COLUMN_ID: &str = "call_status";
pub const DURATION_COLUMN_ID: &str = "call_duration";

const CALL_HEADERS: [&str; 5] = ["caller_id", "start", "status", "duration", "name"];

/// 篩選條件組成的預設公式：有通過條件的通話則留空，否則列出客戶識別鍵
///
/// 有狀態或秒數條件時，公式引用 `call_status` / `call_duration` 欄；
/// 版面沒有這兩欄時會自動補上。
pub fn default_filter_template(predicate: &FilterPredicate) -> String {
    let mut conditions = vec!["{marker}{row}".to_string()];
    if !predicate.accepted_statuses.is_empty() {
        let options: Vec<String> = predicate
            .accepted_statuses
            .iter()
            .map(|s| format!("{{{}}}{{row}}=\"{}\"", STATUS_COLUMN_ID, s.replace('"', "\"\"")))
            .collect();
        conditions.push(format!("OR({})", options.join(",")));
    }
    if predicate.min_duration_seconds > 0 {
        conditions.push(format!(
            "{{{}}}{{row}}>={}",
            DURATION_COLUMN_ID, predicate.min_duration_seconds
        ));
    }

    let test = if conditions.len() == 1 {
        conditions.remove(0)
    } else {
        format!("AND({})", conditions.join(","))
    };
    format!("=IF({},\"\",{{key}}{{row}})", test)
}

/// 依序分配欄位字母，跳過已占用的欄
struct LetterAllocator {
    taken: HashSet<usize>,
    next: usize,
}

impl LetterAllocator {
    fn allocate(&mut self) -> String {
        while self.taken.contains(&self.next) {
            self.next += 1;
        }
        self.taken.insert(self.next);
        self.next += 1;
        column_letter(self.next - 1)
    }
}

/// 篩選檔：客戶欄位、marker 欄、篩選公式欄，外加通話與摘要工作表
///
/// 未設定欄位時輸出所有標準欄位（識別鍵在前），字母跳過 marker 與篩選欄。
pub struct FilterLayout {
    config: FilterLayoutConfig,
    key_field: String,
    filter_template: String,
    /// 預設公式需要、設定裡卻沒有的通話欄位
    call_columns: Vec<(&'static str, &'static str, CallAttribute)>,
}

impl FilterLayout {
    pub fn new(
        config: &FilterLayoutConfig,
        key_field: &str,
        predicate: &FilterPredicate,
    ) -> Result<Self> {
        let mut call_columns = Vec::new();
        if config.filter_column.template.is_none() {
            if !predicate.accepted_statuses.is_empty() {
                call_columns.push((STATUS_COLUMN_ID, "status", CallAttribute::Status));
            }
            if predicate.min_duration_seconds > 0 {
                call_columns.push((DURATION_COLUMN_ID, "duration", CallAttribute::Duration));
            }
        }

        let layout = Self {
            config: config.clone(),
            key_field: key_field.to_string(),
            filter_template: config
                .filter_column
                .template
                .clone()
                .unwrap_or_else(|| default_filter_template(predicate)),
            call_columns,
        };
        // 提早檢查欄位字母、識別鍵欄位與公式樣板
        layout.plan(&[])?;
        Ok(layout)
    }

    fn columns_for(&self, records: &[CustomerRecord]) -> Vec<ColumnSpec> {
        let reserved: HashSet<usize> = [&self.config.marker.letter, &self.config.filter_column.letter]
            .into_iter()
            .filter_map(|letter| column_index(letter))
            .collect();

        let (mut columns, mut letters) = if self.config.columns.is_empty() {
            let mut letters = LetterAllocator {
                taken: reserved,
                next: 0,
            };
            let columns: Vec<ColumnSpec> = field_names(&self.key_field, records)
                .into_iter()
                .map(|field| {
                    ColumnSpec::new(letters.allocate(), field.clone(), ColumnSource::Field { field })
                })
                .collect();
            (columns, letters)
        } else {
            let columns = self.config.columns.clone();
            let mut taken = reserved;
            taken.extend(columns.iter().filter_map(|c| column_index(&c.letter)));
            let next = taken.iter().max().map_or(0, |last| last + 1);
            (columns, LetterAllocator { taken, next })
        };

        for (id, header, attribute) in &self.call_columns {
            if columns.iter().any(|c| c.id.as_deref() == Some(*id)) {
                continue;
            }
            columns.push(
                ColumnSpec::new(
                    letters.allocate(),
                    *header,
                    ColumnSource::MatchedCall {
                        attribute: *attribute,
                    },
                )
                .with_id(*id),
            );
        }

        let marker_source = match self.config.marker.mode {
            MarkerMode::Literal => ColumnSource::Marker,
            MarkerMode::Formula => ColumnSource::Formula {
                template: "=COUNTIF({calls_sheet}!$A:$A,{key}{row})>0".to_string(),
            },
        };
        columns.push(
            ColumnSpec::new(&self.config.marker.letter, &self.config.marker.header, marker_source)
                .with_id("marker"),
        );
        columns.push(
            ColumnSpec::new(
                &self.config.filter_column.letter,
                &self.config.filter_column.header,
                ColumnSource::Formula {
                    template: self.filter_template.clone(),
                },
            )
            .with_id("filter"),
        );
        columns
    }

    fn plan(&self, records: &[CustomerRecord]) -> Result<(WorkbookSpec, Vec<ColumnPlan>)> {
        let columns = self.columns_for(records);
        let key_source = ColumnSource::Field {
            field: self.key_field.clone(),
        };
        let key_letter = columns
            .iter()
            .find(|c| c.source == key_source)
            .map(|c| c.letter.clone())
            .ok_or_else(|| {
                AutoCallerError::config(format!(
                    "filter layout needs a field column for the key '{}'",
                    self.key_field
                ))
            })?;

        let spec = WorkbookSpec::new(&self.config.sheet_name, self.config.right_to_left, columns)?;
        let extra: HashMap<String, String> = [
            ("key".to_string(), key_letter),
            (
                "calls_sheet".to_string(),
                quote_sheet_name(&self.config.calls_sheet_name),
            ),
        ]
        .into_iter()
        .collect();
        let plans = plan_columns(&spec, &extra)?;
        Ok((spec, plans))
    }

    fn filter_letter(&self) -> &str {
        &self.config.filter_column.letter
    }

    fn calls_sheet(&self, input: &RenderInput<'_>) -> Sheet {
        let mut sheet = Sheet::new(&self.config.calls_sheet_name, self.config.right_to_left);
        for (idx, header) in CALL_HEADERS.iter().enumerate() {
            sheet.set(
                HEADER_ROW,
                idx,
                Cell::value(CellValue::text(*header), CellStyle::Header),
            );
            sheet.fit_header(idx, header);
        }

        let window = input.correlation.map(|c| *c.window()).or(input.run.window);
        let calls = input
            .calls
            .iter()
            .filter(|call| window.map_or(true, |w| w.contains(call.started_at)));

        for (offset, call) in calls.enumerate() {
            let row = FIRST_DATA_ROW + offset as u32;
            for (idx, value) in call_row(call).into_iter().enumerate() {
                sheet.set(row, idx, Cell::value(value, CellStyle::NoWrap));
            }
        }
        sheet
    }

    fn summary_sheet(&self, input: &RenderInput<'_>, last_row: u32) -> Sheet {
        let run = input.run;
        let mut sheet = Sheet::new(&self.config.summary_sheet_name, self.config.right_to_left);

        let values = [
            run.started_at.format(FILE_DATE_FORMAT).to_string(),
            run.started_at.format(FILE_TIME_FORMAT).to_string(),
            run.customers_input.clone().unwrap_or_default(),
            run.caller_id.clone().unwrap_or_default(),
        ];
        let longest = values.iter().map(|v| v.chars().count()).max().unwrap_or(0);
        for (offset, value) in values.into_iter().enumerate() {
            sheet.set(offset as u32 + 1, 0, Cell::value(CellValue::Text(value), CellStyle::Default));
        }
        sheet.set(
            5,
            0,
            Cell::value(
                CellValue::text(self.config.filter_column.header.clone()),
                CellStyle::Header,
            ),
        );

        let main = quote_sheet_name(&self.config.sheet_name);
        let letter = self.filter_letter();
        let last = last_row.max(FIRST_DATA_ROW);
        let range = format!("{main}!{letter}{FIRST_DATA_ROW}:{letter}{last}");
        // 動態陣列函式在檔案中需要 _xlfn 前綴
        sheet.set(
            6,
            0,
            Cell::formula(
                format!(
                    "=_xlfn._xlws.SORT(_xlfn.UNIQUE(_xlfn._xlws.FILTER({range},{range}<>\"\")))"
                ),
                CellStyle::Default,
            ),
        );
        sheet.set_width(0, (longest + 2).max(10) as f64);
        sheet
    }
}

fn call_row(call: &CallRecord) -> [CellValue; 5] {
    [
        CellValue::text(call.caller_id.clone().unwrap_or_else(|| call.raw_caller_id.clone())),
        CellValue::DateTime(call.started_at),
        CellValue::text(call.status.clone()),
        call.duration_seconds
            .map(|d| CellValue::Number(d as f64))
            .unwrap_or_default(),
        CellValue::text(call.name.clone()),
    ]
}

impl WorkbookBuilder for FilterLayout {
    fn layout_name(&self) -> &str {
        LAYOUT_NAME
    }

    fn folder_id(&self) -> &str {
        &self.config.folder_id
    }

    fn file_name_pattern(&self) -> &str {
        &self.config.file_name_pattern
    }

    fn build(&self, input: &RenderInput<'_>) -> Result<Workbook> {
        let (spec, plans) = self.plan(input.records)?;
        let mut main = Sheet::new(&spec.sheet_name, spec.right_to_left);
        fill_sheet(&mut main, &plans, input)?;
        let last_row = main.last_row();

        let calls = self.calls_sheet(input);
        let summary = self.summary_sheet(input, last_row);

        tracing::debug!(
            "🧾 Filter layout: {} customers, {} calls",
            input.records.len(),
            calls.last_row().saturating_sub(HEADER_ROW)
        );
        Ok(Workbook::new(vec![main, calls, summary]))
    }
}
