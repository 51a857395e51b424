use super::spec::{CellStyle, ColumnSource, ColumnSpec, WorkbookSpec};
use super::{fill_sheet, plan_columns, ColumnPlan, RenderInput, Sheet, Workbook, WorkbookBuilder};
use crate::config::LayoutConfig;
use crate::utils::error::{AutoCallerError, Result};
use std::collections::HashMap;

pub const LAYOUT_NAME: &str = "auto_dialer";

const DEFAULT_PLAIN_HEADER: &str = "מספרים בלי כוכבית";
const DEFAULT_STARRED_HEADER: &str = "מספרים עם כוכבית";

/// 撥號系統匯入檔：號碼、加上 `*` 的號碼、序號
pub fn default_columns(key_field: &str) -> Vec<ColumnSpec> {
    vec![
        ColumnSpec::new(
            "A",
            DEFAULT_PLAIN_HEADER,
            ColumnSource::Field {
                field: key_field.to_string(),
            },
        )
        .with_id("key"),
        ColumnSpec::new(
            "B",
            DEFAULT_STARRED_HEADER,
            ColumnSource::Prefixed {
                field: key_field.to_string(),
                prefix: "*".to_string(),
            },
        )
        .with_id("starred"),
        ColumnSpec::new("C", "", ColumnSource::Sequence).with_style(CellStyle::NoWrap),
    ]
}

pub struct AutoDialerLayout {
    config: LayoutConfig,
    spec: WorkbookSpec,
    plans: Vec<ColumnPlan>,
}

impl AutoDialerLayout {
    pub fn new(config: &LayoutConfig, key_field: &str) -> Result<Self> {
        let columns = if config.columns.is_empty() {
            default_columns(key_field)
        } else {
            config.columns.clone()
        };

        if let Some(column) = columns
            .iter()
            .find(|c| matches!(c.source, ColumnSource::Marker | ColumnSource::MatchedCall { .. }))
        {
            return Err(AutoCallerError::config(format!(
                "auto dialer layout has no call data, column {} cannot be '{}'",
                column.letter,
                column.source.kind_name()
            )));
        }

        let spec = WorkbookSpec::new(&config.sheet_name, config.right_to_left, columns)?;
        let plans = plan_columns(&spec, &HashMap::new())?;

        Ok(Self {
            config: config.clone(),
            spec,
            plans,
        })
    }

    pub fn spec(&self) -> &WorkbookSpec {
        &self.spec
    }
}

impl WorkbookBuilder for AutoDialerLayout {
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
        let mut sheet = Sheet::new(&self.spec.sheet_name, self.spec.right_to_left);
        fill_sheet(&mut sheet, &self.plans, input)?;
        Ok(Workbook::new(vec![sheet]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{CellValue, CustomerRecord, Fields, Provenance};
    use crate::workbook::RunInfo;
    use chrono::NaiveDate;

    fn config(columns: Vec<ColumnSpec>) -> LayoutConfig {
        LayoutConfig {
            folder_id: "auto".to_string(),
            file_name_pattern: "auto dialer {date}".to_string(),
            sheet_name: "dialer".to_string(),
            right_to_left: true,
            columns,
        }
    }

    fn records() -> Vec<CustomerRecord> {
        ["1234", "5678"]
            .iter()
            .map(|key| CustomerRecord {
                key: key.to_string(),
                fields: [("code", CellValue::text(*key))].into_iter().collect::<Fields>(),
                provenance: vec![Provenance {
                    source: "s".to_string(),
                    row: 2,
                }],
            })
            .collect()
    }

    #[test]
    fn test_default_layout_writes_number_starred_number_and_index() {
        let layout = AutoDialerLayout::new(&config(vec![]), "code").unwrap();
        let records = records();
        let run = RunInfo::new(
            "customers_import",
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap(),
        );

        let workbook = layout.build(&RenderInput::records(&records, &run)).unwrap();
        let sheet = &workbook.sheets[0];

        assert_eq!(sheet.cell(1, 0).unwrap().as_value(), Some(&CellValue::text(DEFAULT_PLAIN_HEADER)));
        assert!(sheet.cell(1, 2).is_none());
        assert_eq!(sheet.cell(3, 0).unwrap().as_value(), Some(&CellValue::text("5678")));
        assert_eq!(sheet.cell(3, 1).unwrap().as_value(), Some(&CellValue::text("*5678")));
        assert_eq!(sheet.cell(3, 2).unwrap().as_value(), Some(&CellValue::Number(2.0)));
        // 星號欄是文字，不是公式
        assert!(sheet.cell(2, 1).unwrap().as_formula().is_none());
    }

    #[test]
    fn test_marker_column_is_rejected() {
        let columns = vec![ColumnSpec::new("A", "Called", ColumnSource::Marker)];
        let err = AutoDialerLayout::new(&config(columns), "code").err().unwrap();
        assert_eq!(err.kind(), "ConfigError");
    }
}
