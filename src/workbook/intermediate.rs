use super::spec::{column_letter, ColumnSource, ColumnSpec, WorkbookSpec};
use super::{field_names, fill_sheet, plan_columns, RenderInput, Sheet, Workbook, WorkbookBuilder};
use crate::config::LayoutConfig;
use crate::domain::model::CustomerRecord;
use crate::utils::error::{AutoCallerError, Result};
use std::collections::HashMap;

pub const LAYOUT_NAME: &str = "intermediate";

/// 中繼檔：標準欄位原樣輸出，之後建立篩選檔時再讀回來
pub struct IntermediateLayout {
    config: LayoutConfig,
    key_field: String,
}

impl IntermediateLayout {
    pub fn new(config: &LayoutConfig, key_field: &str) -> Result<Self> {
        if let Some(column) = config
            .columns
            .iter()
            .find(|c| !matches!(c.source, ColumnSource::Field { .. }))
        {
            return Err(AutoCallerError::config(format!(
                "intermediate layout only takes field columns, column {} is '{}'",
                column.letter,
                column.source.kind_name()
            )));
        }
        if !config.columns.is_empty() {
            // 提早檢查欄位字母與重複
            WorkbookSpec::new(&config.sheet_name, config.right_to_left, config.columns.clone())?;
        }

        Ok(Self {
            config: config.clone(),
            key_field: key_field.to_string(),
        })
    }

    /// 未設定欄位時，識別鍵在第一欄，其他欄位依第一次出現的順序排列
    pub fn columns_for(&self, records: &[CustomerRecord]) -> Vec<ColumnSpec> {
        if !self.config.columns.is_empty() {
            return self.config.columns.clone();
        }

        field_names(&self.key_field, records)
            .into_iter()
            .enumerate()
            .map(|(idx, field)| {
                ColumnSpec::new(
                    column_letter(idx),
                    field.clone(),
                    ColumnSource::Field { field },
                )
            })
            .collect()
    }

    /// 讀回中繼檔時使用的表頭 -> 標準欄位對應
    pub fn read_back_mapping(&self) -> HashMap<String, String> {
        self.config
            .columns
            .iter()
            .filter_map(|c| c.source.field().map(|f| (c.header.clone(), f.to_string())))
            .collect()
    }

    pub fn has_configured_columns(&self) -> bool {
        !self.config.columns.is_empty()
    }

    pub fn sheet_name(&self) -> &str {
        &self.config.sheet_name
    }
}

impl WorkbookBuilder for IntermediateLayout {
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
        let spec = WorkbookSpec::new(
            &self.config.sheet_name,
            self.config.right_to_left,
            self.columns_for(input.records),
        )?;
        let plans = plan_columns(&spec, &HashMap::new())?;

        let mut sheet = Sheet::new(&spec.sheet_name, spec.right_to_left);
        fill_sheet(&mut sheet, &plans, input)?;

        tracing::debug!(
            "🧾 Intermediate layout: {} rows x {} columns",
            input.records.len(),
            plans.len()
        );
        Ok(Workbook::new(vec![sheet]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{CellValue, Fields, Provenance};
    use crate::workbook::RunInfo;
    use chrono::NaiveDate;

    fn layout(columns: Vec<ColumnSpec>) -> LayoutConfig {
        LayoutConfig {
            folder_id: "intermediate".to_string(),
            file_name_pattern: "customers {date}".to_string(),
            sheet_name: "customers".to_string(),
            right_to_left: true,
            columns,
        }
    }

    fn record(key: &str, extra: &[(&str, CellValue)]) -> CustomerRecord {
        let mut fields = Fields::new();
        fields.insert("phone", CellValue::text(key));
        for (name, value) in extra {
            fields.insert(*name, value.clone());
        }
        CustomerRecord {
            key: key.to_string(),
            fields,
            provenance: vec![Provenance {
                source: "s".to_string(),
                row: 2,
            }],
        }
    }

    #[test]
    fn test_passthrough_columns_follow_first_seen_order() {
        let layout = IntermediateLayout::new(&layout(vec![]), "phone").unwrap();
        let records = vec![
            record("1", &[("name", CellValue::text("Dana"))]),
            record("2", &[("city", CellValue::text("Haifa"))]),
        ];

        let columns = layout.columns_for(&records);
        let headers: Vec<&str> = columns.iter().map(|c| c.header.as_str()).collect();
        assert_eq!(headers, vec!["phone", "name", "city"]);
        assert_eq!(columns[2].letter, "C");
    }

    #[test]
    fn test_values_are_written_verbatim() {
        let layout = IntermediateLayout::new(&layout(vec![]), "phone").unwrap();
        let records = vec![record("1", &[("score", CellValue::Number(7.5))])];
        let run = RunInfo::new(
            "customers_import",
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap(),
        );

        let workbook = layout.build(&RenderInput::records(&records, &run)).unwrap();
        let sheet = workbook.sheet("customers").unwrap();
        assert_eq!(sheet.cell(2, 1).unwrap().as_value(), Some(&CellValue::Number(7.5)));
        assert!(sheet.right_to_left);
    }

    #[test]
    fn test_formula_columns_are_rejected() {
        let columns = vec![ColumnSpec::new(
            "A",
            "x",
            ColumnSource::Formula {
                template: "=1".to_string(),
            },
        )];
        let err = IntermediateLayout::new(&layout(columns), "phone").err().unwrap();
        assert_eq!(err.kind(), "ConfigError");
    }
}
