use crate::core::normalize::PhoneNormalizer;
use crate::domain::model::{CellValue, CustomerRecord, Fields, Provenance, Row};
use crate::utils::error::{AutoCallerError, Result};
use std::collections::{HashMap, HashSet};

/// 原始表頭 -> 標準欄位名稱；未對應的欄位直接丟棄
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMapping(HashMap<String, String>);

impl ColumnMapping {
    pub fn new<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(native, canonical)| (native.into().trim().to_string(), canonical.into()))
                .collect(),
        )
    }

    pub fn canonical(&self, native_header: &str) -> Option<&str> {
        self.0.get(native_header.trim()).map(String::as_str)
    }

    pub fn targets(&self, canonical: &str) -> bool {
        self.0.values().any(|target| target == canonical)
    }
}

/// 一個來源讀到的所有列
#[derive(Debug, Clone)]
pub struct SourceRows {
    pub name: String,
    pub rows: Vec<Row>,
    pub mapping: ColumnMapping,
    /// 只保留此原始欄位含有數字的列
    pub condition_column: Option<String>,
}

impl SourceRows {
    pub fn new(name: impl Into<String>, rows: Vec<Row>, mapping: ColumnMapping) -> Self {
        Self {
            name: name.into(),
            rows,
            mapping,
            condition_column: None,
        }
    }

    pub fn with_condition_column(mut self, column: Option<String>) -> Self {
        self.condition_column = column;
        self
    }
}

#[derive(Debug, Clone)]
pub struct MergeSettings {
    pub key_field: String,
    pub required_fields: Vec<String>,
    pub immutable_fields: Vec<String>,
    pub normalizer: Option<PhoneNormalizer>,
}

#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    pub records: Vec<CustomerRecord>,
    pub skipped: usize,
}

/// 將多個來源依識別鍵合併成標準客戶記錄
///
/// 後面的來源覆寫前面的欄位值；識別鍵與不可變欄位保留第一次看到的值。
/// 輸出順序為每個鍵第一次出現的順序。
pub struct RecordMerger {
    settings: MergeSettings,
}

impl RecordMerger {
    pub fn new(settings: MergeSettings) -> Self {
        Self { settings }
    }

    pub fn key_field(&self) -> &str {
        &self.settings.key_field
    }

    pub fn merge(&self, sources: &[SourceRows]) -> Result<MergeOutcome> {
        self.check_schema(sources)?;

        let immutable: HashSet<&str> = self
            .settings
            .immutable_fields
            .iter()
            .map(String::as_str)
            .collect();

        let mut records: Vec<CustomerRecord> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut skipped = 0usize;

        for source in sources {
            let mut kept = 0usize;
            let before = skipped;

            for (row_idx, row) in source.rows.iter().enumerate() {
                if !self.passes_condition(source, row) {
                    skipped += 1;
                    continue;
                }

                let mut fields = self.translate(row, &source.mapping);
                let Some(key) = self.identity_key(&fields) else {
                    skipped += 1;
                    continue;
                };
                fields.insert(self.settings.key_field.clone(), CellValue::Text(key.clone()));

                // 表頭在第 1 列，資料從第 2 列開始
                let provenance = Provenance {
                    source: source.name.clone(),
                    row: row_idx + 2,
                };
                kept += 1;

                match index.get(&key) {
                    Some(&pos) => {
                        let existing = &mut records[pos];
                        for (name, value) in fields.iter() {
                            if value.is_blank() {
                                continue;
                            }
                            let first_wins =
                                name == self.settings.key_field || immutable.contains(name);
                            let already_set =
                                existing.fields.get(name).is_some_and(|v| !v.is_blank());
                            if first_wins && already_set {
                                continue;
                            }
                            tracing::debug!("🔁 {} overrides '{}' for key {}", source.name, name, key);
                            existing.fields.insert(name, value.clone());
                        }
                        existing.provenance.push(provenance);
                    }
                    None => {
                        index.insert(key.clone(), records.len());
                        records.push(CustomerRecord {
                            key,
                            fields,
                            provenance: vec![provenance],
                        });
                    }
                }
            }

            tracing::info!(
                "📥 Source '{}': {} rows read, {} kept, {} skipped",
                source.name,
                source.rows.len(),
                kept,
                skipped - before
            );
        }

        tracing::info!(
            "🔗 Merged {} customers from {} sources ({} rows skipped)",
            records.len(),
            sources.len(),
            skipped
        );

        Ok(MergeOutcome { records, skipped })
    }

    fn check_schema(&self, sources: &[SourceRows]) -> Result<()> {
        let required = std::iter::once(&self.settings.key_field)
            .chain(self.settings.required_fields.iter());

        for field in required {
            if !sources.iter().any(|s| s.mapping.targets(field)) {
                return Err(AutoCallerError::merge(format!(
                    "required field '{}' is not mapped by any source",
                    field
                )));
            }
        }
        Ok(())
    }

    fn passes_condition(&self, source: &SourceRows, row: &Row) -> bool {
        let Some(column) = &source.condition_column else {
            return true;
        };
        row.iter()
            .find(|(header, _)| header.trim() == column.trim())
            .is_some_and(|(_, value)| value.has_digit())
    }

    fn translate(&self, row: &Row, mapping: &ColumnMapping) -> Fields {
        // HashMap 的迭代順序不固定，依標準欄位名稱排序讓輸出可重現
        let mut mapped: Vec<(&str, &CellValue)> = row
            .iter()
            .filter_map(|(header, value)| mapping.canonical(header).map(|c| (c, value)))
            .collect();
        mapped.sort_by(|a, b| {
            let a_key = a.0 != self.settings.key_field;
            let b_key = b.0 != self.settings.key_field;
            a_key.cmp(&b_key).then_with(|| a.0.cmp(b.0))
        });

        let mut fields = Fields::new();
        for (canonical, value) in mapped {
            // 兩個原始欄位對應到同一個標準欄位時，以非空值為準
            if value.is_blank() && fields.contains(canonical) {
                continue;
            }
            fields.insert(canonical, value.clone());
        }
        fields
    }

    fn identity_key(&self, fields: &Fields) -> Option<String> {
        let raw = fields.get(&self.settings.key_field)?.as_key_text();
        if raw.is_empty() {
            return None;
        }
        match &self.settings.normalizer {
            Some(normalizer) => normalizer.normalize(&raw),
            None => Some(raw),
        }
    }
}
