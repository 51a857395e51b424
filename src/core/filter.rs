use crate::config::FilterPredicateConfig;
use crate::core::normalize::PhoneNormalizer;
use crate::domain::model::{CallRecord, CustomerRecord, Window};
use std::collections::HashMap;

/// 命中通話之外的第二道條件：通話狀態與最短通話秒數
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterPredicate {
    pub accepted_statuses: Vec<String>,
    pub min_duration_seconds: u64,
}

impl FilterPredicate {
    pub fn from_config(config: &FilterPredicateConfig) -> Self {
        Self {
            accepted_statuses: config.accepted_statuses.clone(),
            min_duration_seconds: config.min_duration_seconds,
        }
    }

    pub fn accepts(&self, call: &CallRecord) -> bool {
        let status_ok = self.accepted_statuses.is_empty()
            || self
                .accepted_statuses
                .iter()
                .any(|s| s.eq_ignore_ascii_case(call.status.trim()));
        let duration_ok = self.min_duration_seconds == 0
            || call
                .duration_seconds
                .is_some_and(|d| d >= self.min_duration_seconds);
        status_ok && duration_ok
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationResult {
    /// 時間窗內至少有一通相符的通話
    pub marker: bool,
    /// 時間最晚的相符通話
    pub matched: Option<CallRecord>,
    pub match_count: usize,
    pub passes_filter: bool,
}

impl CorrelationResult {
    fn unmatched() -> Self {
        Self {
            marker: false,
            matched: None,
            match_count: 0,
            passes_filter: false,
        }
    }
}

/// 一次比對的結果，依客戶順序保存
#[derive(Debug, Clone, PartialEq)]
pub struct Correlation {
    window: Window,
    order: Vec<String>,
    results: HashMap<String, CorrelationResult>,
}

impl Correlation {
    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn get(&self, key: &str) -> Option<&CorrelationResult> {
        self.results.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CorrelationResult)> {
        self.order
            .iter()
            .filter_map(|key| self.results.get(key).map(|r| (key.as_str(), r)))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn matched_count(&self) -> usize {
        self.results.values().filter(|r| r.marker).count()
    }

    /// 沒有通過篩選的客戶（需要再撥的名單），依客戶順序
    pub fn missing_keys(&self) -> Vec<String> {
        self.iter()
            .filter(|(_, r)| !r.passes_filter)
            .map(|(k, _)| k.to_string())
            .collect()
    }
}

pub struct FilterEngine {
    normalizer: PhoneNormalizer,
    predicate: FilterPredicate,
}

impl FilterEngine {
    pub fn new(normalizer: PhoneNormalizer, predicate: FilterPredicate) -> Self {
        Self {
            normalizer,
            predicate,
        }
    }

    pub fn predicate(&self) -> &FilterPredicate {
        &self.predicate
    }

    /// 依正規化後的號碼與半開時間窗比對客戶與通話
    ///
    /// 沒有相符通話的客戶仍會出現在結果中（marker = false）。
    pub fn correlate(
        &self,
        customers: &[CustomerRecord],
        calls: &[CallRecord],
        window: Window,
    ) -> Correlation {
        let mut by_caller: HashMap<String, Vec<&CallRecord>> = HashMap::new();
        let mut in_window = 0usize;
        for call in calls {
            if !window.contains(call.started_at) {
                continue;
            }
            in_window += 1;
            if let Some(caller) = self.normalizer.normalize(&call.raw_caller_id) {
                by_caller.entry(caller).or_default().push(call);
            }
        }

        let mut order = Vec::with_capacity(customers.len());
        let mut results = HashMap::with_capacity(customers.len());

        for customer in customers {
            let result = match self
                .normalizer
                .normalize(&customer.key)
                .and_then(|key| by_caller.get(&key))
            {
                Some(matches) => {
                    // max_by_key 在時間相同時取最後一筆，即較晚取得的通話
                    let latest = matches.iter().copied().max_by_key(|c| c.started_at);
                    let passes_filter = latest.is_some_and(|c| self.predicate.accepts(c));
                    CorrelationResult {
                        marker: true,
                        matched: latest.cloned(),
                        match_count: matches.len(),
                        passes_filter,
                    }
                }
                None => CorrelationResult::unmatched(),
            };

            if results.insert(customer.key.clone(), result).is_none() {
                order.push(customer.key.clone());
            }
        }

        let correlation = Correlation {
            window,
            order,
            results,
        };

        tracing::info!(
            "📞 Correlated {} customers with {} calls in window {}: {} matched",
            correlation.len(),
            in_window,
            window,
            correlation.matched_count()
        );

        correlation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{CellValue, Fields, Provenance};
    use chrono::{NaiveDate, NaiveDateTime};

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 12, 28)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn window() -> Window {
        Window::new(at(0, 0), at(23, 59)).unwrap()
    }

    fn customer(key: &str) -> CustomerRecord {
        CustomerRecord {
            key: key.to_string(),
            fields: [("id", CellValue::text(key))].into_iter().collect::<Fields>(),
            provenance: vec![Provenance {
                source: "test".to_string(),
                row: 2,
            }],
        }
    }

    fn call(id: &str, caller: &str, started_at: NaiveDateTime, status: &str) -> CallRecord {
        CallRecord {
            id: id.to_string(),
            caller_id: Some(caller.to_string()),
            raw_caller_id: caller.to_string(),
            started_at,
            status: status.to_string(),
            duration_seconds: Some(30),
            name: String::new(),
            raw: serde_json::Value::Null,
        }
    }

    fn engine() -> FilterEngine {
        FilterEngine::new(PhoneNormalizer::default(), FilterPredicate::default())
    }

    #[test]
    fn test_call_inside_window_sets_marker() {
        let customers = vec![customer("555")];
        let calls = vec![call("1", "555", at(10, 0), "ANSWER")];

        let correlation = engine().correlate(&customers, &calls, window());
        let result = correlation.get("555").unwrap();
        assert!(result.marker);
        assert_eq!(result.matched.as_ref().unwrap().id, "1");
        assert!(result.passes_filter);
        assert!(correlation.missing_keys().is_empty());
    }

    #[test]
    fn test_call_at_window_end_is_excluded() {
        let customers = vec![customer("555")];
        let calls = vec![call("1", "555", at(23, 59), "ANSWER")];

        let correlation = engine().correlate(&customers, &calls, window());
        let result = correlation.get("555").unwrap();
        assert!(!result.marker);
        assert!(result.matched.is_none());
        assert_eq!(correlation.missing_keys(), vec!["555".to_string()]);
    }

    #[test]
    fn test_call_at_window_start_is_included() {
        let customers = vec![customer("555")];
        let calls = vec![call("1", "555", at(0, 0), "ANSWER")];

        let correlation = engine().correlate(&customers, &calls, window());
        assert!(correlation.get("555").unwrap().marker);
    }

    #[test]
    fn test_most_recent_call_wins() {
        let customers = vec![customer("555")];
        let calls = vec![
            call("late", "555", at(15, 0), "ANSWER"),
            call("early", "555", at(9, 0), "ANSWER"),
        ];

        let correlation = engine().correlate(&customers, &calls, window());
        let result = correlation.get("555").unwrap();
        assert_eq!(result.matched.as_ref().unwrap().id, "late");
        assert_eq!(result.match_count, 2);
    }

    #[test]
    fn test_unmatched_customers_are_kept_in_order() {
        let customers = vec![customer("3"), customer("1"), customer("2")];
        let calls = vec![call("1", "1", at(9, 0), "ANSWER")];

        let correlation = engine().correlate(&customers, &calls, window());
        let keys: Vec<&str> = correlation.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["3", "1", "2"]);
        assert_eq!(correlation.matched_count(), 1);
        assert_eq!(correlation.missing_keys(), vec!["3".to_string(), "2".to_string()]);
    }

    #[test]
    fn test_normalization_applies_to_both_sides() {
        let engine = FilterEngine::new(
            PhoneNormalizer::new(Some(9), Some("972".to_string()), true),
            FilterPredicate::default(),
        );
        let customers = vec![customer("050-123-4567")];
        let calls = vec![call("1", "+972501234567", at(12, 0), "ANSWER")];

        let correlation = engine.correlate(&customers, &calls, window());
        assert!(correlation.get("050-123-4567").unwrap().marker);
    }

    #[test]
    fn test_predicate_rejects_unaccepted_status() {
        let engine = FilterEngine::new(
            PhoneNormalizer::default(),
            FilterPredicate {
                accepted_statuses: vec!["answer".to_string()],
                min_duration_seconds: 0,
            },
        );
        let customers = vec![customer("555")];
        let calls = vec![call("1", "555", at(12, 0), "NOANSWER")];

        let correlation = engine.correlate(&customers, &calls, window());
        let result = correlation.get("555").unwrap();
        assert!(result.marker);
        assert!(!result.passes_filter);
        assert_eq!(correlation.missing_keys(), vec!["555".to_string()]);
    }

    #[test]
    fn test_inputs_are_not_mutated() {
        let customers = vec![customer("555")];
        let calls = vec![call("1", "555", at(12, 0), "ANSWER")];
        let customers_before = customers.clone();
        let calls_before = calls.clone();

        let _ = engine().correlate(&customers, &calls, window());
        assert_eq!(customers, customers_before);
        assert_eq!(calls, calls_before);
    }
}
