use super::retry::{with_retry, Attempt};
use crate::config::{CallFieldNames, TelephonyConfig};
use crate::core::normalize::PhoneNormalizer;
use crate::domain::model::{CallRecord, Window};
use crate::domain::ports::CallLogFetcher;
use crate::utils::error::{AutoCallerError, Result};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use reqwest::Client;
use serde_json::Value;

pub const SOURCE_NAME: &str = "telephony";

/// 查詢參數中的日期格式
const PAYLOAD_DATE_FORMAT: &str = "%d-%m-%Y";
/// 回應中 START 欄位的格式
const START_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 電話系統的通話記錄 API 客戶端
///
/// 以 form POST 分頁查詢，每頁最多 `page_limit` 筆，下一頁用上一頁最後一筆的 ID
/// 當作 `fromId`。只保留落在時間窗內的通話。
pub struct HttpCallLogClient {
    client: Client,
    config: TelephonyConfig,
    normalizer: PhoneNormalizer,
}

impl HttpCallLogClient {
    pub fn new(config: &TelephonyConfig, normalizer: PhoneNormalizer) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| AutoCallerError::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config: config.clone(),
            normalizer,
        })
    }

    fn payload(
        &self,
        caller_id: &str,
        window: &Window,
        from_id: Option<&str>,
    ) -> Vec<(&'static str, String)> {
        let mut payload = vec![
            ("action", "getCalls".to_string()),
            ("fromDate", window.start().format(PAYLOAD_DATE_FORMAT).to_string()),
            ("toDate", window.end().format(PAYLOAD_DATE_FORMAT).to_string()),
            ("uId", self.config.account_id.clone()),
            ("callerId", caller_id.to_string()),
            ("limit", self.config.page_limit.to_string()),
        ];
        if let Some(id) = from_id {
            payload.push(("fromId", id.to_string()));
        }
        payload.push(("orderBy", self.config.order_by.clone()));
        payload.push(("out", "json".to_string()));
        payload
    }

    async fn fetch_page(
        &self,
        caller_id: &str,
        window: &Window,
        from_id: Option<&str>,
    ) -> Result<Vec<Value>> {
        let payload = self.payload(caller_id, window, from_id);
        let policy = &self.config.retry;

        with_retry(policy, SOURCE_NAME, |attempt| {
            let request = self
                .client
                .post(&self.config.api_url)
                .basic_auth(&self.config.username, Some(&self.config.password))
                .form(&payload);

            async move {
                tracing::debug!("📞 Requesting call page (attempt {})", attempt);
                match request.send().await {
                    Err(err) if err.is_timeout() => {
                        if policy.retry_on_timeout {
                            Attempt::Retry(format!("request timed out: {}", err))
                        } else {
                            Attempt::Fatal(AutoCallerError::fetch(
                                SOURCE_NAME,
                                format!("request timed out: {}", err),
                            ))
                        }
                    }
                    Err(err) => Attempt::Retry(format!("request failed: {}", err)),
                    Ok(response) => {
                        let status = response.status();
                        if !status.is_success() {
                            return if policy.is_retryable_status(status.as_u16()) {
                                Attempt::Retry(format!("status {}", status.as_u16()))
                            } else {
                                Attempt::Fatal(AutoCallerError::fetch(
                                    SOURCE_NAME,
                                    format!("unexpected status {}", status),
                                ))
                            };
                        }
                        match response.text().await {
                            Ok(body) => match parse_rows(&body) {
                                Ok(rows) => Attempt::Done(rows),
                                Err(err) => Attempt::Fatal(err),
                            },
                            Err(err) => Attempt::Retry(format!("failed to read body: {}", err)),
                        }
                    }
                }
            }
        })
        .await
    }
}

#[async_trait]
impl CallLogFetcher for HttpCallLogClient {
    async fn fetch_calls(&self, caller_id: &str, window: &Window) -> Result<Vec<CallRecord>> {
        tracing::info!("📞 Fetching calls for {} in {}", caller_id, window);

        let mut calls = Vec::new();
        let mut from_id: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let mut rows = self.fetch_page(caller_id, window, from_id.as_deref()).await?;
            pages += 1;
            if rows.is_empty() {
                break;
            }

            let page_len = rows.len();
            if self.config.reverse_pages {
                rows.reverse();
            }

            let mut past_end = false;
            let mut last_id = None;
            for row in &rows {
                let Some(call) = parse_call(row, &self.config.fields, &self.normalizer) else {
                    continue;
                };
                last_id = Some(call.id.clone());
                if call.started_at >= window.end() {
                    past_end = true;
                    break;
                }
                if window.contains(call.started_at) {
                    calls.push(call);
                }
            }

            if past_end || page_len < self.config.page_limit {
                break;
            }

            match last_id {
                Some(id) if from_id.as_deref() != Some(id.as_str()) => from_id = Some(id),
                _ => {
                    tracing::warn!("⚠️ Call paging did not advance past id {:?}, stopping", from_id);
                    break;
                }
            }
        }

        tracing::info!("✅ Fetched {} calls in {} pages", calls.len(), pages);
        Ok(calls)
    }
}

/// 解析回應內容
///
/// 空白、`null` 與 `undefined` 視為沒有資料；JSON 物件代表 API 回報錯誤，
/// 記錄警告後當作空頁。
pub fn parse_rows(body: &str) -> Result<Vec<Value>> {
    let trimmed = body.trim();
    if trimmed.is_empty() || trimmed == "null" || trimmed == "undefined" {
        return Ok(Vec::new());
    }

    let value: Value = serde_json::from_str(trimmed).map_err(|e| {
        AutoCallerError::fetch(SOURCE_NAME, format!("response is not valid JSON: {}", e))
    })?;

    match value {
        Value::Array(rows) => Ok(rows),
        Value::Object(map) => {
            tracing::warn!("⚠️ Telephony API returned an object instead of a list: {:?}", map);
            Ok(Vec::new())
        }
        other => Err(AutoCallerError::fetch(
            SOURCE_NAME,
            format!("unexpected response shape: {}", other),
        )),
    }
}

/// 單筆通話；缺少 ID 或 START、或時間格式錯誤時略過
pub fn parse_call(
    row: &Value,
    fields: &CallFieldNames,
    normalizer: &PhoneNormalizer,
) -> Option<CallRecord> {
    let id = value_text(row, &fields.id)?;
    let Some(start) = value_text(row, &fields.start) else {
        tracing::debug!("Call {} has no start time, skipped", id);
        return None;
    };
    let started_at = match NaiveDateTime::parse_from_str(&start, START_FORMAT) {
        Ok(ts) => ts,
        Err(e) => {
            tracing::warn!("⚠️ Call {} has invalid start '{}': {}", id, start, e);
            return None;
        }
    };

    let raw_caller_id = value_text(row, &fields.caller).unwrap_or_default();

    Some(CallRecord {
        caller_id: normalizer.normalize(&raw_caller_id),
        raw_caller_id,
        started_at,
        status: value_text(row, &fields.status).unwrap_or_default(),
        duration_seconds: row.get(&fields.duration).and_then(duration_seconds),
        name: value_text(row, &fields.name).unwrap_or_default(),
        raw: row.clone(),
        id,
    })
}

fn value_text(row: &Value, field: &str) -> Option<String> {
    match row.get(field)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn duration_seconds(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| *f >= 0.0)
                    .map(|f| f.round() as u64)
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn normalizer() -> PhoneNormalizer {
        PhoneNormalizer::new(Some(9), Some("972".to_string()), true)
    }

    #[test]
    fn test_empty_like_bodies_are_empty_pages() {
        for body in ["", "  ", "null", "undefined"] {
            assert!(parse_rows(body).unwrap().is_empty(), "body {:?}", body);
        }
    }

    #[test]
    fn test_object_body_is_empty_page() {
        let rows = parse_rows(r#"{"error":"no permission"}"#).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_non_list_body_is_fetch_error() {
        assert_eq!(parse_rows("42").unwrap_err().kind(), "FetchError");
        assert_eq!(parse_rows("<html>").unwrap_err().kind(), "FetchError");
    }

    #[test]
    fn test_parse_call_reads_mixed_types() {
        let row = json!({
            "ID": 17,
            "START": "2025-12-28 09:15:00",
            "CALLERID": "+972-50-123-4567",
            "STATUS": "S",
            "DURATION": "42",
            "NAME": "Dana"
        });

        let call = parse_call(&row, &CallFieldNames::default(), &normalizer()).unwrap();
        assert_eq!(call.id, "17");
        assert_eq!(call.caller_id.as_deref(), Some("501234567"));
        assert_eq!(call.raw_caller_id, "+972-50-123-4567");
        assert_eq!(call.duration_seconds, Some(42));
        assert_eq!(call.status, "S");
        assert_eq!(call.started_at.to_string(), "2025-12-28 09:15:00");
    }

    #[test]
    fn test_rows_without_valid_start_are_skipped() {
        let fields = CallFieldNames::default();
        assert!(parse_call(&json!({"ID": "1"}), &fields, &normalizer()).is_none());
        assert!(parse_call(&json!({"ID": "1", "START": "28/12/2025"}), &fields, &normalizer()).is_none());
    }

    #[test]
    fn test_unnormalizable_caller_never_matches() {
        let row = json!({"ID": "3", "START": "2025-12-28 10:00:00", "CALLERID": "anonymous"});
        let call = parse_call(&row, &CallFieldNames::default(), &normalizer()).unwrap();
        assert!(call.caller_id.is_none());
        assert_eq!(call.duration_seconds, None);
    }

    #[test]
    fn test_payload_places_from_id_only_when_paging() {
        let config = TelephonyConfig {
            api_url: "http://localhost/api".to_string(),
            username: "u".to_string(),
            password: "p".to_string(),
            account_id: "42".to_string(),
            page_limit: 2,
            order_by: "asc".to_string(),
            reverse_pages: false,
            timeout_seconds: 5,
            fields: CallFieldNames::default(),
            retry: Default::default(),
        };
        let client = HttpCallLogClient::new(&config, normalizer()).unwrap();
        let day = chrono::NaiveDate::from_ymd_opt(2025, 12, 28).unwrap();
        let window = Window::new(
            day.and_hms_opt(8, 0, 0).unwrap(),
            day.and_hms_opt(20, 0, 0).unwrap(),
        )
        .unwrap();

        let first = client.payload("035551234", &window, None);
        assert!(first.iter().all(|(k, _)| *k != "fromId"));
        assert!(first.contains(&("fromDate", "28-12-2025".to_string())));

        let next = client.payload("035551234", &window, Some("9"));
        assert!(next.contains(&("fromId", "9".to_string())));
        assert_eq!(next.last(), Some(&("out", "json".to_string())));
    }
}
