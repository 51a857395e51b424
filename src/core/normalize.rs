use crate::config::NormalizationConfig;

/// 電話號碼正規化
///
/// 只保留數字，去掉國碼與長途冠碼 0；設定了 `expected_digits` 時結果必須剛好是
/// 該長度，否則視為無效號碼（回傳 `None`）。輸出再正規化一次結果不變。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhoneNormalizer {
    expected_digits: Option<usize>,
    country_code: Option<String>,
    strip_trunk_zero: bool,
}

impl PhoneNormalizer {
    pub fn new(
        expected_digits: Option<usize>,
        country_code: Option<String>,
        strip_trunk_zero: bool,
    ) -> Self {
        Self {
            expected_digits,
            country_code: country_code.filter(|cc| !cc.is_empty()),
            strip_trunk_zero,
        }
    }

    pub fn from_config(config: &NormalizationConfig) -> Self {
        Self::new(
            config.expected_digits,
            config.country_code.clone(),
            config.strip_trunk_zero,
        )
    }

    pub fn normalize(&self, raw: &str) -> Option<String> {
        let trimmed = raw.trim();
        let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();

        let mut number = digits.as_str();
        let mut international = trimmed.starts_with('+');

        if let Some(cc) = &self.country_code {
            if let Some(rest) = number.strip_prefix("00") {
                number = rest;
                international = true;
            }

            let too_long = self
                .expected_digits
                .is_some_and(|expected| number.len() > expected);
            if (international || too_long) && number.len() > cc.len() {
                if let Some(rest) = number.strip_prefix(cc.as_str()) {
                    number = rest;
                }
            }
        }

        if self.strip_trunk_zero {
            number = number.trim_start_matches('0');
        }

        if number.is_empty() {
            return None;
        }

        match self.expected_digits {
            Some(expected) if number.len() != expected => None,
            _ => Some(number.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn israeli() -> PhoneNormalizer {
        PhoneNormalizer::new(Some(9), Some("972".to_string()), true)
    }

    #[test]
    fn test_format_variants_of_same_line_normalize_equal() {
        let n = israeli();
        let expected = Some("501234567".to_string());
        assert_eq!(n.normalize("050-123-4567"), expected);
        assert_eq!(n.normalize("+972 50 123 4567"), expected);
        assert_eq!(n.normalize("00972501234567"), expected);
        assert_eq!(n.normalize("972501234567"), expected);
        assert_eq!(n.normalize("(050) 1234567"), expected);
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let n = israeli();
        for raw in ["050-123-4567", "+972501234567", "0501234567"] {
            let once = n.normalize(raw).unwrap();
            assert_eq!(n.normalize(&once), Some(once.clone()));
        }
    }

    #[test]
    fn test_wrong_length_is_rejected() {
        let n = israeli();
        assert_eq!(n.normalize("12345"), None);
        assert_eq!(n.normalize(""), None);
        assert_eq!(n.normalize("abc"), None);
    }

    #[test]
    fn test_four_digit_codes_without_country_rules() {
        let n = PhoneNormalizer::new(Some(4), None, false);
        assert_eq!(n.normalize(" 1234 "), Some("1234".to_string()));
        assert_eq!(n.normalize("0123"), Some("0123".to_string()));
        assert_eq!(n.normalize("12345"), None);
    }

    #[test]
    fn test_default_keeps_digits_only() {
        let n = PhoneNormalizer::default();
        assert_eq!(n.normalize("555"), Some("555".to_string()));
        assert_eq!(n.normalize("5-5-5"), Some("555".to_string()));
    }
}
