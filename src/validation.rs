use std::sync::LazyLock;

use regex::Regex;

use crate::error::{AppError, AppResult};

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("Invalid regex")
});

static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[0-9][0-9 \-]{6,18}[0-9]$").expect("Invalid regex"));

static INTENT_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^pi_[A-Za-z0-9_]{1,250}$").expect("Invalid regex"));

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

pub fn is_valid_phone(phone: &str) -> bool {
    PHONE_RE.is_match(phone.trim())
}

/// Stripe payment intent ids are `pi_` followed by word characters; anything
/// else never reaches the gateway URL.
pub fn is_valid_intent_id(id: &str) -> bool {
    INTENT_ID_RE.is_match(id)
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Phone numbers are stored without spaces or dashes so lookups match.
pub fn normalize_phone(phone: &str) -> String {
    phone
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect()
}

/// Collects offending field names so a request reports all of them at once.
#[derive(Debug, Default)]
pub struct FieldErrors {
    fields: Vec<String>,
}

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flags `field` when the value is absent or blank.
    pub fn require(&mut self, field: &str, value: Option<&str>) -> &mut Self {
        if value.is_none_or(|v| v.trim().is_empty()) {
            self.push(field);
        }
        self
    }

    /// Flags `field` when `ok` is false.
    pub fn check(&mut self, field: &str, ok: bool) -> &mut Self {
        if !ok {
            self.push(field);
        }
        self
    }

    pub fn into_result(self) -> AppResult<()> {
        if self.fields.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(self.fields))
        }
    }

    fn push(&mut self, field: &str) {
        if !self.fields.iter().any(|f| f == field) {
            self.fields.push(field.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shape() {
        assert!(is_valid_email("jane@biscuits.shop"));
        assert!(!is_valid_email("jane@"));
        assert!(!is_valid_email("not an email"));
    }

    #[test]
    fn phone_shape_and_normalization() {
        assert!(is_valid_phone("+1 555-123-4567"));
        assert!(!is_valid_phone("12"));
        assert_eq!(normalize_phone("+1 555-123-4567"), "+15551234567");
    }

    #[test]
    fn intent_id_shape() {
        assert!(is_valid_intent_id("pi_3Nf0aB2eZvKYlo2C1a2b3c4d"));
        assert!(is_valid_intent_id("pi_test_0f3c"));
        assert!(!is_valid_intent_id("pi_"));
        assert!(!is_valid_intent_id("pi_123/../../customers"));
        assert!(!is_valid_intent_id("ch_123"));
        assert!(!is_valid_intent_id("pi_123?expand=customer"));
    }

    #[test]
    fn field_errors_report_every_missing_field_once() {
        let mut errors = FieldErrors::new();
        errors
            .require("first_name", Some("Jane"))
            .require("city", None)
            .require("zip_code", Some("   "))
            .check("city", false);

        match errors.into_result() {
            Err(AppError::Validation(fields)) => assert_eq!(fields, vec!["city", "zip_code"]),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn no_errors_is_ok() {
        let mut errors = FieldErrors::new();
        errors.require("name", Some("Jane"));
        assert!(errors.into_result().is_ok());
    }
}
