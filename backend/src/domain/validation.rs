//! Field-level validation shared by every entity type.
//!
//! Validators append messages to a [`FieldErrors`] accumulator so a single
//! response can report every bad field at once.

use shared::FieldErrorResponse;
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

pub const NAME_MAX_LEN: usize = 100;
pub const TITLE_MAX_LEN: usize = 255;
pub const URL_MAX_LEN: usize = 200;
pub const EMAIL_MAX_LEN: usize = 254;
pub const AGE_RANGE: (i64, i64) = (0, 18);
pub const DIFFICULTY_RANGE: (i64, i64) = (1, 5);

/// Accumulated per-field validation messages
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldErrors {
    errors: BTreeMap<String, Vec<String>>,
}

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.errors
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.errors.contains_key(field)
    }

    pub fn messages(&self, field: &str) -> &[String] {
        self.errors.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// `Ok(())` when nothing was recorded, otherwise the accumulated errors
    pub fn into_result(self) -> Result<(), FieldErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    pub fn into_response_body(self) -> FieldErrorResponse {
        self.errors
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields: Vec<&str> = self.errors.keys().map(String::as_str).collect();
        write!(f, "invalid fields: {}", fields.join(", "))
    }
}

/// Required, non-blank text no longer than `max_len` characters
pub fn text(errors: &mut FieldErrors, field: &str, value: &str, max_len: usize) {
    if value.trim().is_empty() {
        errors.add(field, "This field may not be blank.");
    } else if value.chars().count() > max_len {
        errors.add(
            field,
            format!("Ensure this field has no more than {} characters.", max_len),
        );
    }
}

/// Required, non-blank text of any length
pub fn required(errors: &mut FieldErrors, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.add(field, "This field may not be blank.");
    }
}

/// Optional text: only the length is checked
pub fn optional_text(errors: &mut FieldErrors, field: &str, value: Option<&str>, max_len: usize) {
    if let Some(value) = value {
        if value.chars().count() > max_len {
            errors.add(
                field,
                format!("Ensure this field has no more than {} characters.", max_len),
            );
        }
    }
}

pub fn range(errors: &mut FieldErrors, field: &str, value: i64, (min, max): (i64, i64)) {
    if value < min {
        errors.add(
            field,
            format!("Ensure this value is greater than or equal to {}.", min),
        );
    } else if value > max {
        errors.add(
            field,
            format!("Ensure this value is less than or equal to {}.", max),
        );
    }
}

/// Absolute URL with an explicit http or https scheme and a host
pub fn http_url(errors: &mut FieldErrors, field: &str, value: &str) {
    if value.chars().count() > URL_MAX_LEN {
        errors.add(
            field,
            format!("Ensure this field has no more than {} characters.", URL_MAX_LEN),
        );
        return;
    }

    let valid = match Url::parse(value.trim()) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host().is_some(),
        Err(_) => false,
    };
    if !valid {
        errors.add(field, "Enter a valid URL.");
    }
}

pub fn email(errors: &mut FieldErrors, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.add(field, "This field may not be blank.");
        return;
    }
    if value.chars().count() > EMAIL_MAX_LEN {
        errors.add(
            field,
            format!("Ensure this field has no more than {} characters.", EMAIL_MAX_LEN),
        );
        return;
    }

    let valid = match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !value.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        errors.add(field, "Enter a valid email address.");
    }
}
