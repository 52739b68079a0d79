//! Field-level validation of API commands.
//!
//! Validation runs before authorization, so a malformed command is reported
//! as `validationFailed` no matter who sends it.

use serde::Serialize;

use crate::db::AccountRole;

pub const MAX_NAME_LEN: usize = 100;
pub const MAX_EMAIL_LEN: usize = 254;
pub const MIN_PASSWORD_LEN: usize = 10;
pub const MAX_PASSWORD_LEN: usize = 256;

/// One invalid field. `code` is stable; `arguments` carries the limits involved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<String>,
}

/// Collects field errors for one command.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, field: &str, code: &'static str, arguments: Vec<String>) {
        self.errors.push(FieldError {
            field: field.to_string(),
            code,
            arguments,
        });
    }

    /// A required, non-blank string. Returns the trimmed value when present.
    pub fn required<'a>(&mut self, field: &str, value: Option<&'a str>) -> Option<&'a str> {
        match value.map(str::trim) {
            Some(v) if !v.is_empty() => Some(v),
            _ => {
                self.push(field, "required", Vec::new());
                None
            }
        }
    }

    /// A required, non-empty string taken verbatim. For passwords, where
    /// surrounding whitespace is significant.
    pub fn required_verbatim<'a>(&mut self, field: &str, value: Option<&'a str>) -> Option<&'a str> {
        match value {
            Some(v) if !v.is_empty() => Some(v),
            _ => {
                self.push(field, "required", Vec::new());
                None
            }
        }
    }

    pub fn max_len(&mut self, field: &str, value: &str, max: usize) -> &mut Self {
        if value.chars().count() > max {
            self.push(field, "tooLong", vec![max.to_string()]);
        }
        self
    }

    pub fn min_len(&mut self, field: &str, value: &str, min: usize) -> &mut Self {
        if value.chars().count() < min {
            self.push(field, "tooShort", vec![min.to_string()]);
        }
        self
    }

    /// Loose shape check: one `@`, something on both sides, a dot in the domain.
    pub fn email(&mut self, field: &str, value: &str) -> &mut Self {
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
            self.push(field, "invalidEmail", Vec::new());
        }
        self.max_len(field, value, MAX_EMAIL_LEN)
    }

    pub fn password(&mut self, field: &str, value: &str) -> &mut Self {
        self.min_len(field, value, MIN_PASSWORD_LEN)
            .max_len(field, value, MAX_PASSWORD_LEN)
    }

    pub fn name(&mut self, field: &str, value: &str) -> &mut Self {
        self.max_len(field, value, MAX_NAME_LEN)
    }

    pub fn role(&mut self, field: &str, value: &str) -> Option<AccountRole> {
        let role = AccountRole::parse(value);
        if role.is_none() {
            self.push(
                field,
                "invalidValue",
                vec![
                    AccountRole::SystemAdministrator.to_string(),
                    AccountRole::OrganisationAdministrator.to_string(),
                    AccountRole::Device.to_string(),
                ],
            );
        }
        role
    }

    pub fn uuid(&mut self, field: &str, value: &str) -> &mut Self {
        if uuid::Uuid::parse_str(value).is_err() {
            self.push(field, "invalidId", Vec::new());
        }
        self
    }

    /// Free-form constraint that does not fit the helpers.
    pub fn check(&mut self, condition: bool, field: &str, code: &'static str) -> &mut Self {
        if !condition {
            self.push(field, code, Vec::new());
        }
        self
    }

    pub fn finish(self) -> Result<(), Vec<FieldError>> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}
