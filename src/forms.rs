use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::model::Guest;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"));

/// Submitted field values plus the per-field errors found while validating
/// them. Values are kept as entered so a failed form can be re-displayed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Form {
    values: BTreeMap<String, String>,
    errors: BTreeMap<String, Vec<String>>,
}

impl Form {
    pub fn new<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: values
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            errors: BTreeMap::new(),
        }
    }

    pub fn get(&self, field: &str) -> &str {
        self.values.get(field).map(String::as_str).unwrap_or("")
    }

    pub fn add_error(&mut self, field: &str, msg: impl Into<String>) {
        self.errors
            .entry(field.to_string())
            .or_default()
            .push(msg.into());
    }

    /// First error recorded for `field`.
    pub fn error(&self, field: &str) -> Option<&str> {
        self.errors.get(field)?.first().map(String::as_str)
    }

    pub fn valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn required(&mut self, fields: &[&str]) {
        for field in fields {
            if self.get(field).trim().is_empty() {
                self.add_error(field, "This field cannot be blank");
            }
        }
    }

    pub fn min_length(&mut self, field: &str, length: usize) -> bool {
        if self.get(field).chars().count() < length {
            self.add_error(field, format!("This field must be at least {length} characters long"));
            return false;
        }
        true
    }

    /// Blank a value so it is never echoed back, e.g. a password.
    pub fn redact(&mut self, field: &str) {
        if let Some(value) = self.values.get_mut(field) {
            value.clear();
        }
    }

    pub fn is_email(&mut self, field: &str) {
        if !EMAIL_RE.is_match(self.get(field)) {
            self.add_error(field, "Invalid email address");
        }
    }
}

/// Guest details as posted from the reservation form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GuestForm {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
}

impl GuestForm {
    /// The entered values, valid or not.
    pub fn guest(&self) -> Guest {
        Guest {
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            email: self.email.trim().to_string(),
            phone: self.phone.trim().to_string(),
        }
    }

    pub fn form(&self) -> Form {
        form_for(&self.guest())
    }

    /// All fields present, first name at least 3 characters, email of the
    /// shape `local@domain.tld`. On failure the returned form carries both
    /// the entered values and the errors.
    pub fn validate(&self) -> Result<Guest, Form> {
        let mut form = self.form();
        form.required(&["first_name", "last_name", "email", "phone"]);
        form.min_length("first_name", 3);
        form.is_email("email");
        if form.valid() {
            Ok(self.guest())
        } else {
            Err(form)
        }
    }
}

/// A form pre-filled with a guest's current details.
pub fn form_for(guest: &Guest) -> Form {
    Form::new([
        ("first_name", guest.first_name.as_str()),
        ("last_name", guest.last_name.as_str()),
        ("email", guest.email.as_str()),
        ("phone", guest.phone.as_str()),
    ])
}
