/// Input validators
///
/// Field checks for registration and login bodies. Every failing field is
/// reported at once, keyed by its JSON name. Secret strength is not judged
/// here; only presence and a length cap that keeps bcrypt input bounded.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;

use crate::error::ValidationError;

const MIN_USERNAME_LENGTH: usize = 3;
const MAX_USERNAME_LENGTH: usize = 50;
const MAX_EMAIL_LENGTH: usize = 254; // RFC 5321
const MAX_LOCAL_PART_LENGTH: usize = 64;
const MAX_NAME_LENGTH: usize = 100;
const MAX_PASSWORD_BYTES: usize = 72; // bcrypt ignores anything past this

lazy_static! {
    static ref USERNAME_REGEX: Regex = Regex::new(r"^[A-Za-z0-9_.-]+$").unwrap();

    // RFC 5322 simplified email regex (practical validation)
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$"
    ).unwrap();
}

/// Why a single field was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldIssue {
    Empty,
    TooShort(usize),
    TooLong(usize),
    InvalidFormat,
    ControlCharacters,
}

impl std::fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldIssue::Empty => write!(f, "must not be empty"),
            FieldIssue::TooShort(min) => write!(f, "must be at least {} characters", min),
            FieldIssue::TooLong(max) => write!(f, "must be at most {} characters", max),
            FieldIssue::InvalidFormat => write!(f, "has invalid format"),
            FieldIssue::ControlCharacters => write!(f, "must not contain control characters"),
        }
    }
}

/// Registration fields after trimming and validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidRegistration {
    pub username: String,
    pub email: String,
    pub full_name: String,
}

pub fn validate_username(username: &str) -> Result<String, FieldIssue> {
    let trimmed = username.trim();
    let length = trimmed.chars().count();

    if trimmed.is_empty() {
        return Err(FieldIssue::Empty);
    }
    if length < MIN_USERNAME_LENGTH {
        return Err(FieldIssue::TooShort(MIN_USERNAME_LENGTH));
    }
    if length > MAX_USERNAME_LENGTH {
        return Err(FieldIssue::TooLong(MAX_USERNAME_LENGTH));
    }
    if !USERNAME_REGEX.is_match(trimmed) {
        return Err(FieldIssue::InvalidFormat);
    }

    Ok(trimmed.to_string())
}

pub fn validate_email(email: &str) -> Result<String, FieldIssue> {
    let trimmed = email.trim();

    if trimmed.is_empty() {
        return Err(FieldIssue::Empty);
    }
    if trimmed.len() > MAX_EMAIL_LENGTH {
        return Err(FieldIssue::TooLong(MAX_EMAIL_LENGTH));
    }
    match trimmed.split_once('@') {
        Some((local, _)) if local.len() <= MAX_LOCAL_PART_LENGTH => {}
        _ => return Err(FieldIssue::InvalidFormat),
    }
    if !EMAIL_REGEX.is_match(trimmed) {
        return Err(FieldIssue::InvalidFormat);
    }

    Ok(trimmed.to_string())
}

pub fn validate_full_name(name: &str) -> Result<String, FieldIssue> {
    let trimmed = name.trim();

    if trimmed.is_empty() {
        return Err(FieldIssue::Empty);
    }
    if trimmed.chars().count() > MAX_NAME_LENGTH {
        return Err(FieldIssue::TooLong(MAX_NAME_LENGTH));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(FieldIssue::ControlCharacters);
    }

    Ok(trimmed.to_string())
}

/// Presence and a byte cap; never trimmed
pub fn validate_password(password: &str) -> Result<(), FieldIssue> {
    if password.is_empty() {
        return Err(FieldIssue::Empty);
    }
    if password.len() > MAX_PASSWORD_BYTES {
        return Err(FieldIssue::TooLong(MAX_PASSWORD_BYTES));
    }
    Ok(())
}

fn collect<T>(
    errors: &mut BTreeMap<String, String>,
    field: &str,
    result: Result<T, FieldIssue>,
) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(issue) => {
            errors.insert(field.to_string(), issue.to_string());
            None
        }
    }
}

pub fn validate_registration(
    username: &str,
    password: &str,
    email: &str,
    full_name: &str,
) -> Result<ValidRegistration, ValidationError> {
    let mut errors = BTreeMap::new();

    let username = collect(&mut errors, "username", validate_username(username));
    collect(&mut errors, "password", validate_password(password));
    let email = collect(&mut errors, "email", validate_email(email));
    let full_name = collect(&mut errors, "fullName", validate_full_name(full_name));

    match (username, email, full_name) {
        (Some(username), Some(email), Some(full_name)) if errors.is_empty() => {
            Ok(ValidRegistration {
                username,
                email,
                full_name,
            })
        }
        _ => Err(ValidationError::FieldErrors(errors)),
    }
}

/// Login only needs both fields present; the username is trimmed.
pub fn validate_login(username: &str, password: &str) -> Result<String, ValidationError> {
    let mut errors = BTreeMap::new();

    let trimmed = username.trim();
    if trimmed.is_empty() {
        errors.insert("username".to_string(), FieldIssue::Empty.to_string());
    }
    if password.is_empty() {
        errors.insert("password".to_string(), FieldIssue::Empty.to_string());
    }

    if errors.is_empty() {
        Ok(trimmed.to_string())
    } else {
        Err(ValidationError::FieldErrors(errors))
    }
}
