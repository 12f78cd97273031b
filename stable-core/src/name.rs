use thiserror::Error;

/// Longest app name accepted; app names double as DNS labels.
pub const MAX_APP_NAME_LEN: usize = 63;

/// Errors that can occur during app name validation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AppNameError {
    #[error("Invalid app name \"{0}\": name is empty after normalization")]
    Empty(String),

    #[error("Invalid app name \"{0}\": cannot exceed {MAX_APP_NAME_LEN} characters")]
    TooLong(String),
}

/// Validate and normalize an app name
///
/// Rules:
/// - 1-63 characters
/// - Lowercase letters, numbers, and single hyphens only
/// - Cannot start or end with a hyphen
pub fn validate_app_name(raw: &str) -> Result<String, AppNameError> {
    let normalized = normalize_app_name(raw);

    if normalized.is_empty() {
        return Err(AppNameError::Empty(raw.to_string()));
    }

    if normalized.len() > MAX_APP_NAME_LEN {
        return Err(AppNameError::TooLong(raw.to_string()));
    }

    Ok(normalized)
}

/// Normalize a string into app name shape
///
/// - Converts to lowercase and trims surrounding whitespace
/// - Turns whitespace runs into hyphens
/// - Drops any other character outside `[a-z0-9-]`
/// - Collapses repeated hyphens
/// - Trims leading/trailing hyphens
pub fn normalize_app_name(raw: &str) -> String {
    let mut result = String::new();

    for c in raw.trim().chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            result.push(c);
        } else if (c == '-' || c.is_whitespace()) && !result.ends_with('-') {
            result.push('-');
        }
    }

    while result.starts_with('-') {
        result.remove(0);
    }
    while result.ends_with('-') {
        result.pop();
    }

    result
}
