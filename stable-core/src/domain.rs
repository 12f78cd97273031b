//! Local domain helpers.

/// Suffix used for every app domain unless explicitly overridden.
pub const LOCAL_DOMAIN_SUFFIX: &str = "test";

/// Derive the default local domain for an app.
///
/// # Example
/// ```
/// assert_eq!(stable_core::app_domain("blog"), "blog.test");
/// ```
pub fn app_domain(app_name: &str) -> String {
    format!("{}.{}", app_name, LOCAL_DOMAIN_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_domain() {
        assert_eq!(app_domain("blog"), "blog.test");
        assert_eq!(app_domain("api-server"), "api-server.test");
    }
}
