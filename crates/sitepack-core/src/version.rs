use std::fmt::Write;

/// The current version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Schema version of the `--json` output emitted by the CLI.
/// Bump this when changing field names or meanings.
pub const SCHEMA_VERSION: u32 = 1;

/// Returns a formatted version string including build metadata if available.
#[must_use]
pub fn version_string() -> String {
    let mut s = format!("sitepack {VERSION}");

    if let Some(hash) = option_env!("SITEPACK_BUILD_GIT_HASH") {
        let _ = write!(s, " ({hash})");
    }

    s
}

/// User agent sent with remote module requests.
#[must_use]
pub fn user_agent() -> String {
    format!("sitepack/{VERSION}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_not_empty() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_version_string_contains_version() {
        let vs = version_string();
        assert!(vs.contains(VERSION));
        assert!(vs.starts_with("sitepack "));
    }

    #[test]
    fn test_user_agent() {
        assert_eq!(user_agent(), format!("sitepack/{VERSION}"));
    }
}
