//! Security and validation helpers.
//!
//! Thin, composable validators used by the HTTP router and the
//! session-aware services: path shape, command metacharacters, exposed
//! port ranges, git URLs, and branch names. None of these sandbox a
//! filesystem root (user commands run inside an already-isolated container,
//! not under a single data directory) — each one just validates, then
//! returns a typed error the caller converts to `BrokerError::InvalidArgument`.

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("path must be absolute: {0}")]
    PathNotAbsolute(String),

    #[error("port {0} is out of range (must be 1024-65535)")]
    PortOutOfRange(u32),

    #[error("invalid git URL: {0}")]
    InvalidGitUrl(String),

    #[error("invalid branch name: {0}")]
    InvalidBranchName(String),

    #[error("content too large: {size} bytes exceeds the {limit} byte limit")]
    ContentTooLarge { size: usize, limit: usize },

    #[error("{0}")]
    Other(String),
}

/// Maximum content size accepted by `writeFile`: 10 MiB.
pub const MAX_WRITE_FILE_BYTES: usize = 10 * 1024 * 1024;

pub fn require_absolute_path(path: &str) -> Result<(), ValidationError> {
    if path.starts_with('/') {
        Ok(())
    } else {
        Err(ValidationError::PathNotAbsolute(path.to_string()))
    }
}

/// Accepts a `u32` (rather than `u16`) so that out-of-u16-range values sent
/// over the wire — e.g. `65536` — are rejected as `InvalidArgument` instead
/// of silently wrapping or failing JSON deserialization with a less useful
/// error.
pub fn validate_port(port: u32) -> Result<u16, ValidationError> {
    if (1024..=65535).contains(&port) {
        Ok(port as u16)
    } else {
        Err(ValidationError::PortOutOfRange(port))
    }
}

pub fn validate_content_size(content: &[u8]) -> Result<(), ValidationError> {
    if content.len() > MAX_WRITE_FILE_BYTES {
        Err(ValidationError::ContentTooLarge {
            size: content.len(),
            limit: MAX_WRITE_FILE_BYTES,
        })
    } else {
        Ok(())
    }
}

/// Accepted git remote schemes: plain `https`, `http`, `git`, or the
/// scp-like `git@host:path` form used by most git hosting providers.
fn scp_like_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_.-]+@[A-Za-z0-9_.-]+:[A-Za-z0-9_./-]+(\.git)?$").unwrap()
    })
}

pub fn validate_git_url(raw: &str) -> Result<(), ValidationError> {
    if scp_like_pattern().is_match(raw) {
        return Ok(());
    }

    match Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "https" | "http" | "git") => Ok(()),
        _ => Err(ValidationError::InvalidGitUrl(raw.to_string())),
    }
}

/// Branch names must not contain shell metacharacters or whitespace; git
/// itself is the authority on the rest of its ref-name rules.
fn branch_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_./-]+$").unwrap())
}

pub fn validate_branch_name(name: &str) -> Result<(), ValidationError> {
    if branch_name_pattern().is_match(name) {
        Ok(())
    } else {
        Err(ValidationError::InvalidBranchName(name.to_string()))
    }
}

/// Single-quote-escape a string for safe interpolation inside a single
/// quoted shell argument: replace each `'` with `'\''`.
pub fn shell_single_quote_escape(value: &str) -> String {
    value.replace('\'', "'\\''")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_relative_paths() {
        assert!(require_absolute_path("relative/path").is_err());
        assert!(require_absolute_path("/tmp/ok").is_ok());
    }

    #[test]
    fn port_range_boundaries() {
        assert!(validate_port(1023).is_err());
        assert!(validate_port(1024).is_ok());
        assert!(validate_port(65535).is_ok());
        assert!(validate_port(65536).is_err());
    }

    #[test]
    fn git_urls() {
        assert!(validate_git_url("https://github.com/example/repo.git").is_ok());
        assert!(validate_git_url("git@github.com:example/repo.git").is_ok());
        assert!(validate_git_url("not a url").is_err());
        assert!(validate_git_url("ftp://example.com/repo").is_err());
    }

    #[test]
    fn branch_names() {
        assert!(validate_branch_name("feature/foo-1.2").is_ok());
        assert!(validate_branch_name("foo; rm -rf /").is_err());
    }

    #[test]
    fn escapes_single_quotes() {
        assert_eq!(shell_single_quote_escape("it's"), "it'\\''s");
    }

    #[test]
    fn content_size_limit() {
        let small = vec![0u8; 10];
        assert!(validate_content_size(&small).is_ok());
        let large = vec![0u8; MAX_WRITE_FILE_BYTES + 1];
        assert!(validate_content_size(&large).is_err());
    }
}
