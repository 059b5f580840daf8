//! Bundled redaction patterns, referenced in configuration as `builtin:<name>`.

use regex::Regex;
use thiserror::Error;

/// Email addresses.
pub const EMAIL_PATTERN: &str = r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b";

/// JSON Web Tokens (three base64url segments, header and payload starting with `eyJ`).
pub const JWT_PATTERN: &str = r"\beyJ[A-Za-z0-9_-]*\.eyJ[A-Za-z0-9_-]*\.[A-Za-z0-9_-]*";

/// `Bearer <token>` credentials, e.g. copied `Authorization` headers.
pub const BEARER_TOKEN_PATTERN: &str = r"(?i)\bbearer\s+[A-Za-z0-9._~+/-]+=*";

/// 16-digit card numbers with optional space or dash separators.
pub const CREDIT_CARD_PATTERN: &str = r"\b\d{4}[\s-]?\d{4}[\s-]?\d{4}[\s-]?\d{4}\b";

/// Common API key shapes (`sk_...`, `api-...`).
pub const API_KEY_PATTERN: &str = r"\b(?:sk|pk|api|key)[-_][A-Za-z0-9]{20,}\b";

/// IPv4 addresses.
pub const IPV4_PATTERN: &str =
    r"\b(?:(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\b";

/// Errors resolving or compiling a pattern.
#[derive(Debug, Error)]
pub enum PatternError {
    /// `builtin:<name>` names no bundled pattern.
    #[error("unknown builtin pattern '{0}'")]
    UnknownBuiltin(String),

    /// The regular expression does not compile.
    #[error("invalid pattern: {0}")]
    InvalidRegex(#[from] regex::Error),

    /// The placeholder matches the pattern, so redaction would never settle.
    #[error("placeholder '{0}' matches its own pattern")]
    PlaceholderMatches(String),
}

/// Returns the bundled pattern called `name`.
#[must_use]
pub fn builtin(name: &str) -> Option<&'static str> {
    match name {
        "email" => Some(EMAIL_PATTERN),
        "jwt" => Some(JWT_PATTERN),
        "bearer_token" => Some(BEARER_TOKEN_PATTERN),
        "credit_card" => Some(CREDIT_CARD_PATTERN),
        "api_key" => Some(API_KEY_PATTERN),
        "ipv4" => Some(IPV4_PATTERN),
        _ => None,
    }
}

/// Compiles `pattern`, expanding `builtin:<name>` references.
///
/// # Errors
///
/// Returns an error for unknown builtins and invalid regular expressions.
///
/// # Examples
///
/// ```
/// use shared::processor::patterns::compile_pattern;
///
/// let email = compile_pattern("builtin:email").unwrap();
/// assert!(email.is_match("contact: ops@example.com"));
/// assert!(compile_pattern("builtin:nope").is_err());
/// ```
pub fn compile_pattern(pattern: &str) -> Result<Regex, PatternError> {
    let resolved = match pattern.strip_prefix("builtin:") {
        Some(name) => builtin(name).ok_or_else(|| PatternError::UnknownBuiltin(name.to_string()))?,
        None => pattern,
    };
    Ok(Regex::new(resolved)?)
}
