use thiserror::Error;

pub const NO_COOKIES: &str = "NO_COOKIES";
pub const NO_ORG_ID: &str = "NO_ORG_ID";
pub const API_ERROR_PREFIX: &str = "API_ERROR_";

/// Why a usage fetch failed.
///
/// `Display` yields the classification string that is persisted next to the
/// last good snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// No session cookie present
    #[error("NO_COOKIES")]
    AuthMissing,
    /// Session present but no organization to query
    #[error("NO_ORG_ID")]
    OrgUnresolved,
    /// Usage endpoint answered with a non-success status
    #[error("API_ERROR_{0}")]
    RemoteError(u16),
    /// Network-level failure or an undecodable body
    #[error("{0}")]
    Transport(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Transport(err.to_string())
    }
}

/// Human-readable text for a stored classification string
pub fn describe_error(code: &str) -> String {
    match code {
        NO_COOKIES => "Please sign in to claude.ai".to_string(),
        NO_ORG_ID => "Could not find organization. Visit claude.ai first.".to_string(),
        _ => match code.strip_prefix(API_ERROR_PREFIX) {
            Some(status) => format!("API error ({status}). Try refreshing claude.ai."),
            None => "Something went wrong. Try again later.".to_string(),
        },
    }
}
