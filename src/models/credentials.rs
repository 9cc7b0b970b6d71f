use crate::error::FetchError;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Cookie carrying the organization the browser session last used
pub const ORG_COOKIE: &str = "lastActiveOrg";

/// Environment variable holding a raw `Cookie:` header value
pub const COOKIE_ENV_VAR: &str = "CLAUDE_COOKIES";

/// A single cookie as exported by browser cookie tools
#[derive(Clone, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

impl fmt::Debug for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cookie")
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

/// claude.ai session cookies used to authenticate the usage request
#[derive(Debug, Clone, Default)]
pub struct SessionCookies {
    cookies: Vec<Cookie>,
}

impl SessionCookies {
    pub fn new(cookies: Vec<Cookie>) -> Self {
        Self { cookies }
    }

    /// Parse either a JSON array of `{name, value}` objects or a header line
    /// such as `sessionKey=abc; lastActiveOrg=123`.
    pub fn parse(content: &str) -> Result<Self> {
        let trimmed = content.trim();
        if trimmed.starts_with('[') {
            let cookies: Vec<Cookie> = serde_json::from_str(trimmed)
                .map_err(|e| anyhow!("Failed to parse cookie file: {}", e))?;
            return Ok(Self::new(cookies));
        }

        let header = trimmed
            .strip_prefix("Cookie:")
            .unwrap_or(trimmed)
            .trim();
        let cookies = header
            .split(';')
            .filter_map(|pair| {
                let (name, value) = pair.trim().split_once('=')?;
                let name = name.trim();
                if name.is_empty() {
                    return None;
                }
                Some(Cookie {
                    name: name.to_string(),
                    value: value.trim().to_string(),
                })
            })
            .collect();
        Ok(Self::new(cookies))
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(anyhow!("Cookie file not found at {}", path.display()));
        }
        let content = fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read cookie file: {}", e))?;
        let cookies = Self::parse(&content)?;
        log::debug!("Loaded {} cookies from {}", cookies.len(), path.display());
        Ok(cookies)
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.value.as_str())
    }

    pub fn org_id(&self) -> Option<&str> {
        self.get(ORG_COOKIE).filter(|v| !v.is_empty())
    }

    pub fn header_value(&self) -> String {
        self.cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Where session cookies come from
#[derive(Debug, Clone)]
pub enum CookieSource {
    /// Cookie file exported from the browser
    File(PathBuf),
    /// Header value in an environment variable
    Environment(String),
    /// Header value provided directly
    Direct(String),
}

impl CookieSource {
    /// Sources to try, most specific first
    pub fn chain(cookie_file: Option<&Path>) -> Vec<CookieSource> {
        let mut sources = Vec::new();
        if let Some(path) = cookie_file {
            sources.push(CookieSource::File(path.to_path_buf()));
        }
        sources.push(CookieSource::Environment(COOKIE_ENV_VAR.to_string()));
        sources
    }

    pub fn load(&self) -> Result<SessionCookies> {
        match self {
            CookieSource::File(path) => SessionCookies::load_from_path(path),
            CookieSource::Environment(var_name) => {
                let value = std::env::var(var_name)
                    .map_err(|_| anyhow!("Environment variable {} not found", var_name))?;
                SessionCookies::parse(&value)
            }
            CookieSource::Direct(header) => SessionCookies::parse(header),
        }
    }
}

/// Session ready to be sent to the usage endpoint
#[derive(Debug, Clone)]
pub struct ResolvedSession {
    pub cookies: SessionCookies,
    pub org_id: String,
}

/// Resolve cookies and org id, failing with the poll's classification codes.
///
/// The first source that yields at least one cookie wins. An explicit
/// `organization_id` takes precedence over the `lastActiveOrg` cookie.
pub fn resolve_session(
    sources: &[CookieSource],
    organization_id: Option<&str>,
) -> Result<ResolvedSession, FetchError> {
    let cookies = sources
        .iter()
        .find_map(|source| match source.load() {
            Ok(cookies) if !cookies.is_empty() => Some(cookies),
            Ok(_) => None,
            Err(e) => {
                log::debug!("Cookie source {:?} unavailable: {}", source, e);
                None
            }
        })
        .ok_or(FetchError::AuthMissing)?;

    let org_id = organization_id
        .filter(|id| !id.is_empty())
        .or_else(|| cookies.org_id())
        .map(str::to_string)
        .ok_or(FetchError::OrgUnresolved)?;

    Ok(ResolvedSession { cookies, org_id })
}
