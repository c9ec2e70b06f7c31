//! Proxy URL parsing
//!
//! Proxy URLs have the shape `scheme://[user:pass@]host:port`. The same
//! parsed form feeds both the HTTP client and the headless browser.

use std::fmt;

use url::Url;

use crate::error::{AppError, AppResult};

/// Supported proxy protocols
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyScheme {
    Http,
    Https,
    Socks5,
    Socks5h,
}

impl ProxyScheme {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "http" => Some(ProxyScheme::Http),
            "https" => Some(ProxyScheme::Https),
            "socks5" => Some(ProxyScheme::Socks5),
            "socks5h" => Some(ProxyScheme::Socks5h),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProxyScheme::Http => "http",
            ProxyScheme::Https => "https",
            ProxyScheme::Socks5 => "socks5",
            ProxyScheme::Socks5h => "socks5h",
        }
    }

    pub fn is_socks(self) -> bool {
        matches!(self, ProxyScheme::Socks5 | ProxyScheme::Socks5h)
    }
}

/// Username/password pair embedded in a proxy URL
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for ProxyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A validated proxy endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyUrl {
    pub scheme: ProxyScheme,
    pub host: String,
    pub port: u16,
    pub credentials: Option<ProxyCredentials>,
}

impl ProxyUrl {
    /// Parse and validate a proxy URL.
    ///
    /// A port is required unless the scheme has a well-known default.
    pub fn parse(raw: &str) -> AppResult<Self> {
        let trimmed = raw.trim();
        let url = Url::parse(trimmed)
            .map_err(|e| AppError::ProxyConfig(format!("malformed proxy URL '{}': {}", trimmed, e)))?;

        let scheme = ProxyScheme::parse(url.scheme()).ok_or_else(|| {
            AppError::ProxyConfig(format!(
                "unsupported proxy protocol '{}', expected http, https, socks5 or socks5h",
                url.scheme()
            ))
        })?;

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| AppError::ProxyConfig(format!("proxy URL '{}' has no host", trimmed)))?
            .to_string();

        let port = url.port_or_known_default().ok_or_else(|| {
            AppError::ProxyConfig(format!("proxy URL '{}' has no port", trimmed))
        })?;

        if url.path() != "/" && !url.path().is_empty() {
            return Err(AppError::ProxyConfig(format!(
                "proxy URL '{}' must not carry a path",
                trimmed
            )));
        }

        let credentials = match (url.username(), url.password()) {
            ("", None) => None,
            (user, Some(pass)) if !user.is_empty() => Some(ProxyCredentials {
                username: user.to_string(),
                password: pass.to_string(),
            }),
            _ => {
                return Err(AppError::ProxyConfig(format!(
                    "proxy URL '{}' must carry both username and password",
                    trimmed
                )))
            }
        };

        Ok(Self {
            scheme,
            host,
            port,
            credentials,
        })
    }

    /// Parse an optional setting; blank means "no proxy"
    pub fn parse_optional(raw: Option<&str>) -> AppResult<Option<Self>> {
        match raw.map(str::trim) {
            None | Some("") => Ok(None),
            Some(value) => Self::parse(value).map(Some),
        }
    }

    /// `scheme://host:port`, without credentials
    pub fn server(&self) -> String {
        format!("{}://{}:{}", self.scheme.as_str(), self.host, self.port)
    }

    /// Full URL including credentials, for HTTP clients
    pub fn to_url_string(&self) -> String {
        match &self.credentials {
            Some(c) => format!(
                "{}://{}:{}@{}:{}",
                self.scheme.as_str(),
                c.username,
                c.password,
                self.host,
                self.port
            ),
            None => self.server(),
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    /// Build a reqwest proxy routing all traffic through this endpoint
    pub fn to_reqwest(&self) -> AppResult<reqwest::Proxy> {
        reqwest::Proxy::all(self.to_url_string())
            .map_err(|e| AppError::ProxyConfig(format!("proxy {} rejected: {}", self.server(), e)))
    }
}

impl fmt::Display for ProxyUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (auth={})",
            self.server(),
            if self.has_credentials() { "yes" } else { "no" }
        )
    }
}
