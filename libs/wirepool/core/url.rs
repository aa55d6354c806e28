//! URL parsing for `ws`, `wss`, `http` and `https` targets

use crate::traits::error::{Result, WirePoolError};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Ws,
    Wss,
    Http,
    Https,
}

impl Scheme {
    pub fn is_tls(&self) -> bool {
        matches!(self, Scheme::Wss | Scheme::Https)
    }

    pub fn is_websocket(&self) -> bool {
        matches!(self, Scheme::Ws | Scheme::Wss)
    }

    pub fn default_port(&self) -> u16 {
        if self.is_tls() {
            443
        } else {
            80
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Ws => "ws",
            Scheme::Wss => "wss",
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// Components of a parsed target URL; immutable once built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUrl {
    pub scheme: Scheme,
    /// Host without brackets, even for IPv6 literals
    pub host: String,
    pub port: u16,
    /// Path plus query, always starting with `/`
    pub path: String,
    pub is_tls: bool,
}

impl ParsedUrl {
    pub fn parse(url: &str) -> Result<Self> {
        let invalid = |why: &str| WirePoolError::InvalidUrl(format!("{}: {}", why, url));

        let (scheme_str, rest) = url.trim().split_once("://").ok_or_else(|| invalid("missing scheme"))?;
        let scheme = match scheme_str.to_ascii_lowercase().as_str() {
            "ws" => Scheme::Ws,
            "wss" => Scheme::Wss,
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            _ => return Err(invalid("unsupported scheme")),
        };

        // fragments never go on the wire
        let rest = rest.split('#').next().unwrap_or_default();

        let split_at = rest.find(|c: char| c == '/' || c == '?').unwrap_or(rest.len());
        let (authority, tail) = rest.split_at(split_at);

        if authority.contains('@') {
            return Err(invalid("credentials in URL are not supported"));
        }

        let (host, port) = split_host_port(authority).ok_or_else(|| invalid("bad authority"))?;
        if host.is_empty() {
            return Err(invalid("empty host"));
        }
        let port = match port {
            Some(p) => p.parse::<u16>().map_err(|_| invalid("bad port"))?,
            None => scheme.default_port(),
        };

        let path = if tail.is_empty() {
            "/".to_string()
        } else if tail.starts_with('?') {
            format!("/{}", tail)
        } else {
            tail.to_string()
        };

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
            path,
            is_tls: scheme.is_tls(),
        })
    }

    /// Value for the `Host` header: port omitted when it is the default
    pub fn host_header(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port == self.scheme.default_port() {
            host
        } else {
            format!("{}:{}", host, self.port)
        }
    }

    /// Resolve a redirect `Location` against this URL
    ///
    /// Accepts absolute URLs, scheme-relative (`//host/path`), absolute
    /// paths and paths relative to the current directory.
    pub fn join(&self, location: &str) -> Result<ParsedUrl> {
        let location = location.trim();
        if location.contains("://") {
            return ParsedUrl::parse(location);
        }
        if let Some(rest) = location.strip_prefix("//") {
            return ParsedUrl::parse(&format!("{}://{}", self.scheme.as_str(), rest));
        }

        let path = if location.starts_with('/') {
            location.to_string()
        } else {
            let current = self.path.split('?').next().unwrap_or("/");
            let dir = match current.rfind('/') {
                Some(idx) => &current[..=idx],
                None => "/",
            };
            format!("{}{}", dir, location)
        };

        Ok(ParsedUrl {
            path: path.split('#').next().unwrap_or("/").to_string(),
            ..self.clone()
        })
    }
}

fn split_host_port(authority: &str) -> Option<(&str, Option<&str>)> {
    if let Some(rest) = authority.strip_prefix('[') {
        let (host, after) = rest.split_once(']')?;
        return match after {
            "" => Some((host, None)),
            _ => Some((host, Some(after.strip_prefix(':')?))),
        };
    }
    match authority.rsplit_once(':') {
        Some((host, port)) => Some((host, Some(port))),
        None => Some((authority, None)),
    }
}

impl FromStr for ParsedUrl {
    type Err = WirePoolError;

    fn from_str(s: &str) -> Result<Self> {
        ParsedUrl::parse(s)
    }
}

impl fmt::Display for ParsedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        write!(f, "{}://{}:{}{}", self.scheme.as_str(), host, self.port, self.path)
    }
}
