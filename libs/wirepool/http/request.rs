//! HTTP/1.1 request model and serialization

use crate::core::url::ParsedUrl;
use crate::traits::error::{Result, WirePoolError};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = WirePoolError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "HEAD" => Ok(Method::Head),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            "OPTIONS" => Ok(Method::Options),
            other => Err(WirePoolError::Configuration(format!("unsupported method {}", other))),
        }
    }
}

/// Reject header names and values that would end their line early
///
/// Names must be non-empty tokens without whitespace, control bytes or
/// `:`; values must not contain CR, LF or NUL.
pub fn check_header(name: &str, value: &str) -> Result<()> {
    if name.is_empty() || name.bytes().any(|b| b <= b' ' || b == b':' || b == 0x7f) {
        return Err(WirePoolError::InvalidHeader(format!("bad name {:?}", name)));
    }
    if value.bytes().any(|b| matches!(b, b'\r' | b'\n' | 0)) {
        return Err(WirePoolError::InvalidHeader(format!("bad value for {}", name)));
    }
    Ok(())
}

/// One logical request; redirects rewrite `url` (and possibly `method`)
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: ParsedUrl,
    /// Sent in order, after the generated `Host` line
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Shut down the write side once the request is written
    pub half_close: bool,
}

impl HttpRequest {
    pub fn new(method: Method, url: &str) -> Result<Self> {
        let url = ParsedUrl::parse(url)?;
        if url.scheme.is_websocket() {
            return Err(WirePoolError::InvalidUrl(format!(
                "{} is not an http:// or https:// URL",
                url
            )));
        }
        Ok(Self {
            method,
            url,
            headers: Vec::new(),
            body: Vec::new(),
            half_close: false,
        })
    }

    pub fn get(url: &str) -> Result<Self> {
        Self::new(Method::Get, url)
    }

    pub fn post(url: &str, body: impl Into<Vec<u8>>) -> Result<Self> {
        Ok(Self::new(Method::Post, url)?.body(body))
    }

    /// Append a header; fails with `InvalidHeader` on CR/LF injection
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        let (name, value) = (name.into(), value.into());
        check_header(&name, &value)?;
        self.headers.push((name, value));
        Ok(self)
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn content_type(self, value: impl Into<String>) -> Result<Self> {
        self.header("Content-Type", value)
    }

    pub fn user_agent(self, value: impl Into<String>) -> Result<Self> {
        self.header("User-Agent", value)
    }

    pub fn half_close(mut self, enabled: bool) -> Self {
        self.half_close = enabled;
        self
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Wire form of the request
    ///
    /// Adds `Host`, `User-Agent` (unless set), `Connection: close` (unless
    /// set) and `Content-Length` when there is a body.
    pub fn serialize(&self, default_user_agent: &str) -> Vec<u8> {
        let mut head = String::with_capacity(256);
        head.push_str(self.method.as_str());
        head.push(' ');
        head.push_str(&self.url.path);
        head.push_str(" HTTP/1.1\r\n");

        head.push_str("Host: ");
        head.push_str(&self.url.host_header());
        head.push_str("\r\n");

        if !self.has_header("user-agent") {
            head.push_str("User-Agent: ");
            head.push_str(default_user_agent);
            head.push_str("\r\n");
        }
        if !self.has_header("connection") {
            head.push_str("Connection: close\r\n");
        }

        for (name, value) in &self.headers {
            if name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }

        if !self.body.is_empty() || matches!(self.method, Method::Post | Method::Put | Method::Patch) {
            head.push_str("Content-Length: ");
            head.push_str(&self.body.len().to_string());
            head.push_str("\r\n");
        }
        head.push_str("\r\n");

        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }

    /// Rewrite for a redirect to `location`
    ///
    /// 303, and 301/302 after a POST, turn the request into a body-less GET.
    pub fn redirect(&mut self, status: u16, location: &str) -> Result<()> {
        self.url = self.url.join(location)?;
        let to_get = match status {
            303 => self.method != Method::Head,
            301 | 302 => self.method == Method::Post,
            _ => false,
        };
        if to_get {
            self.method = Method::Get;
            self.body.clear();
            self.headers.retain(|(k, _)| {
                !k.eq_ignore_ascii_case("content-type") && !k.eq_ignore_ascii_case("content-length")
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_get() {
        let request = HttpRequest::get("http://example.com:8080/index.html?x=1")
            .unwrap()
            .header("Accept", "text/html")
            .unwrap();
        let text = String::from_utf8(request.serialize("wirepool/0.1")).unwrap();

        assert!(text.starts_with("GET /index.html?x=1 HTTP/1.1\r\n"));
        assert!(text.contains("Host: example.com:8080\r\n"));
        assert!(text.contains("User-Agent: wirepool/0.1\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.contains("Accept: text/html\r\n"));
        assert!(!text.contains("Content-Length"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_serialize_post_with_body() {
        let request = HttpRequest::post("http://example.com/submit", "a=1&b=2")
            .unwrap()
            .content_type("application/x-www-form-urlencoded")
            .unwrap()
            .user_agent("custom/1.0")
            .unwrap();
        let text = String::from_utf8(request.serialize("wirepool/0.1")).unwrap();

        assert!(text.starts_with("POST /submit HTTP/1.1\r\n"));
        assert!(text.contains("User-Agent: custom/1.0\r\n"));
        assert!(!text.contains("wirepool/0.1"));
        assert!(text.contains("Content-Length: 7\r\n"));
        assert!(text.ends_with("\r\n\r\na=1&b=2"));
    }

    #[test]
    fn test_default_port_host_header() {
        let request = HttpRequest::get("https://example.com/").unwrap();
        let text = String::from_utf8(request.serialize("ua")).unwrap();
        assert!(text.contains("Host: example.com\r\n"));
    }

    #[test]
    fn test_header_injection_rejected() {
        let request = HttpRequest::get("http://example.com/").unwrap();
        assert!(matches!(
            request.clone().header("X-Note", "a\r\nX-Injected: 1"),
            Err(WirePoolError::InvalidHeader(_))
        ));
        assert!(matches!(
            request.clone().header("X-Bad\nName", "v"),
            Err(WirePoolError::InvalidHeader(_))
        ));
        assert!(request.clone().header("", "v").is_err());
        assert!(request.clone().header("X Space", "v").is_err());
        assert!(request.clone().content_type("text/plain\n").is_err());

        let request = request.header("X-Note", "tabs\tand spaces are fine").unwrap();
        let text = String::from_utf8(request.serialize("ua")).unwrap();
        assert!(text.contains("X-Note: tabs\tand spaces are fine\r\n"));
    }

    #[test]
    fn test_rejects_websocket_url() {
        assert!(HttpRequest::get("ws://example.com/").is_err());
    }

    #[test]
    fn test_redirect_rewrites() {
        let mut request = HttpRequest::post("http://example.com/form", "data")
            .unwrap()
            .content_type("text/plain")
            .unwrap();
        request.redirect(302, "/done").unwrap();
        assert_eq!(request.method, Method::Get);
        assert!(request.body.is_empty());
        assert!(!request.has_header("content-type"));
        assert_eq!(request.url.path, "/done");

        let mut request = HttpRequest::new(Method::Put, "http://example.com/a").unwrap();
        request.redirect(307, "http://other.example.com/b").unwrap();
        assert_eq!(request.method, Method::Put);
        assert_eq!(request.url.host, "other.example.com");
    }

    #[test]
    fn test_method_parse() {
        assert_eq!("get".parse::<Method>().unwrap(), Method::Get);
        assert!("BREW".parse::<Method>().is_err());
    }
}
