use std::borrow::Cow;
use std::collections::HashMap;

use crate::auth::cookie;

/// What the rule set gets to see of an incoming request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub method: String,
    /// Normalized path, never carries the query string.
    pub path: String,
    pub query: Option<String>,
    pub host: Option<String>,
    pub port: u16,
    pub secure: bool,
    headers: HashMap<String, String>,
}

impl RequestContext {
    /// `target` is the request-target as received, e.g. "/a//b?x=1".
    pub fn new(method: &str, target: &str) -> Self {
        let target = target.split('#').next().unwrap_or("");
        let (raw_path, query) = match target.split_once('?') {
            Some((p, q)) => (p, Some(q.to_string()).filter(|q| !q.is_empty())),
            None => (target, None),
        };

        Self {
            method: method.to_string(),
            path: normalize_path(raw_path),
            query,
            host: None,
            port: 80,
            secure: false,
            headers: HashMap::new(),
        }
    }

    pub fn secure(mut self, on: bool) -> Self {
        self.secure = on;
        self.port = if on { 443 } else { 80 };
        self
    }

    pub fn with_host(mut self, host: &str) -> Self {
        let (h, port) = split_host(host);
        self.host = Some(h).filter(|h| !h.is_empty());
        if let Some(p) = port {
            self.port = p;
        }
        self
    }

    /// Repeated headers are folded into one comma separated value; repeated
    /// cookie headers are joined with "; ".
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        let name = name.trim().to_ascii_lowercase();
        if name == "host" && self.host.is_none() {
            self = self.with_host(value);
        }
        let sep = if name == "cookie" { "; " } else { ", " };
        self.headers
            .entry(name)
            .and_modify(|v| {
                v.push_str(sep);
                v.push_str(value);
            })
            .or_insert_with(|| value.to_string());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn session_token(&self, cookie_name: &str) -> Option<Cow<'_, str>> {
        self.header("cookie")
            .and_then(|h| cookie::session_token(h, cookie_name))
    }

    pub fn scheme(&self) -> &'static str {
        if self.secure {
            "https"
        } else {
            "http"
        }
    }

    /// Path plus query, what the client originally asked for.
    pub fn original_target(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }
}

/// Collapse repeated slashes; an empty path becomes "/".
pub fn normalize_path(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 1);
    if !raw.starts_with('/') {
        out.push('/');
    }
    let mut prev_slash = out.ends_with('/');
    for ch in raw.chars() {
        if ch == '/' {
            if !prev_slash {
                out.push(ch);
            }
            prev_slash = true;
        } else {
            prev_slash = false;
            out.push(ch);
        }
    }
    out
}

fn split_host(host: &str) -> (String, Option<u16>) {
    let h = host.trim().to_ascii_lowercase();
    if h.starts_with('[') {
        // IPv6 literal: "[::1]:8080"
        if let Some(end) = h.find(']') {
            let port = h[end + 1..].strip_prefix(':').and_then(|p| p.parse().ok());
            return (h[..=end].to_string(), port);
        }
        return (h, None);
    }
    if let Some(i) = h.rfind(':') {
        let (left, right) = h.split_at(i);
        if let Ok(p) = right[1..].parse::<u16>() {
            return (left.trim_end_matches('.').to_string(), Some(p));
        }
    }
    (h.trim_end_matches('.').to_string(), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_query_and_fragment() {
        let r = RequestContext::new("GET", "/routes?id=7#top");
        assert_eq!(r.path, "/routes");
        assert_eq!(r.query.as_deref(), Some("id=7"));
        assert_eq!(r.original_target(), "/routes?id=7");
    }

    #[test]
    fn collapses_slashes() {
        assert_eq!(normalize_path("//a///b/"), "/a/b/");
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("x"), "/x");
    }

    #[test]
    fn host_header_sets_host_and_port() {
        let r = RequestContext::new("GET", "/")
            .secure(true)
            .with_header("Host", "App.Example.com:8443");
        assert_eq!(r.host.as_deref(), Some("app.example.com"));
        assert_eq!(r.port, 8443);
        assert_eq!(r.header("host"), Some("App.Example.com:8443"));
    }

    #[test]
    fn ipv6_host_keeps_brackets() {
        let r = RequestContext::new("GET", "/").with_host("[::1]:9000");
        assert_eq!(r.host.as_deref(), Some("[::1]"));
        assert_eq!(r.port, 9000);
    }

    #[test]
    fn repeated_headers_fold() {
        let r = RequestContext::new("GET", "/")
            .with_header("X-Tag", "a")
            .with_header("x-tag", "b");
        assert_eq!(r.header("X-TAG"), Some("a, b"));
    }

    #[test]
    fn reads_session_cookie() {
        let r = RequestContext::new("GET", "/")
            .with_header("cookie", "AWSELBAuthSessionCookie-0=ab; AWSELBAuthSessionCookie-1=cd");
        assert_eq!(
            r.session_token("AWSELBAuthSessionCookie").as_deref(),
            Some("abcd")
        );
    }

    #[test]
    fn split_cookie_headers_join_with_semicolon() {
        let r = RequestContext::new("GET", "/")
            .with_header("cookie", "theme=dark")
            .with_header("cookie", "AWSELBAuthSessionCookie=t");
        assert_eq!(r.header("cookie"), Some("theme=dark; AWSELBAuthSessionCookie=t"));
        assert_eq!(r.session_token("AWSELBAuthSessionCookie").as_deref(), Some("t"));
    }
}
