use http::Uri;
use pingora_core::upstreams::peer::HttpPeer;

use crate::error::ConfigError;

/// A parsed `http` target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl Upstream {
    pub fn parse(target: &str, upstream: &str) -> Result<Self, ConfigError> {
        let field = format!("targets.{target}.upstream");
        let uri: Uri = upstream
            .parse()
            .map_err(|e| ConfigError::invalid(&field, format!("'{upstream}': {e}")))?;

        let tls = match uri.scheme_str() {
            Some(s) if s.eq_ignore_ascii_case("https") => true,
            Some(s) if s.eq_ignore_ascii_case("http") => false,
            _ => {
                return Err(ConfigError::invalid(
                    &field,
                    format!("'{upstream}' must be an http:// or https:// url"),
                ))
            }
        };
        let auth = uri
            .authority()
            .ok_or_else(|| ConfigError::invalid(&field, format!("'{upstream}' has no host")))?;

        // Fill default ports.
        let port = auth.port_u16().unwrap_or(if tls { 443 } else { 80 });

        Ok(Self {
            host: auth.host().trim_matches(['[', ']']).to_string(),
            port,
            tls,
        })
    }

    pub fn is_ip(&self) -> bool {
        self.host.parse::<std::net::IpAddr>().is_ok()
    }

    pub fn addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn peer(&self) -> HttpPeer {
        // If upstream host is an IP literal, don't set SNI.
        let sni = if self.is_ip() {
            String::new()
        } else {
            self.host.clone()
        };
        HttpPeer::new(self.addr(), self.tls, sni)
    }
}
