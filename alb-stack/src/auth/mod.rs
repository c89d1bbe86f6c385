pub mod cookie;
pub mod login;
pub mod session;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::IdentityProviderSpec;
use crate::error::ConfigError;
use crate::listener::request::RequestContext;

use self::session::{SessionState, SessionVerifier};

pub const DEFAULT_SESSION_COOKIE: &str = "AWSELBAuthSessionCookie";
pub const DEFAULT_SCOPE: &str = "openid";
pub const MAX_SESSION_TIMEOUT_SECS: u64 = 604_800;

/// What to do with a request that has no usable session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OnUnauthenticated {
    #[default]
    Authenticate,
    Deny,
    Allow,
}

/// User pool, app client and hosted domain that gate a route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityProvider {
    pub name: String,
    pub user_pool: String,
    pub client: String,
    pub domain_prefix: String,
    pub region: String,
    pub scope: String,
    pub session_cookie_name: String,
    pub session_timeout_secs: u64,
    pub on_unauthenticated: OnUnauthenticated,
}

impl IdentityProvider {
    pub fn from_spec(
        name: &str,
        spec: &IdentityProviderSpec,
        default_region: &str,
    ) -> Result<Self, ConfigError> {
        let field = |f: &str| format!("identity_providers.{name}.{f}");

        if spec.user_pool.trim().is_empty() {
            return Err(ConfigError::invalid(field("user_pool"), "must not be empty"));
        }
        if spec.client.trim().is_empty() {
            return Err(ConfigError::invalid(field("client"), "must not be empty"));
        }
        if !valid_domain_prefix(&spec.domain_prefix) {
            return Err(ConfigError::invalid(
                field("domain_prefix"),
                "use 1-63 lowercase letters, digits or '-', not starting or ending with '-'",
            ));
        }

        let session_cookie_name = spec
            .session_cookie_name
            .clone()
            .unwrap_or_else(|| DEFAULT_SESSION_COOKIE.to_string());
        if session_cookie_name.is_empty()
            || !session_cookie_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ConfigError::invalid(
                field("session_cookie_name"),
                "use letters, digits, '-' or '_'",
            ));
        }

        let session_timeout_secs = spec.session_timeout_secs.unwrap_or(MAX_SESSION_TIMEOUT_SECS);
        if !(1..=MAX_SESSION_TIMEOUT_SECS).contains(&session_timeout_secs) {
            return Err(ConfigError::invalid(
                field("session_timeout_secs"),
                format!("must be within 1..={MAX_SESSION_TIMEOUT_SECS}"),
            ));
        }

        Ok(Self {
            name: name.to_string(),
            user_pool: spec.user_pool.clone(),
            client: spec.client.clone(),
            domain_prefix: spec.domain_prefix.clone(),
            region: spec
                .region
                .clone()
                .unwrap_or_else(|| default_region.to_string()),
            scope: spec.scope.clone().unwrap_or_else(|| DEFAULT_SCOPE.to_string()),
            session_cookie_name,
            session_timeout_secs,
            on_unauthenticated: spec.on_unauthenticated.unwrap_or_default(),
        })
    }

    pub fn resolve_all(
        specs: &BTreeMap<String, IdentityProviderSpec>,
        default_region: &str,
    ) -> Result<BTreeMap<String, IdentityProvider>, ConfigError> {
        specs
            .iter()
            .map(|(name, spec)| Ok((name.clone(), Self::from_spec(name, spec, default_region)?)))
            .collect()
    }

    pub fn hosted_domain(&self) -> String {
        format!("{}.auth.{}.amazoncognito.com", self.domain_prefix, self.region)
    }
}

fn valid_domain_prefix(p: &str) -> bool {
    (1..=63).contains(&p.len())
        && !p.starts_with('-')
        && !p.ends_with('-')
        && p.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Result of putting a request through an authenticate action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gate {
    /// Continue with the wrapped action. `subject` is None when an
    /// unauthenticated request is let through by `on_unauthenticated: allow`.
    Pass { subject: Option<String> },
    Login { location: String },
    Deny,
}

pub fn gate(
    provider: &IdentityProvider,
    req: &RequestContext,
    sessions: &dyn SessionVerifier,
    now: DateTime<Utc>,
) -> Gate {
    let state = match req.session_token(&provider.session_cookie_name) {
        Some(token) => sessions.verify(&provider.name, &token, now),
        None => SessionState::Missing,
    };

    if let SessionState::Valid { subject } = state {
        return Gate::Pass {
            subject: Some(subject),
        };
    }

    tracing::debug!(
        provider = %provider.name,
        session = state.kind_str(),
        path = %req.path,
        "unauthenticated request"
    );

    match provider.on_unauthenticated {
        OnUnauthenticated::Authenticate => Gate::Login {
            location: login::login_url(provider, req),
        },
        OnUnauthenticated::Deny => Gate::Deny,
        OnUnauthenticated::Allow => Gate::Pass { subject: None },
    }
}

#[cfg(test)]
mod tests {
    use super::session::StaticSessionVerifier;
    use super::*;
    use chrono::{Duration, TimeZone};

    fn spec() -> IdentityProviderSpec {
        IdentityProviderSpec {
            user_pool: "demo-users".into(),
            client: "client123".into(),
            domain_prefix: "demo-login".into(),
            region: None,
            scope: None,
            session_cookie_name: None,
            session_timeout_secs: None,
            on_unauthenticated: None,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
    }

    #[test]
    fn spec_defaults_fill_in() {
        let p = IdentityProvider::from_spec("cognito", &spec(), "us-east-1").unwrap();
        assert_eq!(p.region, "us-east-1");
        assert_eq!(p.scope, "openid");
        assert_eq!(p.session_cookie_name, DEFAULT_SESSION_COOKIE);
        assert_eq!(p.session_timeout_secs, MAX_SESSION_TIMEOUT_SECS);
        assert_eq!(p.on_unauthenticated, OnUnauthenticated::Authenticate);
        assert_eq!(p.hosted_domain(), "demo-login.auth.us-east-1.amazoncognito.com");
    }

    #[test]
    fn rejects_bad_domain_prefix() {
        let mut s = spec();
        s.domain_prefix = "Demo_Login".into();
        let err = IdentityProvider::from_spec("cognito", &s, "us-east-1").unwrap_err();
        assert!(err.to_string().starts_with("identity_providers.cognito.domain_prefix"));
    }

    #[test]
    fn rejects_timeout_out_of_range() {
        let mut s = spec();
        s.session_timeout_secs = Some(0);
        assert!(IdentityProvider::from_spec("cognito", &s, "us-east-1").is_err());
    }

    #[test]
    fn gate_redirects_without_session() {
        let p = IdentityProvider::from_spec("cognito", &spec(), "us-east-1").unwrap();
        let req = RequestContext::new("GET", "/routes").with_host("app.example.com");
        let g = gate(&p, &req, &StaticSessionVerifier::default(), now());
        assert!(matches!(g, Gate::Login { location } if location.contains("state=%2Froutes")));
    }

    #[test]
    fn gate_passes_valid_session() {
        let p = IdentityProvider::from_spec("cognito", &spec(), "us-east-1").unwrap();
        let mut v = StaticSessionVerifier::default();
        v.insert("tok", "alice", None, None);
        let req = RequestContext::new("GET", "/routes")
            .with_header("cookie", "AWSELBAuthSessionCookie=tok");
        assert_eq!(
            gate(&p, &req, &v, now()),
            Gate::Pass {
                subject: Some("alice".into())
            }
        );
    }

    #[test]
    fn expired_session_is_unauthenticated() {
        let mut s = spec();
        s.on_unauthenticated = Some(OnUnauthenticated::Deny);
        let p = IdentityProvider::from_spec("cognito", &s, "us-east-1").unwrap();
        let mut v = StaticSessionVerifier::default();
        v.insert("tok", "alice", None, Some(now() - Duration::seconds(1)));
        let req = RequestContext::new("GET", "/routes")
            .with_header("cookie", "AWSELBAuthSessionCookie=tok");
        assert_eq!(gate(&p, &req, &v, now()), Gate::Deny);
    }

    #[test]
    fn allow_lets_anonymous_through() {
        let mut s = spec();
        s.on_unauthenticated = Some(OnUnauthenticated::Allow);
        let p = IdentityProvider::from_spec("cognito", &s, "us-east-1").unwrap();
        let req = RequestContext::new("GET", "/routes");
        assert_eq!(
            gate(&p, &req, &StaticSessionVerifier::default(), now()),
            Gate::Pass { subject: None }
        );
    }
}
