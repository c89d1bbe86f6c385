use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::config::SessionSpec;
use crate::error::ConfigError;

/// Decides whether a session token presented for `provider` is usable.
///
/// Issuing and validating tokens belongs to the identity provider; this is
/// the seam where its answer enters rule evaluation.
pub trait SessionVerifier: Send + Sync {
    fn verify(&self, provider: &str, token: &str, now: DateTime<Utc>) -> SessionState;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Missing,
    Valid { subject: String },
    Invalid,
    Expired,
}

impl SessionState {
    pub fn kind_str(&self) -> &'static str {
        match self {
            SessionState::Missing => "missing",
            SessionState::Valid { .. } => "valid",
            SessionState::Invalid => "invalid",
            SessionState::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    subject: String,
    provider: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

/// Fixed token table, used by the preview listener and `route`.
#[derive(Debug, Clone, Default)]
pub struct StaticSessionVerifier {
    sessions: HashMap<String, Entry>,
}

impl StaticSessionVerifier {
    pub fn from_specs(specs: &[SessionSpec]) -> Result<Self, ConfigError> {
        let mut v = Self::default();
        for (i, s) in specs.iter().enumerate() {
            if s.token.trim().is_empty() {
                return Err(ConfigError::invalid(format!("sessions[{i}].token"), "must not be empty"));
            }
            if v.sessions.contains_key(&s.token) {
                return Err(ConfigError::invalid(
                    format!("sessions[{i}].token"),
                    "token is listed more than once",
                ));
            }
            v.insert(&s.token, &s.subject, s.provider.as_deref(), s.expires_at);
        }
        Ok(v)
    }

    pub fn insert(
        &mut self,
        token: &str,
        subject: &str,
        provider: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) {
        self.sessions.insert(
            token.to_string(),
            Entry {
                subject: subject.to_string(),
                provider: provider.map(str::to_string),
                expires_at,
            },
        );
    }
}

impl SessionVerifier for StaticSessionVerifier {
    fn verify(&self, provider: &str, token: &str, now: DateTime<Utc>) -> SessionState {
        let Some(e) = self.sessions.get(token) else {
            return SessionState::Invalid;
        };
        if e.provider.as_deref().is_some_and(|p| p != provider) {
            return SessionState::Invalid;
        }
        if e.expires_at.is_some_and(|t| t <= now) {
            return SessionState::Expired;
        }
        SessionState::Valid {
            subject: e.subject.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
    }

    #[test]
    fn unknown_token_is_invalid() {
        let v = StaticSessionVerifier::default();
        assert_eq!(v.verify("cognito", "nope", now()), SessionState::Invalid);
    }

    #[test]
    fn known_token_is_valid_until_expiry() {
        let mut v = StaticSessionVerifier::default();
        v.insert("t1", "alice", None, Some(now() + Duration::minutes(5)));
        assert_eq!(
            v.verify("cognito", "t1", now()),
            SessionState::Valid {
                subject: "alice".into()
            }
        );
        assert_eq!(
            v.verify("cognito", "t1", now() + Duration::minutes(5)),
            SessionState::Expired
        );
    }

    #[test]
    fn provider_bound_token_rejected_elsewhere() {
        let mut v = StaticSessionVerifier::default();
        v.insert("t1", "bob", Some("partners"), None);
        assert_eq!(v.verify("cognito", "t1", now()), SessionState::Invalid);
        assert!(matches!(
            v.verify("partners", "t1", now()),
            SessionState::Valid { .. }
        ));
    }

    #[test]
    fn duplicate_tokens_fail_config() {
        let spec = SessionSpec {
            token: "dup".into(),
            subject: "a".into(),
            provider: None,
            expires_at: None,
        };
        let err = StaticSessionVerifier::from_specs(&[spec.clone(), spec]).unwrap_err();
        assert!(err.to_string().starts_with("sessions[1].token"));
    }
}
