use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::compiled::{Action, CompiledRule, CompiledRuleSet, Priority};
use super::decision::Decision;
use super::request::RequestContext;
use crate::auth::{self, session::SessionVerifier, Gate};

/// Evaluates a request against an immutable rule set.
#[derive(Debug, Clone)]
pub struct RuleEvaluator {
    rules: Arc<CompiledRuleSet>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub rule_id: String,
    pub priority: Priority,
    pub decision: Decision,
    /// Set when an authenticate action accepted a session.
    pub subject: Option<String>,
}

impl RuleEvaluator {
    pub fn new(rules: CompiledRuleSet) -> Self {
        Self {
            rules: Arc::new(rules),
        }
    }

    pub fn rules(&self) -> &CompiledRuleSet {
        &self.rules
    }

    /// First rule in ascending priority whose conditions hold; the default
    /// rule when none does.
    pub fn resolve(&self, req: &RequestContext) -> &CompiledRule {
        self.rules
            .rules()
            .iter()
            .find(|r| r.matches(req))
            .unwrap_or_else(|| self.rules.default_rule())
    }

    /// Resolve the rule, then run its action, passing through any
    /// authenticate gate.
    pub fn decide(
        &self,
        req: &RequestContext,
        sessions: &dyn SessionVerifier,
        now: DateTime<Utc>,
    ) -> Outcome {
        let rule = self.resolve(req);
        let mut subject = None;
        let decision = realize(&rule.action, req, sessions, now, &mut subject);

        Outcome {
            rule_id: rule.id.clone(),
            priority: rule.priority,
            decision,
            subject,
        }
    }
}

fn realize(
    action: &Action,
    req: &RequestContext,
    sessions: &dyn SessionVerifier,
    now: DateTime<Utc>,
    subject: &mut Option<String>,
) -> Decision {
    match action {
        Action::Forward { target } => Decision::Forward {
            target: target.clone(),
        },

        Action::FixedResponse {
            status,
            content_type,
            body,
        } => Decision::FixedResponse {
            status: *status,
            content_type: content_type.clone(),
            body: body.clone(),
        },

        Action::Redirect(r) => Decision::Redirect {
            status: r.status,
            location: r.location(req),
        },

        Action::Authenticate { provider, next } => match auth::gate(provider, req, sessions, now) {
            Gate::Pass { subject: s } => {
                *subject = s;
                realize(next, req, sessions, now, subject)
            }
            Gate::Login { location } => Decision::RedirectToLogin {
                provider: provider.name.clone(),
                location,
            },
            Gate::Deny => Decision::unauthorized(),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::TimeZone;

    use super::*;
    use crate::auth::session::StaticSessionVerifier;
    use crate::auth::IdentityProvider;
    use crate::config::{IdentityProviderSpec, TargetSpec};
    use crate::listener::compiled::CompileContext;
    use crate::listener::types::RuleSetFile;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
    }

    fn evaluator(yaml: &str) -> RuleEvaluator {
        let targets = BTreeMap::from([
            ("function".to_string(), TargetSpec::Function),
            ("t".to_string(), TargetSpec::Function),
        ]);
        let spec = IdentityProviderSpec {
            user_pool: "users".into(),
            client: "client".into(),
            domain_prefix: "login".into(),
            region: None,
            scope: None,
            session_cookie_name: None,
            session_timeout_secs: None,
            on_unauthenticated: None,
        };
        let providers = BTreeMap::from([(
            "idp".to_string(),
            IdentityProvider::from_spec("idp", &spec, "us-east-1").unwrap(),
        )]);
        let file = RuleSetFile::from_yaml(yaml).unwrap();
        let rs = CompiledRuleSet::compile(
            &file,
            &CompileContext {
                targets: &targets,
                providers: &providers,
                auth_enabled: true,
            },
        )
        .unwrap();
        RuleEvaluator::new(rs)
    }

    const ROUTES: &str = r#"
rules:
  - id: routes
    priority: 1
    conditions: { path_patterns: ["/routes"] }
    action: { forward: { target: t } }
  - id: not-found
    priority: default
    action: { fixed_response: { status: 404, body: Not Found } }
"#;

    const GATED: &str = r#"
rules:
  - id: routes
    priority: 1
    conditions: { path_patterns: ["/routes"] }
    action:
      authenticate:
        provider: idp
        next: { forward: { target: t } }
  - id: not-found
    priority: default
    action: { fixed_response: { status: 404, body: Not Found } }
"#;

    fn decide(ev: &RuleEvaluator, req: &RequestContext) -> Outcome {
        ev.decide(req, &StaticSessionVerifier::default(), now())
    }

    #[test]
    fn routes_scenario() {
        let ev = evaluator(ROUTES);

        let o = decide(&ev, &RequestContext::new("GET", "/routes"));
        assert_eq!(o.decision, Decision::Forward { target: "t".into() });
        assert_eq!(o.rule_id, "routes");
        assert_eq!(o.priority, Priority::Explicit(1));

        let o = decide(&ev, &RequestContext::new("GET", "/other"));
        assert_eq!(
            o.decision,
            Decision::FixedResponse {
                status: 404,
                content_type: "text/plain".into(),
                body: "Not Found".into()
            }
        );
        assert_eq!(o.priority, Priority::Default);
    }

    #[test]
    fn query_string_is_ignored_for_paths() {
        let ev = evaluator(ROUTES);
        let o = decide(&ev, &RequestContext::new("GET", "/routes?page=2"));
        assert_eq!(o.rule_id, "routes");
    }

    #[test]
    fn lowest_priority_wins_over_file_order() {
        let ev = evaluator(
            r#"
rules:
  - id: broad
    priority: 10
    conditions: { path_patterns: ["/api/*"] }
    action: { forward: { target: function } }
  - id: narrow
    priority: 2
    conditions: { path_patterns: ["/api/admin*"] }
    action: { fixed_response: { status: 403, body: Forbidden } }
  - id: d
    priority: default
    action: { fixed_response: { status: 404 } }
"#,
        );
        assert_eq!(decide(&ev, &RequestContext::new("GET", "/api/admin/users")).rule_id, "narrow");
        assert_eq!(decide(&ev, &RequestContext::new("GET", "/api/users")).rule_id, "broad");
        assert_eq!(decide(&ev, &RequestContext::new("GET", "/api")).rule_id, "d");
    }

    #[test]
    fn every_path_resolves_to_exactly_one_rule_deterministically() {
        let ev = evaluator(ROUTES);
        for p in ["/", "/routes", "/routes/", "/ROUTES", "//routes", "/a/b/c", "/routes?x"] {
            let req = RequestContext::new("GET", p);
            let first = decide(&ev, &req);
            let second = decide(&ev, &req);
            assert_eq!(first, second, "evaluation of {p} is not idempotent");
            let matching_explicit = ev.rules().rules().iter().filter(|r| r.matches(&req)).count();
            if matching_explicit == 0 {
                assert_eq!(first.rule_id, "not-found");
            }
        }
    }

    #[test]
    fn unauthenticated_gated_route_redirects_to_login() {
        let ev = evaluator(GATED);
        let req = RequestContext::new("GET", "/routes")
            .secure(true)
            .with_host("app.example.com");
        let o = decide(&ev, &req);
        match o.decision {
            Decision::RedirectToLogin { provider, location } => {
                assert_eq!(provider, "idp");
                assert!(location.starts_with("https://login.auth.us-east-1.amazoncognito.com/"));
            }
            other => panic!("expected login redirect, got {other:?}"),
        }
        assert_eq!(o.subject, None);
    }

    #[test]
    fn valid_session_reaches_wrapped_forward() {
        let ev = evaluator(GATED);
        let mut sessions = StaticSessionVerifier::default();
        sessions.insert("good", "alice", Some("idp"), None);
        let req = RequestContext::new("GET", "/routes")
            .with_header("cookie", "AWSELBAuthSessionCookie=good");
        let o = ev.decide(&req, &sessions, now());
        assert_eq!(o.decision, Decision::Forward { target: "t".into() });
        assert_eq!(o.subject.as_deref(), Some("alice"));
    }

    #[test]
    fn invalid_session_is_treated_as_unauthenticated() {
        let ev = evaluator(GATED);
        let req = RequestContext::new("GET", "/routes")
            .with_header("cookie", "AWSELBAuthSessionCookie=forged");
        assert_eq!(decide(&ev, &req).decision.kind_str(), "login");
    }

    #[test]
    fn gate_does_not_touch_ungated_routes() {
        let ev = evaluator(GATED);
        let o = decide(&ev, &RequestContext::new("GET", "/elsewhere"));
        assert_eq!(o.decision.status(), Some(404));
    }

    #[test]
    fn https_redirect_rule_set() {
        let file = RuleSetFile::https_redirect(443);
        let rs = CompiledRuleSet::compile(
            &file,
            &CompileContext {
                targets: &BTreeMap::new(),
                providers: &BTreeMap::new(),
                auth_enabled: false,
            },
        )
        .unwrap();
        let ev = RuleEvaluator::new(rs);
        let req = RequestContext::new("GET", "/routes?x=1").with_host("example.com");
        assert_eq!(
            decide(&ev, &req).decision,
            Decision::Redirect {
                status: 301,
                location: "https://example.com/routes?x=1".into()
            }
        );
    }
}
