use serde::Deserialize;

/// On-disk rule set (rules.yaml).
#[derive(Debug, Clone, Deserialize)]
pub struct RuleSetFile {
    pub version: Option<String>,
    pub rules: Vec<RuleSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleSpec {
    pub id: String,

    /// A positive integer, or "default" for the catch-all rule.
    pub priority: PrioritySpec,

    #[serde(default)]
    pub conditions: Option<ConditionsSpec>,

    pub action: ActionSpec,
}

/// Kept loose so that a bad value is reported against its rule.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PrioritySpec {
    Number(i64),
    Keyword(String),
    Other(serde_yaml::Value),
}

/// Condition kinds are AND-ed, values inside one kind are OR-ed.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConditionsSpec {
    pub path_patterns: Option<Vec<String>>,
    pub host_headers: Option<Vec<String>>,
    pub http_methods: Option<Vec<String>>,
    pub http_headers: Option<Vec<HttpHeaderSpec>>,
}

impl ConditionsSpec {
    pub fn is_empty(&self) -> bool {
        self.path_patterns.is_none()
            && self.host_headers.is_none()
            && self.http_methods.is_none()
            && self.http_headers.is_none()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpHeaderSpec {
    pub name: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)] // natural YAML: action: { forward: {...} } / { authenticate: {...} }
pub enum ActionSpec {
    Forward { forward: ForwardSpec },
    Authenticate { authenticate: AuthenticateSpec },
    FixedResponse { fixed_response: FixedResponseSpec },
    Redirect { redirect: RedirectSpec },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForwardSpec {
    pub target: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthenticateSpec {
    pub provider: String,
    /// Action taken once the request carries a valid session.
    pub next: Box<ActionSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FixedResponseSpec {
    pub status: u16,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RedirectSpec {
    pub protocol: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: Option<String>,
    pub query: Option<String>,
    #[serde(default = "default_redirect_status")]
    pub status: u16,
}

fn default_content_type() -> String {
    "text/plain".to_string()
}

fn default_redirect_status() -> u16 {
    301
}

impl RuleSetFile {
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// `/routes` to the function, 404 for everything else. The route is
    /// wrapped in an authenticate action when `auth_provider` is given.
    pub fn builtin(function_target: &str, auth_provider: Option<&str>) -> Self {
        let forward = ActionSpec::Forward {
            forward: ForwardSpec {
                target: function_target.to_string(),
            },
        };
        let routes_action = match auth_provider {
            Some(p) => ActionSpec::Authenticate {
                authenticate: AuthenticateSpec {
                    provider: p.to_string(),
                    next: Box::new(forward),
                },
            },
            None => forward,
        };

        Self {
            version: Some("builtin".to_string()),
            rules: vec![
                RuleSpec {
                    id: "routes".to_string(),
                    priority: PrioritySpec::Number(1),
                    conditions: Some(ConditionsSpec {
                        path_patterns: Some(vec!["/routes".to_string()]),
                        ..Default::default()
                    }),
                    action: routes_action,
                },
                RuleSpec {
                    id: "not-found".to_string(),
                    priority: PrioritySpec::Keyword("default".to_string()),
                    conditions: None,
                    action: ActionSpec::FixedResponse {
                        fixed_response: FixedResponseSpec {
                            status: 404,
                            content_type: default_content_type(),
                            body: "Not Found".to_string(),
                        },
                    },
                },
            ],
        }
    }

    /// Port-80 companion of an HTTPS listener: everything goes to HTTPS.
    pub fn https_redirect(port: u16) -> Self {
        Self {
            version: Some("https-redirect".to_string()),
            rules: vec![RuleSpec {
                id: "redirect-to-https".to_string(),
                priority: PrioritySpec::Keyword("default".to_string()),
                conditions: None,
                action: ActionSpec::Redirect {
                    redirect: RedirectSpec {
                        protocol: Some("HTTPS".to_string()),
                        port: Some(port),
                        status: 301,
                        ..Default::default()
                    },
                },
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_authenticate() {
        let yaml = r#"
version: "1"
rules:
  - id: routes
    priority: 1
    conditions:
      path_patterns: ["/routes", "/routes/*"]
    action:
      authenticate:
        provider: cognito
        next:
          forward: { target: function }
  - id: fallback
    priority: default
    action:
      fixed_response: { status: 404, body: Not Found }
"#;
        let rs = RuleSetFile::from_yaml(yaml).unwrap();
        assert_eq!(rs.rules.len(), 2);
        assert_eq!(rs.rules[0].priority, PrioritySpec::Number(1));
        match &rs.rules[0].action {
            ActionSpec::Authenticate { authenticate } => {
                assert_eq!(authenticate.provider, "cognito");
                assert!(matches!(*authenticate.next, ActionSpec::Forward { .. }));
            }
            other => panic!("unexpected action {other:?}"),
        }
        assert_eq!(rs.rules[1].priority, PrioritySpec::Keyword("default".into()));
        match &rs.rules[1].action {
            ActionSpec::FixedResponse { fixed_response } => {
                assert_eq!(fixed_response.content_type, "text/plain");
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_condition_kind() {
        let yaml = r#"
rules:
  - id: r
    priority: 1
    conditions: { source_ip: ["10.0.0.0/8"] }
    action: { forward: { target: function } }
"#;
        assert!(RuleSetFile::from_yaml(yaml).is_err());
    }

    #[test]
    fn builtin_wraps_routes_only_with_auth() {
        let plain = RuleSetFile::builtin("function", None);
        assert!(matches!(plain.rules[0].action, ActionSpec::Forward { .. }));

        let gated = RuleSetFile::builtin("function", Some("cognito"));
        assert!(matches!(gated.rules[0].action, ActionSpec::Authenticate { .. }));
        assert!(matches!(gated.rules[1].action, ActionSpec::FixedResponse { .. }));
    }
}
