use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use serde::{Serialize, Serializer};

use super::matcher::{
    check_header_name, check_header_value, check_host_pattern, check_method, check_path_pattern,
    Conditions, Glob, HeaderCondition,
};
use super::request::RequestContext;
use super::types::*;
use crate::auth::IdentityProvider;
use crate::config::TargetSpec;
use crate::error::ConfigError;

pub const MAX_PRIORITY: u32 = 50_000;
pub const MAX_CONDITION_VALUES: usize = 5;
pub const MAX_FIXED_BODY: usize = 1024;
pub const FIXED_CONTENT_TYPES: &[&str] = &[
    "text/plain",
    "text/css",
    "text/html",
    "application/javascript",
    "application/json",
];

/// Evaluation position. Every explicit priority sorts before `Default`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Explicit(u32),
    Default,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Explicit(n) => write!(f, "{n}"),
            Priority::Default => f.write_str("default"),
        }
    }
}

impl Serialize for Priority {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Priority::Explicit(n) => s.serialize_u32(*n),
            Priority::Default => s.serialize_str("default"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Forward {
        target: String,
    },

    /// Wraps `next`; only reached once the session checks out.
    Authenticate {
        provider: IdentityProvider,
        next: Box<Action>,
    },

    FixedResponse {
        status: u16,
        content_type: String,
        body: String,
    },

    Redirect(RedirectAction),
}

impl Action {
    pub fn kind_str(&self) -> &'static str {
        match self {
            Action::Forward { .. } => "forward",
            Action::Authenticate { .. } => "authenticate",
            Action::FixedResponse { .. } => "fixed_response",
            Action::Redirect(_) => "redirect",
        }
    }
}

/// Unset components keep the request's value. Components may use the
/// `#{protocol}`, `#{host}`, `#{port}`, `#{path}` and `#{query}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedirectAction {
    pub protocol: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: Option<String>,
    pub query: Option<String>,
    pub status: u16,
}

impl RedirectAction {
    pub fn location(&self, req: &RequestContext) -> String {
        let req_host = req.host.as_deref().unwrap_or("localhost");
        let req_path = req.path.trim_start_matches('/');
        let req_query = req.query.as_deref().unwrap_or("");
        let port_s = req.port.to_string();
        let subst = |s: &str| {
            s.replace("#{protocol}", req.scheme())
                .replace("#{host}", req_host)
                .replace("#{port}", &port_s)
                .replace("#{path}", req_path)
                .replace("#{query}", req_query)
        };

        let scheme = self
            .protocol
            .as_deref()
            .map(subst)
            .unwrap_or_else(|| req.scheme().to_string())
            .to_ascii_lowercase();
        let host = self
            .host
            .as_deref()
            .map(subst)
            .unwrap_or_else(|| req_host.to_string());
        let port = self.port.unwrap_or(req.port);
        let path = self
            .path
            .as_deref()
            .map(subst)
            .unwrap_or_else(|| req.path.clone());
        let query = match &self.query {
            Some(q) => subst(q),
            None => req_query.to_string(),
        };

        let mut out = format!("{scheme}://{host}");
        let default_port = matches!((scheme.as_str(), port), ("https", 443) | ("http", 80));
        if !default_port {
            out.push_str(&format!(":{port}"));
        }
        out.push_str(&path);
        if !query.is_empty() {
            out.push('?');
            out.push_str(&query);
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub id: String,
    pub priority: Priority,
    /// None only for the default rule.
    pub conditions: Option<Conditions>,
    pub action: Action,
}

impl CompiledRule {
    pub fn matches(&self, req: &RequestContext) -> bool {
        self.conditions.as_ref().map_or(true, |c| c.matches(req))
    }
}

/// What rule compilation may reference.
pub struct CompileContext<'a> {
    pub targets: &'a BTreeMap<String, TargetSpec>,
    pub providers: &'a BTreeMap<String, IdentityProvider>,
    pub auth_enabled: bool,
}

/// A validated rule set: explicit rules in ascending priority, then exactly
/// one unconditional default rule.
#[derive(Debug, Clone)]
pub struct CompiledRuleSet {
    pub version: Option<String>,
    rules: Vec<CompiledRule>,
    default: CompiledRule,
}

impl CompiledRuleSet {
    pub fn compile(file: &RuleSetFile, cx: &CompileContext<'_>) -> Result<Self, ConfigError> {
        let mut ids = HashSet::new();
        let mut seen_priorities: HashMap<u32, &str> = HashMap::new();
        let mut rules = Vec::with_capacity(file.rules.len());
        let mut default: Option<CompiledRule> = None;

        for r in &file.rules {
            if !ids.insert(r.id.as_str()) {
                return Err(ConfigError::DuplicateRuleId(r.id.clone()));
            }

            let priority = parse_priority(r)?;
            let action = compile_action(&r.id, &r.action, cx, false)?;

            match priority {
                Priority::Default => {
                    if r.conditions.as_ref().is_some_and(|c| !c.is_empty()) {
                        return Err(ConfigError::DefaultWithConditions(r.id.clone()));
                    }
                    if let Some(prev) = &default {
                        return Err(ConfigError::MultipleDefaults {
                            first: prev.id.clone(),
                            second: r.id.clone(),
                        });
                    }
                    default = Some(CompiledRule {
                        id: r.id.clone(),
                        priority,
                        conditions: None,
                        action,
                    });
                }
                Priority::Explicit(n) => {
                    if let Some(first) = seen_priorities.insert(n, r.id.as_str()) {
                        return Err(ConfigError::DuplicatePriority {
                            priority: n,
                            first: first.to_string(),
                            second: r.id.clone(),
                        });
                    }
                    let conditions = match &r.conditions {
                        Some(c) if !c.is_empty() => compile_conditions(&r.id, c)?,
                        _ => return Err(ConfigError::MissingConditions(r.id.clone())),
                    };
                    rules.push(CompiledRule {
                        id: r.id.clone(),
                        priority,
                        conditions: Some(conditions),
                        action,
                    });
                }
            }
        }

        let default = default.ok_or(ConfigError::MissingDefault)?;
        rules.sort_by_key(|r| r.priority);

        Ok(Self {
            version: file.version.clone(),
            rules,
            default,
        })
    }

    /// Explicit rules, ascending priority.
    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn default_rule(&self) -> &CompiledRule {
        &self.default
    }

    /// Every rule in evaluation order, default last.
    pub fn iter(&self) -> impl Iterator<Item = &CompiledRule> {
        self.rules.iter().chain(std::iter::once(&self.default))
    }
}

fn parse_priority(r: &RuleSpec) -> Result<Priority, ConfigError> {
    match &r.priority {
        PrioritySpec::Number(n) => match u32::try_from(*n) {
            Ok(p) if (1..=MAX_PRIORITY).contains(&p) => Ok(Priority::Explicit(p)),
            _ => Err(ConfigError::PriorityOutOfRange {
                rule: r.id.clone(),
                priority: *n,
            }),
        },
        PrioritySpec::Keyword(k) if k == "default" => Ok(Priority::Default),
        PrioritySpec::Keyword(k) => Err(ConfigError::BadPriority {
            rule: r.id.clone(),
            value: k.clone(),
        }),
        PrioritySpec::Other(v) => Err(ConfigError::BadPriority {
            rule: r.id.clone(),
            value: serde_yaml::to_string(v)
                .map(|s| s.trim().to_string())
                .unwrap_or_else(|_| format!("{v:?}")),
        }),
    }
}

fn compile_conditions(rule: &str, c: &ConditionsSpec) -> Result<Conditions, ConfigError> {
    let count = |field: &'static str, n: usize| {
        if (1..=MAX_CONDITION_VALUES).contains(&n) {
            Ok(())
        } else {
            Err(ConfigError::ConditionValues {
                rule: rule.to_string(),
                field,
                max: MAX_CONDITION_VALUES,
            })
        }
    };
    let bad = |field: &'static str, pattern: &str, reason: String| ConfigError::InvalidPattern {
        rule: rule.to_string(),
        field,
        pattern: pattern.to_string(),
        reason,
    };

    let mut out = Conditions::default();

    if let Some(ps) = &c.path_patterns {
        count("path_patterns", ps.len())?;
        let mut xs = Vec::with_capacity(ps.len());
        for p in ps {
            check_path_pattern(p).map_err(|e| bad("path_patterns", p, e))?;
            xs.push(Glob::new(p, false).map_err(|e| bad("path_patterns", p, e))?);
        }
        out.paths = Some(xs);
    }

    if let Some(hs) = &c.host_headers {
        count("host_headers", hs.len())?;
        let mut xs = Vec::with_capacity(hs.len());
        for h in hs {
            check_host_pattern(h).map_err(|e| bad("host_headers", h, e))?;
            xs.push(Glob::new(h, true).map_err(|e| bad("host_headers", h, e))?);
        }
        out.hosts = Some(xs);
    }

    if let Some(ms) = &c.http_methods {
        count("http_methods", ms.len())?;
        for m in ms {
            check_method(m).map_err(|e| bad("http_methods", m, e))?;
        }
        out.methods = Some(ms.clone());
    }

    if let Some(hs) = &c.http_headers {
        count("http_headers", hs.len())?;
        for h in hs {
            check_header_name(&h.name).map_err(|e| bad("http_headers", &h.name, e))?;
            count("http_headers.values", h.values.len())?;
            let mut values = Vec::with_capacity(h.values.len());
            for v in &h.values {
                check_header_value(v).map_err(|e| bad("http_headers", v, e))?;
                values.push(Glob::new(v, true).map_err(|e| bad("http_headers", v, e))?);
            }
            out.headers.push(HeaderCondition {
                name: h.name.to_ascii_lowercase(),
                values,
            });
        }
    }

    Ok(out)
}

fn compile_action(
    rule: &str,
    a: &ActionSpec,
    cx: &CompileContext<'_>,
    inside_auth: bool,
) -> Result<Action, ConfigError> {
    let bad = |action: &'static str, field: &'static str, reason: String| ConfigError::BadAction {
        rule: rule.to_string(),
        action,
        field,
        reason,
    };

    Ok(match a {
        ActionSpec::Forward { forward } => {
            if !cx.targets.contains_key(&forward.target) {
                return Err(ConfigError::UnknownTarget {
                    rule: rule.to_string(),
                    target: forward.target.clone(),
                });
            }
            Action::Forward {
                target: forward.target.clone(),
            }
        }

        ActionSpec::Authenticate { authenticate } => {
            if inside_auth {
                return Err(ConfigError::NestedAuthenticate(rule.to_string()));
            }
            if !cx.auth_enabled {
                return Err(ConfigError::AuthDisabled(rule.to_string()));
            }
            let provider = cx.providers.get(&authenticate.provider).ok_or_else(|| {
                ConfigError::UnknownProvider {
                    rule: rule.to_string(),
                    provider: authenticate.provider.clone(),
                }
            })?;
            Action::Authenticate {
                provider: provider.clone(),
                next: Box::new(compile_action(rule, &authenticate.next, cx, true)?),
            }
        }

        ActionSpec::FixedResponse { fixed_response: f } => {
            if !matches!(f.status, 200..=299 | 400..=599) {
                return Err(bad(
                    "fixed_response",
                    "status",
                    format!("{} is not a 2xx, 4xx or 5xx code", f.status),
                ));
            }
            if !FIXED_CONTENT_TYPES.contains(&f.content_type.as_str()) {
                return Err(bad(
                    "fixed_response",
                    "content_type",
                    format!("use one of {}", FIXED_CONTENT_TYPES.join(", ")),
                ));
            }
            if f.body.len() > MAX_FIXED_BODY {
                return Err(bad(
                    "fixed_response",
                    "body",
                    format!("longer than {MAX_FIXED_BODY} bytes"),
                ));
            }
            Action::FixedResponse {
                status: f.status,
                content_type: f.content_type.clone(),
                body: f.body.clone(),
            }
        }

        ActionSpec::Redirect { redirect: r } => {
            if !matches!(r.status, 301 | 302) {
                return Err(bad("redirect", "status", format!("{} is not 301 or 302", r.status)));
            }
            let protocol = match r.protocol.as_deref() {
                None => None,
                Some(p) if p.eq_ignore_ascii_case("http") || p.eq_ignore_ascii_case("https") => {
                    Some(p.to_ascii_uppercase())
                }
                Some("#{protocol}") => Some("#{protocol}".to_string()),
                Some(p) => {
                    return Err(bad("redirect", "protocol", format!("unsupported protocol '{p}'")))
                }
            };
            if r.path.as_deref().is_some_and(|p| !p.starts_with('/')) {
                return Err(bad("redirect", "path", "must start with '/'".into()));
            }
            if r.port == Some(0) {
                return Err(bad("redirect", "port", "must be 1-65535".into()));
            }
            if protocol.is_none()
                && r.host.is_none()
                && r.port.is_none()
                && r.path.is_none()
                && r.query.is_none()
            {
                return Err(bad(
                    "redirect",
                    "*",
                    "must change at least one of protocol, host, port, path or query".into(),
                ));
            }
            Action::Redirect(RedirectAction {
                protocol,
                host: r.host.clone(),
                port: r.port,
                path: r.path.clone(),
                query: r.query.clone(),
                status: r.status,
            })
        }
    })
}
