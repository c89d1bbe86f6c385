use std::collections::BTreeMap;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::auth::OnUnauthenticated;
use crate::error::ConfigError;

/// A property value: either literal text or a reference to another
/// resource in the same graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Literal(String),
    Ref(String),
    GetAtt(String, &'static str),
    /// Concatenation without separator.
    Join(Vec<Value>),
}

impl Value {
    pub fn lit(s: impl Into<String>) -> Self {
        Value::Literal(s.into())
    }

    pub fn reference(id: &str) -> Self {
        Value::Ref(id.to_string())
    }

    pub fn get_att(id: &str, attr: &'static str) -> Self {
        Value::GetAtt(id.to_string(), attr)
    }

    fn collect_refs<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Value::Literal(_) => {}
            Value::Ref(id) | Value::GetAtt(id, _) => out.push(id),
            Value::Join(parts) => parts.iter().for_each(|p| p.collect_refs(out)),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Literal(v) => s.serialize_str(v),
            Value::Ref(id) => {
                let mut m = s.serialize_map(Some(1))?;
                m.serialize_entry("Ref", id)?;
                m.end()
            }
            Value::GetAtt(id, attr) => {
                let mut m = s.serialize_map(Some(1))?;
                m.serialize_entry("Fn::GetAtt", &[id.as_str(), *attr])?;
                m.end()
            }
            Value::Join(parts) => {
                let mut m = s.serialize_map(Some(1))?;
                m.serialize_entry("Fn::Join", &("", parts))?;
                m.end()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "properties")]
pub enum Resource {
    Vpc {
        max_azs: u8,
        nat_gateways: u8,
    },

    Function {
        function_name: String,
        handler: String,
        runtime: String,
        code: String,
        memory_mb: u32,
        timeout_secs: u32,
        vpc: Value,
    },

    IamPolicyStatement {
        actions: Vec<&'static str>,
        resources: Vec<&'static str>,
        attached_to: Value,
    },

    IamRole {
        assumed_by: &'static str,
    },

    InvokePermission {
        function: Value,
        principal: Value,
    },

    LoadBalancer {
        internet_facing: bool,
        vpc: Value,
    },

    TargetGroup {
        target_type: &'static str,
        targets: Vec<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        vpc: Option<Value>,
    },

    Listener {
        load_balancer: Value,
        port: u16,
        protocol: &'static str,
        /// Accept traffic from anywhere.
        open: bool,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        certificates: Vec<Value>,
        default_actions: Vec<ActionDecl>,
        rules: Vec<RuleDecl>,
    },

    UserPool {
        pool_name: String,
    },

    UserPoolClient {
        user_pool: Value,
        client_name: String,
        generate_secret: bool,
        oauth_flows: Vec<&'static str>,
        oauth_scopes: Vec<String>,
        callback_urls: Vec<Value>,
    },

    UserPoolDomain {
        user_pool: Value,
        domain_prefix: String,
    },

    HostedZoneLookup {
        domain_name: String,
    },

    Certificate {
        domain_name: String,
        validation: &'static str,
        hosted_zone: Value,
    },

    ARecord {
        hosted_zone: Value,
        record_name: String,
        alias_target: Value,
    },
}

impl Resource {
    pub fn type_name(&self) -> &'static str {
        match self {
            Resource::Vpc { .. } => "Vpc",
            Resource::Function { .. } => "Function",
            Resource::IamPolicyStatement { .. } => "IamPolicyStatement",
            Resource::IamRole { .. } => "IamRole",
            Resource::InvokePermission { .. } => "InvokePermission",
            Resource::LoadBalancer { .. } => "LoadBalancer",
            Resource::TargetGroup { .. } => "TargetGroup",
            Resource::Listener { .. } => "Listener",
            Resource::UserPool { .. } => "UserPool",
            Resource::UserPoolClient { .. } => "UserPoolClient",
            Resource::UserPoolDomain { .. } => "UserPoolDomain",
            Resource::HostedZoneLookup { .. } => "HostedZoneLookup",
            Resource::Certificate { .. } => "Certificate",
            Resource::ARecord { .. } => "ARecord",
        }
    }

    /// Logical ids this resource points at.
    pub fn refs(&self) -> Vec<&str> {
        let mut out = Vec::new();
        match self {
            Resource::Vpc { .. }
            | Resource::IamRole { .. }
            | Resource::UserPool { .. }
            | Resource::HostedZoneLookup { .. } => {}
            Resource::Function { vpc, .. } | Resource::LoadBalancer { vpc, .. } => {
                vpc.collect_refs(&mut out)
            }
            Resource::IamPolicyStatement { attached_to, .. } => attached_to.collect_refs(&mut out),
            Resource::InvokePermission {
                function,
                principal,
            } => {
                function.collect_refs(&mut out);
                principal.collect_refs(&mut out);
            }
            Resource::TargetGroup { targets, vpc, .. } => {
                targets.iter().for_each(|t| t.collect_refs(&mut out));
                if let Some(v) = vpc {
                    v.collect_refs(&mut out);
                }
            }
            Resource::Listener {
                load_balancer,
                certificates,
                default_actions,
                rules,
                ..
            } => {
                load_balancer.collect_refs(&mut out);
                certificates.iter().for_each(|c| c.collect_refs(&mut out));
                default_actions.iter().for_each(|a| a.collect_refs(&mut out));
                rules
                    .iter()
                    .flat_map(|r| &r.actions)
                    .for_each(|a| a.collect_refs(&mut out));
            }
            Resource::UserPoolClient {
                user_pool,
                callback_urls,
                ..
            } => {
                user_pool.collect_refs(&mut out);
                callback_urls.iter().for_each(|c| c.collect_refs(&mut out));
            }
            Resource::UserPoolDomain { user_pool, .. } => user_pool.collect_refs(&mut out),
            Resource::Certificate { hosted_zone, .. } => hosted_zone.collect_refs(&mut out),
            Resource::ARecord {
                hosted_zone,
                alias_target,
                ..
            } => {
                hosted_zone.collect_refs(&mut out);
                alias_target.collect_refs(&mut out);
            }
        }
        out
    }
}

/// A listener rule as declared on the load balancer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleDecl {
    pub id: String,
    pub priority: u32,
    pub conditions: Vec<ConditionDecl>,
    pub actions: Vec<ActionDecl>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "field", rename_all = "kebab-case")]
pub enum ConditionDecl {
    PathPattern { values: Vec<String> },
    HostHeader { values: Vec<String> },
    HttpRequestMethod { values: Vec<String> },
    HttpHeader { name: String, values: Vec<String> },
}

/// Listener action. Authenticate actions come first (order 1) and the
/// action they guard follows at order 2.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ActionDecl {
    Forward {
        order: u8,
        target_group: Value,
    },

    AuthenticateCognito {
        order: u8,
        user_pool_arn: Value,
        user_pool_client_id: Value,
        user_pool_domain: Value,
        scope: String,
        session_cookie_name: String,
        session_timeout_secs: u64,
        on_unauthenticated_request: OnUnauthenticated,
    },

    FixedResponse {
        order: u8,
        status_code: u16,
        content_type: String,
        message_body: String,
    },

    Redirect {
        order: u8,
        protocol: String,
        host: String,
        port: String,
        path: String,
        query: String,
        status_code: String,
    },
}

impl ActionDecl {
    pub fn order(&self) -> u8 {
        match self {
            ActionDecl::Forward { order, .. }
            | ActionDecl::AuthenticateCognito { order, .. }
            | ActionDecl::FixedResponse { order, .. }
            | ActionDecl::Redirect { order, .. } => *order,
        }
    }

    fn collect_refs<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            ActionDecl::Forward { target_group, .. } => target_group.collect_refs(out),
            ActionDecl::AuthenticateCognito {
                user_pool_arn,
                user_pool_client_id,
                user_pool_domain,
                ..
            } => {
                user_pool_arn.collect_refs(out);
                user_pool_client_id.collect_refs(out);
                user_pool_domain.collect_refs(out);
            }
            ActionDecl::FixedResponse { .. } | ActionDecl::Redirect { .. } => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Output {
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Declared resources of one stack, keyed by logical id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceGraph {
    pub stack: String,
    pub account: String,
    pub region: String,
    pub resources: BTreeMap<String, Resource>,
    pub outputs: BTreeMap<String, Output>,
}

impl ResourceGraph {
    pub fn new(stack: &str, account: &str, region: &str) -> Self {
        Self {
            stack: stack.to_string(),
            account: account.to_string(),
            region: region.to_string(),
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Insert a resource and hand back a `Ref` to it.
    pub fn add(&mut self, id: &str, resource: Resource) -> Result<Value, ConfigError> {
        if self.resources.contains_key(id) {
            return Err(ConfigError::invalid(
                "resources",
                format!("logical id '{id}' is declared twice"),
            ));
        }
        self.resources.insert(id.to_string(), resource);
        Ok(Value::reference(id))
    }

    pub fn output(&mut self, name: &str, value: Value, description: Option<&str>) {
        self.outputs.insert(
            name.to_string(),
            Output {
                value,
                description: description.map(str::to_string),
            },
        );
    }

    pub fn get(&self, id: &str) -> Option<&Resource> {
        self.resources.get(id)
    }

    pub fn of_type<'a>(&'a self, type_name: &'a str) -> impl Iterator<Item = (&'a str, &'a Resource)> {
        self.resources
            .iter()
            .filter(move |(_, r)| r.type_name() == type_name)
            .map(|(id, r)| (id.as_str(), r))
    }

    /// Every `Ref`/`GetAtt` must name a declared resource.
    pub fn check_references(&self) -> Result<(), ConfigError> {
        for (id, r) in &self.resources {
            for target in r.refs() {
                if !self.resources.contains_key(target) {
                    return Err(ConfigError::DanglingReference {
                        resource: id.clone(),
                        target: target.to_string(),
                    });
                }
            }
        }
        for (name, o) in &self.outputs {
            let mut refs = Vec::new();
            o.value.collect_refs(&mut refs);
            if let Some(target) = refs.into_iter().find(|t| !self.resources.contains_key(*t)) {
                return Err(ConfigError::DanglingReference {
                    resource: name.clone(),
                    target: target.to_string(),
                });
            }
        }
        Ok(())
    }
}
