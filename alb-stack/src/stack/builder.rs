use std::collections::BTreeMap;

use super::resources::{ActionDecl, ConditionDecl, ResourceGraph, Resource, RuleDecl, Value};
use super::settings::StackSettings;
use crate::auth::login::IDP_RESPONSE_PATH;
use crate::auth::IdentityProvider;
use crate::config::TargetSpec;
use crate::error::ConfigError;
use crate::listener::compiled::{Action, CompiledRule, CompiledRuleSet, Priority};
use crate::listener::matcher::{Conditions, Glob};
use crate::upstream::Upstream;

pub const VPC_ID: &str = "VPC";
pub const FUNCTION_ID: &str = "Function";
pub const LOGS_POLICY_ID: &str = "FunctionLogsPolicy";
pub const ALB_ROLE_ID: &str = "AlbRole";
pub const INVOKE_PERMISSION_ID: &str = "AlbInvokePermission";
pub const ALB_ID: &str = "ALB";
pub const LISTENER_ID: &str = "Listener";
pub const REDIRECT_LISTENER_ID: &str = "HttpRedirectListener";
pub const HOSTED_ZONE_ID: &str = "HostedZone";
pub const CERTIFICATE_ID: &str = "Certificate";
pub const ALIAS_RECORD_ID: &str = "AliasRecord";
pub const DNS_OUTPUT: &str = "LoadBalancerDNS";

const LOG_ACTIONS: &[&str] = &[
    "logs:CreateLogGroup",
    "logs:CreateLogStream",
    "logs:PutLogEvents",
];

/// Declare the stack: network, function, load balancer and its listeners,
/// plus identity and DNS/TLS resources when those are enabled.
pub fn build_graph(
    settings: &StackSettings,
    rules: &CompiledRuleSet,
    targets: &BTreeMap<String, TargetSpec>,
) -> Result<ResourceGraph, ConfigError> {
    let mut g = ResourceGraph::new(&settings.stack_name, &settings.account, &settings.region);

    let vpc = g.add(
        VPC_ID,
        Resource::Vpc {
            max_azs: settings.network.max_azs,
            nat_gateways: settings.network.nat_gateways,
        },
    )?;

    let f = &settings.function;
    let function = g.add(
        FUNCTION_ID,
        Resource::Function {
            function_name: f.name.clone(),
            handler: f.handler.clone(),
            runtime: f.runtime.clone(),
            code: f.code_path.clone(),
            memory_mb: f.memory_mb,
            timeout_secs: f.timeout_secs,
            vpc: vpc.clone(),
        },
    )?;

    g.add(
        LOGS_POLICY_ID,
        Resource::IamPolicyStatement {
            actions: LOG_ACTIONS.to_vec(),
            resources: vec!["*"],
            attached_to: function,
        },
    )?;

    g.add(
        ALB_ROLE_ID,
        Resource::IamRole {
            assumed_by: "elasticloadbalancing.amazonaws.com",
        },
    )?;
    g.add(
        INVOKE_PERMISSION_ID,
        Resource::InvokePermission {
            function: Value::get_att(FUNCTION_ID, "Arn"),
            principal: Value::get_att(ALB_ROLE_ID, "Arn"),
        },
    )?;

    let alb = g.add(
        ALB_ID,
        Resource::LoadBalancer {
            internet_facing: true,
            vpc: vpc.clone(),
        },
    )?;

    let mut target_groups = BTreeMap::new();
    for (name, spec) in targets {
        let id = format!("{}TargetGroup", logical_name(name));
        let tg = match spec {
            TargetSpec::Function => Resource::TargetGroup {
                target_type: "lambda",
                targets: vec![Value::get_att(FUNCTION_ID, "Arn")],
                port: None,
                vpc: None,
            },
            TargetSpec::Http { upstream } => {
                let u = Upstream::parse(name, upstream)?;
                if !u.is_ip() {
                    return Err(ConfigError::invalid(
                        format!("targets.{name}.upstream"),
                        "load balancer targets must be IP addresses",
                    ));
                }
                Resource::TargetGroup {
                    target_type: "ip",
                    targets: vec![Value::lit(u.host.clone())],
                    port: Some(u.port),
                    vpc: Some(vpc.clone()),
                }
            }
        };
        target_groups.insert(name.clone(), g.add(&id, tg)?);
    }

    let mut cognito = BTreeMap::new();
    if let Some(auth) = &settings.auth {
        let callback = match &settings.tls {
            Some(tls) => Value::lit(format!("https://{}{IDP_RESPONSE_PATH}", tls.domain_name)),
            None => {
                tracing::warn!(
                    stack = %settings.stack_name,
                    "enable_auth without enable_tls: authenticate actions are only honoured on HTTPS listeners"
                );
                Value::Join(vec![
                    Value::lit("https://"),
                    Value::get_att(ALB_ID, "DNSName"),
                    Value::lit(IDP_RESPONSE_PATH),
                ])
            }
        };
        for (name, p) in &auth.providers {
            cognito.insert(name.clone(), declare_identity(&mut g, p, &callback)?);
        }
    }

    let mut certificates = Vec::new();
    if let Some(tls) = &settings.tls {
        let zone = g.add(
            HOSTED_ZONE_ID,
            Resource::HostedZoneLookup {
                domain_name: tls.hosted_zone.clone(),
            },
        )?;
        certificates.push(g.add(
            CERTIFICATE_ID,
            Resource::Certificate {
                domain_name: tls.domain_name.clone(),
                validation: "DNS",
                hosted_zone: zone.clone(),
            },
        )?);
        g.add(
            ALIAS_RECORD_ID,
            Resource::ARecord {
                hosted_zone: zone,
                record_name: tls.domain_name.clone(),
                alias_target: Value::get_att(ALB_ID, "DNSName"),
            },
        )?;
    }

    let refs = ActionRefs {
        target_groups: &target_groups,
        cognito: &cognito,
        auth_enabled: settings.auth.is_some(),
    };
    let mut listener_rules = Vec::with_capacity(rules.rules().len());
    for r in rules.rules() {
        listener_rules.push(rule_decl(r, &refs)?);
    }
    let default_actions = action_decls(&rules.default_rule().id, &rules.default_rule().action, &refs)?;

    let tls = settings.tls.is_some();
    g.add(
        LISTENER_ID,
        Resource::Listener {
            load_balancer: alb.clone(),
            port: settings.listener_port(),
            protocol: if tls { "HTTPS" } else { "HTTP" },
            open: true,
            certificates,
            default_actions,
            rules: listener_rules,
        },
    )?;

    if tls {
        g.add(
            REDIRECT_LISTENER_ID,
            Resource::Listener {
                load_balancer: alb,
                port: 80,
                protocol: "HTTP",
                open: true,
                certificates: Vec::new(),
                default_actions: vec![ActionDecl::Redirect {
                    order: 1,
                    protocol: "HTTPS".to_string(),
                    host: "#{host}".to_string(),
                    port: settings.listener_port().to_string(),
                    path: "/#{path}".to_string(),
                    query: "#{query}".to_string(),
                    status_code: "HTTP_301".to_string(),
                }],
                rules: Vec::new(),
            },
        )?;
    }

    g.output(DNS_OUTPUT, Value::get_att(ALB_ID, "DNSName"), Some("Load balancer DNS name"));
    if let Some(t) = &settings.tls {
        g.output("SiteUrl", Value::lit(format!("https://{}", t.domain_name)), None);
    }

    g.check_references()?;

    tracing::debug!(
        stack = %g.stack,
        resources = g.resources.len(),
        "resource graph built"
    );
    Ok(g)
}

struct CognitoRefs {
    pool: String,
    client: String,
    domain: String,
}

fn declare_identity(
    g: &mut ResourceGraph,
    p: &IdentityProvider,
    callback: &Value,
) -> Result<CognitoRefs, ConfigError> {
    let base = logical_name(&p.name);
    let ids = CognitoRefs {
        pool: format!("{base}UserPool"),
        client: format!("{base}UserPoolClient"),
        domain: format!("{base}UserPoolDomain"),
    };

    let pool = g.add(
        &ids.pool,
        Resource::UserPool {
            pool_name: p.user_pool.clone(),
        },
    )?;
    g.add(
        &ids.client,
        Resource::UserPoolClient {
            user_pool: pool.clone(),
            client_name: p.client.clone(),
            generate_secret: true,
            oauth_flows: vec!["code"],
            oauth_scopes: p.scope.split_whitespace().map(str::to_string).collect(),
            callback_urls: vec![callback.clone()],
        },
    )?;
    g.add(
        &ids.domain,
        Resource::UserPoolDomain {
            user_pool: pool,
            domain_prefix: p.domain_prefix.clone(),
        },
    )?;
    Ok(ids)
}

struct ActionRefs<'a> {
    target_groups: &'a BTreeMap<String, Value>,
    cognito: &'a BTreeMap<String, CognitoRefs>,
    auth_enabled: bool,
}

fn rule_decl(r: &CompiledRule, refs: &ActionRefs<'_>) -> Result<RuleDecl, ConfigError> {
    let priority = match r.priority {
        Priority::Explicit(n) => n,
        Priority::Default => return Err(ConfigError::invalid("rules", "default rule in rule list")),
    };
    Ok(RuleDecl {
        id: r.id.clone(),
        priority,
        conditions: r.conditions.as_ref().map(condition_decls).unwrap_or_default(),
        actions: action_decls(&r.id, &r.action, refs)?,
    })
}

fn condition_decls(c: &Conditions) -> Vec<ConditionDecl> {
    let globs = |xs: &[Glob]| -> Vec<String> {
        xs.iter().map(|g| g.as_str().to_string()).collect()
    };
    let mut out = Vec::new();
    if let Some(p) = &c.paths {
        out.push(ConditionDecl::PathPattern { values: globs(p) });
    }
    if let Some(h) = &c.hosts {
        out.push(ConditionDecl::HostHeader { values: globs(h) });
    }
    if let Some(m) = &c.methods {
        out.push(ConditionDecl::HttpRequestMethod { values: m.clone() });
    }
    for h in &c.headers {
        out.push(ConditionDecl::HttpHeader {
            name: h.name.clone(),
            values: globs(&h.values),
        });
    }
    out
}

/// Flatten an action chain into ordered listener actions.
fn action_decls(
    rule: &str,
    action: &Action,
    refs: &ActionRefs<'_>,
) -> Result<Vec<ActionDecl>, ConfigError> {
    let mut out = Vec::new();
    push_action(rule, action, refs, &mut out)?;
    Ok(out)
}

fn push_action(
    rule: &str,
    action: &Action,
    refs: &ActionRefs<'_>,
    out: &mut Vec<ActionDecl>,
) -> Result<(), ConfigError> {
    let order = out.len() as u8 + 1;
    match action {
        Action::Forward { target } => {
            let tg = refs
                .target_groups
                .get(target)
                .ok_or_else(|| ConfigError::UnknownTarget {
                    rule: rule.to_string(),
                    target: target.clone(),
                })?;
            out.push(ActionDecl::Forward {
                order,
                target_group: tg.clone(),
            });
        }

        Action::Authenticate { provider, next } => {
            if !refs.auth_enabled {
                return Err(ConfigError::AuthDisabled(rule.to_string()));
            }
            let ids = refs
                .cognito
                .get(&provider.name)
                .ok_or_else(|| ConfigError::UnknownProvider {
                    rule: rule.to_string(),
                    provider: provider.name.clone(),
                })?;
            out.push(ActionDecl::AuthenticateCognito {
                order,
                user_pool_arn: Value::get_att(&ids.pool, "Arn"),
                user_pool_client_id: Value::reference(&ids.client),
                user_pool_domain: Value::reference(&ids.domain),
                scope: provider.scope.clone(),
                session_cookie_name: provider.session_cookie_name.clone(),
                session_timeout_secs: provider.session_timeout_secs,
                on_unauthenticated_request: provider.on_unauthenticated,
            });
            push_action(rule, next, refs, out)?;
        }

        Action::FixedResponse {
            status,
            content_type,
            body,
        } => out.push(ActionDecl::FixedResponse {
            order,
            status_code: *status,
            content_type: content_type.clone(),
            message_body: body.clone(),
        }),

        Action::Redirect(r) => out.push(ActionDecl::Redirect {
            order,
            protocol: r.protocol.clone().unwrap_or_else(|| "#{protocol}".to_string()),
            host: r.host.clone().unwrap_or_else(|| "#{host}".to_string()),
            port: r
                .port
                .map(|p| p.to_string())
                .unwrap_or_else(|| "#{port}".to_string()),
            path: r.path.clone().unwrap_or_else(|| "/#{path}".to_string()),
            query: r.query.clone().unwrap_or_else(|| "#{query}".to_string()),
            status_code: format!("HTTP_{}", r.status),
        }),
    }
    Ok(())
}

/// "api-v2" -> "ApiV2"
pub(crate) fn logical_name(name: &str) -> String {
    name.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| {
            let mut cs = s.chars();
            match cs.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + cs.as_str(),
                None => String::new(),
            }
        })
        .collect()
}
