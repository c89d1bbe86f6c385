use std::collections::BTreeMap;

use serde::Serialize;

use crate::auth::IdentityProvider;
use crate::config::{AppConfig, DeployEnv, FunctionConfig, NetworkConfig};
use crate::error::ConfigError;
use crate::stack::builder::logical_name;

/// Everything the graph builder needs, validated.
#[derive(Debug, Clone, Serialize)]
pub struct StackSettings {
    pub stack_name: String,
    pub account: String,
    pub region: String,
    pub network: NetworkSettings,
    pub function: FunctionSettings,
    /// Present when `enable_auth` is on.
    pub auth: Option<AuthSettings>,
    /// Present when `enable_tls` is on.
    pub tls: Option<TlsSettings>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkSettings {
    pub max_azs: u8,
    pub nat_gateways: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionSettings {
    pub name: String,
    pub handler: String,
    pub runtime: String,
    pub code_path: String,
    pub memory_mb: u32,
    pub timeout_secs: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthSettings {
    pub providers: BTreeMap<String, IdentityProvider>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TlsSettings {
    pub domain_name: String,
    pub hosted_zone: String,
}

impl StackSettings {
    pub fn resolve(
        cfg: &AppConfig,
        env: &DeployEnv,
        providers: &BTreeMap<String, IdentityProvider>,
    ) -> Result<Self, ConfigError> {
        let stack = &cfg.stack;

        if !valid_stack_name(&stack.name) {
            return Err(ConfigError::invalid(
                "stack.name",
                "use letters, digits or '-', starting with a letter",
            ));
        }

        let network = network_settings(&stack.network)?;
        let function = function_settings(&stack.function)?;

        check_logical_names("targets", cfg.targets_or_default().keys())?;
        check_logical_names("identity_providers", cfg.identity_providers.keys())?;

        let auth = if stack.enable_auth {
            if providers.is_empty() {
                return Err(ConfigError::invalid(
                    "identity_providers",
                    "stack.enable_auth needs at least one identity provider",
                ));
            }
            Some(AuthSettings {
                providers: providers.clone(),
            })
        } else {
            None
        };

        // The environment wins over the config file.
        let domain_name = env
            .domain_name
            .clone()
            .or_else(|| stack.domain_name.clone())
            .map(|d| d.trim().trim_end_matches('.').to_ascii_lowercase())
            .filter(|d| !d.is_empty());

        let tls = if stack.enable_tls {
            let domain_name = domain_name.ok_or_else(|| {
                ConfigError::invalid(
                    "stack.domain_name",
                    "stack.enable_tls needs a domain name (PROJECT_DOMAIN_NAME)",
                )
            })?;
            if !valid_domain(&domain_name) {
                return Err(ConfigError::invalid(
                    "stack.domain_name",
                    format!("'{domain_name}' is not a valid DNS name"),
                ));
            }
            let hosted_zone = stack
                .hosted_zone
                .as_deref()
                .map(|z| z.trim().trim_end_matches('.').to_ascii_lowercase())
                .unwrap_or_else(|| domain_name.clone());
            if domain_name != hosted_zone && !domain_name.ends_with(&format!(".{hosted_zone}")) {
                return Err(ConfigError::invalid(
                    "stack.hosted_zone",
                    format!("'{domain_name}' is not inside zone '{hosted_zone}'"),
                ));
            }
            Some(TlsSettings {
                domain_name,
                hosted_zone,
            })
        } else {
            None
        };

        Ok(Self {
            stack_name: stack.name.clone(),
            account: env.account.clone(),
            region: env.region.clone(),
            network,
            function,
            auth,
            tls,
        })
    }

    pub fn listener_port(&self) -> u16 {
        if self.tls.is_some() {
            443
        } else {
            80
        }
    }
}

fn network_settings(n: &NetworkConfig) -> Result<NetworkSettings, ConfigError> {
    if !(1..=6).contains(&n.max_azs) {
        return Err(ConfigError::invalid("stack.network.max_azs", "must be within 1..=6"));
    }
    if n.nat_gateways > n.max_azs {
        return Err(ConfigError::invalid(
            "stack.network.nat_gateways",
            "cannot exceed max_azs",
        ));
    }
    Ok(NetworkSettings {
        max_azs: n.max_azs,
        nat_gateways: n.nat_gateways,
    })
}

fn function_settings(f: &FunctionConfig) -> Result<FunctionSettings, ConfigError> {
    if f.name.is_empty()
        || f.name.len() > 64
        || !f
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::invalid(
            "stack.function.name",
            "use 1-64 letters, digits, '-' or '_'",
        ));
    }
    if !(128..=10_240).contains(&f.memory_mb) {
        return Err(ConfigError::invalid(
            "stack.function.memory_mb",
            "must be within 128..=10240",
        ));
    }
    if !(1..=900).contains(&f.timeout_secs) {
        return Err(ConfigError::invalid(
            "stack.function.timeout_secs",
            "must be within 1..=900",
        ));
    }
    Ok(FunctionSettings {
        name: f.name.clone(),
        handler: f.handler.clone(),
        runtime: f.runtime.clone(),
        code_path: f.code_path.clone(),
        memory_mb: f.memory_mb,
        timeout_secs: f.timeout_secs,
    })
}

/// Target and provider names become logical id prefixes, so each one
/// needs alphanumerics and a prefix of its own within its section.
fn check_logical_names<'a>(
    section: &str,
    names: impl Iterator<Item = &'a String>,
) -> Result<(), ConfigError> {
    let mut seen: BTreeMap<String, &str> = BTreeMap::new();
    for name in names {
        let id = logical_name(name);
        if id.is_empty() {
            return Err(ConfigError::invalid(
                format!("{section}.{name}"),
                "name needs at least one letter or digit",
            ));
        }
        if let Some(first) = seen.insert(id.clone(), name) {
            return Err(ConfigError::invalid(
                format!("{section}.{name}"),
                format!("maps to the same logical id '{id}' as '{first}'"),
            ));
        }
    }
    Ok(())
}

fn valid_stack_name(s: &str) -> bool {
    s.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && s.len() <= 128
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

fn valid_domain(d: &str) -> bool {
    d.len() <= 253
        && d.contains('.')
        && d.split('.').all(|label| {
            (1..=63).contains(&label.len())
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}
