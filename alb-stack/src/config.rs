use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::auth::OnUnauthenticated;
use crate::error::ConfigError;

pub const ENV_ACCOUNT: &str = "PROJECT_ACCOUNT";
pub const ENV_REGION: &str = "PROJECT_REGION";
pub const ENV_DOMAIN_NAME: &str = "PROJECT_DOMAIN_NAME";

/// Older spellings still found in existing `.env` files.
const ENV_FALLBACKS: &[(&str, &str)] = &[
    (ENV_ACCOUNT, "PROYECT_ACCOUNT"),
    (ENV_REGION, "PROYECT_REGION"),
    (ENV_DOMAIN_NAME, "PROYECT_DOMAIN_NAME"),
];

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub metrics_listen: Option<String>,
    pub http_listen: Option<String>,
    pub https_listen: Option<String>,

    /// Directory to write JSONL logs (app/access).
    /// Default: ./logs
    pub log_dir: Option<PathBuf>,

    /// Listener rule set. When absent the built-in rule set is used.
    pub rules_path: Option<PathBuf>,

    pub stack: StackConfig,

    #[serde(default)]
    pub targets: BTreeMap<String, TargetSpec>,

    #[serde(default)]
    pub identity_providers: BTreeMap<String, IdentityProviderSpec>,

    /// Certificate for the local preview HTTPS listener.
    pub tls: Option<TlsConfig>,

    /// Sessions accepted by the local preview listener and `route`.
    #[serde(default)]
    pub sessions: Vec<SessionSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StackConfig {
    #[serde(default = "default_stack_name")]
    pub name: String,
    #[serde(default)]
    pub enable_auth: bool,
    #[serde(default)]
    pub enable_tls: bool,
    /// Overridden by PROJECT_DOMAIN_NAME when set.
    pub domain_name: Option<String>,
    /// Defaults to domain_name.
    pub hosted_zone: Option<String>,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub function: FunctionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_max_azs")]
    pub max_azs: u8,
    #[serde(default = "default_nat_gateways")]
    pub nat_gateways: u8,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_azs: default_max_azs(),
            nat_gateways: default_nat_gateways(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FunctionConfig {
    #[serde(default = "default_function_name")]
    pub name: String,
    #[serde(default = "default_handler")]
    pub handler: String,
    #[serde(default = "default_runtime")]
    pub runtime: String,
    #[serde(default = "default_code_path")]
    pub code_path: String,
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u32,
}

impl Default for FunctionConfig {
    fn default() -> Self {
        Self {
            name: default_function_name(),
            handler: default_handler(),
            runtime: default_runtime(),
            code_path: default_code_path(),
            memory_mb: default_memory_mb(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TargetSpec {
    /// The stack's own function, invoked in-process by the preview listener.
    Function,

    /// Plain HTTP upstream, e.g. "http://10.0.1.15:8080".
    Http { upstream: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityProviderSpec {
    pub user_pool: String,
    pub client: String,
    pub domain_prefix: String,
    /// Defaults to PROJECT_REGION.
    pub region: Option<String>,
    pub scope: Option<String>,
    pub session_cookie_name: Option<String>,
    pub session_timeout_secs: Option<u64>,
    pub on_unauthenticated: Option<OnUnauthenticated>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionSpec {
    pub token: String,
    pub subject: String,
    /// Restrict the session to one identity provider.
    pub provider: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_stack_name() -> String {
    "AlbStack".to_string()
}

fn default_max_azs() -> u8 {
    2
}

fn default_nat_gateways() -> u8 {
    1
}

fn default_function_name() -> String {
    "LambdaDemoBalancer".to_string()
}

fn default_handler() -> String {
    "bootstrap".to_string()
}

fn default_runtime() -> String {
    "provided.al2023".to_string()
}

fn default_code_path() -> String {
    "./target/lambda/function".to_string()
}

fn default_memory_mb() -> u32 {
    128
}

fn default_timeout_secs() -> u32 {
    3
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config failed: {}", path.display()))?;
        let mut cfg: AppConfig = serde_yaml::from_str(&text)
            .with_context(|| format!("parse config failed: {}", path.display()))?;
        cfg.resolve_paths(path.parent().unwrap_or_else(|| Path::new(".")));
        Ok(cfg)
    }

    pub fn metrics_addr(&self) -> String {
        self.metrics_listen
            .clone()
            .unwrap_or_else(|| "0.0.0.0:9100".to_string())
    }

    pub fn listen_addr(&self) -> String {
        self.https_listen
            .clone()
            .unwrap_or_else(|| "0.0.0.0:443".to_string())
    }

    pub fn listen_http_addr(&self) -> String {
        self.http_listen
            .clone()
            .unwrap_or_else(|| "0.0.0.0:80".to_string())
    }

    pub fn log_dir_path(&self) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("logs"))
    }

    /// Targets declared in config, or the single function target.
    pub fn targets_or_default(&self) -> BTreeMap<String, TargetSpec> {
        if self.targets.is_empty() {
            BTreeMap::from([("function".to_string(), TargetSpec::Function)])
        } else {
            self.targets.clone()
        }
    }

    /// Resolve all relative paths in config based on the directory containing the config file.
    pub fn resolve_paths(&mut self, base_dir: &Path) {
        if let Some(p) = &self.log_dir {
            self.log_dir = Some(resolve_path(base_dir, p));
        }
        if let Some(p) = &self.rules_path {
            self.rules_path = Some(resolve_path(base_dir, p));
        }
        if let Some(tls) = &mut self.tls {
            tls.cert_path = resolve_path(base_dir, &tls.cert_path);
            tls.key_path = resolve_path(base_dir, &tls.key_path);
        }
    }
}

fn resolve_path(base_dir: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}

/// Deployment target taken from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployEnv {
    pub account: String,
    pub region: String,
    pub domain_name: Option<String>,
}

impl DeployEnv {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Each variable falls back to its `PROYECT_*` spelling when unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get_one = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let get = |k: &'static str| -> Option<(&'static str, String)> {
            get_one(k).map(|v| (k, v)).or_else(|| {
                ENV_FALLBACKS
                    .iter()
                    .find(|(name, _)| *name == k)
                    .and_then(|(_, old)| get_one(*old).map(|v| (*old, v)))
            })
        };

        let (account_var, account) = get(ENV_ACCOUNT).ok_or(ConfigError::MissingEnv(ENV_ACCOUNT))?;
        if !account.chars().all(|c| c.is_ascii_digit()) || account.len() != 12 {
            return Err(ConfigError::invalid(
                account_var,
                format!("expected a 12 digit account id, got \"{account}\""),
            ));
        }

        let (_, region) = get(ENV_REGION).ok_or(ConfigError::MissingEnv(ENV_REGION))?;

        Ok(Self {
            account,
            region,
            domain_name: get(ENV_DOMAIN_NAME).map(|(_, v)| v),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn env_requires_account_and_region() {
        let err = DeployEnv::from_lookup(env(&[(ENV_REGION, "eu-west-1")])).unwrap_err();
        assert_eq!(err, ConfigError::MissingEnv(ENV_ACCOUNT));

        let err = DeployEnv::from_lookup(env(&[(ENV_ACCOUNT, "123456789012")])).unwrap_err();
        assert_eq!(err, ConfigError::MissingEnv(ENV_REGION));
    }

    #[test]
    fn blank_env_counts_as_missing() {
        let err = DeployEnv::from_lookup(env(&[
            (ENV_ACCOUNT, "123456789012"),
            (ENV_REGION, "   "),
        ]))
        .unwrap_err();
        assert_eq!(err, ConfigError::MissingEnv(ENV_REGION));
    }

    #[test]
    fn env_rejects_malformed_account() {
        let err = DeployEnv::from_lookup(env(&[(ENV_ACCOUNT, "12ab"), (ENV_REGION, "us-east-1")]))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_ACCOUNT));
    }

    #[test]
    fn env_accepts_proyect_spellings() {
        let e = DeployEnv::from_lookup(env(&[
            ("PROYECT_ACCOUNT", "123456789012"),
            ("PROYECT_REGION", "us-east-1"),
        ]))
        .unwrap();
        assert_eq!(e.account, "123456789012");
        assert_eq!(e.region, "us-east-1");

        // The PROJECT_* name wins when both are set.
        let e = DeployEnv::from_lookup(env(&[
            (ENV_ACCOUNT, "123456789012"),
            ("PROYECT_ACCOUNT", "999999999999"),
            ("PROYECT_REGION", "eu-west-1"),
            ("PROYECT_DOMAIN_NAME", "app.example.com"),
        ]))
        .unwrap();
        assert_eq!(e.account, "123456789012");
        assert_eq!(e.region, "eu-west-1");
        assert_eq!(e.domain_name.as_deref(), Some("app.example.com"));

        let err = DeployEnv::from_lookup(env(&[("PROYECT_ACCOUNT", "12ab"), ("PROYECT_REGION", "us-east-1")]))
            .unwrap_err();
        assert!(err.to_string().starts_with("PROYECT_ACCOUNT"));
    }

    #[test]
    fn env_domain_is_optional() {
        let e = DeployEnv::from_lookup(env(&[
            (ENV_ACCOUNT, "123456789012"),
            (ENV_REGION, "us-east-1"),
        ]))
        .unwrap();
        assert_eq!(e.region, "us-east-1");
        assert_eq!(e.domain_name, None);
    }

    #[test]
    fn parses_minimal_config_with_defaults() {
        let cfg: AppConfig = serde_yaml::from_str("stack: {}\n").unwrap();
        assert_eq!(cfg.stack.name, "AlbStack");
        assert!(!cfg.stack.enable_auth);
        assert!(!cfg.stack.enable_tls);
        assert_eq!(cfg.stack.network.max_azs, 2);
        assert_eq!(cfg.stack.network.nat_gateways, 1);
        assert_eq!(cfg.stack.function.name, "LambdaDemoBalancer");
        assert_eq!(cfg.listen_http_addr(), "0.0.0.0:80");
        assert_eq!(
            cfg.targets_or_default().get("function"),
            Some(&TargetSpec::Function)
        );
    }

    #[test]
    fn parses_targets_and_providers() {
        let yaml = r#"
stack:
  enable_auth: true
targets:
  api:
    kind: http
    upstream: http://127.0.0.1:9000
  function:
    kind: function
identity_providers:
  cognito:
    user_pool: demo-users
    client: demo-client
    domain_prefix: demo-login
    on_unauthenticated: deny
"#;
        let cfg: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            cfg.targets.get("api"),
            Some(&TargetSpec::Http {
                upstream: "http://127.0.0.1:9000".to_string()
            })
        );
        let p = &cfg.identity_providers["cognito"];
        assert_eq!(p.on_unauthenticated, Some(OnUnauthenticated::Deny));
        assert_eq!(p.region, None);
    }

    #[test]
    fn resolves_relative_paths_against_config_dir() {
        let yaml = "rules_path: rules.yaml\nlog_dir: /var/log/alb\nstack: {}\n";
        let mut cfg: AppConfig = serde_yaml::from_str(yaml).unwrap();
        cfg.resolve_paths(Path::new("/etc/alb-stack"));
        assert_eq!(
            cfg.rules_path.as_deref(),
            Some(Path::new("/etc/alb-stack/rules.yaml"))
        );
        assert_eq!(cfg.log_dir_path(), PathBuf::from("/var/log/alb"));
    }
}
