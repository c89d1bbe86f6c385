use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;

use crate::auth::session::StaticSessionVerifier;
use crate::auth::IdentityProvider;
use crate::config::{AppConfig, DeployEnv, TargetSpec};
use crate::error::ConfigError;
use crate::listener::compiled::{CompileContext, CompiledRuleSet};
use crate::listener::types::RuleSetFile;
use crate::stack::builder::build_graph;
use crate::stack::resources::ResourceGraph;
use crate::stack::settings::StackSettings;

/// A fully validated configuration: rule set compiled, settings resolved
/// and the resource graph built. Nothing here changes after load.
#[derive(Debug)]
pub struct App {
    pub config: AppConfig,
    pub env: DeployEnv,
    pub targets: BTreeMap<String, TargetSpec>,
    pub rules: CompiledRuleSet,
    pub sessions: StaticSessionVerifier,
    pub settings: StackSettings,
    pub graph: ResourceGraph,
}

impl App {
    pub fn load(path: &Path, env: DeployEnv) -> anyhow::Result<Self> {
        let config = AppConfig::load(path)?;
        let rules_yaml = match &config.rules_path {
            Some(p) => Some(
                std::fs::read_to_string(p)
                    .with_context(|| format!("read rules failed: {}", p.display()))?,
            ),
            None => None,
        };
        Self::from_parts(config, env, rules_yaml.as_deref())
    }

    pub fn from_parts(
        config: AppConfig,
        env: DeployEnv,
        rules_yaml: Option<&str>,
    ) -> anyhow::Result<Self> {
        let providers = IdentityProvider::resolve_all(&config.identity_providers, &env.region)?;
        let targets = config.targets_or_default();
        let settings = StackSettings::resolve(&config, &env, &providers)?;

        let file = match rules_yaml {
            Some(y) => RuleSetFile::from_yaml(y)?,
            None => builtin_rules(&targets, settings.auth.is_some(), &providers)?,
        };
        let rules = CompiledRuleSet::compile(
            &file,
            &CompileContext {
                targets: &targets,
                providers: &providers,
                auth_enabled: config.stack.enable_auth,
            },
        )?;

        let sessions = StaticSessionVerifier::from_specs(&config.sessions)?;
        let graph = build_graph(&settings, &rules, &targets)?;

        tracing::info!(
            stack = %settings.stack_name,
            region = %settings.region,
            rules = rules.rules().len() + 1,
            version = rules.version.as_deref().unwrap_or("-"),
            auth = settings.auth.is_some(),
            tls = settings.tls.is_some(),
            "configuration loaded"
        );

        Ok(Self {
            config,
            env,
            targets,
            rules,
            sessions,
            settings,
            graph,
        })
    }

    /// Rules for the plain HTTP side when the main listener is HTTPS.
    pub fn https_redirect_rules(&self, https_port: u16) -> Result<CompiledRuleSet, ConfigError> {
        CompiledRuleSet::compile(
            &RuleSetFile::https_redirect(https_port),
            &CompileContext {
                targets: &self.targets,
                providers: &BTreeMap::new(),
                auth_enabled: false,
            },
        )
    }
}

fn builtin_rules(
    targets: &BTreeMap<String, TargetSpec>,
    auth: bool,
    providers: &BTreeMap<String, IdentityProvider>,
) -> Result<RuleSetFile, ConfigError> {
    let function = targets
        .iter()
        .find(|(_, t)| **t == TargetSpec::Function)
        .map(|(name, _)| name.as_str())
        .ok_or_else(|| {
            ConfigError::invalid("targets", "the built-in rule set needs a function target")
        })?;
    let provider = if auth {
        providers.keys().next().map(String::as_str)
    } else {
        None
    };
    Ok(RuleSetFile::builtin(function, provider))
}
