use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use pingora::prelude::*;
use pingora_proxy::http_proxy_service;

use crate::app::App;
use crate::auth::session::SessionVerifier;
use crate::config::DeployEnv;
use crate::listener::engine::RuleEvaluator;
use crate::listener::request::RequestContext;
use crate::server::listener::{add_http_listener, add_https_listener};
use crate::server::proxy::{resolve_targets, AlbProxy};

mod app;
mod auth;
mod config;
mod error;
mod function;
mod listener;
mod metrics;
mod obs;
mod server;
mod stack;
mod telemetry;
mod upstream;

#[derive(Debug, Parser)]
#[command(
    name = "alb-stack",
    version,
    about = "Load balancer stack: listener rules, auth gate and resource graph"
)]
struct Args {
    /// Path to config.yaml (relative paths inside config will be resolved based on this file's directory)
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load and validate configuration, environment and rule set.
    Validate,

    /// Emit the resource graph as JSON.
    Synth {
        /// Write to this file instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Evaluate one request against the rule set and print the decision.
    Route {
        #[arg(long, default_value = "/")]
        path: String,
        #[arg(long, default_value = "GET")]
        method: String,
        #[arg(long)]
        host: Option<String>,
        /// Repeatable, "name=value" or "name: value".
        #[arg(long = "header")]
        headers: Vec<String>,
        /// Present this token as every provider's session cookie.
        #[arg(long)]
        session: Option<String>,
        /// Treat the request as arriving over HTTPS.
        #[arg(long)]
        https: bool,
    },

    /// Run the local preview listener.
    Serve,
}

fn locate_config(p: PathBuf) -> PathBuf {
    if p.exists() || p != Path::new("config.yaml") {
        return p;
    }
    // Fall back to the directory holding the binary.
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|d| d.join("config.yaml")))
        .filter(|c| c.exists())
        .unwrap_or(p)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let cfg_path = locate_config(args.config);

    // Variables already set in the process win over `.env`.
    let dotenv = dotenvy::dotenv().ok();
    let env = DeployEnv::from_env()?;

    match args.command {
        Command::Serve => {
            let app = App::load(&cfg_path, env)?;
            telemetry::init_tracing("alb-stack", Some(&app.config.log_dir_path()))?;
            log_dotenv(dotenv.as_deref());
            serve(app)
        }
        cmd => {
            telemetry::init_tracing("alb-stack", None)?;
            log_dotenv(dotenv.as_deref());
            let app = App::load(&cfg_path, env)?;
            run_once(&app, cmd)
        }
    }
}

fn log_dotenv(path: Option<&Path>) {
    if let Some(p) = path {
        tracing::debug!(path = %p.display(), "loaded .env");
    }
}

fn run_once(app: &App, cmd: Command) -> anyhow::Result<()> {
    match cmd {
        Command::Validate => {
            println!(
                "ok: stack {} ({}/{}), {} listener rules + default, {} resources, {} listener(s)",
                app.settings.stack_name,
                app.settings.account,
                app.settings.region,
                app.rules.rules().len(),
                app.graph.resources.len(),
                app.graph.of_type("Listener").count(),
            );
        }

        Command::Synth { out } => {
            let json = serde_json::to_string_pretty(&app.graph)?;
            match out {
                Some(p) => std::fs::write(&p, json + "\n")
                    .with_context(|| format!("write graph failed: {}", p.display()))?,
                None => println!("{json}"),
            }
        }

        Command::Route {
            path,
            method,
            host,
            headers,
            session,
            https,
        } => {
            let mut req = RequestContext::new(&method, &path).secure(https);
            if let Some(h) = &host {
                req = req.with_host(h);
            }
            for h in &headers {
                let (k, v) = h
                    .split_once('=')
                    .or_else(|| h.split_once(':'))
                    .with_context(|| format!("bad --header '{h}', expected name=value"))?;
                req = req.with_header(k.trim(), v.trim());
            }
            if let Some(token) = &session {
                let mut names: Vec<&str> = app
                    .rules
                    .iter()
                    .filter_map(|r| match &r.action {
                        listener::compiled::Action::Authenticate { provider, .. } => {
                            Some(provider.session_cookie_name.as_str())
                        }
                        _ => None,
                    })
                    .collect();
                names.sort_unstable();
                names.dedup();
                let cookie = names
                    .iter()
                    .map(|name| format!("{name}={token}"))
                    .collect::<Vec<_>>()
                    .join("; ");
                if !cookie.is_empty() {
                    req = req.with_header("cookie", &cookie);
                }
            }

            let outcome = RuleEvaluator::new(app.rules.clone()).decide(&req, &app.sessions, Utc::now());
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }

        Command::Serve => anyhow::bail!("serve is not a one-shot command"),
    }
    Ok(())
}

fn port_of(addr: &str) -> anyhow::Result<u16> {
    addr.rsplit_once(':')
        .and_then(|(_, p)| p.parse().ok())
        .with_context(|| format!("listen address has no port: {addr}"))
}

fn serve(app: App) -> anyhow::Result<()> {
    let obs = obs::ObsSink::new(&app.config.log_dir_path())?;
    let targets = Arc::new(resolve_targets(&app.targets)?);
    let sessions: Arc<dyn SessionVerifier> = Arc::new(app.sessions.clone());
    let evaluator = RuleEvaluator::new(app.rules.clone());

    let mut my_server = Server::new(None)?;
    my_server.bootstrap();

    let metrics_svc = background_service(
        "metrics",
        metrics::service::MetricsSvc::new(
            app.config.metrics_addr(),
            app.rules.version.as_deref().unwrap_or("unversioned"),
        ),
    );
    my_server.add_service(metrics_svc);

    match &app.config.tls {
        Some(tls) => {
            let https_addr = app.config.listen_addr();
            let mut https = http_proxy_service(
                &my_server.configuration,
                AlbProxy::new("https", true, evaluator, targets.clone(), sessions.clone(), obs.clone()),
            );
            add_https_listener(&mut https, &https_addr, tls)?;
            my_server.add_service(https);

            // Port 80 only redirects, the way the stack's TLS variant does.
            let redirect = RuleEvaluator::new(app.https_redirect_rules(port_of(&https_addr)?)?);
            let mut http = http_proxy_service(
                &my_server.configuration,
                AlbProxy::new("http", false, redirect, targets, sessions, obs),
            );
            add_http_listener(&mut http, &app.config.listen_http_addr());
            my_server.add_service(http);
        }
        None => {
            if app.settings.tls.is_some() {
                tracing::warn!("stack.enable_tls is on but no tls certificate is configured; previewing over plain HTTP");
            }
            let mut http = http_proxy_service(
                &my_server.configuration,
                AlbProxy::new("http", false, evaluator, targets, sessions, obs),
            );
            add_http_listener(&mut http, &app.config.listen_http_addr());
            my_server.add_service(http);
        }
    }

    my_server.run_forever();
}
