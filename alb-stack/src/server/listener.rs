use anyhow::{anyhow, Context};
use pingora::listeners::tls::TlsSettings;
use pingora_core::services::listening::Service;
use pingora_proxy::HttpProxy;

use super::proxy::AlbProxy;
use super::tls;
use crate::config::TlsConfig;

pub type ProxyService = Service<HttpProxy<AlbProxy>>;

/// Add plain HTTP listener (no TLS)
pub fn add_http_listener(svc: &mut ProxyService, addr: &str) {
    svc.add_tcp(addr);
    tracing::info!(%addr, "http listener");
}

/// Add HTTPS listener serving one certificate.
pub fn add_https_listener(svc: &mut ProxyService, addr: &str, cfg: &TlsConfig) -> anyhow::Result<()> {
    let info = tls::load_pair(&cfg.cert_path, &cfg.key_path)?;

    let cert = cfg
        .cert_path
        .to_str()
        .ok_or_else(|| anyhow!("cert path is not utf-8: {}", cfg.cert_path.display()))?;
    let key = cfg
        .key_path
        .to_str()
        .ok_or_else(|| anyhow!("key path is not utf-8: {}", cfg.key_path.display()))?;

    let mut settings = TlsSettings::intermediate(cert, key)
        .with_context(|| format!("tls settings failed: {}", cfg.cert_path.display()))?;
    settings.enable_h2();
    svc.add_tls_with_settings(addr, None, settings);

    tracing::info!(%addr, subject = %info.subject, not_after = %info.not_after, "https listener");
    Ok(())
}
