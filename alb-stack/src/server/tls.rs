use std::path::Path;

use anyhow::{bail, Context};
use openssl::pkey::PKey;
use openssl::x509::X509;

/// Summary of a certificate the preview listener is about to serve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertInfo {
    pub subject: String,
    pub not_after: String,
}

/// Load a PEM cert/key pair from disk and make sure they belong together.
pub fn load_pair(cert_path: &Path, key_path: &Path) -> anyhow::Result<CertInfo> {
    let cert_pem = std::fs::read(cert_path)
        .with_context(|| format!("read cert failed: {}", cert_path.display()))?;
    let key_pem = std::fs::read(key_path)
        .with_context(|| format!("read key failed: {}", key_path.display()))?;
    check_pem(&cert_pem, &key_pem)
        .with_context(|| format!("bad tls pair: {}", cert_path.display()))
}

pub fn check_pem(cert_pem: &[u8], key_pem: &[u8]) -> anyhow::Result<CertInfo> {
    let cert = X509::from_pem(cert_pem).context("parse cert failed")?;
    let key = PKey::private_key_from_pem(key_pem).context("parse key failed")?;

    if !cert.public_key()?.public_eq(&key) {
        bail!("private key does not match certificate");
    }

    let subject = cert
        .subject_name()
        .entries()
        .filter_map(|e| e.data().as_utf8().ok().map(|s| s.to_string()))
        .collect::<Vec<_>>()
        .join(",");

    Ok(CertInfo {
        subject,
        not_after: cert.not_after().to_string(),
    })
}
