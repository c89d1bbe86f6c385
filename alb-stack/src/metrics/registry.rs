use prometheus::{Encoder, TextEncoder};

pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub fn gather_as_text() -> String {
    let mf = prometheus::gather();
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    if let Err(e) = encoder.encode(&mf, &mut buf) {
        tracing::warn!("metrics encode failed: {}", e);
    }
    String::from_utf8_lossy(&buf).to_string()
}
