use bytes::Bytes;
use pingora::http::ResponseHeader;
use pingora_proxy::Session;

use crate::function::FunctionResponse;

/// Text content types get an explicit charset.
fn content_type_value(content_type: &str) -> String {
    if content_type.starts_with("text/") && !content_type.contains("charset") {
        format!("{content_type}; charset=utf-8")
    } else {
        content_type.to_string()
    }
}

fn header(status: u16, request_id: &str, len: usize) -> pingora::Result<ResponseHeader> {
    let mut resp = ResponseHeader::build(status, None)?;
    resp.insert_header("content-length", len.to_string())?;
    resp.insert_header("x-request-id", request_id)?;
    Ok(resp)
}

async fn send(session: &mut Session, resp: ResponseHeader, body: Bytes) -> pingora::Result<()> {
    session.write_response_header(Box::new(resp), false).await?;
    session.write_response_body(Some(body), true).await?;
    Ok(())
}

pub async fn write_fixed(
    session: &mut Session,
    status: u16,
    content_type: &str,
    body: &str,
    request_id: &str,
) -> pingora::Result<()> {
    let body = Bytes::from(body.to_string());
    let mut resp = header(status, request_id, body.len())?;
    resp.insert_header("content-type", content_type_value(content_type))?;
    resp.insert_header("cache-control", "no-store")?;
    send(session, resp, body).await
}

pub async fn write_redirect(
    session: &mut Session,
    status: u16,
    location: &str,
    request_id: &str,
) -> pingora::Result<()> {
    let mut resp = header(status, request_id, 0)?;
    resp.insert_header("location", location)?;
    resp.insert_header("cache-control", "no-store")?;
    send(session, resp, Bytes::new()).await
}

pub async fn write_function(
    session: &mut Session,
    out: &FunctionResponse,
    request_id: &str,
) -> pingora::Result<()> {
    let body = Bytes::from(out.body.clone());
    let mut resp = header(out.status_code, request_id, body.len())?;
    for (k, v) in &out.headers {
        resp.insert_header(k.to_ascii_lowercase(), v.as_str())?;
    }
    send(session, resp, body).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charset_only_for_text() {
        assert_eq!(content_type_value("text/plain"), "text/plain; charset=utf-8");
        assert_eq!(content_type_value("application/json"), "application/json");
        assert_eq!(
            content_type_value("text/html; charset=latin1"),
            "text/html; charset=latin1"
        );
    }

    #[test]
    fn header_carries_length_and_request_id() {
        let h = header(404, "req-1", 9).unwrap();
        assert_eq!(h.status.as_u16(), 404);
        assert_eq!(h.headers.get("content-length").unwrap(), "9");
        assert_eq!(h.headers.get("x-request-id").unwrap(), "req-1");
    }
}
