use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::json;

/// Event handed to the function by the load balancer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FunctionRequest {
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(alias = "httpMethod")]
    pub method: String,
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionResponse {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

/// Echo handler: always 200 with the request it saw.
pub fn handle(req: &FunctionRequest) -> anyhow::Result<FunctionResponse> {
    let body = serde_json::to_string(&json!({
        "message": "Hello World!",
        "received": {
            "headers": req.headers,
            "method": req.method,
            "body": req.body,
        },
    }))?;

    Ok(FunctionResponse {
        status_code: 200,
        headers: BTreeMap::from([("Content-Type".to_string(), "application/json".to_string())]),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echoes_request() {
        let req = FunctionRequest {
            headers: BTreeMap::from([("x-trace".to_string(), "abc".to_string())]),
            method: "POST".into(),
            body: Some("{\"a\":1}".into()),
        };
        let resp = handle(&req).unwrap();
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.headers["Content-Type"], "application/json");

        let v: serde_json::Value = serde_json::from_str(&resp.body).unwrap();
        assert_eq!(v["message"], "Hello World!");
        assert_eq!(v["received"]["method"], "POST");
        assert_eq!(v["received"]["headers"]["x-trace"], "abc");
        assert_eq!(v["received"]["body"], "{\"a\":1}");
    }

    #[test]
    fn null_body_stays_null() {
        let req: FunctionRequest =
            serde_json::from_str(r#"{"httpMethod":"GET","headers":{}}"#).unwrap();
        let resp = handle(&req).unwrap();
        let v: serde_json::Value = serde_json::from_str(&resp.body).unwrap();
        assert!(v["received"]["body"].is_null());
        assert_eq!(v["received"]["method"], "GET");
    }

    #[test]
    fn response_uses_camel_case() {
        let resp = handle(&FunctionRequest {
            headers: BTreeMap::new(),
            method: "GET".into(),
            body: None,
        })
        .unwrap();
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["statusCode"], 200);
    }
}
