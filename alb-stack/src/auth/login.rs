use url::form_urlencoded;

use crate::listener::request::RequestContext;

use super::IdentityProvider;

/// Callback path the load balancer reserves for the provider's response.
pub const IDP_RESPONSE_PATH: &str = "/oauth2/idpresponse";

/// Hosted login page for `provider`, carrying the original request target
/// in `state` so it can be replayed after sign-in.
pub fn login_url(provider: &IdentityProvider, req: &RequestContext) -> String {
    let host = req.host.as_deref().unwrap_or("localhost");
    let authority = match (req.secure, req.port) {
        (true, 443) | (false, 80) => host.to_string(),
        (_, port) => format!("{host}:{port}"),
    };
    let redirect_uri = format!("{}://{}{}", req.scheme(), authority, IDP_RESPONSE_PATH);

    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("response_type", "code")
        .append_pair("client_id", &provider.client)
        .append_pair("redirect_uri", &redirect_uri)
        .append_pair("scope", &provider.scope)
        .append_pair("state", &req.original_target())
        .finish();

    format!("https://{}/oauth2/authorize?{query}", provider.hosted_domain())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::OnUnauthenticated;

    fn provider() -> IdentityProvider {
        IdentityProvider {
            name: "cognito".into(),
            user_pool: "demo-users".into(),
            client: "client123".into(),
            domain_prefix: "demo-login".into(),
            region: "eu-west-1".into(),
            scope: "openid email".into(),
            session_cookie_name: "AWSELBAuthSessionCookie".into(),
            session_timeout_secs: 604800,
            on_unauthenticated: OnUnauthenticated::Authenticate,
        }
    }

    #[test]
    fn state_round_trips_reserved_bytes() {
        let req = RequestContext::new("GET", "/routes?a=1&b=2");
        let url = login_url(&provider(), &req);
        assert!(url.ends_with("state=%2Froutes%3Fa%3D1%26b%3D2"));

        let (_, query) = url.split_once('?').unwrap();
        let state = form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned());
        assert_eq!(state.as_deref(), Some("/routes?a=1&b=2"));
    }

    #[test]
    fn login_url_points_at_hosted_domain_and_keeps_target() {
        let req = RequestContext::new("GET", "/routes?x=1")
            .secure(true)
            .with_host("app.example.com");
        let url = login_url(&provider(), &req);
        assert!(url.starts_with(
            "https://demo-login.auth.eu-west-1.amazoncognito.com/oauth2/authorize?response_type=code"
        ));
        assert!(url.contains("client_id=client123"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fapp.example.com%2Foauth2%2Fidpresponse"));
        assert!(url.contains("scope=openid+email"));
        assert!(url.ends_with("state=%2Froutes%3Fx%3D1"));
    }

    #[test]
    fn non_default_port_is_kept_in_callback() {
        let req = RequestContext::new("GET", "/").with_host("localhost:8080");
        let url = login_url(&provider(), &req);
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A8080%2Foauth2%2Fidpresponse"));
    }
}
