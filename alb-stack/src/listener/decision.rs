use serde::Serialize;

/// What the listener does with a request once rules and gates have run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decision {
    Forward {
        target: String,
    },

    FixedResponse {
        status: u16,
        content_type: String,
        body: String,
    },

    Redirect {
        status: u16,
        location: String,
    },

    /// Unauthenticated request on a gated route.
    RedirectToLogin {
        provider: String,
        location: String,
    },
}

impl Decision {
    pub fn unauthorized() -> Self {
        Self::FixedResponse {
            status: 401,
            content_type: "text/plain".to_string(),
            body: "Unauthorized".to_string(),
        }
    }

    pub fn kind_str(&self) -> &'static str {
        match self {
            Decision::Forward { .. } => "forward",
            Decision::FixedResponse { .. } => "fixed_response",
            Decision::Redirect { .. } => "redirect",
            Decision::RedirectToLogin { .. } => "login",
        }
    }

    /// Status answered by the listener itself; None when forwarded.
    pub fn status(&self) -> Option<u16> {
        match self {
            Decision::Forward { .. } => None,
            Decision::FixedResponse { status, .. } | Decision::Redirect { status, .. } => {
                Some(*status)
            }
            Decision::RedirectToLogin { .. } => Some(302),
        }
    }
}
