// HTTP Router Port
//
// One shared router serves every gateway request. The adapter crate wraps an
// axum `Router`; tests can implement this directly.

use super::handler::BoxError;
use async_trait::async_trait;

/// Standard request handed to the router
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    /// Path plus optional `?query`
    pub uri: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Router response before translation to the gateway envelope
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: vec![(
                "content-type".to_string(),
                "text/plain; charset=utf-8".to_string(),
            )],
            body: body.into().into_bytes(),
        }
    }
}

#[async_trait]
pub trait HttpRouter: Send + Sync {
    /// Route one request
    ///
    /// # Errors
    /// Only for failures the router itself cannot render as a response.
    async fn route(&self, request: HttpRequest) -> Result<HttpResponse, BoxError>;
}
