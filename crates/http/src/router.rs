//! axum Router adapter
//!
//! Implements the core `HttpRouter` port by driving the router as a tower
//! service, one request at a time, without binding a socket.

use crate::error::Result;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use switchyard_core::port::{BoxError, HttpRequest, HttpResponse, HttpRouter};
use tower::ServiceExt;
use tracing::debug;

/// Shared router for every HTTP route of the application
#[derive(Clone)]
pub struct AxumRouter {
    router: Router,
}

impl AxumRouter {
    pub fn new(router: Router) -> Self {
        Self { router }
    }

    /// Run one request through the router
    pub async fn call(&self, request: HttpRequest) -> Result<HttpResponse> {
        let request = into_axum_request(request)?;
        let response = match self.router.clone().oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        };
        from_axum_response(response).await
    }
}

impl From<Router> for AxumRouter {
    fn from(router: Router) -> Self {
        Self::new(router)
    }
}

impl std::fmt::Debug for AxumRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AxumRouter").finish_non_exhaustive()
    }
}

#[async_trait]
impl HttpRouter for AxumRouter {
    async fn route(&self, request: HttpRequest) -> std::result::Result<HttpResponse, BoxError> {
        debug!(method = %request.method, uri = %request.uri, "Routing request");
        let response = self.call(request).await?;
        debug!(status = response.status, "Router responded");
        Ok(response)
    }
}

fn into_axum_request(request: HttpRequest) -> Result<Request<Body>> {
    let mut builder = Request::builder()
        .method(request.method.as_str())
        .uri(request.uri.as_str());
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    Ok(builder.body(Body::from(request.body))?)
}

async fn from_axum_response(response: Response<Body>) -> Result<HttpResponse> {
    let (parts, body) = response.into_parts();
    let body = body.collect().await?.to_bytes();

    let headers = parts
        .headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();

    Ok(HttpResponse {
        status: parts.status.as_u16(),
        headers,
        body: body.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::{header, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::Json;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use switchyard_core::application::{Dispatcher, HandlerRegistry, NameMapping};
    use switchyard_core::domain::{DispatchResult, InvocationContext, Layout};

    async fn get_order(Path(id): Path<String>) -> Json<Value> {
        Json(json!({ "id": id }))
    }

    async fn echo(body: String) -> impl IntoResponse {
        (
            StatusCode::CREATED,
            [
                (header::SET_COOKIE, "a=1"),
                (header::SET_COOKIE, "b=2"),
            ],
            body,
        )
    }

    fn app() -> AxumRouter {
        AxumRouter::new(
            Router::new()
                .route("/orders/:id", get(get_order))
                .route("/echo", post(echo)),
        )
    }

    fn request(method: &str, uri: &str, body: &str) -> HttpRequest {
        HttpRequest {
            method: method.to_string(),
            uri: uri.to_string(),
            headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
            body: body.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn test_routes_with_path_params() {
        let response = app().call(request("GET", "/orders/42", "")).await.unwrap();

        assert_eq!(response.status, 200);
        let body: Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body, json!({ "id": "42" }));
        assert!(response
            .headers
            .iter()
            .any(|(k, v)| k == "content-type" && v == "application/json"));
    }

    #[tokio::test]
    async fn test_repeated_headers_are_preserved() {
        let response = app().call(request("POST", "/echo", "hello")).await.unwrap();

        assert_eq!(response.status, 201);
        assert_eq!(response.body, b"hello");
        let cookies: Vec<_> = response
            .headers
            .iter()
            .filter(|(k, _)| k == "set-cookie")
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let response = app().call(request("GET", "/nope", "")).await.unwrap();
        assert_eq!(response.status, 404);
    }

    #[tokio::test]
    async fn test_invalid_uri_is_an_error() {
        let err = app().call(request("GET", "not a uri", "")).await.unwrap_err();
        assert!(matches!(err, crate::HttpAdapterError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_gateway_event_through_dispatcher() {
        let registry = HandlerRegistry::builder().http(app()).build().unwrap();
        let dispatcher = Dispatcher::new(
            Arc::new(registry),
            Arc::new(NameMapping::new("SWITCHYARD", &Layout::default())),
        );

        let payload = json!({
            "version": "2.0",
            "rawPath": "/orders/7",
            "rawQueryString": "",
            "headers": { "accept": "application/json" },
            "requestContext": { "http": { "method": "GET", "path": "/orders/7" } },
            "isBase64Encoded": false
        });

        let result = dispatcher
            .dispatch_payload(InvocationContext::new("req-1"), payload.to_string().as_bytes())
            .await
            .unwrap();

        let DispatchResult::HttpResponse(response) = result else {
            panic!("expected an HTTP response");
        };
        assert_eq!(response.status_code, 200);
        let body: Value = serde_json::from_str(&response.body).unwrap();
        assert_eq!(body["id"], "7");
    }
}
