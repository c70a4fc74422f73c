// Gateway Translation - proxy envelopes <-> standard HTTP request/response

use crate::domain::{GatewayRequest, GatewayResponse, GatewayVersion};
use crate::port::{HttpRequest, HttpResponse};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("Invalid base64 body: {0}")]
    InvalidBody(String),

    #[error("Invalid header name: {0:?}")]
    InvalidHeaderName(String),

    #[error("Invalid value for header {0}")]
    InvalidHeaderValue(String),
}

const METHODS: &[&str] = &[
    "GET", "HEAD", "POST", "PUT", "DELETE", "PATCH", "OPTIONS", "CONNECT", "TRACE",
];

/// Translate a gateway envelope into the router's request
pub fn to_http_request(request: &GatewayRequest) -> Result<HttpRequest, GatewayError> {
    let method = request.method.to_ascii_uppercase();
    if !METHODS.contains(&method.as_str()) {
        return Err(GatewayError::InvalidMethod(request.method.clone()));
    }

    let body = match &request.body {
        None => Vec::new(),
        Some(body) if request.is_base64_encoded => BASE64
            .decode(body.as_bytes())
            .map_err(|e| GatewayError::InvalidBody(e.to_string()))?,
        Some(body) => body.clone().into_bytes(),
    };

    for (name, value) in &request.headers {
        if !is_header_name(name) {
            return Err(GatewayError::InvalidHeaderName(name.clone()));
        }
        if !is_header_value(value) {
            return Err(GatewayError::InvalidHeaderValue(name.clone()));
        }
    }

    let uri = if request.raw_query.is_empty() {
        request.path.clone()
    } else {
        format!("{}?{}", request.path, request.raw_query)
    };

    Ok(HttpRequest {
        method,
        uri,
        headers: request.headers.clone(),
        body,
    })
}

// RFC 7230 token
fn is_header_name(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_alphanumeric()
                || matches!(
                    b,
                    b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' | b'^'
                        | b'_' | b'`' | b'|' | b'~'
                )
        })
}

// Visible ASCII, space, tab and obs-text; no control characters
fn is_header_value(value: &str) -> bool {
    value
        .bytes()
        .all(|b| b == b'\t' || (b' '..=b'~').contains(&b) || b >= 0x80)
}

/// Translate the router's response back into the gateway envelope
///
/// Bodies that are not valid UTF-8 are base64-encoded. Repeated headers go to
/// `multiValueHeaders` (v1) or are comma-joined, with `set-cookie` moved to
/// `cookies` (v2).
pub fn to_gateway_response(response: HttpResponse, version: GatewayVersion) -> GatewayResponse {
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in response.headers {
        grouped
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value);
    }

    let mut out = GatewayResponse {
        status_code: response.status,
        ..Default::default()
    };

    for (name, mut values) in grouped {
        match version {
            GatewayVersion::V2 if name == "set-cookie" => out.cookies.append(&mut values),
            GatewayVersion::V2 => {
                out.headers.insert(name, values.join(", "));
            }
            GatewayVersion::V1 if values.len() == 1 => {
                out.headers.insert(name, values.remove(0));
            }
            GatewayVersion::V1 => {
                out.multi_value_headers.insert(name, values);
            }
        }
    }

    match String::from_utf8(response.body) {
        Ok(text) => {
            out.body = text;
            out.is_base64_encoded = false;
        }
        Err(e) => {
            out.body = BASE64.encode(e.as_bytes());
            out.is_base64_encoded = true;
        }
    }

    out
}

/// Percent-encode a query key or value (RFC 3986 unreserved set passes through)
pub fn encode_query_component(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
