//! Axum adapter for the security guard.
//!
//! Upstream authentication marks a caller by inserting [`AuthenticatedUser`]
//! into request extensions; everything else is anonymous and rate limited by
//! address. Allowed requests carry the [`Decision`] in their extensions.

use axum::{
    body::Body,
    extract::{ConnectInfo, Query, State},
    http::{header, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::guard::{Decision, Identity, SecurityGuard};
use crate::http::response::apply_rate_headers;
use crate::security::threat::RequestMetadata;

/// Caller identity established by an earlier authentication layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

pub const X_REQUEST_ID: &str = "x-request-id";
const X_SESSION_ID: &str = "x-session-id";

/// Build guard input from the transport view of a request. Query string
/// parameters are treated as user-supplied fields.
pub fn request_metadata(request: &Request<Body>, peer: SocketAddr) -> RequestMetadata {
    let headers: BTreeMap<String, String> = request
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    let fields = Query::<BTreeMap<String, String>>::try_from_uri(request.uri())
        .map(|Query(q)| q)
        .unwrap_or_default();

    let header_value = |name: &str| headers.get(name).cloned();

    RequestMetadata {
        ip: peer.ip().to_string(),
        user_agent: header_value(header::USER_AGENT.as_str()),
        method: request.method().to_string(),
        endpoint: request.uri().path().to_string(),
        request_id: header_value(X_REQUEST_ID),
        session_id: header_value(X_SESSION_ID),
        recent_request_count: None,
        fields,
        headers,
    }
}

pub async fn guard_middleware(
    State(guard): State<Arc<SecurityGuard>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let metadata = request_metadata(&request, peer);
    let identity = request
        .extensions()
        .get::<AuthenticatedUser>()
        .map(|user| Identity::User(user.0.clone()))
        .unwrap_or(Identity::Anonymous);

    let decision = match guard.evaluate(&metadata, &identity).await {
        Ok(decision) => decision,
        Err(e) => return e.into_response(),
    };
    let rate = decision.rate_info.clone();

    let mut response = if decision.allowed {
        request.extensions_mut().insert(decision);
        next.run(request).await
    } else {
        deny_response(decision)
    };

    if let Some(rate) = rate {
        apply_rate_headers(response.headers_mut(), &rate);
    }
    response
}

fn deny_response(decision: Decision) -> Response {
    match decision.into_result() {
        Err(e) => e.into_response(),
        // unreachable for a denied decision; fail closed anyway
        Ok(_) => axum::http::StatusCode::FORBIDDEN.into_response(),
    }
}
