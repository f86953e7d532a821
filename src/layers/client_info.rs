use crate::models::api::prelude::*;
use crate::models::invite_code_usage::RedemptionOrigin;
use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::http::{HeaderMap, Request, Response, header};
use std::net::SocketAddr;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Where a request came from, as far as the proxy headers and the socket tell.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

impl ClientInfo {
    /// `x-real-ip` wins over the first `x-forwarded-for` hop, which wins over the peer address.
    fn from_request_parts(headers: &HeaderMap, peer: Option<SocketAddr>) -> Self {
        let forwarded = header_str(headers, "x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let ip_address = header_str(headers, "x-real-ip")
            .or(forwarded)
            .map(str::to_owned)
            .or_else(|| peer.map(|p| p.ip().to_string()));
        let user_agent = header_str(headers, header::USER_AGENT.as_str()).map(str::to_owned);
        Self {
            ip_address,
            user_agent,
        }
    }

    pub fn origin(&self) -> RedemptionOrigin {
        RedemptionOrigin::new(self.ip_address.clone(), self.user_agent.clone())
    }
}

impl<S> FromRequestParts<S> for ClientInfo
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _: &S) -> ApiResult<Self> {
        parts
            .extensions
            .get::<ClientInfo>()
            .cloned()
            .ok_or(internal!(
                "Cannot extract client info. Is `ClientInfoLayer` enabled?"
            ))
    }
}

#[derive(Clone, Default)]
pub struct ClientInfoLayer;

impl ClientInfoLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for ClientInfoLayer {
    type Service = ClientInfoService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ClientInfoService { inner }
    }
}

#[derive(Clone)]
pub struct ClientInfoService<S> {
    inner: S,
}

impl<ReqBody, ResBody, S> Service<Request<ReqBody>> for ClientInfoService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let peer = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let info = ClientInfo::from_request_parts(req.headers(), peer);
        req.extensions_mut().insert(info);
        self.inner.call(req)
    }
}
