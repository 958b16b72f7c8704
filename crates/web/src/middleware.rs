//! Layers applied to every request: security headers, cache busting,
//! environment-prefix rewriting and request logging.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderValue, Request, Uri},
    middleware::Next,
    response::Response,
};
use common::prelude::tracing;
use once_cell::sync::Lazy;
use regex::Regex;

/// The overlay environment selected through the `/env/<name>` URL prefix;
/// empty when the request did not carry one.
#[derive(Debug, Clone, Default)]
pub struct EnvName(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for EnvName
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<EnvName>().cloned().unwrap_or_default())
    }
}

static ENV_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/env/([a-zA-Z0-9_-]+)(/.*)$").expect("env prefix regex"));

/// Strips the `/env/<name>` prefix before routing and exposes the name to
/// handlers through the request extensions.
pub async fn environment_prefix<B>(mut request: Request<B>, next: Next<B>) -> Response {
    if let Some((environment, uri)) = rewrite_env_uri(request.uri()) {
        request.extensions_mut().insert(EnvName(environment));
        *request.uri_mut() = uri;
    }
    next.run(request).await
}

fn rewrite_env_uri(uri: &Uri) -> Option<(String, Uri)> {
    let caps = ENV_RE.captures(uri.path())?;
    let environment = caps[1].to_owned();
    let rest = caps[2].to_owned();

    let path_and_query = match uri.query() {
        Some(query) => format!("{rest}?{query}"),
        None => rest,
    };
    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(path_and_query.parse().ok()?);
    Some((environment, Uri::from_parts(parts).ok()?))
}

pub async fn security_headers<B>(request: Request<B>, next: Next<B>) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("x-xss-protection", HeaderValue::from_static("1; mode=block"));
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("script-src 'self'"),
    );
    response
}

pub async fn disable_cache<B>(request: Request<B>, next: Next<B>) -> Response {
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        "cache-control",
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    response
}

pub async fn log_request<B>(request: Request<B>, next: Next<B>) -> Response {
    let src = request
        .extensions()
        .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
        .map(|connect| connect.0.to_string())
        .unwrap_or_default();
    tracing::info!(%src, method = %request.method(), url = %request.uri(), "request");
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_env_prefix_is_stripped() {
        let uri: Uri = "/env/prod/configs/foo.ipxe?x=1".parse().unwrap();
        let (environment, rewritten) = rewrite_env_uri(&uri).unwrap();
        assert_eq!(environment, "prod");
        assert_eq!(rewritten.path(), "/configs/foo.ipxe");
        assert_eq!(rewritten.query(), Some("x=1"));
    }

    #[test]
    fn test_plain_paths_are_untouched() {
        let uri: Uri = "/configs/foo.ipxe".parse().unwrap();
        assert!(rewrite_env_uri(&uri).is_none());
    }

    #[test]
    fn test_env_names_are_restricted() {
        let uri: Uri = "/env/pr%2Fod/start".parse().unwrap();
        assert!(rewrite_env_uri(&uri).is_none());

        let uri: Uri = "/env/prod_2/start".parse().unwrap();
        let (environment, _) = rewrite_env_uri(&uri).unwrap();
        assert_eq!(environment, "prod_2");
    }

    #[test]
    fn test_bare_env_prefix_does_not_rewrite() {
        // no trailing path to dispatch to
        let uri: Uri = "/env/prod".parse().unwrap();
        assert!(rewrite_env_uri(&uri).is_none());
    }
}
