//! The single upstream origin requests are forwarded to.

use axum::http::uri::{Authority, PathAndQuery, Scheme};
use axum::http::{HeaderValue, Uri};
use thiserror::Error;
use url::Url;

/// Problems with the configured upstream URL.
#[derive(Debug, Error)]
pub enum InvalidUpstream {
    #[error("{0}")]
    Url(#[from] url::ParseError),

    #[error("scheme {0:?} is not supported, use http://")]
    Scheme(String),

    #[error("missing host")]
    MissingHost,

    #[error("query strings and fragments are not allowed in the upstream URL")]
    QueryOrFragment,

    #[error("{0}")]
    Uri(#[from] axum::http::Error),
}

/// Parsed upstream base URL.
///
/// Forwarded requests keep their own path and query, prefixed with the base
/// path of the upstream URL when it has one.
#[derive(Debug, Clone)]
pub struct UpstreamTarget {
    authority: Authority,
    base_path: String,
    host_header: HeaderValue,
}

impl UpstreamTarget {
    pub fn parse(raw: &str) -> Result<Self, InvalidUpstream> {
        let url = Url::parse(raw)?;
        if url.scheme() != "http" {
            return Err(InvalidUpstream::Scheme(url.scheme().to_string()));
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(InvalidUpstream::QueryOrFragment);
        }
        let host = url.host_str().ok_or(InvalidUpstream::MissingHost)?;
        let authority_str = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let authority: Authority = authority_str
            .parse()
            .map_err(|e: axum::http::uri::InvalidUri| InvalidUpstream::Uri(e.into()))?;
        let host_header = HeaderValue::from_str(authority.as_str())
            .map_err(|e| InvalidUpstream::Uri(e.into()))?;

        Ok(Self {
            authority,
            base_path: url.path().trim_end_matches('/').to_string(),
            host_header,
        })
    }

    /// Absolute URI on the upstream for a request path and query.
    pub fn uri_for(&self, path_and_query: Option<&PathAndQuery>) -> Result<Uri, axum::http::Error> {
        let tail = path_and_query.map(PathAndQuery::as_str).unwrap_or("/");
        Uri::builder()
            .scheme(Scheme::HTTP)
            .authority(self.authority.clone())
            .path_and_query(format!("{}{}", self.base_path, tail))
            .build()
    }

    /// Value for the `Host` header of forwarded requests.
    pub fn host_header(&self) -> &HeaderValue {
        &self.host_header
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }
}
