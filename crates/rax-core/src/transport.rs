//! Shared HTTP plumbing for the first-generation APIs.
//!
//! Every resource client funnels through [`RestClient`]. The verbs implement
//! the provider's status-code contract exactly: absence (404, or a decoded
//! `itemNotFound` fault) is `None` on read verbs and a typed NotFound error
//! on mutating verbs, anything else unexpected decodes the JSON error body
//! into a [`CloudFault`]. The transport performs no retries of its own;
//! every call site is independently retryable.

use crate::config::ProviderConfig;
use crate::error::{CloudFault, Error, Result};
use bytes::Bytes;
use reqwest::header::{HeaderMap, CONTENT_TYPE, ETAG};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use std::collections::BTreeMap;

const JSON: &str = "application/json";
const OCTET_STREAM: &str = "application/octet-stream";

/// HTTP client for one provider account.
///
/// Cheap to clone; the underlying connection pool is shared.
#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
}

impl RestClient {
    /// Build a client from the provider configuration, honoring the
    /// `proxy_host`/`proxy_port` properties when present.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the proxy URL is malformed or the
    /// client cannot be constructed.
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout())
            .cookie_store(false);

        if let Some(host) = config.proxy_host.as_deref() {
            let proxy_url = match config.proxy_port {
                Some(port) => format!("http://{host}:{port}"),
                None => format!("http://{host}"),
            };
            let proxy = reqwest::Proxy::all(&proxy_url)
                .map_err(|e| Error::Config(format!("Invalid proxy {proxy_url}: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let http = builder
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }

    pub(crate) fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http.request(method, url)
    }

    /// GET a JSON/text resource. `None` means the resource does not exist.
    pub async fn get_string(
        &self,
        token: &str,
        endpoint: &str,
        resource: &str,
    ) -> Result<Option<String>> {
        let url = format!("{endpoint}{resource}");
        tracing::debug!(%url, "GET");
        let response = self
            .http
            .get(&url)
            .header(CONTENT_TYPE, JSON)
            .header("X-Auth-Token", token)
            .send()
            .await?;
        let status = response.status();
        tracing::debug!(%url, status = status.as_u16(), "GET status");

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !matches!(status.as_u16(), 200 | 203 | 204) {
            return match decode_fault(response).await? {
                Some(fault) => Err(fault.into()),
                None => Ok(None),
            };
        }
        Ok(Some(response.text().await?))
    }

    /// GET a binary resource for body streaming. `None` means absence.
    ///
    /// The returned [`Response`] has already had its status validated; the
    /// caller consumes the body via `bytes()` or `bytes_stream()`.
    pub async fn get_stream(
        &self,
        token: &str,
        endpoint: &str,
        resource: &str,
    ) -> Result<Option<Response>> {
        let url = format!("{endpoint}{resource}");
        tracing::debug!(%url, "GET (stream)");
        let response = self
            .http
            .get(&url)
            .header(CONTENT_TYPE, JSON)
            .header("X-Auth-Token", token)
            .send()
            .await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !matches!(status.as_u16(), 200 | 203) {
            return match decode_fault(response).await? {
                Some(fault) => Err(fault.into()),
                None => Ok(None),
            };
        }
        Ok(Some(response))
    }

    /// HEAD a resource and return all response headers. `None` means absence.
    pub async fn head(
        &self,
        token: &str,
        endpoint: &str,
        resource: &str,
    ) -> Result<Option<BTreeMap<String, String>>> {
        let url = format!("{endpoint}{resource}");
        tracing::debug!(%url, "HEAD");
        let response = self
            .http
            .head(&url)
            .header("X-Auth-Token", token)
            .send()
            .await?;
        let status = response.status();

        if !matches!(status.as_u16(), 200 | 204) {
            if status == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            return match decode_fault(response).await? {
                Some(fault) => Err(fault.into()),
                None => Ok(None),
            };
        }
        Ok(Some(header_map(response.headers())))
    }

    /// DELETE a resource. Success is 202 or 204.
    pub async fn delete(&self, token: &str, endpoint: &str, resource: &str) -> Result<()> {
        let url = format!("{endpoint}{resource}");
        tracing::debug!(%url, "DELETE");
        let response = self
            .http
            .delete(&url)
            .header(CONTENT_TYPE, JSON)
            .header("X-Auth-Token", token)
            .send()
            .await?;
        let status = response.status();
        tracing::debug!(%url, status = status.as_u16(), "DELETE status");

        if !matches!(status.as_u16(), 202 | 204) {
            let fault = decode_fault(response)
                .await?
                .unwrap_or_else(|| CloudFault::not_found(resource));
            return Err(fault.into());
        }
        Ok(())
    }

    /// POST a JSON payload. Success is 202 or 204; a non-blank 202 body is
    /// returned to the caller.
    pub async fn post_string(
        &self,
        token: &str,
        endpoint: &str,
        resource: &str,
        payload: Option<&str>,
    ) -> Result<Option<String>> {
        self.send_body(Method::POST, token, endpoint, resource, payload, &[])
            .await
    }

    /// POST with provider-specific custom headers and no body.
    pub async fn post_headers(
        &self,
        token: &str,
        endpoint: &str,
        resource: &str,
        custom_headers: &[(&str, &str)],
    ) -> Result<Option<String>> {
        self.send_body(Method::POST, token, endpoint, resource, None, custom_headers)
            .await
    }

    /// PUT a JSON payload. Success is 201, 202 or 204.
    pub async fn put_string(
        &self,
        token: &str,
        endpoint: &str,
        resource: &str,
        payload: Option<&str>,
    ) -> Result<Option<String>> {
        self.send_body(Method::PUT, token, endpoint, resource, payload, &[])
            .await
    }

    /// PUT with provider-specific custom headers and no body.
    pub async fn put_headers(
        &self,
        token: &str,
        endpoint: &str,
        resource: &str,
        custom_headers: &[(&str, &str)],
    ) -> Result<Option<String>> {
        self.send_body(Method::PUT, token, endpoint, resource, None, custom_headers)
            .await
    }

    /// POST an octet-stream body with optional MD5 integrity check.
    pub async fn post_stream(
        &self,
        token: &str,
        endpoint: &str,
        resource: &str,
        md5_hash: Option<&str>,
        body: Bytes,
    ) -> Result<Option<String>> {
        self.send_stream(Method::POST, token, endpoint, resource, md5_hash, body)
            .await
    }

    /// PUT an octet-stream body with optional MD5 integrity check.
    ///
    /// If the server echoes an `ETag` header and the caller supplied an
    /// expected hash and they differ, the call fails with a data-corruption
    /// error regardless of the HTTP status.
    pub async fn put_stream(
        &self,
        token: &str,
        endpoint: &str,
        resource: &str,
        md5_hash: Option<&str>,
        body: Bytes,
    ) -> Result<Option<String>> {
        self.send_stream(Method::PUT, token, endpoint, resource, md5_hash, body)
            .await
    }

    async fn send_body(
        &self,
        method: Method,
        token: &str,
        endpoint: &str,
        resource: &str,
        payload: Option<&str>,
        custom_headers: &[(&str, &str)],
    ) -> Result<Option<String>> {
        let url = format!("{endpoint}{resource}");
        tracing::debug!(%url, %method, "request");
        let mut request = self
            .http
            .request(method.clone(), &url)
            .header(CONTENT_TYPE, JSON)
            .header("X-Auth-Token", token);

        for (name, value) in custom_headers {
            request = request.header(*name, *value);
        }
        if let Some(payload) = payload {
            request = request.body(payload.to_string());
        }
        let response = request.send().await?;
        self.finish_write(method, resource, response).await
    }

    async fn send_stream(
        &self,
        method: Method,
        token: &str,
        endpoint: &str,
        resource: &str,
        md5_hash: Option<&str>,
        body: Bytes,
    ) -> Result<Option<String>> {
        let url = format!("{endpoint}{resource}");
        tracing::debug!(%url, %method, len = body.len(), "stream upload");
        let response = self
            .http
            .request(method.clone(), &url)
            .header(CONTENT_TYPE, OCTET_STREAM)
            .header("X-Auth-Token", token)
            .body(body)
            .send()
            .await?;

        // Integrity check comes before status interpretation: a mismatched
        // hash is data corruption even on an otherwise successful response.
        if let (Some(expected), Some(echoed)) = (
            md5_hash,
            response.headers().get(ETAG).and_then(|v| v.to_str().ok()),
        ) {
            let echoed = echoed.trim_matches('"');
            if echoed != expected {
                return Err(Error::DataCorruption(format!(
                    "MD5 hash values do not match for {resource}: sent {expected}, got {echoed}"
                )));
            }
        }
        self.finish_write(method, resource, response).await
    }

    async fn finish_write(
        &self,
        method: Method,
        resource: &str,
        response: Response,
    ) -> Result<Option<String>> {
        let status = response.status();
        tracing::debug!(%method, resource, status = status.as_u16(), "write status");
        let success: &[u16] = if method == Method::PUT {
            &[201, 202, 204]
        } else {
            &[202, 204]
        };

        if !success.contains(&status.as_u16()) {
            let fault = decode_fault(response)
                .await?
                .unwrap_or_else(|| CloudFault::not_found(resource));
            return Err(fault.into());
        }
        if matches!(status.as_u16(), 201 | 202) {
            let body = response.text().await?;
            if !body.trim().is_empty() {
                return Ok(Some(body));
            }
        }
        Ok(None)
    }
}

/// Copy response headers into an ordered map with names preserved.
pub(crate) fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (canonical_name(name.as_str()), v.trim().to_string()))
        })
        .collect()
}

// reqwest lowercases header names; the provider documents them in
// X-Train-Case, and callers match on that form.
fn canonical_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        if upper && c.is_ascii_alphabetic() {
            out.push(c.to_ascii_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
        if c == '-' {
            upper = true;
        }
    }
    out
}

async fn decode_fault(response: Response) -> Result<Option<CloudFault>> {
    let code = response.status().as_u16();
    let body = response.text().await?;
    let fault = CloudFault::parse(code, &body);
    if let Some(fault) = &fault {
        tracing::error!(
            code,
            message = %fault.message,
            details = %fault.details,
            "cloud error"
        );
    }
    Ok(fault)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> RestClient {
        let config = ProviderConfig::new("12345", "user", "key").unwrap();
        RestClient::new(&config).unwrap()
    }

    #[tokio::test]
    async fn get_string_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/servers/detail"))
            .and(header("X-Auth-Token", "tok"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"servers":[]}"#))
            .mount(&server)
            .await;

        let body = client()
            .get_string("tok", &server.uri(), "/servers/detail")
            .await
            .unwrap();
        assert_eq!(body.as_deref(), Some(r#"{"servers":[]}"#));
    }

    #[tokio::test]
    async fn get_string_404_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let body = client()
            .get_string("tok", &server.uri(), "/servers/999")
            .await
            .unwrap();
        assert!(body.is_none());
    }

    #[tokio::test]
    async fn get_string_sentinel_body_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(410)
                    .set_body_string(r#"{"itemNotFound":{"message":"itemNotFound"}}"#),
            )
            .mount(&server)
            .await;

        let body = client()
            .get_string("tok", &server.uri(), "/servers/999")
            .await
            .unwrap();
        assert!(body.is_none());
    }

    #[tokio::test]
    async fn get_string_decodes_fault() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(413).set_body_string(
                r#"{"overLimit":{"message":"overLimit","details":"too many requests"}}"#,
            ))
            .mount(&server)
            .await;

        let err = client()
            .get_string("tok", &server.uri(), "/servers")
            .await
            .unwrap_err();
        assert_eq!(
            err.cloud_kind(),
            Some(crate::error::CloudErrorKind::Quota)
        );
        assert_eq!(err.http_code(), Some(413));
    }

    #[tokio::test]
    async fn head_returns_all_headers() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/bucket"))
            .respond_with(
                ResponseTemplate::new(204)
                    .insert_header("X-CDN-Enabled", "True")
                    .insert_header("Content-Length", "42"),
            )
            .mount(&server)
            .await;

        let headers = client()
            .head("tok", &server.uri(), "/bucket")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(headers.get("X-Cdn-Enabled").map(String::as_str), Some("True"));
        assert_eq!(headers.get("Content-Length").map(String::as_str), Some("42"));
    }

    #[tokio::test]
    async fn head_404_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(client()
            .head("tok", &server.uri(), "/missing")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn delete_success_codes() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        client()
            .delete("tok", &server.uri(), "/servers/1")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn delete_sentinel_becomes_not_found_fault() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_string(r#"{"itemNotFound":{"message":"itemNotFound"}}"#),
            )
            .mount(&server)
            .await;

        let err = client()
            .delete("tok", &server.uri(), "/servers/1")
            .await
            .unwrap_err();
        assert_eq!(err.http_code(), Some(404));
    }

    #[tokio::test]
    async fn post_returns_202_body_when_non_blank() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/servers"))
            .and(body_string(r#"{"server":{}}"#))
            .respond_with(ResponseTemplate::new(202).set_body_string(r#"{"server":{"id":1}}"#))
            .mount(&server)
            .await;

        let body = client()
            .post_string("tok", &server.uri(), "/servers", Some(r#"{"server":{}}"#))
            .await
            .unwrap();
        assert_eq!(body.as_deref(), Some(r#"{"server":{"id":1}}"#));
    }

    #[tokio::test]
    async fn post_blank_202_body_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202).set_body_string("  "))
            .mount(&server)
            .await;

        let body = client()
            .post_string("tok", &server.uri(), "/servers", None)
            .await
            .unwrap();
        assert!(body.is_none());
    }

    #[tokio::test]
    async fn put_accepts_201() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        client()
            .put_string("tok", &server.uri(), "/bucket", None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn post_rejects_201() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        assert!(client()
            .post_string("tok", &server.uri(), "/servers", None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn put_stream_etag_mismatch_fails_despite_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(202).insert_header("ETag", "feedface"))
            .mount(&server)
            .await;

        let err = client()
            .put_stream(
                "tok",
                &server.uri(),
                "/bucket/object",
                Some("deadbeef"),
                Bytes::from_static(b"data"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DataCorruption(_)));
    }

    #[tokio::test]
    async fn put_stream_matching_etag_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(202).insert_header("ETag", "deadbeef"))
            .mount(&server)
            .await;

        client()
            .put_stream(
                "tok",
                &server.uri(),
                "/bucket/object",
                Some("deadbeef"),
                Bytes::from_static(b"data"),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn custom_headers_are_sent() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(header("X-CDN-Enabled", "True"))
            .and(header("X-Log-Retention", "True"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        client()
            .put_headers(
                "tok",
                &server.uri(),
                "/container",
                &[("X-CDN-Enabled", "True"), ("X-Log-Retention", "True")],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn transport_failure_is_distinct_from_cloud_fault() {
        // Nothing listening on this port.
        let err = client()
            .get_string("tok", "http://127.0.0.1:1", "/servers")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }
}
