//! HTTP transport facade.
//!
//! Composes the request shape (method, URL query parameters, headers,
//! body framing) over the external HTTP client, maps failures into the
//! error taxonomy, retries a narrow class of transient statuses, and
//! surfaces the server exception headers.

use std::time::Duration;

use base64::Engine;
use bytes::Bytes;
use ch_types::{Error, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::compression::ContentEncoding;
use crate::query::Summary;

pub const HEADER_EXCEPTION_CODE: &str = "X-ClickHouse-Exception-Code";
pub const HEADER_EXCEPTION_TAG: &str = "X-ClickHouse-Exception-Tag";
pub const HEADER_TIMEZONE: &str = "X-ClickHouse-Timezone";
pub const HEADER_SUMMARY: &str = "X-ClickHouse-Summary";
pub const HEADER_QUERY_ID: &str = "X-ClickHouse-Query-Id";

/// Statuses retried with linear backoff.
const RETRY_STATUSES: &[u16] = &[429, 503, 504];

/// Authentication forms the transport can attach.
#[derive(Debug, Clone, Default)]
pub enum Auth {
    #[default]
    None,
    Basic {
        username: String,
        password: String,
    },
    Bearer(String),
    /// Mutual TLS: the certificate authenticates, the user rides in a
    /// header.
    Certificate {
        username: String,
    },
}

impl Auth {
    fn apply(&self, headers: &mut HeaderMap) -> Result<()> {
        match self {
            Auth::None => {}
            Auth::Basic { username, password } => {
                let token =
                    base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
                headers.insert(
                    reqwest::header::AUTHORIZATION,
                    header_value(&format!("Basic {token}"))?,
                );
            }
            Auth::Bearer(token) => {
                headers.insert(
                    reqwest::header::AUTHORIZATION,
                    header_value(&format!("Bearer {token}"))?,
                );
            }
            Auth::Certificate { username } => {
                headers.insert(
                    HeaderName::from_static("x-clickhouse-user"),
                    header_value(username)?,
                );
                headers.insert(
                    HeaderName::from_static("x-clickhouse-ssl-certificate-auth"),
                    HeaderValue::from_static("on"),
                );
            }
        }
        Ok(())
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| Error::Programming(format!("header value '{value}' is not valid")))
}

/// Builds the structured User-Agent string, with integration product tags
/// ahead of the client identifier.
pub fn user_agent(client_name: Option<&str>, product_tags: &[String], mode: &str) -> String {
    let version = env!("CARGO_PKG_VERSION");
    let mut parts: Vec<String> = Vec::new();
    if let Some(name) = client_name {
        parts.push(name.to_owned());
    }
    parts.extend(product_tags.iter().cloned());
    parts.push(format!("clickhouse-connect/{version}"));
    format!(
        "{} (lv:rust; os:{}; mode:{mode})",
        parts.join(" "),
        std::env::consts::OS
    )
}

/// Transport configuration fixed at client construction.
pub struct HttpTransport {
    http: reqwest::Client,
    url: Url,
    base_headers: HeaderMap,
    pub query_retries: usize,
    pub show_clickhouse_errors: bool,
    pub compress: bool,
    server_host_name: Option<String>,
}

pub struct TransportOptions {
    pub url: Url,
    pub auth: Auth,
    pub client_name: Option<String>,
    pub product_tags: Vec<String>,
    pub connect_timeout: Duration,
    pub send_receive_timeout: Duration,
    pub query_retries: usize,
    pub compress: bool,
    pub show_clickhouse_errors: bool,
    /// Pooled connections older than this are discarded before the next
    /// request.
    pub max_connection_age: Duration,
    pub server_host_name: Option<String>,
    /// `sync` or `async`, reported in the User-Agent.
    pub mode: &'static str,
}

impl HttpTransport {
    pub fn new(options: TransportOptions) -> Result<Self> {
        let mut base_headers = HeaderMap::new();
        options.auth.apply(&mut base_headers)?;
        base_headers.insert(
            reqwest::header::USER_AGENT,
            header_value(&user_agent(
                options.client_name.as_deref(),
                &options.product_tags,
                options.mode,
            ))?,
        );
        if options.compress {
            base_headers.insert(
                reqwest::header::ACCEPT_ENCODING,
                HeaderValue::from_static("gzip"),
            );
        }
        if let Some(host) = &options.server_host_name {
            base_headers.insert(reqwest::header::HOST, header_value(host)?);
        }
        let http = reqwest::Client::builder()
            .connect_timeout(options.connect_timeout)
            .timeout(options.send_receive_timeout)
            .pool_idle_timeout(options.max_connection_age)
            .no_gzip()
            .build()
            .map_err(|e| Error::Operational(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            http,
            url: options.url,
            base_headers,
            query_retries: options.query_retries,
            show_clickhouse_errors: options.show_clickhouse_errors,
            compress: options.compress,
            server_host_name: options.server_host_name,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Issues a request with a replayable body, retrying 429/503/504 up
    /// to `retries` times with `0.1 * attempt` seconds of backoff, plus
    /// one extra retry when an idle pooled connection was remotely
    /// closed.
    pub async fn request_bytes(
        &self,
        method: reqwest::Method,
        params: &[(String, String)],
        extra_headers: HeaderMap,
        body: Option<Bytes>,
        retries: usize,
    ) -> Result<reqwest::Response> {
        let mut attempts = 0usize;
        let mut disconnect_retried = false;
        loop {
            attempts += 1;
            let mut request = self
                .http
                .request(method.clone(), self.url.clone())
                .headers(self.base_headers.clone())
                .headers(extra_headers.clone())
                .query(params);
            if let Some(body) = &body {
                request = request.body(body.clone());
            }
            match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if (200..300).contains(&status) {
                        return Ok(response);
                    }
                    if RETRY_STATUSES.contains(&status) && attempts <= retries {
                        tracing::debug!(status, attempts, "retrying transient response status");
                        tokio::time::sleep(Duration::from_millis(100 * attempts as u64)).await;
                        continue;
                    }
                    return Err(self.response_error(response, attempts > 1).await);
                }
                Err(err) => {
                    if is_remote_disconnect(&err) && !disconnect_retried {
                        // An idle pooled connection was closed by the
                        // server; nothing was processed, safe to resend.
                        disconnect_retried = true;
                        tracing::debug!("retrying remotely closed connection");
                        continue;
                    }
                    return Err(Error::Operational(format!(
                        "error executing HTTP request to {}: {err}",
                        self.url
                    )));
                }
            }
        }
    }

    /// Issues a request with a streaming body. Not retryable.
    pub async fn request_stream(
        &self,
        params: &[(String, String)],
        extra_headers: HeaderMap,
        body: reqwest::Body,
    ) -> Result<reqwest::Response> {
        let request = self
            .http
            .post(self.url.clone())
            .headers(self.base_headers.clone())
            .headers(extra_headers.clone())
            .query(params)
            .body(body);
        match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                if (200..300).contains(&status) {
                    Ok(response)
                } else {
                    Err(self.response_error(response, false).await)
                }
            }
            Err(err) => Err(Error::Operational(format!(
                "error executing HTTP request to {}: {err}",
                self.url
            ))),
        }
    }

    /// Issues a multipart request (external data alongside a query).
    pub async fn request_multipart(
        &self,
        params: &[(String, String)],
        form: reqwest::multipart::Form,
    ) -> Result<reqwest::Response> {
        let request = self
            .http
            .post(self.url.clone())
            .headers(self.base_headers.clone())
            .query(params)
            .multipart(form);
        match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                if (200..300).contains(&status) {
                    Ok(response)
                } else {
                    Err(self.response_error(response, false).await)
                }
            }
            Err(err) => Err(Error::Operational(format!(
                "error executing HTTP request to {}: {err}",
                self.url
            ))),
        }
    }

    /// Health probe against the dedicated `/ping` endpoint.
    pub async fn ping(&self) -> bool {
        let mut url = self.url.clone();
        url.set_path("/ping");
        match self.http.get(url).timeout(Duration::from_secs(3)).send().await {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                tracing::debug!(%err, "ping failed");
                false
            }
        }
    }

    async fn response_error(&self, response: reqwest::Response, retried: bool) -> Error {
        let status = response.status().as_u16();
        let exception_code = header_str(response.headers(), HEADER_EXCEPTION_CODE);
        let encoding = header_str(response.headers(), reqwest::header::CONTENT_ENCODING.as_str());
        let message = if self.show_clickhouse_errors {
            let body = response.bytes().await.unwrap_or_default();
            let body = decode_error_body(&body, encoding.as_deref());
            let prefix = match exception_code {
                Some(code) => format!("received ClickHouse exception, code: {code}"),
                None => format!("HTTP driver received HTTP status {status}"),
            };
            if body.is_empty() {
                format!("{prefix} (for url {})", self.url)
            } else {
                format!("{prefix}, server response: {body} (for url {})", self.url)
            }
        } else {
            format!("the ClickHouse server returned an error (for url {})", self.url)
        };
        if retried {
            Error::Operational(message)
        } else {
            Error::Database(message)
        }
    }
}

fn is_remote_disconnect(err: &reqwest::Error) -> bool {
    // Hyper reports a reused idle connection closed by the peer as an
    // incomplete message; the display chain is the only stable signal.
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(cause) = source {
        let text = cause.to_string();
        if text.contains("connection closed") || text.contains("IncompleteMessage") {
            return true;
        }
        source = cause.source();
    }
    false
}

fn decode_error_body(body: &[u8], encoding: Option<&str>) -> String {
    let decoded = ContentEncoding::from_header(encoding)
        .ok()
        .and_then(|enc| {
            let mut decompressor = crate::compression::StreamDecompressor::new(enc).ok()?;
            let mut out = decompressor.feed(body).ok()?.to_vec();
            out.extend_from_slice(&decompressor.finish().ok()?);
            Some(out)
        })
        .unwrap_or_else(|| body.to_vec());
    let text = String::from_utf8_lossy(&decoded);
    text.chars().take(240).collect::<String>().trim().to_owned()
}

pub fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

/// Parses the `X-ClickHouse-Summary` header.
pub fn parse_summary(headers: &HeaderMap) -> Summary {
    header_str(headers, HEADER_SUMMARY)
        .and_then(|raw| serde_json::from_str::<Summary>(&raw).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_shape() {
        let ua = user_agent(Some("myapp"), &["sqlglue/1.2".to_owned()], "async");
        assert!(ua.starts_with("myapp sqlglue/1.2 clickhouse-connect/"));
        assert!(ua.contains("lv:rust"));
        assert!(ua.contains("mode:async"));
    }

    #[test]
    fn basic_auth_header() {
        let mut headers = HeaderMap::new();
        Auth::Basic {
            username: "default".to_owned(),
            password: "secret".to_owned(),
        }
        .apply(&mut headers)
        .unwrap();
        let value = headers.get(reqwest::header::AUTHORIZATION).unwrap();
        assert_eq!(value.to_str().unwrap(), "Basic ZGVmYXVsdDpzZWNyZXQ=");
    }

    #[test]
    fn certificate_auth_headers() {
        let mut headers = HeaderMap::new();
        Auth::Certificate {
            username: "cert_user".to_owned(),
        }
        .apply(&mut headers)
        .unwrap();
        assert_eq!(
            headers.get("x-clickhouse-user").unwrap().to_str().unwrap(),
            "cert_user"
        );
        assert_eq!(
            headers
                .get("x-clickhouse-ssl-certificate-auth")
                .unwrap()
                .to_str()
                .unwrap(),
            "on"
        );
    }

    #[test]
    fn summary_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-clickhouse-summary"),
            HeaderValue::from_static(r#"{"read_rows":"100","read_bytes":"800"}"#),
        );
        let summary = parse_summary(&headers);
        assert_eq!(summary["read_rows"], serde_json::json!("100"));
    }

    #[test]
    fn error_body_truncation() {
        let long = "x".repeat(1000);
        assert_eq!(decode_error_body(long.as_bytes(), None).len(), 240);
    }
}
