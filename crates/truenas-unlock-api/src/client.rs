//! Authenticated HTTPS transport to the appliance. Maps transport and status
//! failures into `UnlockError` buckets so callers never see `reqwest` types.

use log::trace;
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;
use truenas_unlock_core::error::{UnlockError, UnlockResult};
use zeroize::Zeroizing;

/// Path prefix of the versioned REST API.
pub(crate) const API_PREFIX: &str = "/api/v2.0";

/// Longest response body excerpt kept in error messages.
const MAX_ERROR_BODY: usize = 512;

/// Build the API base URL for `host`.
///
/// A bare `host[:port]` is reached over HTTPS; an explicit `http://` or
/// `https://` scheme is kept as given.
pub(crate) fn base_url(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        format!("{host}{API_PREFIX}")
    } else {
        format!("https://{host}{API_PREFIX}")
    }
}

/// Connection settings for [`ApiClient`].
#[derive(Debug, Clone)]
pub(crate) struct ClientSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub skip_cert_verify: bool,
}

/// Blocking HTTP client bound to one appliance and one API key.
pub(crate) struct ApiClient {
    http: Client,
    base_url: String,
    token: Zeroizing<String>,
}

impl ApiClient {
    pub fn new(
        host: &str,
        token: Zeroizing<String>,
        settings: &ClientSettings,
    ) -> UnlockResult<Self> {
        let http = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .danger_accept_invalid_certs(settings.skip_cert_verify)
            .build()
            .map_err(|err| UnlockError::Transport(format!("build http client: {err}")))?;

        Ok(Self {
            http,
            base_url: base_url(host),
            token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// GET `path` and return the body of a successful response.
    pub fn get(&self, path: &str) -> UnlockResult<String> {
        let url = self.url(path);
        trace!("GET {url}");
        let response = self
            .http
            .get(&url)
            .bearer_auth(self.token.as_str())
            .send()
            .map_err(transport_error)?;
        Self::checked_body(response)
    }

    /// POST `body` as JSON to `path` and return the body of a successful response.
    pub fn post_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> UnlockResult<String> {
        let url = self.url(path);
        trace!("POST {url}");
        let response = self
            .http
            .post(&url)
            .bearer_auth(self.token.as_str())
            .json(body)
            .send()
            .map_err(transport_error)?;
        Self::checked_body(response)
    }

    fn checked_body(response: Response) -> UnlockResult<String> {
        let status = response.status();
        let body = response.text().map_err(transport_error)?;
        if status.is_success() {
            return Ok(body);
        }
        Err(classify_status(status, &body))
    }
}

/// Turn a non-success status into the matching error bucket.
pub(crate) fn classify_status(status: StatusCode, body: &str) -> UnlockError {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return UnlockError::Auth {
            status: status.as_u16(),
        };
    }

    let mut excerpt = body.trim().to_string();
    if excerpt.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !excerpt.is_char_boundary(cut) {
            cut -= 1;
        }
        excerpt.truncate(cut);
        excerpt.push('…');
    }
    UnlockError::Api {
        status: status.as_u16(),
        body: excerpt,
    }
}

fn transport_error(err: reqwest::Error) -> UnlockError {
    if err.is_timeout() {
        UnlockError::Transport(format!("request timed out: {err}"))
    } else if err.is_connect() {
        UnlockError::Transport(format!("connection failed: {err}"))
    } else {
        UnlockError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_defaults_to_https() {
        assert_eq!(
            base_url("192.168.1.214:443"),
            "https://192.168.1.214:443/api/v2.0"
        );
    }

    #[test]
    fn base_url_keeps_explicit_scheme() {
        assert_eq!(base_url("http://127.0.0.1:8080/"), "http://127.0.0.1:8080/api/v2.0");
        assert_eq!(base_url("https://nas.lan"), "https://nas.lan/api/v2.0");
    }

    #[test]
    fn classify_status_maps_auth_failures() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, ""),
            UnlockError::Auth { status: 401 }
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, "denied"),
            UnlockError::Auth { status: 403 }
        ));
    }

    #[test]
    fn classify_status_truncates_long_bodies() {
        let body = "x".repeat(2048);
        match classify_status(StatusCode::INTERNAL_SERVER_ERROR, &body) {
            UnlockError::Api { status, body } => {
                assert_eq!(status, 500);
                assert!(body.chars().count() <= MAX_ERROR_BODY + 1);
                assert!(body.ends_with('…'));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
