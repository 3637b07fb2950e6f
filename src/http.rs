use std::{fmt, future::Future, time::Duration};

use reqwest::header;
use serde::Deserialize;

use crate::{
    error::BrokenReason,
    session::Session,
    transport::Transport,
    wire::{self, PipelineRequest, PipelineResponse, StreamRequest, StreamResponse},
    ClientOptions, HranaError, Result,
};

const PIPELINE_PATH: &str = "/v2/pipeline";
const STREAM_EXPIRED: &str = "STREAM_EXPIRED";

/// Hrana stream over HTTP `/v2/pipeline` requests.
pub struct HttpStream {
    http: reqwest::Client,
    authorization: Option<String>,
    session: Session,
    options: ClientOptions,
}

impl fmt::Debug for HttpStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpStream")
            .field("session", &self.session)
            .field("authorization", &self.authorization.as_ref().map(|_| "<redacted>"))
            .field("options", &self.options)
            .finish()
    }
}

impl HttpStream {
    /// Creates a stream with a raw authorization header value.
    ///
    /// An empty value sends no `Authorization` header.
    pub fn new(base_url: impl AsRef<str>, authorization: impl Into<String>) -> Self {
        let authorization = authorization.into();
        Self {
            http: reqwest::Client::new(),
            authorization: (!authorization.trim().is_empty()).then_some(authorization),
            session: Session::new(normalize_base_url(base_url.as_ref())),
            options: ClientOptions::default(),
        }
    }

    /// Creates a stream from a bearer token.
    ///
    /// If the token is missing the `Bearer ` prefix, it is added automatically.
    pub fn new_bearer(base_url: impl AsRef<str>, token: impl AsRef<str>) -> Self {
        let token = token.as_ref();
        if token.trim().is_empty() {
            return Self::new(base_url, String::new());
        }
        Self::new(base_url, normalize_bearer_authorization(token))
    }

    /// Creates a stream from environment variables.
    ///
    /// Reads:
    /// - `HRANA_URL`: server base URL (`http(s)://` or `libsql://`)
    /// - `HRANA_AUTH_TOKEN`: optional access token (Bearer prefix optional)
    ///
    /// **Not available on `wasm32` targets.**
    #[cfg(not(target_arch = "wasm32"))]
    pub fn from_env() -> std::result::Result<Self, String> {
        let url = std::env::var("HRANA_URL")
            .map_err(|_| "missing HRANA_URL environment variable".to_owned())?;
        if url.trim().is_empty() {
            return Err("HRANA_URL is set but empty".to_owned());
        }
        let token = std::env::var("HRANA_AUTH_TOKEN").unwrap_or_default();
        Ok(Self::new_bearer(url, token))
    }

    pub fn with_options(mut self, opts: ClientOptions) -> Self {
        self.options = opts;
        self
    }

    fn pipeline_url(&self) -> String {
        let base = self.session.base_url().unwrap_or_default();
        format!("{}{PIPELINE_PATH}", base.trim_end_matches('/'))
    }

    fn post(&self, payload: &PipelineRequest) -> reqwest::RequestBuilder {
        let mut request = self
            .http
            .post(self.pipeline_url())
            .header(header::CONTENT_TYPE, "application/json")
            .timeout(Duration::from_millis(self.options.timeout_ms))
            .json(payload);
        if let Some(authorization) = &self.authorization {
            request = request.header(header::AUTHORIZATION, authorization);
        }
        request
    }
}

impl Transport for HttpStream {
    fn session(&self) -> &Session {
        &self.session
    }

    async fn send(&mut self, requests: Vec<StreamRequest>) -> Result<Vec<StreamResponse>> {
        let payload = self.session.begin_exchange(requests)?;
        let request = self.post(&payload);

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(http_failure(status.as_u16(), &body));
        }

        let parsed = serde_json::from_str::<PipelineResponse>(&body).map_err(|err| {
            HranaError::broken(
                BrokenReason::Protocol,
                format!("invalid pipeline response JSON: {err}; body: {body}"),
            )
        })?;
        self.session.finish_pipeline(&payload.requests, parsed)
    }

    fn close(&mut self) {
        let Some(baton) = self.session.close() else {
            return;
        };
        let request = self.post(&PipelineRequest {
            baton: Some(baton),
            requests: vec![StreamRequest::Close],
        });

        spawn_detached(async move {
            let result = request.send().await;
            #[cfg(feature = "tracing")]
            log_close_outcome(&result);
            drop(result);
        });
    }

    fn apply_options(&mut self, options: &ClientOptions) {
        self.options = options.clone();
    }
}

#[cfg(feature = "tracing")]
fn log_close_outcome(result: &std::result::Result<reqwest::Response, reqwest::Error>) {
    match result {
        Ok(response) => tracing::debug!(status = %response.status(), "stream close finished"),
        Err(err) => tracing::debug!(error = %err, "stream close failed"),
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn spawn_detached(task: impl Future<Output = ()> + Send + 'static) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(task);
        }
        Err(_) => {
            #[cfg(feature = "tracing")]
            tracing::debug!("no async runtime; stream close notification skipped");
        }
    }
}

#[cfg(target_arch = "wasm32")]
fn spawn_detached(task: impl Future<Output = ()> + 'static) {
    wasm_bindgen_futures::spawn_local(task);
}

fn transport_error(err: reqwest::Error) -> HranaError {
    if err.is_timeout() {
        return HranaError::broken(BrokenReason::Transport, format!("request timed out: {err}"));
    }
    HranaError::broken(BrokenReason::Transport, err.to_string())
}

/// Error bodies come as `{"error": "..."}`, `{"message", "code"}` or a nested
/// `{"error": {"message", "code"}}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorBody {
    Nested {
        error: wire::WireError,
    },
    Flat {
        #[serde(alias = "error")]
        message: String,
        #[serde(default)]
        code: Option<String>,
    },
}

fn http_failure(status: u16, body: &str) -> HranaError {
    let (message, code) = match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody::Nested { error }) => (error.message, error.code),
        Ok(ErrorBody::Flat { message, code }) => (message, code),
        Err(_) => (body.to_owned(), None),
    };

    if code.as_deref() == Some(STREAM_EXPIRED) {
        return HranaError::broken(BrokenReason::StreamExpired, message);
    }
    HranaError::broken(BrokenReason::Http(status), message)
}

fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(PIPELINE_PATH).unwrap_or(trimmed);
    match trimmed.strip_prefix("libsql://") {
        Some(host) => format!("https://{host}"),
        None => trimmed.to_owned(),
    }
}

fn normalize_bearer_authorization(token: &str) -> String {
    let trimmed = token.trim();
    let prefix = trimmed.get(..7);
    if prefix.is_some_and(|value| value.eq_ignore_ascii_case("bearer ")) {
        trimmed.to_owned()
    } else {
        format!("Bearer {trimmed}")
    }
}
