//! Error types for HTTP calls.
//!
//! Failed calls surface as [`HttpError`]; bodies that cannot be deserialized
//! surface as [`ParsingError`], which is an `HttpError` with extra detail and
//! derefs to one. Both keep the [`CallContext`] of the call that produced them
//! and can read the response body after the fact, so the exact bytes the
//! server sent are available when debugging.

use crate::body::{BodyFailure, ResponseBody};
use crate::call::{CallContext, FaultKind};
use crate::format::{BodyFormat, Json};
use bytes::Bytes;
use http::StatusCode;
use serde::de::DeserializeOwned;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// A boxed error from a collaborator (transport or body format).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The main error type of the crate.
///
/// # Examples
///
/// ```no_run
/// use callkit::{Client, Error};
///
/// # async fn example() -> Result<(), Error> {
/// let client = Client::builder()
///     .base_url("https://api.example.com")?
///     .build()?;
///
/// match client.get("/endpoint").receive_json::<serde_json::Value>().await {
///     Ok(value) => println!("Success: {value}"),
///     Err(Error::Parsing(e)) => {
///         eprintln!("{e}");
///         eprintln!("Raw response: {}", e.response_string().await?);
///     }
///     Err(Error::Http(e)) => eprintln!("{}", e.diagnostics().await?),
///     Err(e) => eprintln!("Other error: {e}"),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The call failed: the transport faulted or the status was not allowed.
    #[error(transparent)]
    Http(#[from] HttpError),

    /// The response arrived but its body could not be deserialized.
    #[error(transparent)]
    Parsing(#[from] ParsingError),

    /// Invalid configuration was provided, such as a malformed header.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// An invalid URL was provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The request body could not be serialized.
    #[error("Failed to serialize request: {0}")]
    SerializationFailed(String),

    /// The response body was handed out as a stream before it was buffered,
    /// so it can no longer be read.
    #[error("Response body was already consumed as a stream")]
    BodyConsumed,
}

impl Error {
    /// Returns the [`HttpError`] part of call failures, including parsing failures.
    pub fn http(&self) -> Option<&HttpError> {
        match self {
            Error::Http(e) => Some(e),
            Error::Parsing(e) => Some(&e.inner),
            _ => None,
        }
    }

    /// Returns the context of the failed call, if this error came from one.
    pub fn call(&self) -> Option<&CallContext> {
        self.http().map(HttpError::call)
    }

    /// Returns the HTTP status code if a response arrived.
    pub fn status(&self) -> Option<StatusCode> {
        self.call()?.status()
    }

    /// Returns `true` if the call timed out, while waiting for the response
    /// or while reading its body.
    pub fn is_timeout(&self) -> bool {
        self.http().is_some_and(HttpError::is_timeout)
    }

    /// Returns `true` if this is a deserialization failure.
    pub fn is_parsing(&self) -> bool {
        matches!(self, Error::Parsing(_))
    }
}

/// A specialized `Result` type for HTTP calls.
pub type Result<T> = std::result::Result<T, Error>;

/// A failed HTTP call.
///
/// The message is computed from the call:
///
/// - `Call failed with status code 400 (Bad Request): POST http://myapi.com`
/// - `Call timed out: GET http://myapi.com`
/// - `Call failed: GET http://myapi.com` when the transport failed, before a
///   response arrived or while its body was read
///
/// The reason phrase is the one the server sent, falling back to the
/// canonical phrase of the code and then to `Unknown`.
///
/// The message never includes bodies. Use [`diagnostics`](Self::diagnostics)
/// for a report that does.
#[derive(Debug)]
pub struct HttpError {
    call: Arc<CallContext>,
    body: ResponseBody,
    source: Option<BoxError>,
}

impl HttpError {
    pub(crate) fn new(call: Arc<CallContext>, body: ResponseBody, source: Option<BoxError>) -> Self {
        Self { call, body, source }
    }

    /// Records a failed body read on a copy of the call's context.
    ///
    /// A timeout is recorded as [`FaultKind::Timeout`], anything else as
    /// [`FaultKind::Transport`]. The transport error is the source.
    pub(crate) fn from_read_failure(
        call: &Arc<CallContext>,
        body: ResponseBody,
        error: Arc<reqwest::Error>,
    ) -> Self {
        let kind = if error.is_timeout() {
            FaultKind::Timeout
        } else {
            FaultKind::Transport
        };
        let mut context = CallContext::clone(call);
        context.record_fault(kind, format!("Failed to read response body: {error}"));
        Self::new(Arc::new(context), body, Some(Box::new(error)))
    }

    /// The call that failed.
    pub fn call(&self) -> &CallContext {
        &self.call
    }

    pub(crate) fn shared_call(&self) -> Arc<CallContext> {
        Arc::clone(&self.call)
    }

    /// The response status, if a response arrived.
    pub fn status(&self) -> Option<StatusCode> {
        self.call.status()
    }

    /// Returns `true` if the transport timed out, waiting for the response
    /// or reading its body.
    pub fn is_timeout(&self) -> bool {
        self.call.faults().any(|f| f.kind == FaultKind::Timeout)
    }

    /// The request body as it was sent.
    pub fn request_body(&self) -> Option<&str> {
        self.call.request_body()
    }

    /// The raw response body. Empty if no response arrived.
    ///
    /// The body is read from the transport the first time and buffered;
    /// later calls return the buffered bytes. If that read failed, every call
    /// returns an [`Error::Http`] describing the failed read.
    pub async fn response_bytes(&self) -> Result<Bytes> {
        let bytes = self
            .body
            .bytes()
            .await
            .map_err(|failure| body_error(&self.call, &self.body, failure))?;
        Ok(bytes.unwrap_or_default())
    }

    /// The response body as text. Empty if no response arrived.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BodyConsumed`] if the body was streamed out of the
    /// response without being buffered, and [`Error::Http`] if the transport
    /// failed while reading it.
    pub async fn response_string(&self) -> Result<String> {
        let text = self
            .body
            .text()
            .await
            .map_err(|failure| body_error(&self.call, &self.body, failure))?;
        Ok(text.unwrap_or_default())
    }

    /// Deserializes the response body as JSON, typically into an API's error
    /// payload type.
    ///
    /// A body that does not parse produces a [`ParsingError`] whose call
    /// context keeps this error's fault first.
    pub async fn response_json<T: DeserializeOwned>(&self) -> Result<T> {
        let bytes = self.response_bytes().await?;
        Json::from_slice(&bytes).map_err(|e| {
            Error::Parsing(ParsingError::from_failure::<Json>(
                &self.call,
                self.body.clone(),
                e,
            ))
        })
    }

    /// The message followed by the request and response bodies.
    ///
    /// Each body gets its own line, and only when it is non-empty.
    pub async fn diagnostics(&self) -> Result<String> {
        let response = self.response_string().await?;
        Ok(render_diagnostics(
            &self.to_string(),
            self.request_body(),
            Some(&response),
        ))
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let call = &*self.call;
        match (call.fault().map(|f| f.kind), call.status()) {
            (Some(FaultKind::Timeout), _) => write!(f, "Call timed out: {call}"),
            (Some(FaultKind::Transport), _) | (_, None) => write!(f, "Call failed: {call}"),
            (_, Some(status)) => write!(
                f,
                "Call failed with status code {} ({}): {}",
                status.as_u16(),
                call.reason_phrase().unwrap_or("Unknown"),
                call
            ),
        }
    }
}

impl std::error::Error for HttpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// A response body that could not be deserialized.
///
/// The [`source`](std::error::Error::source) is the body format's own error,
/// e.g. a `serde_json::Error`. Derefs to [`HttpError`] for the call and body
/// accessors.
#[derive(Debug)]
pub struct ParsingError {
    inner: HttpError,
    data_format: &'static str,
    content_type: Option<String>,
}

impl ParsingError {
    /// Records a parse failure on a copy of the call's context.
    ///
    /// The frozen context of the call stays as it was; the copy carries the
    /// parse fault, after any fault the call already had.
    pub(crate) fn from_failure<F: BodyFormat>(
        call: &Arc<CallContext>,
        body: ResponseBody,
        error: F::DeserializeError,
    ) -> Self {
        let mut context = CallContext::clone(call);
        context.record_fault(FaultKind::Parse, error.to_string());
        let content_type = body.content_type().map(str::to_owned);
        Self {
            inner: HttpError::new(Arc::new(context), body, Some(Box::new(error))),
            data_format: F::NAME,
            content_type,
        }
    }

    /// The format the body was being deserialized as, e.g. `"JSON"`.
    pub fn data_format(&self) -> &'static str {
        self.data_format
    }

    /// The `Content-Type` of the response, if it had one.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// The call failure this parsing error refines.
    pub fn as_http(&self) -> &HttpError {
        &self.inner
    }
}

impl Deref for ParsingError {
    type Target = HttpError;

    fn deref(&self) -> &HttpError {
        &self.inner
    }
}

impl fmt::Display for ParsingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Response could not be deserialized to {}: {}",
            self.data_format, self.inner.call
        )
    }
}

impl std::error::Error for ParsingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        std::error::Error::source(&self.inner)
    }
}

/// Turns a failed body read into the error reported to callers.
pub(crate) fn body_error(call: &Arc<CallContext>, body: &ResponseBody, failure: BodyFailure) -> Error {
    match failure {
        BodyFailure::Consumed => Error::BodyConsumed,
        BodyFailure::Read(e) => Error::Http(HttpError::from_read_failure(call, body.clone(), e)),
    }
}

fn render_diagnostics(message: &str, request_body: Option<&str>, response_body: Option<&str>) -> String {
    let mut out = message.to_string();
    for (label, body) in [("Request body", request_body), ("Response body", response_body)] {
        if let Some(body) = body.filter(|b| !b.is_empty()) {
            out.push('\n');
            out.push_str(label);
            out.push_str(": ");
            out.push_str(body);
        }
    }
    out
}
