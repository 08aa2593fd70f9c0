//! The record of a single request/response exchange.
//!
//! A [`CallContext`] is created when a request is dispatched and filled in as
//! the exchange progresses. Once the response (or the failure) is known it is
//! frozen behind an `Arc` and shared with the [`CallResponse`](crate::CallResponse)
//! and with any error raised for the call.

use http::{HeaderMap, Method, StatusCode};
use std::fmt;
use std::time::{Duration, Instant};

/// What kind of failure a [`Fault`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// The transport failed, either before a response arrived (DNS, connect)
    /// or while its body was being read (connection reset, truncated body).
    Transport,
    /// The transport gave up waiting for the response or its body.
    Timeout,
    /// A response arrived with a status code that is not allowed.
    Status,
    /// The response body could not be deserialized into the requested type.
    Parse,
}

/// A failure recorded against a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    /// The category of the failure.
    pub kind: FaultKind,
    /// A single-line description of the failure.
    pub message: String,
}

/// Everything known about one HTTP call.
///
/// The method and target URL are fixed when the context is created. The
/// response status, headers and elapsed time are set once, when the response
/// arrives or the call faults.
///
/// The first recorded fault is the call's fault for good. A failure recorded
/// afterwards, for example a body that fails to parse after the error handler
/// already accepted a bad status, lands in [`subsequent_faults`](Self::subsequent_faults).
#[derive(Debug, Clone)]
pub struct CallContext {
    method: Method,
    url: String,
    request_headers: HeaderMap,
    request_body: Option<String>,
    status: Option<StatusCode>,
    reason: Option<String>,
    response_headers: HeaderMap,
    started_at: Instant,
    elapsed: Option<Duration>,
    fault: Option<Fault>,
    subsequent_faults: Vec<Fault>,
}

impl CallContext {
    /// Starts a new call record. The clock starts now.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            request_headers: HeaderMap::new(),
            request_body: None,
            status: None,
            reason: None,
            response_headers: HeaderMap::new(),
            started_at: Instant::now(),
            elapsed: None,
            fault: None,
            subsequent_faults: Vec::new(),
        }
    }

    /// Sets the headers that were sent with the request.
    pub fn with_request_headers(mut self, headers: HeaderMap) -> Self {
        self.request_headers = headers;
        self
    }

    /// Sets the snapshot of the request body.
    pub fn with_request_body(mut self, body: impl Into<String>) -> Self {
        self.request_body = Some(body.into());
        self
    }

    /// Records the response status line and headers.
    ///
    /// Only the first response is recorded; later calls are ignored.
    pub fn record_response(&mut self, status: StatusCode, headers: HeaderMap) {
        if let Some(existing) = self.status {
            tracing::warn!(
                existing = existing.as_u16(),
                ignored = status.as_u16(),
                call = %self,
                "Response already recorded for call"
            );
            return;
        }
        self.status = Some(status);
        self.response_headers = headers;
    }

    /// Records the reason phrase the server sent on the status line.
    ///
    /// Ignored until a response is recorded, and after a phrase was recorded.
    pub fn record_reason_phrase(&mut self, reason: impl Into<String>) {
        if self.status.is_some() && self.reason.is_none() {
            self.reason = Some(reason.into());
        }
    }

    /// Records a fault against the call.
    ///
    /// Returns `true` if this became the call's primary fault, `false` if a
    /// fault was already recorded and this one was kept as a subsequent fault.
    pub fn record_fault(&mut self, kind: FaultKind, message: impl Into<String>) -> bool {
        let fault = Fault {
            kind,
            message: message.into(),
        };
        if self.fault.is_none() {
            self.fault = Some(fault);
            true
        } else {
            self.subsequent_faults.push(fault);
            false
        }
    }

    /// Stops the clock. Calling this again keeps the first measurement.
    pub fn finish(&mut self) -> Duration {
        *self
            .elapsed
            .get_or_insert_with(|| self.started_at.elapsed())
    }

    /// The HTTP method of the request.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The target URL exactly as it was requested.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The headers sent with the request.
    pub fn request_headers(&self) -> &HeaderMap {
        &self.request_headers
    }

    /// The request body as it was sent, if there was one.
    pub fn request_body(&self) -> Option<&str> {
        self.request_body.as_deref()
    }

    /// The response status, or `None` if no response arrived.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// The reason phrase of the status line.
    ///
    /// This is the phrase the server sent when it sent one, otherwise the
    /// canonical phrase of the status code. `None` if no response arrived or
    /// the code has no canonical phrase.
    pub fn reason_phrase(&self) -> Option<&str> {
        self.reason
            .as_deref()
            .or_else(|| self.status?.canonical_reason())
    }

    /// The response headers. Empty if no response arrived.
    pub fn response_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    /// How long the call took. While the call is still in flight this is the
    /// time elapsed so far.
    pub fn elapsed(&self) -> Duration {
        self.elapsed.unwrap_or_else(|| self.started_at.elapsed())
    }

    /// The primary fault of the call, if it failed.
    pub fn fault(&self) -> Option<&Fault> {
        self.fault.as_ref()
    }

    /// Faults recorded after the primary one, in order.
    pub fn subsequent_faults(&self) -> &[Fault] {
        &self.subsequent_faults
    }

    /// The primary fault followed by the subsequent ones.
    pub fn faults(&self) -> impl Iterator<Item = &Fault> {
        self.fault.iter().chain(&self.subsequent_faults)
    }

    /// Returns `true` if a response arrived and no fault was recorded.
    pub fn succeeded(&self) -> bool {
        self.status.is_some() && self.fault.is_none()
    }
}

impl fmt::Display for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}
