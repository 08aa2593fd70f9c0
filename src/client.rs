//! The HTTP client and its configuration.
//!
//! The [`Client`] type is the entry point for making calls. Use
//! [`ClientBuilder`] to configure and create clients.

use crate::body::ResponseBody;
use crate::call::{CallContext, FaultKind};
use crate::handler::{offer, ErrorHandler, Propagate};
use crate::request::{Call, CallBuilder};
use crate::status::AllowedStatuses;
use crate::{CallResponse, Error, HttpError, Result};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use http::header::CONTENT_TYPE;
use hyper::ext::ReasonPhrase;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// An HTTP client that records every call and reports failures with context.
///
/// The client is cheap to clone and designed to be reused; all clones share
/// the underlying transport and configuration.
///
/// # Examples
///
/// ```no_run
/// use callkit::Client;
/// use serde::{Deserialize, Serialize};
/// use std::time::Duration;
///
/// #[derive(Serialize)]
/// struct CreateUser {
///     name: String,
/// }
///
/// #[derive(Deserialize, Default)]
/// struct User {
///     id: u64,
///     name: String,
/// }
///
/// # async fn example() -> Result<(), callkit::Error> {
/// let client = Client::builder()
///     .base_url("https://api.example.com")?
///     .timeout(Duration::from_secs(30))
///     .build()?;
///
/// let user: User = client.get("/users/123").receive_json().await?;
/// println!("User: {}", user.name);
///
/// let created: User = client
///     .post("/users")
///     .json(&CreateUser { name: "Alice".to_string() })
///     .receive_json()
///     .await?;
/// println!("Created user with ID: {}", created.id);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http_client: reqwest::Client,
    base_url: Option<Url>,
    default_headers: HeaderMap,
    timeout: Option<Duration>,
    allowed: AllowedStatuses,
    error_handler: Arc<dyn ErrorHandler>,
}

impl Client {
    /// Creates a new `ClientBuilder` for configuring a client.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Starts a call with the given method.
    ///
    /// `path` is resolved against the base URL. An absolute `http://` or
    /// `https://` URL is used as is.
    pub fn request(&self, method: Method, path: impl Into<String>) -> CallBuilder {
        CallBuilder::new(self.clone(), method, path)
    }

    /// Starts a GET call.
    pub fn get(&self, path: impl Into<String>) -> CallBuilder {
        self.request(Method::GET, path)
    }

    /// Starts a POST call.
    pub fn post(&self, path: impl Into<String>) -> CallBuilder {
        self.request(Method::POST, path)
    }

    /// Starts a PUT call.
    pub fn put(&self, path: impl Into<String>) -> CallBuilder {
        self.request(Method::PUT, path)
    }

    /// Starts a PATCH call.
    pub fn patch(&self, path: impl Into<String>) -> CallBuilder {
        self.request(Method::PATCH, path)
    }

    /// Starts a DELETE call.
    pub fn delete(&self, path: impl Into<String>) -> CallBuilder {
        self.request(Method::DELETE, path)
    }

    /// Starts a HEAD call.
    pub fn head(&self, path: impl Into<String>) -> CallBuilder {
        self.request(Method::HEAD, path)
    }

    /// Resolves the target of a call. Returns the URL as it will be reported
    /// in messages, and the parsed URL handed to the transport.
    fn resolve(&self, path: &str, query: &[(String, String)]) -> Result<(String, Url)> {
        let target = if is_absolute(path) {
            path.to_string()
        } else {
            let base = self.inner.base_url.as_ref().ok_or_else(|| {
                Error::ConfigurationError(format!("A base URL is required for relative path {path:?}"))
            })?;
            let base = base.as_str().trim_end_matches('/');
            let path = path.trim_start_matches('/');
            if path.is_empty() {
                base.to_string()
            } else {
                format!("{base}/{path}")
            }
        };

        let mut url = Url::parse(&target)?;
        if query.is_empty() {
            return Ok((target, url));
        }
        url.query_pairs_mut()
            .extend_pairs(query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        Ok((url.to_string(), url))
    }

    /// Executes a built call: dispatch, record, check the status, offer
    /// failures to the error handler.
    pub(crate) async fn execute(&self, call: Call) -> Result<CallResponse> {
        let (target, url) = self.resolve(&call.path, &call.query)?;
        let handler = call
            .error_handler
            .unwrap_or_else(|| Arc::clone(&self.inner.error_handler));

        let mut headers = self.inner.default_headers.clone();
        headers.extend(call.headers);
        if let Some(body) = &call.body {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(body.content_type));
        }

        let mut context = CallContext::new(call.method.clone(), target).with_request_headers(headers.clone());
        if let Some(body) = &call.body {
            context = context.with_request_body(body.snapshot());
        }

        tracing::debug!(
            method = %call.method,
            url = %context.url(),
            "Executing HTTP request"
        );

        let mut request = self
            .inner
            .http_client
            .request(call.method, url)
            .headers(headers);
        if let Some(timeout) = call.timeout.or(self.inner.timeout) {
            request = request.timeout(timeout);
        }
        if let Some(body) = call.body {
            request = request.body(body.bytes);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                let kind = if e.is_timeout() {
                    FaultKind::Timeout
                } else {
                    FaultKind::Transport
                };
                context.record_fault(kind, e.to_string());
                let latency = context.finish();

                tracing::warn!(
                    error = %e,
                    method = %context.method(),
                    url = %context.url(),
                    latency_ms = latency.as_millis(),
                    "Request failed before a response arrived"
                );

                let context = Arc::new(context);
                let error = Error::Http(HttpError::new(
                    Arc::clone(&context),
                    ResponseBody::absent(),
                    Some(Box::new(e)),
                ));
                return if offer(handler.as_ref(), &context, &error).await {
                    Ok(CallResponse::new(context, ResponseBody::absent(), handler))
                } else {
                    Err(error)
                };
            }
        };

        let status = response.status();
        context.record_response(status, response.headers().clone());
        if let Some(reason) = response
            .extensions()
            .get::<ReasonPhrase>()
            .and_then(|r| std::str::from_utf8(r.as_bytes()).ok())
        {
            context.record_reason_phrase(reason);
        }
        let latency = context.finish();

        tracing::info!(
            method = %context.method(),
            url = %context.url(),
            status = status.as_u16(),
            latency_ms = latency.as_millis(),
            "Received HTTP response"
        );

        let body = ResponseBody::pending(response);
        if call.allowed.permits(status) || self.inner.allowed.permits(status) {
            return Ok(CallResponse::new(Arc::new(context), body, handler));
        }

        if status.is_client_error() {
            tracing::error!(status = status.as_u16(), call = %context, "Client error (4xx)");
        } else if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), call = %context, "Server error (5xx)");
        }

        context.record_fault(
            FaultKind::Status,
            format!(
                "{} {}",
                status.as_u16(),
                context.reason_phrase().unwrap_or("Unknown")
            ),
        );
        let context = Arc::new(context);
        let error = Error::Http(HttpError::new(Arc::clone(&context), body.clone(), None));
        if offer(handler.as_ref(), &context, &error).await {
            Ok(CallResponse::new(context, body, handler))
        } else {
            Err(error)
        }
    }
}

/// Returns `true` for paths that carry their own `http` or `https` scheme.
/// Schemes are case-insensitive.
fn is_absolute(path: &str) -> bool {
    ["http://", "https://"].iter().any(|scheme| {
        path.get(..scheme.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
    })
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.inner.base_url.as_ref().map(Url::as_str))
            .field("timeout", &self.inner.timeout)
            .finish_non_exhaustive()
    }
}

/// Builder for configuring and creating a [`Client`].
///
/// # Examples
///
/// ```no_run
/// use callkit::{handler_fn, ClientBuilder};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), callkit::Error> {
/// let client = ClientBuilder::new()
///     .base_url("https://api.example.com")?
///     .timeout(Duration::from_secs(30))
///     .default_header("User-Agent", "my-app/1.0")?
///     .allow_status("404")?
///     .error_handler(handler_fn(|_call, error| error.is_timeout()))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    base_url: Option<Url>,
    default_headers: HeaderMap,
    timeout: Option<Duration>,
    allowed: AllowedStatuses,
    error_handler: Option<Arc<dyn ErrorHandler>>,
}

impl ClientBuilder {
    /// Creates a new `ClientBuilder` with default settings.
    pub fn new() -> Self {
        Self {
            base_url: None,
            default_headers: HeaderMap::new(),
            timeout: None,
            allowed: AllowedStatuses::default(),
            error_handler: None,
        }
    }

    /// Sets the base URL that relative paths are resolved against.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn base_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.base_url = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Adds a default header that will be included in all requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn default_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header value: {}", e)))?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    /// Sets the default request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Lets statuses matching `pattern` through on every call.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern is malformed.
    pub fn allow_status(mut self, pattern: &str) -> Result<Self> {
        self.allowed.extend(pattern)?;
        Ok(self)
    }

    /// Lets every status through on every call.
    pub fn allow_any_status(mut self) -> Self {
        self.allowed = AllowedStatuses::any();
        self
    }

    /// Sets the handler offered every failed call.
    ///
    /// By default failures always propagate.
    pub fn error_handler(mut self, handler: impl ErrorHandler + 'static) -> Self {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Builds the configured `Client`.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot be initialized.
    pub fn build(self) -> Result<Client> {
        let http_client = reqwest::Client::builder().build().map_err(|e| {
            Error::ConfigurationError(format!("Failed to build HTTP client: {}", e))
        })?;

        Ok(Client {
            inner: Arc::new(ClientInner {
                http_client,
                base_url: self.base_url,
                default_headers: self.default_headers,
                timeout: self.timeout,
                allowed: self.allowed,
                error_handler: self.error_handler.unwrap_or_else(|| Arc::new(Propagate)),
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
