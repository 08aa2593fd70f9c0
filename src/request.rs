//! Fluent per-call request building.

use crate::format::{BodyFormat, Form, Json};
use crate::handler::ErrorHandler;
use crate::status::AllowedStatuses;
use crate::{CallResponse, Client, Error, Result};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// A serialized request body and its content type.
#[derive(Debug, Clone)]
pub(crate) struct RequestBody {
    pub(crate) bytes: Vec<u8>,
    pub(crate) content_type: &'static str,
}

impl RequestBody {
    /// Text snapshot of the body, for the call context.
    pub(crate) fn snapshot(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Builder for a single call.
///
/// Created by [`Client::request`] and the method shortcuts ([`Client::get`],
/// [`Client::post`], ...). Configuration errors such as an invalid header
/// name are kept and reported by [`send`](Self::send), so the chain never
/// has to be broken up.
///
/// # Examples
///
/// ```no_run
/// use callkit::Client;
/// use serde::{Deserialize, Serialize};
/// use std::time::Duration;
///
/// #[derive(Serialize)]
/// struct Search { query: String }
///
/// #[derive(Deserialize, Default)]
/// struct Results { items: Vec<String> }
///
/// # async fn example() -> Result<(), callkit::Error> {
/// let client = Client::builder()
///     .base_url("https://api.example.com")?
///     .build()?;
///
/// let results: Results = client
///     .post("/search")
///     .header("x-trace-id", "abc123")
///     .query("page", "2")
///     .timeout(Duration::from_secs(5))
///     .allow_status("404")
///     .json(&Search { query: "rust".to_string() })
///     .receive_json()
///     .await?;
/// println!("Found {} results", results.items.len());
/// # Ok(())
/// # }
/// ```
#[must_use = "a call does nothing until it is sent"]
pub struct CallBuilder {
    client: Client,
    method: Method,
    path: String,
    headers: HeaderMap,
    query: Vec<(String, String)>,
    body: Option<RequestBody>,
    timeout: Option<Duration>,
    allowed: AllowedStatuses,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    error: Option<Error>,
}

impl CallBuilder {
    pub(crate) fn new(client: Client, method: Method, path: impl Into<String>) -> Self {
        Self {
            client,
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            query: Vec::new(),
            body: None,
            timeout: None,
            allowed: AllowedStatuses::default(),
            error_handler: None,
            error: None,
        }
    }

    fn fail(&mut self, error: Error) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    /// Adds a header to the request.
    pub fn header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        let name = HeaderName::try_from(name.as_ref());
        let value = HeaderValue::try_from(value.as_ref());
        match (name, value) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            (Err(e), _) => {
                self.fail(Error::ConfigurationError(format!("Invalid header name: {}", e)))
            }
            (_, Err(e)) => {
                self.fail(Error::ConfigurationError(format!("Invalid header value: {}", e)))
            }
        }
        self
    }

    /// Adds a query parameter to the request.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Adds multiple query parameters to the request.
    pub fn queries<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.query
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Sets a JSON request body.
    pub fn json<T: Serialize + ?Sized>(self, body: &T) -> Self {
        self.body_as::<Json, T>(body)
    }

    /// Sets a URL-encoded form request body.
    pub fn form<T: Serialize + ?Sized>(self, body: &T) -> Self {
        self.body_as::<Form, T>(body)
    }

    /// Sets a request body serialized with any [`BodyFormat`].
    pub fn body_as<F: BodyFormat, T: Serialize + ?Sized>(mut self, body: &T) -> Self {
        match F::to_vec(body) {
            Ok(bytes) => {
                self.body = Some(RequestBody {
                    bytes,
                    content_type: F::CONTENT_TYPE,
                })
            }
            Err(e) => self.fail(Error::SerializationFailed(e.to_string())),
        }
        self
    }

    /// Sets a plain text request body.
    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.body = Some(RequestBody {
            bytes: body.into().into_bytes(),
            content_type: "text/plain; charset=utf-8",
        });
        self
    }

    /// Sets the timeout of this call, overriding the client's.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Lets statuses matching `pattern` through without failing the call.
    ///
    /// See [`AllowedStatuses`] for the pattern syntax.
    pub fn allow_status(mut self, pattern: &str) -> Self {
        if let Err(e) = self.allowed.extend(pattern) {
            self.fail(e);
        }
        self
    }

    /// Lets every status through without failing the call.
    pub fn allow_any_status(mut self) -> Self {
        self.allowed = AllowedStatuses::any();
        self
    }

    /// Uses `handler` for this call instead of the client's error handler.
    pub fn error_handler(mut self, handler: impl ErrorHandler + 'static) -> Self {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Sends the request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the transport fails or the status is not
    /// allowed, unless the error handler handles it. Configuration errors
    /// collected while building are returned before anything is sent.
    pub async fn send(self) -> Result<CallResponse> {
        if let Some(error) = self.error {
            return Err(error);
        }
        let client = self.client.clone();
        client
            .execute(Call {
                method: self.method,
                path: self.path,
                headers: self.headers,
                query: self.query,
                body: self.body,
                timeout: self.timeout,
                allowed: self.allowed,
                error_handler: self.error_handler,
            })
            .await
    }

    /// Sends the request and deserializes the JSON response.
    pub async fn receive_json<T>(self) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        self.send().await?.receive_json().await
    }

    /// Sends the request and returns the response body as text.
    pub async fn receive_string(self) -> Result<Option<String>> {
        self.send().await?.receive_string().await
    }
}

/// A fully built call, ready for the client to execute.
pub(crate) struct Call {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) headers: HeaderMap,
    pub(crate) query: Vec<(String, String)>,
    pub(crate) body: Option<RequestBody>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) allowed: AllowedStatuses,
    pub(crate) error_handler: Option<Arc<dyn ErrorHandler>>,
}
