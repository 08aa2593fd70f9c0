//! Reading call results.
//!
//! A [`CallResponse`] is what [`CallBuilder::send`](crate::CallBuilder::send)
//! returns. It carries the frozen [`CallContext`] and the response body, and
//! turns the body into typed values. Parse failures become
//! [`ParsingError`]s and go through the call's error handler like any other
//! fault, as do transport failures while the body is read.

use crate::body::{BodyFailure, ResponseBody};
use crate::error::body_error;
use crate::format::{BodyFormat, Json};
use crate::handler::{offer, ErrorHandler};
use crate::{CallContext, Error, ParsingError, Result};
use bytes::Bytes;
use futures::stream::BoxStream;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::Arc;

/// An ordered, string-keyed JSON object.
pub type JsonMap = Map<String, Value>;

/// The outcome of a call that did not propagate an error.
///
/// Usually this holds a response. It holds none when the call faulted before
/// a response arrived and the error handler marked the fault as handled; the
/// `receive_*` methods then return empty values instead of failing.
///
/// # Examples
///
/// ```no_run
/// use callkit::Client;
/// use serde::Deserialize;
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
///     .build()?;
///
/// let response = client.get("/users/123").send().await?;
/// println!("{} took {:?}", response.call(), response.call().elapsed());
/// let user: User = response.receive_json().await?;
/// println!("User: {}", user.name);
/// # Ok(())
/// # }
/// ```
pub struct CallResponse {
    call: Arc<CallContext>,
    body: ResponseBody,
    handler: Arc<dyn ErrorHandler>,
}

impl CallResponse {
    pub(crate) fn new(call: Arc<CallContext>, body: ResponseBody, handler: Arc<dyn ErrorHandler>) -> Self {
        Self { call, body, handler }
    }

    /// The context of the call that produced this response.
    pub fn call(&self) -> &CallContext {
        &self.call
    }

    /// Returns `true` if a response arrived.
    pub fn has_response(&self) -> bool {
        self.body.is_present()
    }

    /// The response status, if a response arrived.
    pub fn status(&self) -> Option<StatusCode> {
        self.call.status()
    }

    /// The response headers. Empty if no response arrived.
    pub fn headers(&self) -> &HeaderMap {
        self.call.response_headers()
    }

    /// Returns a header value by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers().get(name)?.to_str().ok()
    }

    /// Deserializes the body as JSON.
    ///
    /// Returns `T::default()` if there is no response, the body is empty, or
    /// the error handler handled a parse or read failure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parsing`] if the body is not valid JSON for `T` and
    /// the error handler did not handle it. Returns [`Error::Http`] if the
    /// transport failed while reading the body and the handler did not
    /// handle it.
    pub async fn receive_json<T>(&self) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        self.receive_as::<Json, T>().await
    }

    /// Like [`receive_json`](Self::receive_json), but returns `None` instead
    /// of a default value.
    pub async fn try_receive_json<T>(&self) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        self.decode::<Json, T>().await
    }

    /// Deserializes the body with any [`BodyFormat`].
    pub async fn receive_as<F, T>(&self) -> Result<T>
    where
        F: BodyFormat,
        T: DeserializeOwned + Default,
    {
        Ok(self.decode::<F, T>().await?.unwrap_or_default())
    }

    /// Deserializes the body as a JSON object, keeping key order.
    pub async fn receive_map(&self) -> Result<JsonMap> {
        self.receive_json().await
    }

    /// Deserializes the body as a JSON array of objects.
    pub async fn receive_map_list(&self) -> Result<Vec<JsonMap>> {
        self.receive_json().await
    }

    /// The body as text, decoded with the charset of the `Content-Type`.
    /// `None` if there is no response, or if reading it failed and the error
    /// handler handled the failure.
    pub async fn receive_string(&self) -> Result<Option<String>> {
        match self.body.text().await {
            Ok(text) => Ok(text),
            Err(failure) => self.read_failed(failure).await,
        }
    }

    /// The raw body. `None` if there is no response, or if reading it failed
    /// and the error handler handled the failure.
    pub async fn receive_bytes(&self) -> Result<Option<Bytes>> {
        match self.body.bytes().await {
            Ok(bytes) => Ok(bytes),
            Err(failure) => self.read_failed(failure).await,
        }
    }

    /// The body as a stream of chunks, without buffering it. `None` if there
    /// is no response.
    ///
    /// Errors that share this response can no longer read the body once it
    /// has been streamed; they report [`Error::BodyConsumed`].
    pub async fn receive_stream(self) -> Result<Option<BoxStream<'static, reqwest::Result<Bytes>>>> {
        match self.body.stream().await {
            Ok(stream) => Ok(stream),
            Err(failure) => self.read_failed(failure).await,
        }
    }

    /// Reports a body that could not be read.
    ///
    /// Transport failures are faults of the call and are offered to the
    /// error handler; a body that was already streamed is not.
    async fn read_failed<T>(&self, failure: BodyFailure) -> Result<Option<T>> {
        let error = body_error(&self.call, &self.body, failure);
        if let Error::Http(e) = &error {
            let call = e.shared_call();
            if offer(self.handler.as_ref(), &call, &error).await {
                return Ok(None);
            }
        }
        Err(error)
    }

    async fn decode<F, T>(&self) -> Result<Option<T>>
    where
        F: BodyFormat,
        T: DeserializeOwned,
    {
        let bytes = match self.body.bytes().await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Ok(None),
            Err(failure) => return self.read_failed(failure).await,
        };
        if bytes.is_empty() {
            return Ok(None);
        }

        match F::from_slice::<T>(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    format = F::NAME,
                    raw_response = %String::from_utf8_lossy(&bytes),
                    "Failed to deserialize response"
                );

                let parsing = ParsingError::from_failure::<F>(&self.call, self.body.clone(), e);
                let call = parsing.shared_call();
                let error = Error::Parsing(parsing);
                if offer(self.handler.as_ref(), &call, &error).await {
                    Ok(None)
                } else {
                    Err(error)
                }
            }
        }
    }
}

impl std::fmt::Debug for CallResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallResponse")
            .field("call", &self.call)
            .field("body", &self.body)
            .finish_non_exhaustive()
    }
}
