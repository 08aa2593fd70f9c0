//! Body formats used to serialize requests and deserialize responses.
//!
//! [`Json`] is what the `json`/`receive_json` helpers use. Anything that
//! implements [`BodyFormat`] can be plugged into
//! [`CallBuilder::body_as`](crate::CallBuilder::body_as) and
//! [`CallResponse::receive_as`](crate::CallResponse::receive_as).

use serde::{de::DeserializeOwned, Serialize};

/// A serializer/deserializer pair for request and response bodies.
pub trait BodyFormat {
    /// The name used in error messages, e.g. `"JSON"`.
    const NAME: &'static str;

    /// The `Content-Type` sent with serialized request bodies.
    const CONTENT_TYPE: &'static str;

    /// Error returned when a value cannot be serialized.
    type SerializeError: std::error::Error + Send + Sync + 'static;

    /// Error returned when a body cannot be parsed.
    type DeserializeError: std::error::Error + Send + Sync + 'static;

    /// Serializes a request body.
    fn to_vec<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, Self::SerializeError>;

    /// Parses a response body.
    fn from_slice<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, Self::DeserializeError>;
}

/// JSON bodies, via `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Json;

impl BodyFormat for Json {
    const NAME: &'static str = "JSON";
    const CONTENT_TYPE: &'static str = "application/json";

    type SerializeError = serde_json::Error;
    type DeserializeError = serde_json::Error;

    fn to_vec<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(value)
    }

    fn from_slice<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// URL-encoded form bodies, via `serde_urlencoded`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Form;

impl BodyFormat for Form {
    const NAME: &'static str = "URL-encoded form";
    const CONTENT_TYPE: &'static str = "application/x-www-form-urlencoded";

    type SerializeError = serde_urlencoded::ser::Error;
    type DeserializeError = serde_urlencoded::de::Error;

    fn to_vec<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, Self::SerializeError> {
        serde_urlencoded::to_string(value).map(String::into_bytes)
    }

    fn from_slice<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, Self::DeserializeError> {
        serde_urlencoded::from_bytes(bytes)
    }
}
