//! Response body snapshots and text decoding.
//!
//! A [`ResponseBody`] is shared between a [`CallResponse`](crate::CallResponse)
//! and any error raised for the same call. The body is read from the transport
//! at most once; after that every reader sees the same buffered bytes, or the
//! same read failure.

use bytes::Bytes;
use encoding_rs::{Encoding, UTF_8};
use futures::stream::{self, BoxStream, StreamExt};
use http::header::CONTENT_TYPE;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

/// Why a body could not be produced.
#[derive(Debug, Clone)]
pub(crate) enum BodyFailure {
    /// The body was handed out as a stream before anyone buffered it.
    Consumed,
    /// The transport failed while the body was being read.
    Read(Arc<reqwest::Error>),
}

type BodyResult<T> = std::result::Result<T, BodyFailure>;

#[derive(Clone)]
pub(crate) struct ResponseBody {
    inner: Arc<BodyInner>,
}

struct BodyInner {
    present: bool,
    content_type: Option<String>,
    pending: Mutex<Option<reqwest::Response>>,
    buffered: OnceCell<std::result::Result<Bytes, Arc<reqwest::Error>>>,
}

impl ResponseBody {
    /// No response arrived, so there is no body.
    pub(crate) fn absent() -> Self {
        Self::with_state(false, None, None, None)
    }

    /// Wraps a response whose body has not been read yet.
    pub(crate) fn pending(response: reqwest::Response) -> Self {
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        Self::with_state(true, content_type, Some(response), None)
    }

    /// A body that is already in memory.
    #[cfg(test)]
    pub(crate) fn buffered(content_type: Option<String>, bytes: impl Into<Bytes>) -> Self {
        Self::with_state(true, content_type, None, Some(bytes.into()))
    }

    fn with_state(
        present: bool,
        content_type: Option<String>,
        response: Option<reqwest::Response>,
        bytes: Option<Bytes>,
    ) -> Self {
        Self {
            inner: Arc::new(BodyInner {
                present,
                content_type,
                pending: Mutex::new(response),
                buffered: OnceCell::new_with(bytes.map(Ok)),
            }),
        }
    }

    pub(crate) fn is_present(&self) -> bool {
        self.inner.present
    }

    pub(crate) fn content_type(&self) -> Option<&str> {
        self.inner.content_type.as_deref()
    }

    /// Reads and buffers the body. `None` if there was no response.
    ///
    /// A failed read is remembered: later calls report the same transport
    /// error instead of reading again.
    pub(crate) async fn bytes(&self) -> BodyResult<Option<Bytes>> {
        if !self.inner.present {
            return Ok(None);
        }
        let outcome = self
            .inner
            .buffered
            .get_or_try_init(|| async {
                let response = self
                    .inner
                    .pending
                    .lock()
                    .await
                    .take()
                    .ok_or(BodyFailure::Consumed)?;
                Ok::<_, BodyFailure>(match response.bytes().await {
                    Ok(bytes) => {
                        tracing::trace!(len = bytes.len(), "Buffered response body");
                        Ok(bytes)
                    }
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            timeout = e.is_timeout(),
                            "Failed to read response body"
                        );
                        Err(Arc::new(e))
                    }
                })
            })
            .await?;
        match outcome {
            Ok(bytes) => Ok(Some(bytes.clone())),
            Err(e) => Err(BodyFailure::Read(Arc::clone(e))),
        }
    }

    /// Reads the body as text, honoring the charset of the `Content-Type`.
    pub(crate) async fn text(&self) -> BodyResult<Option<String>> {
        Ok(self
            .bytes()
            .await?
            .map(|bytes| decode_text(&bytes, self.content_type())))
    }

    /// Hands the body out as a stream of chunks without buffering it.
    ///
    /// If the body was already buffered the stream yields the buffered bytes.
    pub(crate) async fn stream(
        &self,
    ) -> BodyResult<Option<BoxStream<'static, reqwest::Result<Bytes>>>> {
        if !self.inner.present {
            return Ok(None);
        }
        match self.inner.buffered.get() {
            Some(Ok(bytes)) => {
                let bytes = bytes.clone();
                return Ok(Some(stream::once(async move { Ok(bytes) }).boxed()));
            }
            Some(Err(e)) => return Err(BodyFailure::Read(Arc::clone(e))),
            None => {}
        }
        let response = self
            .inner
            .pending
            .lock()
            .await
            .take()
            .ok_or(BodyFailure::Consumed)?;
        Ok(Some(response.bytes_stream().boxed()))
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.inner.buffered.get() {
            _ if !self.inner.present => "absent",
            Some(Ok(_)) => "buffered",
            Some(Err(_)) => "failed",
            None => "pending",
        };
        f.debug_struct("ResponseBody")
            .field("state", &state)
            .field("content_type", &self.inner.content_type)
            .finish()
    }
}

/// Extracts the `charset` parameter of a `Content-Type` value.
///
/// Some servers quote the charset token (`charset="utf-8"`); the quotes are
/// stripped so the label can be looked up.
pub(crate) fn charset(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        let value = value.trim().trim_matches(|c: char| c == '"' || c == '\'');
        (!value.is_empty()).then_some(value)
    })
}

/// Decodes body bytes as text. Unknown or missing charsets decode as UTF-8,
/// replacing invalid sequences.
pub(crate) fn decode_text(bytes: &[u8], content_type: Option<&str>) -> String {
    let encoding = content_type
        .and_then(charset)
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .unwrap_or(UTF_8);
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        tracing::debug!(
            encoding = encoding.name(),
            "Response body contained malformed sequences"
        );
    }
    text.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charset_strips_quotes() {
        assert_eq!(charset("text/plain; charset=\"utf-8\""), Some("utf-8"));
        assert_eq!(charset("text/plain; charset='iso-8859-1'"), Some("iso-8859-1"));
        assert_eq!(charset("application/json;charset=UTF-8"), Some("UTF-8"));
    }

    #[test]
    fn charset_missing_or_empty() {
        assert_eq!(charset("application/json"), None);
        assert_eq!(charset("text/plain; boundary=x"), None);
        assert_eq!(charset("text/plain; charset=\"\""), None);
    }

    #[test]
    fn decodes_quoted_latin1() {
        let text = decode_text(b"caf\xe9", Some("text/plain; charset=\"iso-8859-1\""));
        assert_eq!(text, "café");
    }

    #[test]
    fn unknown_charset_falls_back_to_utf8() {
        let text = decode_text("héllo".as_bytes(), Some("text/plain; charset=klingon"));
        assert_eq!(text, "héllo");
    }

    #[tokio::test]
    async fn buffered_body_reads_repeatedly() {
        let body = ResponseBody::buffered(None, "I'm not JSON!");
        assert_eq!(body.text().await.unwrap().as_deref(), Some("I'm not JSON!"));
        assert_eq!(body.text().await.unwrap().as_deref(), Some("I'm not JSON!"));
    }

    #[tokio::test]
    async fn pending_body_is_buffered_once() {
        let response = http::Response::builder()
            .header("content-type", "text/plain; charset='utf-8'")
            .body("hello")
            .unwrap();
        let body = ResponseBody::pending(reqwest::Response::from(response));
        assert_eq!(body.content_type(), Some("text/plain; charset='utf-8'"));
        assert_eq!(body.text().await.unwrap().as_deref(), Some("hello"));
        assert_eq!(body.text().await.unwrap().as_deref(), Some("hello"));

        let mut stream = body.stream().await.unwrap().unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), "hello");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn streamed_body_cannot_be_buffered_afterwards() {
        let response = reqwest::Response::from(http::Response::new("streamed"));
        let body = ResponseBody::pending(response);
        assert!(body.stream().await.unwrap().is_some());
        assert!(matches!(body.bytes().await, Err(BodyFailure::Consumed)));
    }

    #[tokio::test]
    async fn failed_read_is_remembered() {
        let chunks: Vec<std::result::Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"{\"id\":")),
            Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "connection reset")),
        ];
        let response = http::Response::new(reqwest::Body::wrap_stream(stream::iter(chunks)));
        let body = ResponseBody::pending(reqwest::Response::from(response));

        let first = match body.bytes().await {
            Err(BodyFailure::Read(e)) => e,
            other => panic!("expected a read failure, got {other:?}"),
        };
        assert!(!first.is_timeout());
        match body.text().await {
            Err(BodyFailure::Read(again)) => assert!(Arc::ptr_eq(&first, &again)),
            other => panic!("expected the same read failure, got {other:?}"),
        }
        assert!(matches!(body.stream().await, Err(BodyFailure::Read(_))));
        assert_eq!(format!("{body:?}"), "ResponseBody { state: \"failed\", content_type: None }");
    }

    #[tokio::test]
    async fn absent_body_reads_as_none() {
        let body = ResponseBody::absent();
        assert!(!body.is_present());
        assert!(body.bytes().await.unwrap().is_none());
        assert!(body.stream().await.unwrap().is_none());
    }
}
