//! Error handler hooks.
//!
//! Every fault of a call (transport failure, disallowed status, unparseable
//! body) is offered to an [`ErrorHandler`] before it reaches the caller. The
//! handler is configured per client with
//! [`ClientBuilder::error_handler`](crate::ClientBuilder::error_handler) and can
//! be replaced for a single call with
//! [`CallBuilder::error_handler`](crate::CallBuilder::error_handler).

use crate::{CallContext, Error};
use async_trait::async_trait;

/// Decides whether a failed call is handled or propagated.
///
/// Return `true` to mark the failure as handled: the caller then gets a
/// response with whatever the call produced (possibly no body at all), and
/// typed reads return an empty value instead of an error. Return `false` to
/// let the error propagate.
///
/// # Examples
///
/// ```
/// use callkit::{CallContext, Error, ErrorHandler};
///
/// struct IgnoreNotFound;
///
/// #[async_trait::async_trait]
/// impl ErrorHandler for IgnoreNotFound {
///     async fn handle(&self, _call: &CallContext, error: &Error) -> bool {
///         error.status().map_or(false, |s| s.as_u16() == 404)
///     }
/// }
/// ```
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    /// Called exactly once per fault, before the caller sees the result.
    async fn handle(&self, call: &CallContext, error: &Error) -> bool;
}

/// The default handler: never handles anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct Propagate;

#[async_trait]
impl ErrorHandler for Propagate {
    async fn handle(&self, _call: &CallContext, _error: &Error) -> bool {
        false
    }
}

/// An [`ErrorHandler`] built from a synchronous closure. See [`handler_fn`].
#[derive(Clone)]
pub struct HandlerFn<F> {
    f: F,
}

/// Wraps a closure as an [`ErrorHandler`].
///
/// ```
/// use callkit::{handler_fn, Client};
///
/// # fn example() -> Result<(), callkit::Error> {
/// let client = Client::builder()
///     .base_url("https://api.example.com")?
///     .error_handler(handler_fn(|call, error| {
///         tracing::warn!(%call, %error, "call failed");
///         false
///     }))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: Fn(&CallContext, &Error) -> bool + Send + Sync,
{
    HandlerFn { f }
}

#[async_trait]
impl<F> ErrorHandler for HandlerFn<F>
where
    F: Fn(&CallContext, &Error) -> bool + Send + Sync,
{
    async fn handle(&self, call: &CallContext, error: &Error) -> bool {
        (self.f)(call, error)
    }
}

/// Offers a fault to the handler and logs the decision.
pub(crate) async fn offer(handler: &dyn ErrorHandler, call: &CallContext, error: &Error) -> bool {
    let handled = handler.handle(call, error).await;
    if handled {
        tracing::warn!(
            method = %call.method(),
            url = %call.url(),
            error = %error,
            "Call failure handled by error handler"
        );
    }
    handled
}
