//! # callkit - fluent HTTP calls that remember what happened
//!
//! callkit is a small layer over `reqwest`. Calls are built with chainable
//! methods, bodies are (de)serialized automatically, and every failure comes
//! back as a typed error that carries the full [`CallContext`]: method, URL,
//! request body, status, headers and timing.
//!
//! ## Quick Start
//!
//! ```no_run
//! use callkit::Client;
//! use serde::{Deserialize, Serialize};
//! use std::time::Duration;
//!
//! #[derive(Serialize)]
//! struct CreateUser {
//!     name: String,
//!     email: String,
//! }
//!
//! #[derive(Deserialize, Default)]
//! struct User {
//!     id: u64,
//!     name: String,
//!     email: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), callkit::Error> {
//!     let client = Client::builder()
//!         .base_url("https://api.example.com")?
//!         .timeout(Duration::from_secs(30))
//!         .build()?;
//!
//!     let user: User = client.get("/users/123").receive_json().await?;
//!     println!("User: {}", user.name);
//!
//!     let new_user = CreateUser {
//!         name: "Alice".to_string(),
//!         email: "alice@example.com".to_string(),
//!     };
//!     let created: User = client.post("/users").json(&new_user).receive_json().await?;
//!     println!("Created user with ID: {}", created.id);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! A disallowed status or a transport failure is an [`HttpError`]. A body
//! that does not deserialize is a [`ParsingError`], which derefs to
//! `HttpError`. Messages are single lines that always name the call:
//!
//! ```text
//! Call failed with status code 400 (Bad Request): POST https://api.example.com/users
//! Response could not be deserialized to JSON: GET https://api.example.com/users/123
//! ```
//!
//! Bodies are not part of the message but can be read from the error:
//!
//! ```no_run
//! use callkit::{Client, Error};
//!
//! # async fn example() -> Result<(), Error> {
//! # let client = Client::builder().base_url("https://api.example.com")?.build()?;
//! match client.get("/endpoint").receive_json::<serde_json::Value>().await {
//!     Ok(value) => println!("Success: {value}"),
//!     Err(Error::Http(e)) => eprintln!("{}", e.diagnostics().await?),
//!     Err(Error::Parsing(e)) => {
//!         eprintln!("{e} (raw body: {})", e.response_string().await?);
//!     }
//!     Err(e) => eprintln!("Other error: {e}"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handlers
//!
//! Every failure is offered to the client's [`ErrorHandler`] before it is
//! returned. A handler that returns `true` suppresses the error: the call
//! resolves to a [`CallResponse`] and typed reads yield empty values.

mod body;
mod call;
mod client;
mod error;
pub mod format;
mod handler;
mod request;
mod response;
pub mod status;

pub use call::{CallContext, Fault, FaultKind};
pub use client::{Client, ClientBuilder};
pub use error::{BoxError, Error, HttpError, ParsingError, Result};
pub use format::{BodyFormat, Form, Json};
pub use handler::{handler_fn, ErrorHandler, HandlerFn, Propagate};
pub use request::CallBuilder;
pub use response::{CallResponse, JsonMap};
pub use status::AllowedStatuses;
