//! `restcall` is a REST call execution engine.
//!
//! A logical request ([`RequestDescriptor`]) is driven through one or more
//! attempts by a [`RequestExecutor`]:
//! - retryable failures (transport errors, 5xx) back off with a jittered
//!   [`ExponentialBackoff`] while the retry budget lasts;
//! - a caller-supplied [`BlockingPredicate`] is re-checked before every attempt;
//! - a shared [`DispatchGate`] bounds concurrency and orders pending work by
//!   [`Priority`];
//! - an [`AbortHandle`] cancels the request at any suspension point.
//!
//! [`RestClient`] is the thin per-endpoint front end with typed
//! `get/post/put/patch/delete` helpers and conditional (ETag) fetches.

mod backoff;
mod client;
mod error;
mod executor;
mod gate;
mod hooks;
mod options;
mod policy;
mod request;
mod response;
mod transport;

pub use backoff::{BackoffConfig, ExponentialBackoff, DEFAULT_GROW_FACTOR, DEFAULT_JITTER_FACTOR};
pub use client::RestClient;
pub use error::RestError;
pub use executor::{AbortHandle, RequestExecutor};
pub use gate::{AdmissionSlot, DispatchGate, Ticket};
pub use hooks::{Blocking, BlockingPredicate, HeaderProvider, Hooks, SuccessHook};
pub use options::ClientOptions;
pub use policy::{StatusClass, StatusPolicy};
pub use request::{ContentType, Method, Priority, RequestBody, RequestDescriptor, RequestOptions};
pub use response::{ETagResult, Response};
pub use transport::{
    ReqwestTransport, Transport, TransportError, TransportErrorKind, TransportRequest,
    TransportResponse,
};

pub type Result<T> = std::result::Result<T, RestError>;
