//! Capability interfaces injected into the executor.
//!
//! A resource client customizes the engine by supplying different
//! implementations of these traits rather than by overriding methods.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::HeaderMap;

use crate::{request::RequestOptions, response::Response};

/// Supplies headers merged into every attempt before `augment_headers`.
pub trait HeaderProvider: Send + Sync {
    fn headers(&self, options: &RequestOptions) -> HeaderMap;
}

impl<F> HeaderProvider for F
where
    F: Fn(&RequestOptions) -> HeaderMap + Send + Sync,
{
    fn headers(&self, options: &RequestOptions) -> HeaderMap {
        self(options)
    }
}

/// Result of one evaluation of a [`BlockingPredicate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Blocking {
    /// The attempt may proceed.
    Clear,
    /// Conditions changed but the request is still blocked; evaluate again.
    StillBlocked,
}

/// Precondition gating each attempt.
///
/// Evaluated fresh before every attempt and again after each
/// [`Blocking::StillBlocked`], never cached. The executor pauses briefly
/// between re-checks, so a predicate answering immediately is polled rather
/// than spun. Implementations may also suspend until their condition changes.
#[async_trait]
pub trait BlockingPredicate: Send + Sync {
    async fn check_blocked(&self, options: &RequestOptions) -> Blocking;
}

/// Side effects on a terminal success, e.g. harvesting cache headers.
pub trait SuccessHook: Send + Sync {
    fn on_success(&self, response: &Response);
}

impl<F> SuccessHook for F
where
    F: Fn(&Response) + Send + Sync,
{
    fn on_success(&self, response: &Response) {
        self(response)
    }
}

/// The set of hooks handed to each executor. Absent hooks are no-ops.
#[derive(Clone, Default)]
pub struct Hooks {
    pub headers: Option<Arc<dyn HeaderProvider>>,
    pub blocking: Option<Arc<dyn BlockingPredicate>>,
    pub on_success: Option<Arc<dyn SuccessHook>>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("headers", &self.headers.is_some())
            .field("blocking", &self.blocking.is_some())
            .field("on_success", &self.on_success.is_some())
            .finish()
    }
}

impl Hooks {
    pub fn with_headers(mut self, provider: impl HeaderProvider + 'static) -> Self {
        self.headers = Some(Arc::new(provider));
        self
    }

    pub fn with_blocking(mut self, predicate: impl BlockingPredicate + 'static) -> Self {
        self.blocking = Some(Arc::new(predicate));
        self
    }

    pub fn with_success_hook(mut self, hook: impl SuccessHook + 'static) -> Self {
        self.on_success = Some(Arc::new(hook));
        self
    }

    pub(crate) fn headers_for(&self, options: &RequestOptions) -> HeaderMap {
        self.headers
            .as_ref()
            .map(|provider| provider.headers(options))
            .unwrap_or_default()
    }

    pub(crate) fn notify_success(&self, response: &Response) {
        if let Some(hook) = &self.on_success {
            hook.on_success(response);
        }
    }
}
