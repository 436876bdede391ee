//! Drives one logical request through its attempts.
//!
//! Each attempt waits for the blocking predicate, takes a dispatch slot,
//! performs the exchange, and is classified as success, retryable or
//! terminal. Retryable failures sleep for the next backoff delay while the
//! retry budget lasts. Every wait is cancellable through [`AbortHandle`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, IF_NONE_MATCH};
use tokio::sync::watch;

use crate::{
    backoff::ExponentialBackoff,
    gate::DispatchGate,
    hooks::{Blocking, Hooks},
    policy::{StatusClass, StatusPolicy},
    request::{extend_replacing, RequestDescriptor},
    response::{ETagResult, Response},
    transport::{Transport, TransportError, TransportRequest, TransportResponse},
    RestError, Result,
};

/// Cancels a running [`RequestExecutor`]. Cloneable and safe to call from
/// anywhere, any number of times.
#[derive(Clone, Debug)]
pub struct AbortHandle {
    signal: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.signal.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.signal.borrow()
    }
}

/// Pause between evaluations of a predicate that keeps reporting blocked.
const BLOCKED_RECHECK_INTERVAL: Duration = Duration::from_millis(10);

#[cfg_attr(not(feature = "tracing"), allow(dead_code))]
struct Attempt {
    number: u32,
    started_at: Instant,
}

enum AttemptOutcome {
    Success(Response),
    Retryable(RestError),
    Terminal(RestError),
}

/// Executes a [`RequestDescriptor`] to a single terminal outcome.
pub struct RequestExecutor {
    descriptor: RequestDescriptor,
    transport: Arc<dyn Transport>,
    hooks: Hooks,
    gate: Option<DispatchGate>,
    status_policy: StatusPolicy,
    backoff: ExponentialBackoff,
    abort_signal: Arc<watch::Sender<bool>>,
    aborted: watch::Receiver<bool>,
}

impl fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("method", &self.descriptor.method)
            .field("url", &self.descriptor.url)
            .field("hooks", &self.hooks)
            .field("gate", &self.gate)
            .field("backoff", &self.backoff)
            .finish()
    }
}

impl RequestExecutor {
    pub fn new(mut descriptor: RequestDescriptor, transport: Arc<dyn Transport>) -> Self {
        if descriptor.options.content_type.is_none() {
            descriptor.options.content_type = Some(descriptor.resolved_content_type());
        }
        let (abort_signal, aborted) = watch::channel(false);
        Self {
            descriptor,
            transport,
            hooks: Hooks::default(),
            gate: None,
            status_policy: StatusPolicy::default(),
            backoff: ExponentialBackoff::default(),
            abort_signal: Arc::new(abort_signal),
            aborted,
        }
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_gate(mut self, gate: DispatchGate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_status_policy(mut self, policy: StatusPolicy) -> Self {
        self.status_policy = policy;
        self
    }

    pub fn with_backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn descriptor(&self) -> &RequestDescriptor {
        &self.descriptor
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            signal: Arc::clone(&self.abort_signal),
        }
    }

    /// Runs attempts until success, a terminal failure, exhaustion of the
    /// retry budget, or abort.
    pub async fn execute(mut self) -> Result<Response> {
        let retries = self.descriptor.options.retries_or_default();
        let mut attempt = Attempt {
            number: 1,
            started_at: Instant::now(),
        };

        loop {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                method = %self.descriptor.method,
                url = %self.descriptor.url,
                attempt = attempt.number,
                "starting request attempt"
            );

            let outcome = match self.run_attempt().await {
                Ok(outcome) => outcome,
                Err(err) => return Err(self.settle_failure(err, &attempt)),
            };

            match outcome {
                AttemptOutcome::Success(response) => {
                    self.hooks.notify_success(&response);
                    return Ok(response);
                }
                AttemptOutcome::Terminal(err) => return Err(self.settle_failure(err, &attempt)),
                AttemptOutcome::Retryable(err) if attempt.number <= retries => {
                    let delay = self.backoff.take_current_and_advance();
                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        url = %self.descriptor.url,
                        attempt = attempt.number,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying request after backoff"
                    );
                    #[cfg(not(feature = "tracing"))]
                    let _ = err;

                    if let Err(aborted) = self.abortable(tokio::time::sleep(delay)).await {
                        return Err(self.settle_failure(aborted, &attempt));
                    }
                    attempt = Attempt {
                        number: attempt.number + 1,
                        started_at: Instant::now(),
                    };
                }
                AttemptOutcome::Retryable(err) => {
                    let exhausted = RestError::RetriesExhausted {
                        attempts: attempt.number,
                        last: Box::new(err),
                    };
                    return Err(self.settle_failure(exhausted, &attempt));
                }
            }
        }
    }

    /// Runs the request as a conditional fetch. A `304` answer to a request
    /// that carried an ETag reports a match without a response.
    pub async fn execute_conditional(self) -> Result<ETagResult> {
        let sent_etag = self.descriptor.options.etag.is_some();
        let response = self.execute().await?;
        if sent_etag && response.status_code == 304 {
            Ok(ETagResult::matched())
        } else {
            Ok(ETagResult::fresh(response))
        }
    }

    async fn run_attempt(&self) -> Result<AttemptOutcome> {
        let request = self.prepare_request()?;
        self.wait_until_unblocked().await?;

        // Held for the duration of the exchange only, released on every exit.
        let _slot = match &self.gate {
            Some(gate) => {
                let priority = self.descriptor.options.priority_or_default();
                Some(self.abortable(gate.admit(priority)).await?)
            }
            None => None,
        };

        let request_headers = request.headers.clone();
        let timeout = request.timeout;
        let exchange = self.transport.perform(request);
        let result = match timeout {
            Some(limit) => self
                .abortable(tokio::time::timeout(limit, exchange))
                .await?
                .unwrap_or_else(|_| Err(TransportError::timeout(limit))),
            None => self.abortable(exchange).await?,
        };

        Ok(self.classify(result, request_headers))
    }

    /// Re-evaluates the blocking predicate until it reports clear.
    async fn wait_until_unblocked(&self) -> Result<()> {
        let Some(predicate) = &self.hooks.blocking else {
            return Ok(());
        };
        loop {
            let check = predicate.check_blocked(&self.descriptor.options);
            match self.abortable(check).await? {
                Blocking::Clear => return Ok(()),
                Blocking::StillBlocked => {
                    self.abortable(tokio::time::sleep(BLOCKED_RECHECK_INTERVAL))
                        .await?
                }
            }
        }
    }

    fn prepare_request(&self) -> Result<TransportRequest> {
        let descriptor = &self.descriptor;
        let options = &descriptor.options;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if descriptor.body.is_some() {
            let content_type = descriptor.resolved_content_type();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type.mime()));
        }
        extend_replacing(&mut headers, &descriptor.headers);
        extend_replacing(&mut headers, &self.hooks.headers_for(options));
        extend_replacing(&mut headers, &options.augment_headers);

        if let Some(etag) = &options.etag {
            let value = HeaderValue::from_str(etag).map_err(|err| {
                RestError::InvalidConfiguration(format!("invalid ETag {etag:?}: {err}"))
            })?;
            headers.insert(IF_NONE_MATCH, value);
        }

        Ok(TransportRequest {
            method: descriptor.method,
            url: descriptor.url.clone(),
            headers,
            body: descriptor.body.as_ref().map(|body| body.to_bytes()),
            with_credentials: options.with_credentials.unwrap_or(false),
            timeout: options.timeout_ms.map(Duration::from_millis),
        })
    }

    fn classify(
        &self,
        result: std::result::Result<TransportResponse, TransportError>,
        request_headers: HeaderMap,
    ) -> AttemptOutcome {
        let raw = match result {
            Ok(raw) => raw,
            Err(err) => return AttemptOutcome::Retryable(RestError::Transport(err)),
        };

        match self.status_policy.classify(raw.status) {
            StatusClass::Success => AttemptOutcome::Success(Response {
                status_code: raw.status,
                headers: raw.headers,
                body: raw.body,
                url: self.descriptor.url.clone(),
                method: self.descriptor.method,
                request_options: self.descriptor.options.clone(),
                request_headers,
            }),
            StatusClass::Retryable => AttemptOutcome::Retryable(RestError::ServerFailure {
                status: raw.status,
                body: String::from_utf8_lossy(&raw.body).into_owned(),
            }),
            StatusClass::Terminal => AttemptOutcome::Terminal(RestError::ClientFailure {
                status: raw.status,
                body: String::from_utf8_lossy(&raw.body).into_owned(),
            }),
        }
    }

    /// Runs `work` unless the request is aborted first.
    async fn abortable<F: Future>(&self, work: F) -> Result<F::Output> {
        tokio::select! {
            biased;
            _ = abort_requested(self.aborted.clone()) => Err(RestError::Aborted),
            output = work => Ok(output),
        }
    }

    #[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
    fn settle_failure(&self, err: RestError, attempt: &Attempt) -> RestError {
        #[cfg(feature = "tracing")]
        {
            if err.is_aborted() {
                tracing::debug!(url = %self.descriptor.url, attempt = attempt.number, "request aborted");
            } else {
                tracing::warn!(
                    method = %self.descriptor.method,
                    url = %self.descriptor.url,
                    attempt = attempt.number,
                    elapsed_ms = attempt.started_at.elapsed().as_millis() as u64,
                    error = %err,
                    "request failed"
                );
            }
        }
        err
    }
}

async fn abort_requested(mut aborted: watch::Receiver<bool>) {
    let sender_gone = aborted.wait_for(|flag| *flag).await.is_err();
    if sender_gone {
        // No abort can ever arrive.
        std::future::pending::<()>().await;
    }
}
