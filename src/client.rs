use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::{
    backoff::{BackoffConfig, ExponentialBackoff},
    executor::RequestExecutor,
    gate::DispatchGate,
    hooks::Hooks,
    policy::StatusPolicy,
    request::{Method, RequestBody, RequestDescriptor, RequestOptions},
    response::{ETagResult, Response},
    transport::{ReqwestTransport, Transport},
    ClientOptions, Result,
};

/// Thin client for one REST endpoint.
///
/// Builds request descriptors from an API path and per-call options merged
/// over the client defaults, and runs them through a [`RequestExecutor`]
/// sharing this client's hooks and dispatch gate.
#[derive(Clone)]
pub struct RestClient {
    endpoint_url: String,
    transport: Arc<dyn Transport>,
    default_options: RequestOptions,
    hooks: Hooks,
    gate: Option<DispatchGate>,
    backoff: BackoffConfig,
    status_policy: StatusPolicy,
}

impl fmt::Debug for RestClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestClient")
            .field("endpoint_url", &self.endpoint_url)
            .field("default_options", &self.default_options)
            .field("hooks", &self.hooks)
            .field("gate", &self.gate)
            .field("backoff", &self.backoff)
            .field("status_policy", &self.status_policy)
            .finish()
    }
}

impl RestClient {
    /// Creates a client for `endpoint_url` backed by [`ReqwestTransport`].
    ///
    /// API paths are appended verbatim, so include any trailing slash the
    /// service expects in either the endpoint or the paths.
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            transport: Arc::new(ReqwestTransport::new()),
            default_options: RequestOptions::process_defaults(),
            hooks: Hooks::default(),
            gate: None,
            backoff: BackoffConfig::default(),
            status_policy: StatusPolicy::default(),
        }
    }

    /// Creates a client from loaded configuration, validating the backoff
    /// parameters and concurrency limit.
    pub fn from_options(options: ClientOptions) -> Result<Self> {
        ExponentialBackoff::new(options.backoff)?;
        let gate = options.max_concurrent.map(DispatchGate::new).transpose()?;
        let default_options =
            RequestOptions::merge(&RequestOptions::process_defaults(), &options.defaults);

        Ok(Self {
            endpoint_url: options.endpoint_url,
            transport: Arc::new(ReqwestTransport::new()),
            default_options,
            hooks: Hooks::default(),
            gate,
            backoff: options.backoff,
            status_policy: options.status_policy,
        })
    }

    /// Creates a client from `RESTCALL_*` environment variables.
    ///
    /// See [`ClientOptions::from_env`].
    pub fn from_env() -> Result<Self> {
        Self::from_options(ClientOptions::from_env()?)
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Shares `gate` across every request issued by this client (and any
    /// other client handed the same gate).
    pub fn with_gate(mut self, gate: DispatchGate) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Merges `options` over the process defaults for every call.
    pub fn with_default_options(mut self, options: RequestOptions) -> Self {
        self.default_options = RequestOptions::merge(&RequestOptions::process_defaults(), &options);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Result<Self> {
        ExponentialBackoff::new(backoff)?;
        self.backoff = backoff;
        Ok(self)
    }

    pub fn with_status_policy(mut self, policy: StatusPolicy) -> Self {
        self.status_policy = policy;
        self
    }

    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    pub fn gate(&self) -> Option<&DispatchGate> {
        self.gate.as_ref()
    }

    /// Builds an executor without starting it, so the caller can take an
    /// [`AbortHandle`](crate::AbortHandle) first.
    pub fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<RequestBody>,
        options: RequestOptions,
    ) -> Result<RequestExecutor> {
        let options = RequestOptions::merge(&self.default_options, &options);
        let url = if options.exclude_endpoint_url.unwrap_or(false) {
            path.to_owned()
        } else {
            format!("{}{}", self.endpoint_url, path)
        };

        let descriptor = RequestDescriptor {
            method,
            url,
            headers: Default::default(),
            body,
            options,
        };

        let mut executor = RequestExecutor::new(descriptor, Arc::clone(&self.transport))
            .with_hooks(self.hooks.clone())
            .with_status_policy(self.status_policy.clone())
            .with_backoff(ExponentialBackoff::new(self.backoff)?);
        if let Some(gate) = &self.gate {
            executor = executor.with_gate(gate.clone());
        }
        Ok(executor)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str, options: RequestOptions) -> Result<T> {
        self.get_detailed(path, options).await?.json()
    }

    pub async fn get_detailed(&self, path: &str, options: RequestOptions) -> Result<Response> {
        self.request(Method::Get, path, None, options)?.execute().await
    }

    /// Conditional GET. Set the cached ETag with [`RequestOptions::with_etag`].
    pub async fn get_conditional(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<ETagResult> {
        self.request(Method::Get, path, None, options)?
            .execute_conditional()
            .await
    }

    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: impl Into<RequestBody>,
        options: RequestOptions,
    ) -> Result<T> {
        self.post_detailed(path, body, options).await?.json()
    }

    pub async fn post_detailed(
        &self,
        path: &str,
        body: impl Into<RequestBody>,
        options: RequestOptions,
    ) -> Result<Response> {
        self.send(Method::Post, path, Some(body.into()), options).await
    }

    pub async fn put<T: DeserializeOwned>(
        &self,
        path: &str,
        body: impl Into<RequestBody>,
        options: RequestOptions,
    ) -> Result<T> {
        self.put_detailed(path, body, options).await?.json()
    }

    pub async fn put_detailed(
        &self,
        path: &str,
        body: impl Into<RequestBody>,
        options: RequestOptions,
    ) -> Result<Response> {
        self.send(Method::Put, path, Some(body.into()), options).await
    }

    pub async fn patch<T: DeserializeOwned>(
        &self,
        path: &str,
        body: impl Into<RequestBody>,
        options: RequestOptions,
    ) -> Result<T> {
        self.patch_detailed(path, body, options).await?.json()
    }

    pub async fn patch_detailed(
        &self,
        path: &str,
        body: impl Into<RequestBody>,
        options: RequestOptions,
    ) -> Result<Response> {
        self.send(Method::Patch, path, Some(body.into()), options).await
    }

    pub async fn delete<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<RequestBody>,
        options: RequestOptions,
    ) -> Result<T> {
        self.delete_detailed(path, body, options).await?.json()
    }

    pub async fn delete_detailed(
        &self,
        path: &str,
        body: Option<RequestBody>,
        options: RequestOptions,
    ) -> Result<Response> {
        self.send(Method::Delete, path, body, options).await
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<RequestBody>,
        options: RequestOptions,
    ) -> Result<Response> {
        self.request(method, path, body, options)?.execute().await
    }
}

#[cfg(test)]
mod tests {
    use super::RestClient;
    use crate::{
        backoff::BackoffConfig,
        request::{Method, Priority, RequestOptions},
        ClientOptions, RestError,
    };

    #[test]
    fn paths_are_prefixed_with_endpoint() {
        let client = RestClient::new("https://api.example.com/v1");
        let executor = client
            .request(Method::Get, "/users/7", None, RequestOptions::default())
            .expect("request must build");
        assert_eq!(executor.descriptor().url, "https://api.example.com/v1/users/7");
    }

    #[test]
    fn excluded_endpoint_uses_path_as_url() {
        let client = RestClient::new("https://api.example.com/v1");
        let executor = client
            .request(
                Method::Get,
                "https://cdn.example.com/blob",
                None,
                RequestOptions::default().excluding_endpoint_url(),
            )
            .expect("request must build");
        assert_eq!(executor.descriptor().url, "https://cdn.example.com/blob");
    }

    #[test]
    fn per_call_options_override_client_defaults() {
        let client = RestClient::new("http://localhost").with_default_options(
            RequestOptions::default()
                .with_retries(2)
                .with_priority(Priority::Low),
        );
        let executor = client
            .request(
                Method::Get,
                "/x",
                None,
                RequestOptions::default().with_priority(Priority::High),
            )
            .expect("request must build");
        let options = &executor.descriptor().options;
        assert_eq!(options.retries, Some(2));
        assert_eq!(options.priority, Some(Priority::High));
        assert_eq!(options.with_credentials, Some(false));
    }

    #[test]
    fn invalid_backoff_is_rejected() {
        let err = RestClient::new("http://localhost")
            .with_backoff(BackoffConfig::new(-1.0, 10.0))
            .expect_err("negative delay must be rejected");
        assert!(matches!(err, RestError::InvalidConfiguration(_)));
    }

    #[test]
    fn from_options_builds_shared_gate() {
        let client = RestClient::from_options(ClientOptions {
            endpoint_url: "http://localhost".to_owned(),
            max_concurrent: Some(3),
            ..ClientOptions::default()
        })
        .expect("options must be valid");
        assert_eq!(client.gate().map(|gate| gate.max_concurrent()), Some(3));

        let err = RestClient::from_options(ClientOptions {
            max_concurrent: Some(0),
            ..ClientOptions::default()
        })
        .expect_err("zero concurrency must be rejected");
        assert!(matches!(err, RestError::InvalidConfiguration(_)));
    }
}
