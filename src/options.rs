use serde::Deserialize;

use crate::{
    backoff::BackoffConfig, policy::StatusPolicy, request::RequestOptions, RestError, Result,
};

/// Process-level client configuration.
///
/// Deserializable from JSON (camelCase keys) or read from the environment
/// with [`ClientOptions::from_env`].
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientOptions {
    /// Prefix for every API path.
    pub endpoint_url: String,
    /// Concurrency limit of the client's dispatch gate; `None` means unbounded.
    pub max_concurrent: Option<usize>,
    pub backoff: BackoffConfig,
    /// Defaults merged under every call's options.
    pub defaults: RequestOptions,
    pub status_policy: StatusPolicy,
}

impl ClientOptions {
    /// Reads:
    /// - `RESTCALL_ENDPOINT_URL` (required)
    /// - `RESTCALL_MAX_CONCURRENT`
    /// - `RESTCALL_RETRIES`
    /// - `RESTCALL_TIMEOUT_MS`
    ///
    /// Empty or unparsable values are configuration errors.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let endpoint_url = lookup("RESTCALL_ENDPOINT_URL").ok_or_else(|| {
            RestError::InvalidConfiguration(
                "missing RESTCALL_ENDPOINT_URL environment variable".to_owned(),
            )
        })?;
        if endpoint_url.trim().is_empty() {
            return Err(RestError::InvalidConfiguration(
                "RESTCALL_ENDPOINT_URL is set but empty".to_owned(),
            ));
        }

        let mut options = Self {
            endpoint_url: endpoint_url.trim().to_owned(),
            ..Self::default()
        };
        options.max_concurrent = parse_var(&lookup, "RESTCALL_MAX_CONCURRENT")?;
        options.defaults.retries = parse_var(&lookup, "RESTCALL_RETRIES")?;
        options.defaults.timeout_ms = parse_var(&lookup, "RESTCALL_TIMEOUT_MS")?;
        Ok(options)
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|_| RestError::InvalidConfiguration(format!("{key} is not a valid number: {raw:?}")))
}
