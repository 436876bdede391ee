use std::fmt;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;

/// HTTP verbs the engine issues.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Dispatch priority. Higher variants are admitted first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Priority {
    #[default]
    DontCare,
    Low,
    Normal,
    High,
    Critical,
}

/// Encoding of the request body.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContentType {
    Json,
    Form,
}

impl ContentType {
    pub fn mime(&self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Form => "application/x-www-form-urlencoded",
        }
    }
}

/// Opaque request payload.
#[derive(Clone, Debug, PartialEq)]
pub enum RequestBody {
    /// Structured payload, serialized as JSON.
    Json(serde_json::Value),
    /// Pre-encoded text payload, sent as-is.
    Text(String),
    Bytes(Vec<u8>),
}

impl RequestBody {
    /// Serializes any `Serialize` value into a JSON body.
    pub fn json<T: serde::Serialize>(value: &T) -> crate::Result<Self> {
        serde_json::to_value(value)
            .map(Self::Json)
            .map_err(|err| crate::RestError::Decode(format!("invalid JSON body: {err}")))
    }

    /// Content type implied by the body when none was requested:
    /// string bodies are form payloads, everything else is JSON.
    pub fn inferred_content_type(&self) -> ContentType {
        match self {
            Self::Text(_) => ContentType::Form,
            Self::Json(_) | Self::Bytes(_) => ContentType::Json,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Json(value) => value.to_string().into_bytes(),
            Self::Text(text) => text.clone().into_bytes(),
            Self::Bytes(bytes) => bytes.clone(),
        }
    }
}

impl From<serde_json::Value> for RequestBody {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl From<String> for RequestBody {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for RequestBody {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

/// Per-call options. Unset fields fall back to defaults through
/// [`RequestOptions::merge`].
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RequestOptions {
    /// Additional attempts after the first failure.
    pub retries: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub with_credentials: Option<bool>,
    pub priority: Option<Priority>,
    #[serde(rename = "eTag")]
    pub etag: Option<String>,
    #[serde(skip)]
    pub augment_headers: HeaderMap,
    pub content_type: Option<ContentType>,
    /// Use the path as the full URL instead of prefixing the endpoint.
    pub exclude_endpoint_url: Option<bool>,
}

impl RequestOptions {
    /// Process-wide defaults.
    pub fn process_defaults() -> Self {
        Self {
            retries: Some(0),
            with_credentials: Some(false),
            priority: Some(Priority::DontCare),
            exclude_endpoint_url: Some(false),
            ..Self::default()
        }
    }

    /// Field-by-field merge: set fields of `overrides` win, and
    /// `augment_headers` are merged key-wise with `overrides` winning.
    pub fn merge(defaults: &Self, overrides: &Self) -> Self {
        let mut augment_headers = defaults.augment_headers.clone();
        extend_replacing(&mut augment_headers, &overrides.augment_headers);

        Self {
            retries: overrides.retries.or(defaults.retries),
            timeout_ms: overrides.timeout_ms.or(defaults.timeout_ms),
            with_credentials: overrides.with_credentials.or(defaults.with_credentials),
            priority: overrides.priority.or(defaults.priority),
            etag: overrides.etag.clone().or_else(|| defaults.etag.clone()),
            augment_headers,
            content_type: overrides.content_type.or(defaults.content_type),
            exclude_endpoint_url: overrides
                .exclude_endpoint_url
                .or(defaults.exclude_endpoint_url),
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_credentials(mut self, with_credentials: bool) -> Self {
        self.with_credentials = Some(with_credentials);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = Some(content_type);
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.augment_headers.insert(name, value);
        self
    }

    pub fn excluding_endpoint_url(mut self) -> Self {
        self.exclude_endpoint_url = Some(true);
        self
    }

    pub fn retries_or_default(&self) -> u32 {
        self.retries.unwrap_or(0)
    }

    pub fn priority_or_default(&self) -> Priority {
        self.priority.unwrap_or_default()
    }
}

/// Replaces every key of `target` present in `source`, keeping all of
/// `source`'s values for multi-valued headers.
pub(crate) fn extend_replacing(target: &mut HeaderMap, source: &HeaderMap) {
    for name in source.keys() {
        target.remove(name);
    }
    for (name, value) in source {
        target.append(name.clone(), value.clone());
    }
}

/// A logical request. Immutable once the first attempt starts; retries
/// reuse the same descriptor.
#[derive(Clone, Debug)]
pub struct RequestDescriptor {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<RequestBody>,
    pub options: RequestOptions,
}

impl RequestDescriptor {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            options: RequestOptions::process_defaults(),
        }
    }

    pub fn with_body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Content type from the options, or inferred from the body.
    pub fn resolved_content_type(&self) -> ContentType {
        self.options.content_type.unwrap_or_else(|| {
            self.body
                .as_ref()
                .map(RequestBody::inferred_content_type)
                .unwrap_or(ContentType::Json)
        })
    }
}
