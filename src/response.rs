use reqwest::header::{HeaderMap, ETAG};
use serde::de::DeserializeOwned;

use crate::{
    request::{Method, RequestOptions},
    RestError, Result,
};

/// Terminal successful response, echoing the request that produced it.
#[derive(Clone, Debug)]
pub struct Response {
    pub status_code: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub url: String,
    pub method: Method,
    pub request_options: RequestOptions,
    pub request_headers: HeaderMap,
}

impl Response {
    /// Value of the `ETag` response header, if present and readable.
    pub fn etag(&self) -> Option<&str> {
        self.headers.get(ETAG).and_then(|value| value.to_str().ok())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decodes the body as JSON. An empty body decodes as `null`, so
    /// `()` and `Option<T>` targets accept `204 No Content`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        let body: &[u8] = if self.body.iter().all(u8::is_ascii_whitespace) {
            b"null"
        } else {
            &self.body
        };
        serde_json::from_slice(body).map_err(|err| {
            RestError::Decode(format!(
                "invalid JSON response from {} {}: {err}",
                self.method, self.url
            ))
        })
    }
}

/// Outcome of a conditional (`If-None-Match`) request.
#[derive(Clone, Debug)]
pub struct ETagResult<T = Response> {
    /// True when the server answered `304 Not Modified`; `response` is then absent.
    pub etag_matched: bool,
    pub response: Option<T>,
    /// Fresh ETag sent with the new content.
    pub etag: Option<String>,
}

impl ETagResult {
    pub(crate) fn matched() -> Self {
        Self {
            etag_matched: true,
            response: None,
            etag: None,
        }
    }

    pub(crate) fn fresh(response: Response) -> Self {
        let etag = response.etag().map(str::to_owned);
        Self {
            etag_matched: false,
            response: Some(response),
            etag,
        }
    }

    /// Decodes the fresh response body, keeping the match flag and ETag.
    pub fn decode<T: DeserializeOwned>(self) -> Result<ETagResult<T>> {
        let response = self.response.as_ref().map(Response::json).transpose()?;
        Ok(ETagResult {
            etag_matched: self.etag_matched,
            response,
            etag: self.etag,
        })
    }
}
