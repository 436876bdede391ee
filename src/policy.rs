use serde::Deserialize;

/// How the executor treats an HTTP status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    /// Worth another attempt if the retry budget allows.
    Retryable,
    /// Surfaced immediately without consuming a retry.
    Terminal,
}

/// Status-code classification.
///
/// Out of the box 2xx/3xx succeed, 4xx are terminal and everything else is
/// retried. `accept_statuses` turns specific codes into successes and
/// `retry_statuses` into retryable failures (e.g. `429 Too Many Requests`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StatusPolicy {
    pub accept_statuses: Vec<u16>,
    pub retry_statuses: Vec<u16>,
}

impl StatusPolicy {
    /// Default policy plus `429` as retryable.
    pub fn retry_throttled() -> Self {
        Self::default().retry_on(429)
    }

    pub fn retry_on(mut self, status: u16) -> Self {
        self.retry_statuses.push(status);
        self
    }

    pub fn accept(mut self, status: u16) -> Self {
        self.accept_statuses.push(status);
        self
    }

    pub fn classify(&self, status: u16) -> StatusClass {
        if self.accept_statuses.contains(&status) {
            return StatusClass::Success;
        }
        if self.retry_statuses.contains(&status) {
            return StatusClass::Retryable;
        }
        match status {
            200..=399 => StatusClass::Success,
            400..=499 => StatusClass::Terminal,
            _ => StatusClass::Retryable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{StatusClass, StatusPolicy};

    #[test]
    fn default_boundaries() {
        let policy = StatusPolicy::default();
        assert_eq!(policy.classify(200), StatusClass::Success);
        assert_eq!(policy.classify(304), StatusClass::Success);
        assert_eq!(policy.classify(404), StatusClass::Terminal);
        assert_eq!(policy.classify(429), StatusClass::Terminal);
        assert_eq!(policy.classify(500), StatusClass::Retryable);
        assert_eq!(policy.classify(599), StatusClass::Retryable);
    }

    #[test]
    fn overrides_take_precedence() {
        let policy = StatusPolicy::retry_throttled().accept(404).accept(503);
        assert_eq!(policy.classify(429), StatusClass::Retryable);
        assert_eq!(policy.classify(404), StatusClass::Success);
        assert_eq!(policy.classify(503), StatusClass::Success);
        assert_eq!(policy.classify(400), StatusClass::Terminal);
    }
}
