// Invocation Context
//
// Per-invocation metadata handed to every handler. The deadline is the
// platform's; nothing in Switchyard shortens it.

use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationContext {
    pub request_id: String,
    /// Absolute deadline, epoch ms
    pub deadline_ms: Option<i64>,
    pub invoked_function_arn: Option<String>,
}

impl InvocationContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            ..Default::default()
        }
    }

    pub fn with_deadline(mut self, deadline_ms: i64) -> Self {
        self.deadline_ms = Some(deadline_ms);
        self
    }

    pub fn with_function_arn(mut self, arn: impl Into<String>) -> Self {
        self.invoked_function_arn = Some(arn.into());
        self
    }

    /// Time left before the deadline, measured against `now_ms`
    ///
    /// Returns `None` when the invocation has no deadline and `Duration::ZERO`
    /// once it has passed.
    pub fn remaining(&self, now_ms: i64) -> Option<Duration> {
        self.deadline_ms
            .map(|deadline| Duration::from_millis((deadline - now_ms).max(0) as u64))
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.remaining(now_ms) == Some(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remaining() {
        let ctx = InvocationContext::new("req-1").with_deadline(10_000);
        assert_eq!(ctx.remaining(7_500), Some(Duration::from_millis(2_500)));
        assert_eq!(ctx.remaining(12_000), Some(Duration::ZERO));
        assert!(ctx.is_expired(10_000));
        assert!(!ctx.is_expired(9_999));

        let open = InvocationContext::new("req-2");
        assert_eq!(open.remaining(0), None);
        assert!(!open.is_expired(i64::MAX));
    }
}
