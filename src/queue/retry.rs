//! Error classification for the consumer's retry policy.
//!
//! Classification works on the textual description of a handler error so it
//! stays independent of the transport and can be tested without a broker.
//! Permanent keywords are checked before transient ones; anything that matches
//! neither table is treated as permanent so unrecognized errors cannot cause a
//! redelivery storm.

/// What the consumer should do with a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Transient failure, negative-acknowledge with requeue.
    Retryable,
    /// Business-rule failure, reject without requeue.
    Permanent,
}

/// Terminal action for a delivery, derived from the handler outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Requeue,
    Reject,
}

// Business-rule violations that redelivery can never fix.
const PERMANENT_KEYWORDS: &[&str] = &[
    "no active devices for user",
    "invalid message format",
    "user not found",
    "invalid player id",
];

// Infrastructure hiccups worth another attempt.
const TRANSIENT_KEYWORDS: &[&str] = &[
    "connection refused",
    "timeout",
    "temporary failure",
    "database connection",
    "context deadline exceeded",
];

/// Classifies a handler error by case-insensitive substring match against the
/// keyword tables. Permanent keywords win over transient ones.
pub fn classify(error_text: &str) -> RetryClass {
    let lowered = error_text.to_lowercase();

    if PERMANENT_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
        return RetryClass::Permanent;
    }

    if TRANSIENT_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
        return RetryClass::Retryable;
    }

    // Unknown errors are not retried to avoid infinite redelivery loops.
    RetryClass::Permanent
}

/// Maps a handler outcome to the single terminal action the consumer must
/// issue for the delivery. The `{:#}` format pulls in the whole cause chain so
/// keywords buried in a wrapped error still match.
pub fn disposition(outcome: &anyhow::Result<()>) -> Disposition {
    match outcome {
        Ok(()) => Disposition::Ack,
        Err(err) => match classify(&format!("{err:#}")) {
            RetryClass::Retryable => Disposition::Requeue,
            RetryClass::Permanent => Disposition::Reject,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn permanent_keywords_classify_as_permanent() {
        assert_eq!(
            classify("no active devices for user: 42"),
            RetryClass::Permanent
        );
        assert_eq!(
            classify("invalid message format: expected value at line 1"),
            RetryClass::Permanent
        );
        assert_eq!(classify("user not found: abc"), RetryClass::Permanent);
        assert_eq!(
            classify("invalid player id: player id must not be empty"),
            RetryClass::Permanent
        );
    }

    #[test]
    fn transient_keywords_classify_as_retryable() {
        assert_eq!(
            classify("connect error: connection refused (os error 111)"),
            RetryClass::Retryable
        );
        assert_eq!(classify("request timeout after 30s"), RetryClass::Retryable);
        assert_eq!(
            classify("temporary failure in name resolution"),
            RetryClass::Retryable
        );
        assert_eq!(
            classify("database connection error: pool closed"),
            RetryClass::Retryable
        );
        assert_eq!(
            classify("context deadline exceeded"),
            RetryClass::Retryable
        );
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert_eq!(
            classify("NO ACTIVE DEVICES FOR USER: 7"),
            RetryClass::Permanent
        );
        assert_eq!(classify("Connection Refused"), RetryClass::Retryable);
        assert_eq!(classify("Context Deadline Exceeded"), RetryClass::Retryable);
    }

    #[test]
    fn permanent_keywords_win_over_transient_ones() {
        // A business failure wrapped in timeout wording must still be rejected.
        assert_eq!(
            classify("timeout while checking: user not found"),
            RetryClass::Permanent
        );
    }

    #[test]
    fn unknown_errors_default_to_permanent() {
        assert_eq!(classify("something odd happened"), RetryClass::Permanent);
        assert_eq!(classify(""), RetryClass::Permanent);
    }

    #[test]
    fn success_maps_to_a_single_ack() {
        assert_eq!(disposition(&Ok(())), Disposition::Ack);
    }

    #[test]
    fn transient_failure_maps_to_requeue() {
        let outcome: anyhow::Result<()> = Err(anyhow!("context deadline exceeded"));
        assert_eq!(disposition(&outcome), Disposition::Requeue);
    }

    #[test]
    fn business_failure_maps_to_reject() {
        let outcome: anyhow::Result<()> = Err(anyhow!("no active devices for user: 42"));
        assert_eq!(disposition(&outcome), Disposition::Reject);
    }

    #[test]
    fn keywords_match_through_a_cause_chain() {
        let root = anyhow!("connection refused");
        let outcome: anyhow::Result<()> = Err(root.context("publishing status update"));
        assert_eq!(disposition(&outcome), Disposition::Requeue);
    }
}
