//! Error Classifier / Retrier.
//!
//! Grounded in `examples/original_source/error_handling/error_handler.py`:
//! the same three operations (`classify`, `retry`, `attempt`) and the same
//! "network tokens win over database tokens" priority rule, restated as
//! async Rust using `tokio::time::sleep` in place of the original's
//! `time.sleep`.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Error, ErrorKind};

/// Message tokens that force a `network` classification even when a
/// `database` token is also present (testable property #5).
const NETWORK_TOKENS: &[&str] = &[
    "connection refused",
    "ssl",
    "certificate",
    "http",
    "timeout",
    "timed out",
    "connection reset",
    "name or service not known",
    "dns",
];

const DATABASE_TOKENS: &[&str] = &[
    "sql", "database", "db ", "odbc", "sqlstate", "deadlock", "constraint",
];

const FILE_SYSTEM_TOKENS: &[&str] = &[
    "no such file",
    "permission denied",
    "disk full",
    "enospc",
    "not a directory",
    "io error",
];

const DATA_TOKENS: &[&str] = &["parse", "decode", "invalid xml", "json", "utf-8", "malformed"];

const CONFIGURATION_TOKENS: &[&str] = &["missing option", "config", "unset", "invalid setting"];

/// Classifies a free-text exception message into one of the six §7 kinds.
///
/// Network tokens are checked first, matching `error_handler.py`'s ordering
/// (the original checks network patterns before database patterns so that a
/// network error whose message happens to also mention "database" is still
/// classified as `network`).
pub fn classify_message(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();
    if NETWORK_TOKENS.iter().any(|t| lower.contains(t)) {
        return ErrorKind::Network;
    }
    if DATABASE_TOKENS.iter().any(|t| lower.contains(t)) {
        return ErrorKind::Database;
    }
    if FILE_SYSTEM_TOKENS.iter().any(|t| lower.contains(t)) {
        return ErrorKind::FileSystem;
    }
    if DATA_TOKENS.iter().any(|t| lower.contains(t)) {
        return ErrorKind::Data;
    }
    if CONFIGURATION_TOKENS.iter().any(|t| lower.contains(t)) {
        return ErrorKind::Configuration;
    }
    ErrorKind::Unknown
}

/// Classifies a structured [`Error`], falling back to message-token matching
/// for variants that don't already carry a kind.
pub fn classify(err: &Error) -> ErrorKind {
    match err {
        Error::Classified { kind, .. } => *kind,
        other => classify_message(&other.to_string()),
    }
}

/// Retries `op` while its classified kind is in `recoverable_kinds`, waiting
/// `base_delay * 2^attempt` between attempts.
///
/// Succeeds on the first non-erroring call. A kind outside
/// `recoverable_kinds` propagates immediately (testable property #2).
/// After `max_retries` recoverable failures, the last error is returned
/// wrapped in [`Error::RetriesExhausted`] (testable property #1).
pub async fn retry<F, Fut, T>(
    mut op: F,
    recoverable_kinds: &HashSet<ErrorKind>,
    max_retries: u32,
    base_delay_s: f64,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let kind = classify(&err);
                if !recoverable_kinds.contains(&kind) {
                    debug!(%kind, "non-recoverable error, propagating immediately");
                    return Err(err);
                }
                if attempt >= max_retries {
                    warn!(attempts = attempt + 1, %kind, "retries exhausted");
                    return Err(Error::RetriesExhausted {
                        attempts: attempt + 1,
                        last: Box::new(err),
                    });
                }
                let delay = Duration::from_secs_f64(base_delay_s * 2f64.powi(attempt as i32));
                debug!(attempt, ?delay, %kind, "retrying after recoverable error");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Invokes `op`; on any error, logs (tagged with `name`) and returns
/// `default` instead of propagating. Never fails (testable property #3).
pub async fn attempt<F, Fut, T>(op: F, default: T, name: &str) -> T
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    match op().await {
        Ok(value) => value,
        Err(err) => {
            warn!(operation = name, error = %err, "attempt failed, using default");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn recoverable() -> HashSet<ErrorKind> {
        HashSet::from([ErrorKind::Network])
    }

    #[tokio::test]
    async fn retry_invokes_exactly_n_times_then_fails() {
        let calls = Rc::new(Cell::new(0u32));
        let calls2 = calls.clone();
        let result: Result<(), Error> = retry(
            move || {
                calls2.set(calls2.get() + 1);
                async move { Err(Error::classified(ErrorKind::Network, "connection refused")) }
            },
            &recoverable(),
            3,
            0.001,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.get(), 4);
    }

    #[tokio::test]
    async fn retry_short_circuits_on_non_recoverable_kind() {
        let calls = Rc::new(Cell::new(0u32));
        let calls2 = calls.clone();
        let result: Result<(), Error> = retry(
            move || {
                calls2.set(calls2.get() + 1);
                async move { Err(Error::classified(ErrorKind::Configuration, "missing option")) }
            },
            &recoverable(),
            3,
            0.001,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn retry_succeeds_on_first_call() {
        let result: Result<i32, Error> = retry(
            || async { Ok(42) },
            &recoverable(),
            3,
            0.001,
        )
        .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn attempt_never_throws_and_returns_default() {
        let value = attempt(
            || async { Err::<i32, Error>(Error::internal("boom")) },
            -1,
            "test_op",
        )
        .await;
        assert_eq!(value, -1);
    }

    #[test]
    fn classification_priority_prefers_network_over_database() {
        assert_eq!(
            classify_message("database connection refused by SQL server"),
            ErrorKind::Network
        );
        assert_eq!(classify_message("ssl handshake failed"), ErrorKind::Network);
        assert_eq!(classify_message("sqlstate 23000 constraint violation"), ErrorKind::Database);
        assert_eq!(classify_message("no such file or directory"), ErrorKind::FileSystem);
        assert_eq!(classify_message("invalid xml payload"), ErrorKind::Data);
        assert_eq!(classify_message("missing option api_url"), ErrorKind::Configuration);
        assert_eq!(classify_message("something entirely unrelated"), ErrorKind::Unknown);
    }
}
