//! Tests for the retry policy and `with_retry`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use enclave_mail::session::retry::{with_retry, RetryPolicy};
use enclave_mail::SessionConfig;

#[test]
fn retry_policy_default_values() {
    let p = RetryPolicy::default();
    assert_eq!(p.max_retries, 3);
    assert_eq!(p.initial_delay, Duration::from_secs(1));
    assert_eq!(p.max_delay, Duration::from_secs(30));
    assert!((p.backoff_multiplier - 2.0).abs() < f64::EPSILON);
}

#[test]
fn delay_stays_within_jitter_and_cap() {
    let p = RetryPolicy {
        max_retries: 10,
        initial_delay: Duration::from_millis(100),
        max_delay: Duration::from_millis(500),
        backoff_multiplier: 3.0,
    };

    // attempt 1: base 300ms, jittered into [150ms, 300ms].
    let d1 = p.delay_for_attempt(1);
    assert!(d1 >= Duration::from_millis(150) && d1 <= Duration::from_millis(300));

    // attempt 6: base far above the cap, so [250ms, 500ms].
    let d6 = p.delay_for_attempt(6);
    assert!(d6 >= Duration::from_millis(250) && d6 <= Duration::from_millis(500));
}

#[tokio::test]
async fn none_policy_tries_once() {
    let calls = Arc::new(AtomicU32::new(0));
    let result: Result<(), String> = with_retry(&RetryPolicy::none(), || {
        let calls = Arc::clone(&calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("refused".to_owned())
        }
    })
    .await;

    assert_eq!(result.unwrap_err(), "refused");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn succeeds_after_transient_failures() {
    let calls = Arc::new(AtomicU32::new(0));
    let policy = RetryPolicy {
        max_retries: 4,
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(8),
        backoff_multiplier: 2.0,
    };

    let result: Result<u32, String> = with_retry(&policy, || {
        let calls = Arc::clone(&calls);
        async move {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            if attempt < 3 {
                Err(format!("attempt {attempt} refused"))
            } else {
                Ok(attempt)
            }
        }
    })
    .await;

    assert_eq!(result.unwrap(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn exhausted_returns_last_error() {
    let calls = Arc::new(AtomicU32::new(0));
    let policy = RetryPolicy {
        max_retries: 2,
        ..RetryPolicy::default()
    };

    let result: Result<(), String> = with_retry(&policy, || {
        let calls = Arc::clone(&calls);
        async move {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            Err(format!("attempt {attempt} refused"))
        }
    })
    .await;

    assert_eq!(result.unwrap_err(), "attempt 2 refused");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn session_config_carries_retry_policy() {
    let config = SessionConfig::builder()
        .retry_policy(RetryPolicy::none())
        .build()
        .unwrap();
    assert_eq!(config.retry_policy.map(|p| p.max_retries), Some(0));
}
