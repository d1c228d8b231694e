use super::*;
use std::sync::atomic::{AtomicU32, Ordering};

// =============================================================================
// RetryPolicy
// =============================================================================

#[test]
fn default_policy_is_three_attempts_one_second() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.max_attempts, 3);
    assert_eq!(policy.delay, Duration::from_millis(1000));
}

#[test]
fn zero_attempts_normalized_to_one() {
    assert_eq!(RetryPolicy::new(0, Duration::ZERO).attempts(), 1);
}

// =============================================================================
// with_retry
// =============================================================================

#[tokio::test(start_paused = true)]
async fn returns_first_usable_value_without_further_attempts() {
    let calls = AtomicU32::new(0);
    let out: Result<Option<u32>, String> = with_retry(RetryPolicy::default(), "test", |attempt| {
        calls.fetch_add(1, Ordering::SeqCst);
        async move { Ok(Some(attempt)) }
    })
    .await;
    assert_eq!(out, Ok(Some(1)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn permanent_failure_invokes_exactly_max_attempts() {
    for n in 1..=5 {
        let calls = AtomicU32::new(0);
        let out: Result<Option<()>, String> =
            with_retry(RetryPolicy::new(n, Duration::from_millis(10)), "test", |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(format!("fail {attempt}")) }
            })
            .await;
        assert_eq!(out, Err(format!("fail {n}")));
        assert_eq!(calls.load(Ordering::SeqCst), n);
    }
}

#[tokio::test(start_paused = true)]
async fn not_usable_on_final_attempt_is_none_not_error() {
    let out: Result<Option<()>, String> =
        with_retry(RetryPolicy::new(2, Duration::from_millis(5)), "test", |_| async { Ok(None) }).await;
    assert_eq!(out, Ok(None));
}

#[tokio::test(start_paused = true)]
async fn waits_fixed_delay_between_attempts_only() {
    let start = tokio::time::Instant::now();
    let out: Result<Option<u32>, String> =
        with_retry(RetryPolicy::new(3, Duration::from_millis(1000)), "test", |attempt| async move {
            if attempt < 3 { Ok(None) } else { Ok(Some(attempt)) }
        })
        .await;
    assert_eq!(out, Ok(Some(3)));
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(2000), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(2100), "elapsed {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn error_then_success_recovers() {
    let out: Result<Option<&str>, String> =
        with_retry(RetryPolicy::new(3, Duration::from_millis(1)), "test", |attempt| async move {
            if attempt == 1 { Err("transient".to_owned()) } else { Ok(Some("ok")) }
        })
        .await;
    assert_eq!(out, Ok(Some("ok")));
}
