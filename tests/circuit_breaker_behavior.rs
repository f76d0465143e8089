//! Behaviour tests for the per-source circuit breaker registry.

use std::time::Duration;

use ferrofeed_core::{BreakerConfig, CircuitBreaker, CircuitState, ErrorKind};
use ferrofeed_tests::id;

#[tokio::test(start_paused = true)]
async fn five_consecutive_failures_open_until_cooldown_elapses() {
    // Given: a default breaker
    let breaker = CircuitBreaker::default();
    let source = id("flaky");

    // When: the source fails five times in a row
    for _ in 0..5 {
        assert!(breaker.allow(&source));
        breaker.record_failure(&source, ErrorKind::ServerError);
    }

    // Then: no permit is granted during the cooldown
    assert_eq!(breaker.state(&source), CircuitState::Open);
    assert!(!breaker.allow(&source));
    tokio::time::advance(Duration::from_secs(59)).await;
    assert!(!breaker.is_available(&source));

    // And: exactly one trial is granted once it elapses
    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(breaker.allow(&source));
    assert_eq!(breaker.state(&source), CircuitState::HalfOpen);
    assert!(!breaker.allow(&source));

    // And: a successful trial closes it
    breaker.record_success(&source, 40);
    assert_eq!(breaker.state(&source), CircuitState::Closed);
    assert_eq!(breaker.snapshot(&source).consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn one_success_resets_the_consecutive_count() {
    // Given
    let breaker = CircuitBreaker::default();
    let source = id("mostly-ok");

    // When: four failures, one success, four failures
    for _ in 0..4 {
        breaker.record_failure(&source, ErrorKind::Timeout);
    }
    breaker.record_success(&source, 10);
    for _ in 0..4 {
        breaker.record_failure(&source, ErrorKind::Timeout);
    }

    // Then: the threshold of five consecutive failures was never reached
    assert_eq!(breaker.state(&source), CircuitState::Closed);
    assert_eq!(breaker.snapshot(&source).consecutive_failures, 4);
}

#[tokio::test(start_paused = true)]
async fn failed_trial_doubles_the_cooldown() {
    // Given: an open breaker
    let breaker = CircuitBreaker::default();
    let source = id("down");
    for _ in 0..5 {
        breaker.record_failure(&source, ErrorKind::ServerError);
    }

    // When: the trial after the first cooldown fails
    tokio::time::advance(Duration::from_secs(60)).await;
    assert!(breaker.allow(&source));
    breaker.record_failure(&source, ErrorKind::ServerError);

    // Then: it stays open for twice as long
    assert_eq!(breaker.state(&source), CircuitState::Open);
    assert_eq!(breaker.snapshot(&source).cooldown_remaining_ms, 120_000);
    tokio::time::advance(Duration::from_secs(119)).await;
    assert!(!breaker.allow(&source));
    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(breaker.allow(&source));
}

#[tokio::test(start_paused = true)]
async fn rate_limiting_opens_immediately_with_growing_cooldown() {
    // Given
    let breaker = CircuitBreaker::default();
    let source = id("throttled");

    // When: a single RateLimited outcome arrives
    breaker.record_failure(&source, ErrorKind::RateLimited);

    // Then: the breaker opens for the short rate-limit cooldown
    assert_eq!(breaker.state(&source), CircuitState::Open);
    assert_eq!(breaker.snapshot(&source).cooldown_remaining_ms, 5_000);

    // And: a throttled trial doubles it
    tokio::time::advance(Duration::from_secs(5)).await;
    assert!(breaker.allow(&source));
    breaker.record_failure(&source, ErrorKind::RateLimited);
    assert_eq!(breaker.snapshot(&source).cooldown_remaining_ms, 10_000);
}

#[tokio::test(start_paused = true)]
async fn geo_blocking_uses_the_long_cooldown() {
    // Given
    let breaker = CircuitBreaker::default();
    let source = id("region-locked");

    // When
    breaker.record_failure(&source, ErrorKind::GeoBlocked);

    // Then
    let health = breaker.snapshot(&source);
    assert_eq!(health.state, CircuitState::Open);
    assert_eq!(health.cooldown_remaining_ms, 3_600_000);
    assert_eq!(health.last_error, Some(ErrorKind::GeoBlocked));
}

#[tokio::test(start_paused = true)]
async fn not_found_never_opens_and_closes_a_half_open_breaker() {
    // Given
    let breaker = CircuitBreaker::default();
    let source = id("sparse");

    // When: NotFound is recorded many times
    for _ in 0..50 {
        breaker.record_failure(&source, ErrorKind::NotFound);
    }

    // Then
    assert_eq!(breaker.state(&source), CircuitState::Closed);
    assert_eq!(breaker.snapshot(&source).failure_count, 0);

    // And: in half-open it proves the source reachable
    breaker.record_failure(&source, ErrorKind::AuthFailed);
    tokio::time::advance(Duration::from_secs(3_600)).await;
    assert!(breaker.allow(&source));
    breaker.record_failure(&source, ErrorKind::NotFound);
    assert_eq!(breaker.state(&source), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn failure_rate_over_full_window_opens() {
    // Given: a small window with a lenient consecutive threshold
    let breaker = CircuitBreaker::new(BreakerConfig {
        failure_threshold: 100,
        window_size: 4,
        ..BreakerConfig::default()
    });
    let source = id("coin-flip");

    // When: three failures interleave with one success
    breaker.record_failure(&source, ErrorKind::Timeout);
    breaker.record_success(&source, 1);
    breaker.record_failure(&source, ErrorKind::Timeout);
    assert_eq!(breaker.state(&source), CircuitState::Closed);
    breaker.record_failure(&source, ErrorKind::Timeout);

    // Then: 3/4 > 50 % with a full window
    assert_eq!(breaker.state(&source), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn abandoned_trial_releases_the_slot() {
    // Given: a half-open breaker with its trial handed out
    let breaker = CircuitBreaker::default();
    let source = id("slow");
    breaker.record_failure(&source, ErrorKind::RateLimited);
    tokio::time::advance(Duration::from_secs(5)).await;
    assert!(breaker.allow(&source));
    assert!(!breaker.is_available(&source));

    // When: the trial is abandoned
    breaker.record_abandoned(&source);

    // Then: another caller may take the trial
    assert_eq!(breaker.state(&source), CircuitState::HalfOpen);
    assert!(breaker.allow(&source));
}

#[test]
fn unknown_sources_start_closed() {
    let breaker = CircuitBreaker::default();
    assert!(breaker.is_available(&id("never-seen")));
    assert_eq!(breaker.state(&id("never-seen")), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn dropped_trial_permit_frees_the_slot() {
    // Given: a half-open breaker
    let breaker = CircuitBreaker::default();
    let source = id("cancelled");
    breaker.record_failure(&source, ErrorKind::RateLimited);
    tokio::time::advance(Duration::from_secs(5)).await;

    // When: the trial permit is dropped without a verdict
    let permit = breaker.acquire(&source).expect("trial granted");
    assert!(permit.is_trial());
    assert!(!breaker.is_available(&source));
    drop(permit);

    // Then: the trial can be taken again
    assert_eq!(breaker.state(&source), CircuitState::HalfOpen);
    assert!(breaker.is_available(&source));
    let retry = breaker.acquire(&source).expect("trial granted again");
    retry.record_success(25);
    assert_eq!(breaker.state(&source), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn stale_trial_permit_does_not_release_a_later_trial() {
    // Given: a trial that is still out when a late failure reopens the breaker
    let breaker = CircuitBreaker::default();
    let source = id("reopened");
    breaker.record_failure(&source, ErrorKind::RateLimited);
    tokio::time::advance(Duration::from_secs(5)).await;
    let first = breaker.acquire(&source).expect("first trial");
    breaker.record_failure(&source, ErrorKind::ServerError);
    assert_eq!(breaker.state(&source), CircuitState::Open);

    // When: a second trial is granted and the first permit is dropped afterwards
    tokio::time::advance(Duration::from_secs(10)).await;
    let second = breaker.acquire(&source).expect("second trial");
    drop(first);

    // Then: the second trial keeps its slot
    assert!(!breaker.is_available(&source));
    second.record_success(30);
    assert_eq!(breaker.state(&source), CircuitState::Closed);
}

#[test]
fn closed_permit_is_not_a_trial() {
    let breaker = CircuitBreaker::default();
    let permit = breaker.acquire(&id("steady")).expect("closed breaker grants");
    assert!(!permit.is_trial());
    drop(permit);
    assert_eq!(breaker.state(&id("steady")), CircuitState::Closed);
}
