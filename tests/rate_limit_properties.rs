//! Concurrency properties of the sliding-window limiter.

mod common;

use proptest::prelude::*;
use std::sync::Arc;

use common::TestGuard;
use request_guard::config::GuardConfig;
use request_guard::guard::{Identity, SecurityGuard};
use request_guard::security::threat::RequestMetadata;

fn config_with_limit(limit: u32) -> GuardConfig {
    let mut config = GuardConfig::default();
    config.rate_limit.requests_per_window = limit;
    config.rate_limit.burst_limit = limit * 2;
    // spawned tasks can queue behind each other on a loaded runner
    config.rate_limit.store_timeout_ms = 5_000;
    config
}

async fn count_allowed(guard: Arc<SecurityGuard>, requests: usize) -> usize {
    let mut tasks = Vec::with_capacity(requests);
    for _ in 0..requests {
        let guard = guard.clone();
        tasks.push(tokio::spawn(async move {
            guard
                .limiter()
                .is_allowed("shared-user", "/upload")
                .await
                .allowed
        }));
    }

    let mut allowed = 0;
    for task in tasks {
        if task.await.expect("limiter task panicked") {
            allowed += 1;
        }
    }
    allowed
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_never_exceed_limit() {
    let harness = TestGuard::new(config_with_limit(25));
    let allowed = count_allowed(harness.guard.clone(), 80).await;
    assert_eq!(allowed, 25);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_evaluations_share_one_budget() {
    let harness = TestGuard::new(config_with_limit(10));
    let user = Identity::User("u-concurrent".into());

    let mut tasks = Vec::new();
    for i in 0..30 {
        let guard = harness.guard.clone();
        let user = user.clone();
        tasks.push(tokio::spawn(async move {
            let request = RequestMetadata::new(format!("198.51.100.{}", i + 1), "GET", "/feed");
            guard.evaluate(&request, &user).await.map(|d| d.allowed)
        }));
    }

    let mut allowed = 0;
    for task in tasks {
        if task.await.unwrap().unwrap() {
            allowed += 1;
        }
    }
    // keyed by user, not by address
    assert_eq!(allowed, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_independent_keys_do_not_interfere() {
    let harness = TestGuard::new(config_with_limit(5));
    let guard = harness.guard.clone();

    let mut tasks = Vec::new();
    for user in ["a", "b", "c"] {
        for endpoint in ["/x", "/y"] {
            for _ in 0..8 {
                let guard = guard.clone();
                tasks.push(tokio::spawn(async move {
                    guard.limiter().is_allowed(user, endpoint).await.allowed
                }));
            }
        }
    }

    let mut allowed = 0;
    for task in tasks {
        if task.await.unwrap() {
            allowed += 1;
        }
    }
    assert_eq!(allowed, 3 * 2 * 5);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_allowed_is_min_of_requests_and_limit(limit in 1u32..20, requests in 1usize..60) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();

        let allowed = runtime.block_on(async {
            let harness = TestGuard::new(config_with_limit(limit));
            count_allowed(harness.guard.clone(), requests).await
        });

        prop_assert_eq!(allowed, requests.min(limit as usize));
    }
}
