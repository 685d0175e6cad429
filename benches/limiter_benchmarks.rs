use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ratekeeper::rate_limit::{
    ManualClock, RateLimitCategory, RateLimitPolicy, RateLimiter,
};
use std::sync::Arc;
use std::time::Duration;

fn benchmark_can_proceed_granted(c: &mut Criterion) {
    let limiter = RateLimiter::builder()
        .policy(
            RateLimitCategory::Gateway,
            RateLimitPolicy::new(0.0, 0, 0.0),
        )
        .build()
        .expect("valid policy");

    c.bench_function("can_proceed_unlimited", |b| {
        b.iter(|| limiter.can_proceed(black_box(RateLimitCategory::Gateway), 1))
    });
}

fn benchmark_can_proceed_denied(c: &mut Criterion) {
    let clock = Arc::new(ManualClock::starting_now());
    let limiter = RateLimiter::builder()
        .clock(clock)
        .build()
        .expect("default policies are valid");
    while limiter.can_proceed(RateLimitCategory::MessageSend, 1).granted {}

    c.bench_function("can_proceed_denied", |b| {
        b.iter(|| limiter.can_proceed(black_box(RateLimitCategory::MessageSend), 1))
    });
}

fn benchmark_cooldown_check(c: &mut Criterion) {
    let limiter = RateLimiter::new();
    limiter.trigger_cooldown(RateLimitCategory::Webhook, Some(Duration::from_secs(3600)));

    c.bench_function("can_proceed_cooling_down", |b| {
        b.iter(|| limiter.can_proceed(black_box(RateLimitCategory::Webhook), 1))
    });
}

fn benchmark_stats(c: &mut Criterion) {
    let mut group = c.benchmark_group("stats_by_history_size");

    for history in [10usize, 100, 1000] {
        let clock = Arc::new(ManualClock::starting_now());
        let limiter = RateLimiter::builder()
            .clock(clock.clone())
            .policy(
                RateLimitCategory::ApiRequest,
                RateLimitPolicy::new(0.0, 0, 0.0),
            )
            .build()
            .expect("valid policy");
        for _ in 0..history {
            limiter.can_proceed(RateLimitCategory::ApiRequest, 1);
            clock.advance(Duration::from_millis(10));
        }

        group.bench_with_input(BenchmarkId::from_parameter(history), &limiter, |b, limiter| {
            b.iter(|| limiter.stats(black_box(RateLimitCategory::ApiRequest)))
        });
    }

    group.finish();
}

fn benchmark_contended_threads(c: &mut Criterion) {
    let limiter = Arc::new(
        RateLimiter::builder()
            .policy(
                RateLimitCategory::ApiRequest,
                RateLimitPolicy::new(1_000_000.0, 1_000_000, 0.0),
            )
            .build()
            .expect("valid policy"),
    );

    c.bench_function("can_proceed_4_threads", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let limiter = limiter.clone();
                    std::thread::spawn(move || {
                        for _ in 0..100 {
                            limiter.can_proceed(RateLimitCategory::ApiRequest, 1);
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
        })
    });
}

criterion_group!(
    benches,
    benchmark_can_proceed_granted,
    benchmark_can_proceed_denied,
    benchmark_cooldown_check,
    benchmark_stats,
    benchmark_contended_threads
);
criterion_main!(benches);
