use std::time::Duration;

use proptest::prelude::*;

use subharvest_engine::catalog::QueryCatalog;
use subharvest_engine::limiter::{AdaptiveLimiter, LimiterConfig};
use subharvest_engine::pool::{DynamicPool, PoolConfig};

proptest! {
    /// The effective rate and success EMA stay inside their bounds for any
    /// report sequence.
    #[test]
    fn limiter_bounds_hold_for_any_report_sequence(
        outcomes in prop::collection::vec((any::<bool>(), 0_u64..3_000), 1..200),
        initial in 1.0_f64..40.0,
        min in 0.5_f64..5.0,
        max in 10.0_f64..100.0,
    ) {
        let limiter = AdaptiveLimiter::new(LimiterConfig {
            initial_rate: initial,
            min_rate: min,
            max_rate: max,
            burst: 10,
        });
        let floor = min;
        let ceiling = max.max(initial).max(min);

        for (success, latency_ms) in outcomes {
            limiter.report(success, Duration::from_millis(latency_ms));
            let rate = limiter.current_rate();
            prop_assert!(rate >= floor - 1e-9, "rate {rate} fell below {floor}");
            prop_assert!(rate <= ceiling + 1e-9, "rate {rate} rose above {ceiling}");
            let ema = limiter.success_ema();
            prop_assert!((0.0..=1.0).contains(&ema), "ema {ema} out of range");
        }
    }

    /// Failures never increase the rate.
    #[test]
    fn limiter_rate_is_monotone_under_failures(
        latencies in prop::collection::vec(0_u64..1_000, 1..50),
    ) {
        let limiter = AdaptiveLimiter::new(LimiterConfig::default());
        let mut previous = limiter.current_rate();
        for latency_ms in latencies {
            limiter.report(false, Duration::from_millis(latency_ms));
            let rate = limiter.current_rate();
            prop_assert!(rate <= previous + 1e-9);
            previous = rate;
        }
    }

    /// Rendering leaves no placeholder behind, for any cursor and page size.
    #[test]
    fn render_erases_all_placeholders(
        cursor in "[a-z0-9]{0,24}",
        first in 1_usize..10_000,
    ) {
        let template = "{ tokens(first: {FIRST}{CURSOR}) { id } }";
        let rendered = QueryCatalog::render(template, &cursor, first);
        prop_assert!(!rendered.contains("{FIRST}"), "placeholder not erased");
        prop_assert!(!rendered.contains("{CURSOR}"), "placeholder not erased");
        prop_assert!(rendered.contains(&first.to_string()), "missing first value");
        if !cursor.is_empty() {
            let needle = format!("id_gt: \"{cursor}\"");
            prop_assert!(rendered.contains(&needle), "missing cursor value");
        }
    }

    /// The worker count honors its bounds through any resize sequence.
    #[test]
    fn pool_worker_count_stays_in_bounds_under_resizes(
        sizes in prop::collection::vec(0_usize..30, 1..16),
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let pool = DynamicPool::new(PoolConfig {
                initial_workers: 3,
                min_workers: 2,
                max_workers: 8,
                queue_size: 4,
                ..PoolConfig::default()
            });
            for size in sizes {
                pool.resize(size);
                let workers = pool.metrics().workers;
                assert!(
                    (2..=8).contains(&workers),
                    "worker count {workers} out of bounds"
                );
            }
            pool.close().await;
        });
    }

    /// The derived paginated variant of any registered template renders
    /// cleanly too.
    #[test]
    fn derived_templates_render_cleanly(first in 1_usize..5_000) {
        let mut catalog = QueryCatalog::new();
        catalog.register_default("tokens", "{\n  tokens(first: 1000) {\n    id\n  }\n}");
        let template = catalog
            .paginated(
                &subharvest_types::QueryKind::new("tokens"),
                &subharvest_types::Endpoint::new("anything"),
            )
            .unwrap()
            .to_owned();
        let rendered = QueryCatalog::render(&template, "abc", first);
        prop_assert!(!rendered.contains("{FIRST}"), "placeholder not erased");
        prop_assert!(!rendered.contains("{CURSOR}"), "placeholder not erased");
    }
}
