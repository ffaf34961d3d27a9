use std::sync::Arc;

use proptest::prelude::*;

use biosim::engine::scripted::ScriptedFactory;
use biosim::epoch::{ClimateModel, Rcp};
use biosim::{
    BioSimConfig, BioSimService, EpochCatalog, GenerationRequest, Location, ReferenceCache, Scenario, Source,
    SpanResolver, YearRange,
};

fn scenario_strategy() -> impl Strategy<Value = Scenario> {
    (
        prop::sample::select(Rcp::ALL.to_vec()),
        prop::sample::select(ClimateModel::ALL.to_vec()),
    )
        .prop_map(|(rcp, model)| Scenario::Projected { rcp, model })
}

fn range_within(lo: i32, hi: i32) -> impl Strategy<Value = YearRange> {
    (lo..=hi, lo..=hi).prop_map(|(a, b)| YearRange::new(a.min(b), a.max(b)).unwrap())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn observations_then_projections_cover_the_whole_century(
        scenario in scenario_strategy(),
        requested in range_within(1900, 2100),
    ) {
        let catalog = EpochCatalog::standard(1);
        let epochs = catalog.generation_epochs(scenario, Source::FromObservation);
        let resolution = SpanResolver::resolve(requested, Source::FromObservation, &epochs);
        prop_assert!(resolution.is_complete(), "{:?}", resolution.uncovered());
        for span in &resolution.spans {
            prop_assert!(span.epoch.interval(Source::FromObservation).contains(span.bounds.lo));
            prop_assert!(span.epoch.interval(Source::FromObservation).contains(span.bounds.hi));
        }
    }

    #[test]
    fn forced_generation_never_uses_daily_data(
        scenario in scenario_strategy(),
        requested in range_within(1951, 2100),
    ) {
        let catalog = EpochCatalog::standard(1);
        let epochs = catalog.generation_epochs(scenario, Source::FromNormals);
        let resolution = SpanResolver::resolve(requested, Source::FromNormals, &epochs);
        prop_assert!(resolution.is_complete());
        prop_assert!(resolution.spans.iter().all(|s| s.epoch.daily().is_none()));
    }

    #[test]
    fn past_scenario_stops_at_the_last_observation(requested in range_within(1900, 2100)) {
        let catalog = EpochCatalog::standard(1);
        let last = catalog.last_observed_year(Source::FromObservation).unwrap();
        let epochs = catalog.generation_epochs(Scenario::Past, Source::FromObservation);
        let resolution = SpanResolver::resolve(requested, Source::FromObservation, &epochs);
        prop_assert!(resolution.spans.iter().all(|s| s.bounds.hi <= last));
        prop_assert_eq!(resolution.is_complete(), requested.hi <= last);
    }

    #[test]
    fn cache_keeps_the_most_recent_entries(capacity in 1usize..32, puts in 0usize..96) {
        let cache = ReferenceCache::new(capacity);
        let handles: Vec<_> = (0..puts).map(|i| cache.put(i).unwrap()).collect();
        prop_assert_eq!(cache.len().unwrap(), puts.min(capacity));
        let kept = puts.saturating_sub(capacity);
        for (i, handle) in handles.iter().enumerate() {
            let found = cache.get(handle).unwrap();
            if i < kept {
                prop_assert!(found.is_none());
            } else {
                prop_assert_eq!(found.as_deref(), Some(&i));
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn generated_series_is_continuous(requested in range_within(1990, 2040), replicates in 1u32..4) {
        let mut config = BioSimConfig::default();
        config.workers.lazy_start = true;
        let service = BioSimService::new(config, Arc::new(ScriptedFactory::new())).unwrap();

        let request = GenerationRequest::new(vec![Location::new(46.8, -71.2)], requested.lo, requested.hi)
            .with_replicates(replicates);
        let series = service.generate_series(&request).unwrap();
        let merged = series.locations[0].as_ref().unwrap();

        prop_assert_eq!(merged.replicates().len(), replicates as usize);
        for rows in merged.replicates() {
            let years: Vec<i32> = rows.iter().map(|r| r.fields[0].parse().unwrap()).collect();
            prop_assert_eq!(years.len(), 2 * requested.len());
            prop_assert_eq!(years[0], requested.lo);
            prop_assert_eq!(*years.last().unwrap(), requested.hi);
            prop_assert!(years.windows(2).all(|w| w[1] == w[0] || w[1] == w[0] + 1));
        }
    }
}
