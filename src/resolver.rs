//! Temporal span resolution.
//!
//! Given a requested `[from, to]` and an ordered list of epochs, the resolver
//! walks a cursor forward through the epochs and emits the disjoint,
//! chronologically ordered sub-ranges each epoch serves. Years no epoch covers
//! are never filled; they are reported by [`Resolution::uncovered`].

use std::sync::Arc;

use crate::epoch::{Epoch, Source, YearRange};

/// Anything with a valid year interval for a given source.
pub trait Coverage {
    /// Valid years when serving `source`.
    fn coverage(&self, source: Source) -> YearRange;
}

impl Coverage for Epoch {
    fn coverage(&self, source: Source) -> YearRange {
        self.interval(source)
    }
}

impl Coverage for YearRange {
    fn coverage(&self, _source: Source) -> YearRange {
        *self
    }
}

impl<T: Coverage + ?Sized> Coverage for Arc<T> {
    fn coverage(&self, source: Source) -> YearRange {
        (**self).coverage(source)
    }
}

/// One epoch and the years it serves within a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSpan<E> {
    /// The serving epoch.
    pub epoch: E,
    /// Served years, a subset of both the epoch interval and the request.
    pub bounds: YearRange,
}

/// Result of resolving one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution<E> {
    /// The requested range.
    pub requested: YearRange,
    /// Spans, oldest first.
    pub spans: Vec<ResolvedSpan<E>>,
}

impl<E> Resolution<E> {
    /// Total number of covered years.
    #[must_use]
    pub fn covered(&self) -> usize {
        self.spans.iter().map(|s| s.bounds.len()).sum()
    }

    /// Maximal runs of requested years no span covers.
    #[must_use]
    pub fn uncovered(&self) -> Vec<YearRange> {
        let mut gaps = Vec::new();
        let mut cursor = self.requested.lo;
        for span in &self.spans {
            if span.bounds.lo > cursor {
                gaps.push(YearRange {
                    lo: cursor,
                    hi: span.bounds.lo - 1,
                });
            }
            cursor = span.bounds.hi + 1;
        }
        if cursor <= self.requested.hi {
            gaps.push(YearRange {
                lo: cursor,
                hi: self.requested.hi,
            });
        }
        gaps
    }

    /// Returns true if every requested year is covered.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.covered() == self.requested.len()
    }

    /// Returns true if no year is covered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}

/// Stateless resolver; safe to share and call concurrently.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpanResolver;

impl SpanResolver {
    /// Resolves `requested` against `epochs`, consumed greedily in order.
    ///
    /// # Examples
    ///
    /// ```
    /// use biosim::{Source, SpanResolver, YearRange};
    ///
    /// let epochs = [
    ///     YearRange::new(1941, 1970).unwrap(),
    ///     YearRange::new(1951, 1980).unwrap(),
    ///     YearRange::new(1981, 2010).unwrap(),
    /// ];
    /// let resolution = SpanResolver::resolve(YearRange::new(1965, 1995).unwrap(), Source::FromNormals, &epochs);
    /// let bounds: Vec<_> = resolution.spans.iter().map(|s| s.bounds.to_string()).collect();
    /// assert_eq!(bounds, ["1965-1970", "1971-1980", "1981-1995"]);
    /// ```
    #[must_use]
    pub fn resolve<E: Coverage + Clone>(requested: YearRange, source: Source, epochs: &[E]) -> Resolution<E> {
        let mut spans = Vec::new();
        let mut cursor = requested.lo;
        let to = requested.hi;

        for epoch in epochs {
            if cursor > to {
                break;
            }
            let interval = epoch.coverage(source);
            if cursor > interval.hi {
                continue;
            }
            if cursor < interval.lo {
                if to < interval.lo {
                    continue;
                }
                cursor = interval.lo;
            }
            let hi = to.min(interval.hi);
            spans.push(ResolvedSpan {
                epoch: epoch.clone(),
                bounds: YearRange { lo: cursor, hi },
            });
            cursor = hi + 1;
        }

        Resolution { requested, spans }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn yr(lo: i32, hi: i32) -> YearRange {
        YearRange::new(lo, hi).unwrap()
    }

    fn bounds<E>(r: &Resolution<E>) -> Vec<YearRange> {
        r.spans.iter().map(|s| s.bounds).collect()
    }

    fn normals_epochs() -> Vec<YearRange> {
        vec![yr(1941, 1970), yr(1951, 1980), yr(1981, 2010)]
    }

    #[test]
    fn single_span_inside_last_epoch() {
        let r = SpanResolver::resolve(yr(1995, 2005), Source::FromNormals, &normals_epochs());
        assert_eq!(bounds(&r), vec![yr(1995, 2005)]);
        assert_eq!(r.spans[0].epoch, yr(1981, 2010));
        assert!(r.is_complete());
    }

    #[test]
    fn overlapping_epochs_are_consumed_disjointly() {
        let r = SpanResolver::resolve(yr(1965, 1995), Source::FromNormals, &normals_epochs());
        assert_eq!(bounds(&r), vec![yr(1965, 1970), yr(1971, 1980), yr(1981, 1995)]);
        assert!(r.uncovered().is_empty());
    }

    #[test]
    fn cursor_clamps_to_epoch_start() {
        let r = SpanResolver::resolve(yr(1900, 1960), Source::FromNormals, &normals_epochs());
        assert_eq!(bounds(&r), vec![yr(1941, 1960)]);
        assert_eq!(r.uncovered(), vec![yr(1900, 1940)]);
        assert_eq!(r.covered(), 20);
        assert!(!r.is_complete());
    }

    #[test]
    fn gaps_between_epochs_are_reported() {
        let epochs = vec![yr(1950, 1959), yr(1970, 1979)];
        let r = SpanResolver::resolve(yr(1955, 1985), Source::FromNormals, &epochs);
        assert_eq!(bounds(&r), vec![yr(1955, 1959), yr(1970, 1979)]);
        assert_eq!(r.uncovered(), vec![yr(1960, 1969), yr(1980, 1985)]);
    }

    #[test]
    fn request_outside_every_epoch_is_empty() {
        let r = SpanResolver::resolve(yr(2050, 2060), Source::FromNormals, &normals_epochs());
        assert!(r.is_empty());
        assert_eq!(r.uncovered(), vec![yr(2050, 2060)]);

        let r = SpanResolver::resolve(yr(1800, 1810), Source::FromNormals, &normals_epochs());
        assert!(r.is_empty());
    }

    #[test]
    fn source_selects_epoch_interval() {
        use crate::catalog::EpochCatalog;
        use crate::epoch::Scenario;

        let catalog = EpochCatalog::standard(1);
        let observed = catalog.generation_epochs(Scenario::DEFAULT_PROJECTION, Source::FromObservation);
        let r = SpanResolver::resolve(yr(2015, 2025), Source::FromObservation, &observed);
        let b = bounds(&r);
        assert_eq!(b[0], yr(2015, 2019));
        assert_eq!(b[1], yr(2020, 2021));
        assert_eq!(b[2], yr(2022, 2025));
        assert!(r.spans[1].epoch.is_live());
        assert!(r.is_complete());

        let forced = catalog.generation_epochs(Scenario::Past, Source::FromNormals);
        let r = SpanResolver::resolve(yr(1940, 2000), Source::FromNormals, &forced);
        assert_eq!(r.uncovered(), vec![yr(1940, 1950)]);
    }

    fn epoch_list() -> impl Strategy<Value = Vec<YearRange>> {
        prop::collection::vec((1900i32..2100, 0i32..40), 0..8).prop_map(|raw| {
            let mut epochs: Vec<YearRange> = raw.into_iter().map(|(lo, len)| yr(lo, lo + len)).collect();
            epochs.sort();
            epochs
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn spans_are_disjoint_ordered_and_inside_request(
            epochs in epoch_list(),
            lo in 1880i32..2150,
            len in 0i32..120,
        ) {
            let requested = yr(lo, lo + len);
            let r = SpanResolver::resolve(requested, Source::FromNormals, &epochs);

            for span in &r.spans {
                prop_assert!(span.bounds.lo >= requested.lo && span.bounds.hi <= requested.hi);
                prop_assert!(span.bounds.lo >= span.epoch.lo && span.bounds.hi <= span.epoch.hi);
            }
            for pair in r.spans.windows(2) {
                prop_assert!(pair[0].bounds.hi < pair[1].bounds.lo);
            }

            let gaps: usize = r.uncovered().iter().map(YearRange::len).sum();
            prop_assert_eq!(r.covered() + gaps, requested.len());
        }

        #[test]
        fn covered_years_are_exactly_the_union_reachable_in_order(
            epochs in epoch_list(),
            lo in 1880i32..2150,
            len in 0i32..120,
        ) {
            // With epochs sorted by start, every requested year inside some epoch
            // is covered.
            let requested = yr(lo, lo + len);
            let r = SpanResolver::resolve(requested, Source::FromNormals, &epochs);
            for year in requested.lo..=requested.hi {
                let in_catalog = epochs.iter().any(|e| e.contains(year));
                let in_spans = r.spans.iter().any(|s| s.bounds.contains(year));
                prop_assert_eq!(in_catalog, in_spans, "year {}", year);
            }
        }
    }
}
