//! Per-span batch dispatch.
//!
//! For every resolved span, the dispatcher builds one call per location,
//! submits them as a single batch to the span's engine handle and restores
//! location order. Spans are dispatched oldest first. A batch that fails as a
//! whole turns into an error reply for each of its locations, so one bad span
//! never hides the locations of another request.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::engine::{EngineCall, EngineHandle, TeleIo};
use crate::epoch::{Epoch, YearRange};
use crate::registry::EngineRegistry;
use crate::resolver::Resolution;

/// One span's reply for one location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanOutput {
    /// Years the reply covers.
    pub bounds: YearRange,
    /// Engine reply.
    pub reply: TeleIo,
}

/// Runs batches on a handle, converting batch failures into per-location
/// error replies.
pub fn run_batch(handle: &EngineHandle, calls: Vec<EngineCall>) -> Vec<TeleIo> {
    let n = calls.len();
    match handle.submit_batch(calls) {
        Ok(replies) => replies,
        Err(e) => {
            warn!(handle = handle.id(), error = %e, "batch failed");
            vec![TeleIo::error(format!("Error: {e}")); n]
        }
    }
}

/// Dispatches spans of a resolution to the registry's handles.
#[derive(Debug, Clone, Copy)]
pub struct BatchDispatcher<'a> {
    registry: &'a EngineRegistry,
}

impl<'a> BatchDispatcher<'a> {
    /// Creates a dispatcher over `registry`.
    #[must_use]
    pub const fn new(registry: &'a EngineRegistry) -> Self {
        Self { registry }
    }

    /// Submits one batch to the handle serving `epoch`.
    ///
    /// The result always holds one reply per call, in call order.
    pub fn submit(&self, epoch: &Epoch, calls: Vec<EngineCall>) -> Vec<TeleIo> {
        match self.registry.epoch_handle(epoch) {
            Ok(handle) => run_batch(&handle, calls),
            Err(e) => {
                warn!(epoch = %epoch.id(), error = %e, "no engine for span");
                vec![TeleIo::error(format!("Error: {e}")); calls.len()]
            }
        }
    }

    /// Dispatches every span of `resolution` for `locations` locations.
    ///
    /// `make_call(epoch, bounds, index)` builds the call of location `index`.
    /// Returns, for each location, its span outputs oldest first.
    pub fn dispatch<F>(&self, resolution: &Resolution<Arc<Epoch>>, locations: usize, mut make_call: F) -> Vec<Vec<SpanOutput>>
    where
        F: FnMut(&Epoch, YearRange, usize) -> EngineCall,
    {
        let mut outputs: Vec<Vec<SpanOutput>> = vec![Vec::with_capacity(resolution.spans.len()); locations];
        for span in &resolution.spans {
            let calls = (0..locations).map(|i| make_call(&span.epoch, span.bounds, i)).collect();
            let replies = self.submit(&span.epoch, calls);
            debug!(epoch = %span.epoch.id(), bounds = %span.bounds, locations, "span dispatched");
            for (per_location, reply) in outputs.iter_mut().zip(replies) {
                per_location.push(SpanOutput {
                    bounds: span.bounds,
                    reply,
                });
            }
        }
        outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::EpochCatalog;
    use crate::config::WorkerSettings;
    use crate::engine::scripted::ScriptedFactory;
    use crate::epoch::{DataLayout, Scenario, Source};
    use crate::resolver::SpanResolver;

    #[test]
    fn spans_are_transposed_per_location() {
        let catalog = EpochCatalog::standard(2);
        let factory = ScriptedFactory::new().with_failing_latitude(10.0);
        let registry = EngineRegistry::new(
            &catalog,
            DataLayout::new("/srv/biosim"),
            Arc::new(factory),
            WorkerSettings::default(),
        );
        let epochs = catalog.generation_epochs(Scenario::Past, Source::FromObservation);
        let resolution = SpanResolver::resolve(YearRange::new(2018, 2021).unwrap(), Source::FromObservation, &epochs);
        assert_eq!(resolution.spans.len(), 2);

        let latitudes = [45.0, 10.0, 50.0];
        let outputs = BatchDispatcher::new(&registry).dispatch(&resolution, latitudes.len(), |_, bounds, i| {
            EngineCall::Generate {
                command: format!(
                    "Latitude={}&Longitude=-71&First_year={}&Last_year={}",
                    latitudes[i], bounds.lo, bounds.hi
                ),
            }
        });

        assert_eq!(outputs.len(), 3);
        for (i, spans) in outputs.iter().enumerate() {
            assert_eq!(spans.len(), 2);
            assert_eq!(spans[0].bounds, YearRange::new(2018, 2019).unwrap());
            assert_eq!(spans[1].bounds, YearRange::new(2020, 2021).unwrap());
            if i != 1 {
                let expected = format!("Latitude={}", latitudes[i]);
                assert!(spans.iter().all(|s| s.reply.metadata.starts_with(&expected)));
            }
        }
        assert!(outputs[1].iter().all(|s| !s.reply.is_success()));
        assert!(outputs[0].iter().chain(&outputs[2]).all(|s| s.reply.is_success()));
    }
}
