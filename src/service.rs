//! The request-serving facade.
//!
//! [`BioSimService`] owns the epoch catalog, the engine registry and the
//! reference cache. Every operation validates first, resolves the requested
//! years onto epochs, dispatches one batch per span and merges the replies.
//! Failures of a single location are reported in that location's slot and
//! never fail the other locations of the request.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheHandle, ReferenceCache};
use crate::catalog::EpochCatalog;
use crate::command;
use crate::config::BioSimConfig;
use crate::dispatch::{run_batch, BatchDispatcher, SpanOutput};
use crate::engine::{EngineCall, EngineFactory};
use crate::epoch::{Epoch, YearRange};
use crate::error::{BioSimResult, ResourceError, ValidationError};
use crate::merge::{MergeMode, MergedSeries, ResultMerger};
use crate::models::{ModelDescriptor, ModelSpec, MODELS};
use crate::output::{MaxCoordinates, NormalsOutput, Response, SeriesOutput};
use crate::registry::EngineRegistry;
use crate::request::{GenerationRequest, GenerationThenModelRequest, Location, ModelRequest, NormalsRequest, Request};
use crate::resolver::{Resolution, SpanResolver};
use crate::rotation::{DailyRotation, DailyRotationScheduler, DataRefresher, DayOfYear};

/// Generated weather for one location, kept in the reference cache.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedWeather {
    /// Where the weather was generated.
    pub location: Location,
    /// Years requested.
    pub requested: YearRange,
    /// Replicates per span.
    pub replicates: usize,
    /// Last observed year, `None` when generation was forced.
    pub last_observed: Option<i32>,
    /// Span replies oldest first, or the message explaining the failure.
    pub outcome: Result<Vec<SpanOutput>, String>,
}

/// Serves normals, weather generation and model requests.
pub struct BioSimService {
    config: BioSimConfig,
    catalog: EpochCatalog,
    registry: Arc<EngineRegistry>,
    cache: ReferenceCache<GeneratedWeather>,
}

impl BioSimService {
    /// Builds the service over the standard catalog.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for an invalid configuration and
    /// `InitError` if an engine fails to start (unless lazy start is set).
    pub fn new(config: BioSimConfig, factory: Arc<dyn EngineFactory>) -> BioSimResult<Self> {
        let catalog = EpochCatalog::standard(config.workers.generation_workers());
        Self::with_catalog(config, catalog, factory)
    }

    /// Builds the service over `catalog`.
    ///
    /// # Errors
    ///
    /// See [`BioSimService::new`].
    pub fn with_catalog(config: BioSimConfig, catalog: EpochCatalog, factory: Arc<dyn EngineFactory>) -> BioSimResult<Self> {
        config.validate()?;
        let registry = Arc::new(EngineRegistry::new(
            &catalog,
            config.layout(),
            factory,
            config.workers,
        ));
        if !config.workers.lazy_start {
            registry.start_all()?;
        }
        let cache = ReferenceCache::new(config.limits.cache_capacity);
        info!(
            epochs = catalog.len(),
            cache_capacity = cache.capacity(),
            lazy = config.workers.lazy_start,
            "biosim service ready"
        );
        Ok(Self {
            config,
            catalog,
            registry,
            cache,
        })
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &BioSimConfig {
        &self.config
    }

    /// Epoch catalog.
    #[must_use]
    pub const fn catalog(&self) -> &EpochCatalog {
        &self.catalog
    }

    /// Engine registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<EngineRegistry> {
        &self.registry
    }

    /// Starts the daily rotation of the live epoch when enabled.
    ///
    /// Returns `None` when rotation is disabled or the catalog has no live
    /// epoch.
    ///
    /// # Errors
    ///
    /// Returns `InitError::WorkerSpawn` if the scheduler thread cannot start.
    pub fn start_rotation(&self, refresher: Arc<dyn DataRefresher>, today: DayOfYear) -> BioSimResult<Option<DailyRotationScheduler>> {
        if !self.config.rotation.enabled {
            return Ok(None);
        }
        let Some(live) = self.catalog.live_epoch() else {
            warn!("rotation enabled but the catalog has no live epoch");
            return Ok(None);
        };
        let rotation = DailyRotation::new(Arc::clone(&self.registry), live, refresher, today());
        let scheduler = DailyRotationScheduler::start(rotation, self.config.rotation.check_interval(), today)?;
        Ok(Some(scheduler))
    }

    /// Serves any request.
    ///
    /// # Errors
    ///
    /// See the operation serving each request kind.
    pub fn process(&self, request: &Request) -> BioSimResult<Response> {
        match request {
            Request::Normals(r) => self.normals(r).map(Response::Normals),
            Request::Generation(r) => self.generate(r).map(Response::Handles),
            Request::Model(r) => self.run_model(r).map(Response::Series),
            Request::GenerationThenModel(r) => self.generate_then_model(r).map(Response::Series),
        }
    }

    /// Climate normals, one reply per location.
    ///
    /// # Errors
    ///
    /// Returns a validation or resource error for a rejected request, and
    /// `ValidationError::UnknownValue` when the period does not exist under
    /// the scenario.
    #[instrument(skip_all, fields(locations = request.locations.len(), period = %request.period.short()))]
    pub fn normals(&self, request: &NormalsRequest) -> BioSimResult<NormalsOutput> {
        request.validate(&self.config.limits)?;
        let epoch = self
            .catalog
            .normals_epoch(request.scenario, request.period)
            .ok_or_else(|| ValidationError::UnknownValue {
                field: "period".to_string(),
                value: request.period.short(),
                allowed: "a period of the selected scenario".to_string(),
            })?;
        let calls = request
            .locations
            .iter()
            .map(|location| EngineCall::Normals {
                command: command::normals(location),
            })
            .collect();
        let replies = BatchDispatcher::new(&self.registry).submit(&epoch, calls);
        Ok(NormalsOutput { replies })
    }

    /// Resolves the requested years onto generation epochs.
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::IncompleteCoverage` when no year is covered,
    /// or when some year is not covered and partial coverage is not allowed.
    pub fn resolve(&self, request: &GenerationRequest) -> BioSimResult<Resolution<Arc<Epoch>>> {
        let requested = request.range()?;
        let epochs = self.catalog.generation_epochs(request.scenario, request.source);
        let resolution = SpanResolver::resolve(requested, request.source, &epochs);
        if resolution.is_empty() || (!resolution.is_complete() && !self.config.coverage.allow_partial) {
            let uncovered: Vec<String> = resolution.uncovered().iter().map(ToString::to_string).collect();
            return Err(ResourceError::IncompleteCoverage {
                from: requested.lo,
                to: requested.hi,
                uncovered: uncovered.join(", "),
            }
            .into());
        }
        if !resolution.is_complete() {
            warn!(requested = %requested, covered = resolution.covered(), "serving partial coverage");
        }
        Ok(resolution)
    }

    fn dispatch_generation(&self, request: &GenerationRequest) -> BioSimResult<(Resolution<Arc<Epoch>>, Vec<Vec<SpanOutput>>)> {
        request.validate(&self.config.limits)?;
        let resolution = self.resolve(request)?;
        let outputs = BatchDispatcher::new(&self.registry).dispatch(&resolution, request.locations.len(), |epoch, bounds, i| {
            EngineCall::Generate {
                command: command::generation(&request.locations[i], request, epoch, bounds),
            }
        });
        debug!(spans = resolution.spans.len(), "generation dispatched");
        Ok((resolution, outputs))
    }

    fn generate_weather(&self, request: &GenerationRequest) -> BioSimResult<Vec<GeneratedWeather>> {
        let (resolution, outputs) = self.dispatch_generation(request)?;
        let replicates = request.replicate_count();
        let merger = ResultMerger::new(MergeMode::WeatherGeneration, replicates);
        let last_observed = self.catalog.last_observed_year(request.source);
        Ok(request
            .locations
            .iter()
            .zip(outputs)
            .map(|(location, parts)| {
                let outcome = match merger.merge(parts.iter().map(|p| (p.bounds, &p.reply))) {
                    Ok(_) => Ok(parts),
                    Err(e) => Err(e.to_string()),
                };
                GeneratedWeather {
                    location: *location,
                    requested: resolution.requested,
                    replicates,
                    last_observed,
                    outcome,
                }
            })
            .collect())
    }

    /// Generates weather and caches it; returns one handle per location, in
    /// request order. Failed locations get a handle too, and a model run over
    /// it reports the failure.
    ///
    /// # Errors
    ///
    /// Returns a validation or resource error for a rejected request.
    #[instrument(skip_all, fields(locations = request.locations.len(), from = request.from, to = request.to))]
    pub fn generate(&self, request: &GenerationRequest) -> BioSimResult<Vec<CacheHandle>> {
        let weather = self.generate_weather(request)?;
        let handles = weather
            .into_iter()
            .map(|w| self.cache.put(w))
            .collect::<BioSimResult<Vec<_>>>()?;
        info!(handles = handles.len(), "weather generated");
        Ok(handles)
    }

    /// Generates weather and returns the merged series without caching.
    ///
    /// # Errors
    ///
    /// Returns a validation or resource error for a rejected request.
    pub fn generate_series(&self, request: &GenerationRequest) -> BioSimResult<SeriesOutput> {
        let (_, outputs) = self.dispatch_generation(request)?;
        let merger = ResultMerger::new(MergeMode::WeatherGeneration, request.replicate_count());
        let locations = outputs
            .iter()
            .map(|parts| {
                merger
                    .merge(parts.iter().map(|p| (p.bounds, &p.reply)))
                    .map_err(|e| e.to_string())
            })
            .collect();
        Ok(SeriesOutput { locations })
    }

    /// Runs a model over cached weather.
    ///
    /// # Errors
    ///
    /// Returns a validation or resource error for a rejected request,
    /// `ResourceError::HandlesNotFound` listing every unknown handle, and
    /// `InitError` if the model engine fails to start.
    #[instrument(skip_all, fields(model = %request.model, handles = request.handles.len()))]
    pub fn run_model(&self, request: &ModelRequest) -> BioSimResult<SeriesOutput> {
        request.validate(&self.config.limits)?;
        let spec = find_model(&request.model)?;
        let weather = self.cache.get_all(&request.handles)?.map_err(|missing| ResourceError::HandlesNotFound {
            handles: missing.iter().map(|h| h.as_str().to_string()).collect(),
        })?;
        self.execute_model(spec, request.parameters.as_deref(), weather.iter().map(Arc::as_ref))
    }

    /// Generates the variables a model needs and runs the model at once.
    ///
    /// # Errors
    ///
    /// See [`BioSimService::generate`] and [`BioSimService::run_model`].
    #[instrument(skip_all, fields(model = %request.model, locations = request.generation.locations.len()))]
    pub fn generate_then_model(&self, request: &GenerationThenModelRequest) -> BioSimResult<SeriesOutput> {
        request.validate(&self.config.limits)?;
        let spec = find_model(&request.model)?;
        let metadata = self.registry.model_handle(spec)?.metadata()?;

        let mut generation = request.generation.clone();
        if !metadata.required_variables.is_empty() {
            generation.variables.clone_from(&metadata.required_variables);
        }
        let weather = self.generate_weather(&generation)?;
        self.execute_model(spec, request.parameters.as_deref(), weather.iter())
    }

    fn execute_model<'a, I>(&self, spec: &ModelSpec, parameters: Option<&str>, weather: I) -> BioSimResult<SeriesOutput>
    where
        I: IntoIterator<Item = &'a GeneratedWeather>,
    {
        let weather: Vec<&GeneratedWeather> = weather.into_iter().collect();
        let handle = self.registry.model_handle(spec)?;
        let command = command::model(parameters);

        let mut calls = Vec::new();
        for w in &weather {
            if let Ok(parts) = &w.outcome {
                calls.extend(parts.iter().map(|part| EngineCall::Execute {
                    command: command.clone(),
                    input: part.reply.clone(),
                }));
            }
        }
        let mut replies = run_batch(&handle, calls).into_iter();

        // Replies come back flat, in call order; every location takes exactly
        // its own span count before merging.
        let locations = weather
            .iter()
            .map(|w| {
                let parts = w.outcome.as_ref().map_err(Clone::clone)?;
                let own: Vec<_> = replies.by_ref().take(parts.len()).collect();
                if own.len() != parts.len() {
                    return Err("Error: model reply missing".to_string());
                }
                let mode = MergeMode::ModelOutput {
                    last_observed: w.last_observed,
                };
                let merger = ResultMerger::new(mode, w.replicates);
                let mut series = MergedSeries::new(mode, w.replicates);
                for (part, reply) in parts.iter().zip(&own) {
                    merger.append(&mut series, part.bounds, reply).map_err(|e| e.to_string())?;
                }
                Ok(series)
            })
            .collect();
        let output = SeriesOutput { locations };
        info!(model = spec.name, succeeded = output.succeeded(), "model executed");
        Ok(output)
    }

    /// Entries in the reference cache.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::LockPoisoned` if the cache lock is poisoned.
    pub fn memory_load(&self) -> BioSimResult<usize> {
        self.cache.len()
    }

    /// Capacity of the reference cache.
    #[must_use]
    pub const fn max_memory(&self) -> usize {
        self.cache.capacity()
    }

    /// Drops cached weather; unknown handles are ignored. Returns the number
    /// of entries removed.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::LockPoisoned` if the cache lock is poisoned.
    pub fn cleanup(&self, handles: &[CacheHandle]) -> BioSimResult<usize> {
        let removed = self.cache.remove(handles)?;
        debug!(requested = handles.len(), removed, "cache cleanup");
        Ok(removed)
    }

    /// Names of every available model.
    #[must_use]
    pub fn model_list(&self) -> Vec<&'static str> {
        MODELS.iter().map(|m| m.name).collect()
    }

    /// What a model reports about itself; starts its engine if needed.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::UnknownModel` for an unknown name and
    /// `InitError` if the model engine fails to start.
    pub fn model_descriptor(&self, name: &str) -> BioSimResult<ModelDescriptor> {
        let spec = find_model(name)?;
        let metadata = self.registry.model_handle(spec)?.metadata()?;
        Ok(ModelDescriptor::from_metadata(spec.name, &metadata))
    }

    /// Help text of a model.
    ///
    /// # Errors
    ///
    /// See [`BioSimService::model_descriptor`].
    pub fn model_help(&self, name: &str) -> BioSimResult<String> {
        Ok(self.model_descriptor(name)?.help)
    }

    /// Default parameters of a model, comma separated.
    ///
    /// # Errors
    ///
    /// See [`BioSimService::model_descriptor`].
    pub fn model_default_parameters(&self, name: &str) -> BioSimResult<String> {
        Ok(self.model_descriptor(name)?.default_parameters.join(","))
    }

    /// Coordinate caps per request kind.
    #[must_use]
    pub const fn max_coordinates(&self) -> MaxCoordinates {
        MaxCoordinates {
            generation: self.config.limits.max_coordinates_generation,
            normals: self.config.limits.max_coordinates_normals,
        }
    }
}

impl fmt::Debug for BioSimService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BioSimService")
            .field("epochs", &self.catalog.len())
            .field("registry", &self.registry)
            .field("cache_capacity", &self.cache.capacity())
            .finish_non_exhaustive()
    }
}

fn find_model(name: &str) -> Result<&'static ModelSpec, ValidationError> {
    ModelSpec::find(name).ok_or_else(|| ValidationError::UnknownModel { name: name.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::scripted::ScriptedFactory;
    use crate::epoch::{NormalsPeriod, Scenario, Source};
    use crate::request::OutputFormat;

    fn service_with(factory: ScriptedFactory, config: BioSimConfig) -> BioSimService {
        BioSimService::new(config, Arc::new(factory)).unwrap()
    }

    fn lazy_config() -> BioSimConfig {
        let mut config = BioSimConfig::default();
        config.workers.lazy_start = true;
        config
    }

    fn service() -> BioSimService {
        service_with(ScriptedFactory::new(), lazy_config())
    }

    #[test]
    fn normals_keep_location_order() {
        let service = service_with(ScriptedFactory::new().with_failing_latitude(10.0), lazy_config());
        let request = NormalsRequest::new(
            vec![Location::new(45.0, -71.0), Location::new(10.0, -71.0), Location::new(50.0, -71.0)],
            NormalsPeriod::P1991_2020,
        );
        let output = service.normals(&request).unwrap();
        assert_eq!(output.replies.len(), 3);
        assert!(output.replies[0].metadata.starts_with("Latitude=45"));
        assert_eq!(output.replies[1].msg, "Error: station not found");
        assert!(output.replies[2].metadata.starts_with("Latitude=50"));
    }

    #[test]
    fn generation_spanning_epochs_is_continuous() {
        let service = service();
        let request = GenerationRequest::new(vec![Location::new(46.0, -71.0)], 2018, 2021).with_replicates(2);
        let series = service.generate_series(&request).unwrap();
        let merged = series.locations[0].as_ref().unwrap();
        assert_eq!(merged.spans().len(), 2);
        for rows in merged.replicates() {
            let years: Vec<&str> = rows.iter().map(|r| r.fields[0].as_str()).collect();
            assert_eq!(years, ["2018", "2018", "2019", "2019", "2020", "2020", "2021", "2021"]);
        }
    }

    #[test]
    fn projected_years_are_rebased() {
        let service = service();
        let request = GenerationRequest::new(vec![Location::new(46.0, -71.0)], 2040, 2042)
            .with_scenario(Scenario::default());
        let series = service.generate_series(&request).unwrap();
        let merged = series.locations[0].as_ref().unwrap();
        let years: Vec<&str> = merged.replicates()[0].iter().map(|r| r.fields[0].as_str()).collect();
        assert_eq!(years, ["2040", "2040", "2041", "2041", "2042", "2042"]);
    }

    #[test]
    fn uncovered_years_are_rejected() {
        let service = service();
        let request = GenerationRequest::new(vec![Location::new(46.0, -71.0)], 2095, 2105);
        let err = service.generate(&request).unwrap_err();
        assert!(err.is_resource());
        assert!(err.to_string().contains("2101-2105"));
    }

    #[test]
    fn partial_coverage_when_allowed() {
        let mut config = lazy_config();
        config.coverage.allow_partial = true;
        let service = service_with(ScriptedFactory::new(), config);
        let request = GenerationRequest::new(vec![Location::new(46.0, -71.0)], 2099, 2105);
        let series = service.generate_series(&request).unwrap();
        let merged = series.locations[0].as_ref().unwrap();
        assert_eq!(merged.spans(), [YearRange::new(2099, 2100).unwrap()]);
    }

    #[test]
    fn generate_then_model_tags_data_types() {
        let service = service();
        let generation = GenerationRequest::new(vec![Location::new(46.0, -71.0)], 2020, 2023);
        let request = GenerationThenModelRequest {
            generation,
            model: "DegreeDay_Annual".to_string(),
            parameters: Some("Threshold=0".to_string()),
        };
        let output = service.generate_then_model(&request).unwrap();
        let csv = Response::Series(output).render(OutputFormat::Csv);
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("Rep,Year,Month,DD,DataType"));
        let last_observed = service.catalog().last_observed_year(Source::FromObservation).unwrap();
        let tags: Vec<(i32, String)> = lines
            .map(|l| {
                let f: Vec<&str> = l.split(',').collect();
                (f[1].parse().unwrap(), f[4].to_string())
            })
            .collect();
        for (year, tag) in tags {
            let expected = crate::merge::DataType::classify(year, Some(last_observed)).as_str();
            assert_eq!(tag, expected);
        }
        assert_eq!(service.memory_load().unwrap(), 0);
    }

    #[test]
    fn model_over_cached_weather_and_cleanup() {
        let service = service_with(ScriptedFactory::new().with_failing_latitude(10.0), lazy_config());
        let request = GenerationRequest::new(vec![Location::new(46.0, -71.0), Location::new(10.0, -71.0)], 2000, 2001);
        let handles = service.generate(&request).unwrap();
        assert_eq!(handles.len(), 2);
        assert_eq!(service.memory_load().unwrap(), 2);

        let output = service
            .run_model(&ModelRequest::new("DegreeDay_Annual", handles.clone()))
            .unwrap();
        assert!(output.locations[0].is_ok());
        assert_eq!(output.locations[1].as_ref().unwrap_err(), "Error: station not found");

        assert_eq!(service.cleanup(&handles).unwrap(), 2);
        let err = service
            .run_model(&ModelRequest::new("DegreeDay_Annual", handles))
            .unwrap_err();
        assert!(err.is_resource());
    }

    #[test]
    fn model_metadata_operations() {
        let service = service();
        assert!(service.model_list().contains(&"DegreeDay_Annual"));
        assert_eq!(service.model_default_parameters("DegreeDay_Annual").unwrap(), "Threshold=5");
        assert!(service.model_help("DegreeDay_Annual").unwrap().contains("degree-days"));
        assert!(service.model_help("NoSuchModel").unwrap_err().is_validation());
        assert_eq!(service.max_coordinates(), MaxCoordinates { generation: 10, normals: 50 });
    }

    #[test]
    fn eager_start_brings_up_every_engine() {
        let factory = ScriptedFactory::new();
        let service = service_with(factory.clone(), BioSimConfig::default());
        assert_eq!(
            service.registry().started().unwrap(),
            service.catalog().len() + MODELS.len()
        );
        assert!(factory.created() >= service.catalog().len());
    }

    #[test]
    fn rotation_disabled_by_default() {
        let service = service();
        let scheduler = service
            .start_rotation(Arc::new(crate::rotation::NoopRefresher), Arc::new(|| 1u32))
            .unwrap();
        assert!(scheduler.is_none());
    }
}
