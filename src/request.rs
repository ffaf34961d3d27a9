//! Typed inbound requests and their validation.
//!
//! Validation runs before any engine call and reports every problem of a
//! request at once. The coordinate caps are checked first and fail alone.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cache::CacheHandle;
use crate::config::Limits;
use crate::epoch::{ClimateModel, NormalsPeriod, Rcp, Scenario, Source, YearRange};
use crate::error::{BioSimResult, ResourceError, ValidationError};
use crate::models::ModelSpec;

/// Weather variables generated when a request names none.
pub const DEFAULT_VARIABLES: [&str; 14] = [
    "TN", "T", "TX", "P", "TD", "H", "WS", "WD", "R", "Z", "S", "SD", "SWE", "WS2",
];

/// Variables requested from the normals engine.
pub const NORMALS_VARIABLES: [&str; 3] = ["TN", "TX", "P"];

const LATITUDE: (f64, f64) = (-90.0, 90.0);
const LONGITUDE: (f64, f64) = (-180.0, 180.0);
const ELEVATION: (f64, f64) = (-100.0, 9_000.0);
const NEAREST_NEIGHBORS: (u32, u32) = (1, 35);
const YEARS: (i32, i32) = (1, 9_999);

/// One geographic coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Degrees north.
    pub latitude: f64,
    /// Degrees east.
    pub longitude: f64,
    /// Metres; `None` or NaN means the engine reads the elevation model.
    pub elevation: Option<f64>,
}

impl Location {
    /// A location without elevation.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            elevation: None,
        }
    }

    /// Sets the elevation.
    #[must_use]
    pub const fn with_elevation(mut self, elevation: f64) -> Self {
        self.elevation = Some(elevation);
        self
    }

    /// Elevation to pass to the engine, if any.
    #[must_use]
    pub fn effective_elevation(&self) -> Option<f64> {
        self.elevation.filter(|e| !e.is_nan())
    }

    fn check(&self, issues: &mut Vec<ValidationError>) {
        check_coordinate("latitude", self.latitude, LATITUDE, issues);
        check_coordinate("longitude", self.longitude, LONGITUDE, issues);
        if let Some(elevation) = self.effective_elevation() {
            check_coordinate("elevation", elevation, ELEVATION, issues);
        }
    }

    /// Builds locations from whitespace-separated value lists.
    ///
    /// Unparsable elevations become NaN (use the elevation model); unparsable
    /// or NaN coordinates are rejected.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` listing every unparsable value and any
    /// length mismatch between the lists.
    pub fn from_lists(latitudes: &str, longitudes: &str, elevations: Option<&str>) -> Result<Vec<Self>, ValidationError> {
        let mut issues = Vec::new();
        let lats = parse_coordinates("lat", latitudes, &mut issues);
        let longs = parse_coordinates("long", longitudes, &mut issues);
        let elevs: Option<Vec<f64>> =
            elevations.map(|raw| raw.split_whitespace().map(|v| v.parse().unwrap_or(f64::NAN)).collect());

        if longs.len() != lats.len() {
            issues.push(ValidationError::CoordinateMismatch {
                field: "long".to_string(),
                expected: lats.len(),
                actual: longs.len(),
            });
        }
        if let Some(elevs) = &elevs {
            if elevs.len() != lats.len() {
                issues.push(ValidationError::CoordinateMismatch {
                    field: "elev".to_string(),
                    expected: lats.len(),
                    actual: elevs.len(),
                });
            }
        }
        if let Some(err) = ValidationError::collect(issues) {
            return Err(err);
        }

        Ok(lats
            .into_iter()
            .zip(longs)
            .enumerate()
            .map(|(i, (lat, long))| Self {
                latitude: lat,
                longitude: long,
                elevation: elevs.as_ref().map(|e| e[i]),
            })
            .collect())
    }
}

fn parse_coordinates(field: &str, raw: &str, issues: &mut Vec<ValidationError>) -> Vec<f64> {
    let mut values = Vec::new();
    for token in raw.split_whitespace() {
        match token.parse::<f64>() {
            Ok(v) if v.is_nan() => issues.push(ValidationError::NotANumber {
                field: field.to_string(),
            }),
            Ok(v) => values.push(v),
            Err(_) => issues.push(ValidationError::UnknownValue {
                field: field.to_string(),
                value: token.to_string(),
                allowed: "a decimal number".to_string(),
            }),
        }
    }
    values
}

fn check_coordinate(field: &str, value: f64, (min, max): (f64, f64), issues: &mut Vec<ValidationError>) {
    if value.is_nan() {
        issues.push(ValidationError::NotANumber {
            field: field.to_string(),
        });
    } else if value < min || value > max {
        issues.push(ValidationError::OutOfRange {
            field: field.to_string(),
            value,
            min,
            max,
        });
    }
}

fn check_locations(kind: &str, locations: &[Location], max: usize, issues: &mut Vec<ValidationError>) -> BioSimResult<()> {
    if locations.len() > max {
        return Err(ResourceError::TooManyCoordinates {
            kind: kind.to_string(),
            max,
            actual: locations.len(),
        }
        .into());
    }
    if locations.is_empty() {
        issues.push(ValidationError::MissingField {
            field: "lat".to_string(),
        });
    }
    for location in locations {
        location.check(issues);
    }
    Ok(())
}

fn finish(issues: Vec<ValidationError>) -> BioSimResult<()> {
    match ValidationError::collect(issues) {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

/// Response encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Comma-separated text.
    #[default]
    Csv,
    /// JSON document.
    Json,
}

impl OutputFormat {
    /// Parses `CSV` or `JSON`.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::UnknownValue` for anything else.
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        match value {
            "CSV" => Ok(Self::Csv),
            "JSON" => Ok(Self::Json),
            other => Err(ValidationError::UnknownValue {
                field: "format".to_string(),
                value: other.to_string(),
                allowed: "CSV, JSON".to_string(),
            }),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Csv => f.write_str("CSV"),
            Self::Json => f.write_str("JSON"),
        }
    }
}

/// Parses the optional `rcp` and `climMod` selectors; omitted selectors take
/// the default projection.
///
/// # Errors
///
/// Returns a `ValidationError` naming every unknown selector.
pub fn parse_scenario(rcp: Option<&str>, climate_model: Option<&str>) -> Result<Scenario, ValidationError> {
    let mut issues = Vec::new();
    let rcp = match rcp {
        None => Rcp::Rcp45,
        Some(raw) => Rcp::from_selector(raw).unwrap_or_else(|| {
            issues.push(ValidationError::UnknownValue {
                field: "rcp".to_string(),
                value: raw.to_string(),
                allowed: Rcp::ALL.map(Rcp::selector).join(", "),
            });
            Rcp::Rcp45
        }),
    };
    let model = match climate_model {
        None => ClimateModel::Rcm4,
        Some(raw) => ClimateModel::from_selector(raw).unwrap_or_else(|| {
            issues.push(ValidationError::UnknownValue {
                field: "climMod".to_string(),
                value: raw.to_string(),
                allowed: ClimateModel::ALL.map(ClimateModel::selector).join(", "),
            });
            ClimateModel::Rcm4
        }),
    };
    match ValidationError::collect(issues) {
        Some(err) => Err(err),
        None => Ok(Scenario::Projected { rcp, model }),
    }
}

/// Climate normals for a thirty-year period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalsRequest {
    /// Target locations.
    pub locations: Vec<Location>,
    /// Normals period.
    pub period: NormalsPeriod,
    /// Scenario for projected periods.
    pub scenario: Scenario,
    /// Output encoding.
    pub format: OutputFormat,
}

impl NormalsRequest {
    /// A CSV request under the default projection.
    #[must_use]
    pub fn new(locations: Vec<Location>, period: NormalsPeriod) -> Self {
        Self {
            locations,
            period,
            scenario: Scenario::default(),
            format: OutputFormat::Csv,
        }
    }

    /// Checks caps and coordinates.
    ///
    /// # Errors
    ///
    /// Returns a resource error when the coordinate cap is exceeded, otherwise
    /// a validation error listing every problem.
    pub fn validate(&self, limits: &Limits) -> BioSimResult<()> {
        let mut issues = Vec::new();
        check_locations("normals", &self.locations, limits.max_coordinates_normals, &mut issues)?;
        finish(issues)
    }
}

/// Weather generation over a span of years.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Target locations.
    pub locations: Vec<Location>,
    /// First year.
    pub from: i32,
    /// Last year.
    pub to: i32,
    /// Replicates per location.
    pub replicates: u32,
    /// Observation or forced generation.
    pub source: Source,
    /// Scenario for years past the observations.
    pub scenario: Scenario,
    /// Generated variables.
    pub variables: Vec<String>,
    /// Stations used for interpolation.
    pub nb_nearest_neighbor: Option<u32>,
    /// Output encoding.
    pub format: OutputFormat,
}

impl GenerationRequest {
    /// A single-replicate, observation-first request for every default
    /// variable.
    #[must_use]
    pub fn new(locations: Vec<Location>, from: i32, to: i32) -> Self {
        Self {
            locations,
            from,
            to,
            replicates: 1,
            source: Source::default(),
            scenario: Scenario::default(),
            variables: DEFAULT_VARIABLES.iter().map(ToString::to_string).collect(),
            nb_nearest_neighbor: None,
            format: OutputFormat::Csv,
        }
    }

    /// Sets the replicate count.
    #[must_use]
    pub const fn with_replicates(mut self, replicates: u32) -> Self {
        self.replicates = replicates;
        self
    }

    /// Sets the source.
    #[must_use]
    pub const fn with_source(mut self, source: Source) -> Self {
        self.source = source;
        self
    }

    /// Sets the scenario.
    #[must_use]
    pub const fn with_scenario(mut self, scenario: Scenario) -> Self {
        self.scenario = scenario;
        self
    }

    /// The requested years.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidYearRange` when `from > to`.
    pub const fn range(&self) -> Result<YearRange, ValidationError> {
        YearRange::new(self.from, self.to)
    }

    /// Replicate count as a length.
    #[must_use]
    pub const fn replicate_count(&self) -> usize {
        self.replicates as usize
    }

    /// Checks caps, coordinates and generation parameters.
    ///
    /// # Errors
    ///
    /// Returns a resource error when the coordinate cap is exceeded, otherwise
    /// a validation error listing every problem.
    pub fn validate(&self, limits: &Limits) -> BioSimResult<()> {
        let mut issues = Vec::new();
        self.check(limits, &mut issues)?;
        finish(issues)
    }

    fn check(&self, limits: &Limits, issues: &mut Vec<ValidationError>) -> BioSimResult<()> {
        check_locations("climate generation", &self.locations, limits.max_coordinates_generation, issues)?;
        for (field, year) in [("from", self.from), ("to", self.to)] {
            if year < YEARS.0 || year > YEARS.1 {
                issues.push(ValidationError::OutOfRange {
                    field: field.to_string(),
                    value: f64::from(year),
                    min: f64::from(YEARS.0),
                    max: f64::from(YEARS.1),
                });
            }
        }
        if let Err(err) = self.range() {
            issues.push(err);
        }
        if self.replicates < 1 {
            issues.push(ValidationError::InvalidReplicates {
                value: i64::from(self.replicates),
            });
        } else if self.replicate_count() > limits.max_replicates {
            issues.push(ValidationError::OutOfRange {
                field: "rep".to_string(),
                value: f64::from(self.replicates),
                min: 1.0,
                max: limits.max_replicates as f64,
            });
        }
        if let Some(k) = self.nb_nearest_neighbor {
            if k < NEAREST_NEIGHBORS.0 || k > NEAREST_NEIGHBORS.1 {
                issues.push(ValidationError::InvalidNearestNeighbors { value: i64::from(k) });
            }
        }
        if self.variables.is_empty() {
            issues.push(ValidationError::MissingField {
                field: "var".to_string(),
            });
        }
        Ok(())
    }
}

fn check_model(name: &str, issues: &mut Vec<ValidationError>) {
    if ModelSpec::find(name).is_none() {
        issues.push(ValidationError::UnknownModel { name: name.to_string() });
    }
}

/// A model run over previously generated weather.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRequest {
    /// Model name.
    pub model: String,
    /// Cache handles returned by a generation request.
    pub handles: Vec<CacheHandle>,
    /// Model parameters, `*`-separated `Key=Value` pairs.
    pub parameters: Option<String>,
    /// Output encoding.
    pub format: OutputFormat,
}

impl ModelRequest {
    /// A CSV request with default parameters.
    #[must_use]
    pub fn new(model: impl Into<String>, handles: Vec<CacheHandle>) -> Self {
        Self {
            model: model.into(),
            handles,
            parameters: None,
            format: OutputFormat::Csv,
        }
    }

    /// Checks the model name and the handle count.
    ///
    /// # Errors
    ///
    /// Returns a resource error when the coordinate cap is exceeded, otherwise
    /// a validation error listing every problem.
    pub fn validate(&self, limits: &Limits) -> BioSimResult<()> {
        if self.handles.len() > limits.max_coordinates_generation {
            return Err(ResourceError::TooManyCoordinates {
                kind: "model".to_string(),
                max: limits.max_coordinates_generation,
                actual: self.handles.len(),
            }
            .into());
        }
        let mut issues = Vec::new();
        check_model(&self.model, &mut issues);
        if self.handles.is_empty() {
            issues.push(ValidationError::MissingField {
                field: "wgout".to_string(),
            });
        }
        finish(issues)
    }
}

/// Weather generation followed immediately by a model run; nothing is cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationThenModelRequest {
    /// Generation part; its variables are replaced by the model's.
    pub generation: GenerationRequest,
    /// Model name.
    pub model: String,
    /// Model parameters, `*`-separated `Key=Value` pairs.
    pub parameters: Option<String>,
}

impl GenerationThenModelRequest {
    /// Checks both parts.
    ///
    /// # Errors
    ///
    /// Returns a resource error when the coordinate cap is exceeded, otherwise
    /// a validation error listing every problem of both parts.
    pub fn validate(&self, limits: &Limits) -> BioSimResult<()> {
        let mut issues = Vec::new();
        self.generation.check(limits, &mut issues)?;
        check_model(&self.model, &mut issues);
        finish(issues)
    }

    /// Output encoding.
    #[must_use]
    pub const fn format(&self) -> OutputFormat {
        self.generation.format
    }
}

/// Every request the service accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    /// Climate normals.
    Normals(NormalsRequest),
    /// Weather generation, results cached.
    Generation(GenerationRequest),
    /// Model over cached weather.
    Model(ModelRequest),
    /// Generation then model, nothing cached.
    GenerationThenModel(GenerationThenModelRequest),
}

impl Request {
    /// Validates the request against `limits`.
    ///
    /// # Errors
    ///
    /// See the `validate` method of each request kind.
    pub fn validate(&self, limits: &Limits) -> BioSimResult<()> {
        match self {
            Self::Normals(r) => r.validate(limits),
            Self::Generation(r) => r.validate(limits),
            Self::Model(r) => r.validate(limits),
            Self::GenerationThenModel(r) => r.validate(limits),
        }
    }

    /// Requested output encoding.
    #[must_use]
    pub const fn format(&self) -> OutputFormat {
        match self {
            Self::Normals(r) => r.format,
            Self::Generation(r) => r.format,
            Self::Model(r) => r.format,
            Self::GenerationThenModel(r) => r.format(),
        }
    }
}
