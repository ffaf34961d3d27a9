//! # BioSIM - Concurrent execution and caching for climate simulation
//!
//! BioSIM serves climate normals, daily weather generation and bioclimatic
//! model runs for arbitrary locations. The simulation itself is an opaque
//! engine; this crate is the layer around it that fans requests out over
//! pools of engine workers and stitches the results back together.
//!
//! ## Core Concepts
//!
//! - **Epoch**: A climate dataset (normals period, scenario, optional daily
//!   database) valid for a bounded interval of years
//! - **SpanResolver**: Splits a requested year range into contiguous spans,
//!   each served by one epoch
//! - **EngineHandle**: A pool of engine workers behind one batch API; calls
//!   come back in submission order
//! - **ResultMerger**: Stitches per-span replies into one continuous series
//!   per location, replicate by replicate
//! - **ReferenceCache**: Bounded LRU store of generated weather, addressed by
//!   opaque handles
//! - **PoolRotator**: Swaps a live pool onto refreshed data without
//!   interrupting in-flight batches
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use biosim::{BioSimConfig, BioSimService, GenerationRequest, Location, ModelRequest};
//!
//! let service = BioSimService::new(BioSimConfig::load(None)?, Arc::new(my_engine_factory))?;
//!
//! let request = GenerationRequest::new(vec![Location::new(46.8, -71.2)], 2018, 2023).with_replicates(5);
//! let handles = service.generate(&request)?;
//!
//! let output = service.run_model(&ModelRequest::new("DegreeDay_Annual", handles))?;
//! println!("{}", output.to_csv());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Domain types
pub mod epoch;
pub mod error;
pub mod models;
pub mod request;

// Execution
pub mod catalog;
pub mod command;
pub mod dispatch;
pub mod engine;
pub mod registry;
pub mod resolver;
pub mod rotation;

// Results and caching
pub mod cache;
pub mod merge;
pub mod output;

// Service
pub mod config;
pub mod service;
pub mod telemetry;

pub use cache::{CacheHandle, ReferenceCache};
pub use catalog::EpochCatalog;
pub use config::BioSimConfig;
pub use dispatch::{BatchDispatcher, SpanOutput};
pub use engine::{Engine, EngineCall, EngineFactory, EngineHandle, EngineMetadata, TeleIo};
pub use epoch::{DailySlot, DataLayout, Epoch, EpochId, NormalsPeriod, Scenario, Source, YearRange};
pub use error::{BioSimError, BioSimResult, ValidationError};
pub use merge::{DataType, MergeMode, MergedSeries, ResultMerger};
pub use models::{ModelDescriptor, ModelSpec, MODELS};
pub use output::{MaxCoordinates, NormalsOutput, Response, SeriesOutput};
pub use registry::EngineRegistry;
pub use request::{
    GenerationRequest, GenerationThenModelRequest, Location, ModelRequest, NormalsRequest, OutputFormat, Request,
};
pub use resolver::{Resolution, SpanResolver};
pub use rotation::{DailyRotation, DailyRotationScheduler, DataRefresher, PoolRotator};
pub use service::{BioSimService, GeneratedWeather};
