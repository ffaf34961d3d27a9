//! The epoch catalog.
//!
//! The catalog is built once at startup and read-only afterwards. It knows which
//! generation epochs serve a scenario and source, in chronological order, and
//! which normals epoch serves a scenario and period.

use std::sync::Arc;

use crate::epoch::{ClimateModel, DailyDb, Epoch, EpochId, EpochRole, NormalsPeriod, Rcp, Scenario, Source};

/// Read-only set of epochs.
#[derive(Debug, Clone, Default)]
pub struct EpochCatalog {
    generation: Vec<Arc<Epoch>>,
    normals: Vec<Arc<Epoch>>,
}

/// Builder for custom catalogs.
#[derive(Debug, Default)]
pub struct EpochCatalogBuilder {
    catalog: EpochCatalog,
}

impl EpochCatalogBuilder {
    /// Adds a generation epoch.
    #[must_use]
    pub fn generation(mut self, normals: NormalsPeriod, daily: Option<DailyDb>, scenario: Scenario, workers: usize) -> Self {
        self.catalog
            .generation
            .push(Arc::new(Epoch::new(EpochRole::Generation, scenario, normals, daily, workers)));
        self
    }

    /// Adds a normals epoch.
    #[must_use]
    pub fn normals(mut self, normals: NormalsPeriod, scenario: Scenario) -> Self {
        self.catalog
            .normals
            .push(Arc::new(Epoch::new(EpochRole::Normals, scenario, normals, None, 1)));
        self
    }

    /// Finishes the catalog.
    #[must_use]
    pub fn build(self) -> EpochCatalog {
        self.catalog
    }
}

impl EpochCatalog {
    /// Starts an empty custom catalog.
    #[must_use]
    pub fn builder() -> EpochCatalogBuilder {
        EpochCatalogBuilder::default()
    }

    /// The production catalog: observed daily epochs, past normals epochs, and
    /// the projected epochs of every pathway and climate model.
    ///
    /// Observed epochs and the RCM4 projections get `generation_workers`
    /// workers; every other epoch runs a single instance.
    #[must_use]
    pub fn standard(generation_workers: usize) -> Self {
        let past = Scenario::Past;
        let mut builder = Self::builder()
            .generation(NormalsPeriod::P1941_1970, Some(DailyDb::D1900_1949), past, generation_workers)
            .generation(NormalsPeriod::P1951_1980, Some(DailyDb::D1950_1979), past, generation_workers)
            .generation(NormalsPeriod::P1981_2010, Some(DailyDb::D1980_2019), past, generation_workers)
            .generation(NormalsPeriod::P1981_2010, Some(DailyDb::Live2020_2021), past, generation_workers);

        for period in NormalsPeriod::PAST {
            builder = builder.generation(period, None, past, 1).normals(period, past);
        }
        for rcp in Rcp::ALL {
            for model in ClimateModel::ALL {
                let scenario = Scenario::Projected { rcp, model };
                // Only the default climate model runs pooled.
                let workers = if model == ClimateModel::Rcm4 { generation_workers } else { 1 };
                for period in NormalsPeriod::PROJECTED {
                    builder = builder
                        .generation(period, None, scenario, workers)
                        .normals(period, scenario);
                }
            }
        }
        builder.build()
    }

    /// All epochs, generation first.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Epoch>> {
        self.generation.iter().chain(self.normals.iter())
    }

    /// Number of epochs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.generation.len() + self.normals.len()
    }

    /// Returns true if the catalog holds no epochs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks up an epoch by id.
    #[must_use]
    pub fn get(&self, id: &EpochId) -> Option<&Arc<Epoch>> {
        self.iter().find(|e| e.id() == id)
    }

    /// Generation epochs serving `scenario` with `source`, oldest first.
    ///
    /// Past epochs come first: observed ones (with a daily database) when
    /// observations are requested, normals-only ones when generation is forced.
    /// Projected epochs of the scenario follow.
    #[must_use]
    pub fn generation_epochs(&self, scenario: Scenario, source: Source) -> Vec<Arc<Epoch>> {
        let past_matches = |daily: Option<DailyDb>| match source {
            Source::FromObservation => daily.is_some(),
            Source::FromNormals => daily.is_none(),
        };
        let mut past: Vec<Arc<Epoch>> = self
            .generation
            .iter()
            .filter(|e| e.scenario() == Scenario::Past && past_matches(e.daily()))
            .cloned()
            .collect();
        past.sort_by_key(|e| e.interval(source).lo);

        if scenario != Scenario::Past {
            let mut projected: Vec<Arc<Epoch>> = self
                .generation
                .iter()
                .filter(|e| e.scenario() == scenario)
                .cloned()
                .collect();
            projected.sort_by_key(|e| e.interval(source).lo);
            past.extend(projected);
        }
        past
    }

    /// Normals epoch for `scenario` and `period`; past periods always resolve
    /// to the past scenario.
    #[must_use]
    pub fn normals_epoch(&self, scenario: Scenario, period: NormalsPeriod) -> Option<Arc<Epoch>> {
        let scenario = if period.is_past() { Scenario::Past } else { scenario };
        self.normals
            .iter()
            .find(|e| e.normals() == period && e.scenario() == scenario)
            .cloned()
    }

    /// Last year with observations, or `None` when generation is forced.
    #[must_use]
    pub fn last_observed_year(&self, source: Source) -> Option<i32> {
        match source {
            Source::FromNormals => None,
            Source::FromObservation => self
                .generation
                .iter()
                .filter_map(|e| e.daily())
                .map(|d| d.years().hi)
                .max(),
        }
    }

    /// The generation epoch reading the live daily database.
    #[must_use]
    pub fn live_epoch(&self) -> Option<Arc<Epoch>> {
        self.generation.iter().find(|e| e.is_live()).cloned()
    }
}
