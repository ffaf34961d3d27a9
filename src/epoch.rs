//! Dataset epochs.
//!
//! An epoch is an immutable descriptor of one dataset slice: a normals period,
//! optionally a daily observation database, the climate scenario it belongs to
//! and the number of engine workers it runs with. Epochs are owned by the
//! [`EpochCatalog`](crate::catalog::EpochCatalog) and referenced by engine handles.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// An inclusive range of years `[lo, hi]`.
///
/// # Examples
///
/// ```
/// use biosim::YearRange;
///
/// let range = YearRange::new(1981, 2010).unwrap();
/// assert_eq!(range.len(), 30);
/// assert!(range.contains(1995));
/// assert!(YearRange::new(2010, 1981).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct YearRange {
    /// First year (inclusive).
    pub lo: i32,
    /// Last year (inclusive).
    pub hi: i32,
}

impl YearRange {
    /// Creates a year range.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidYearRange` if `lo > hi`.
    pub const fn new(lo: i32, hi: i32) -> Result<Self, ValidationError> {
        if lo > hi {
            return Err(ValidationError::InvalidYearRange { from: lo, to: hi });
        }
        Ok(Self { lo, hi })
    }

    /// Number of years in the range.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.hi.abs_diff(self.lo) as usize + 1
    }

    /// A valid range always holds at least one year.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Returns true if `year` lies within the range.
    #[must_use]
    pub const fn contains(&self, year: i32) -> bool {
        year >= self.lo && year <= self.hi
    }
}

impl fmt::Display for YearRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.lo, self.hi)
    }
}

/// Emission pathway of a projected climate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Rcp {
    /// RCP 4.5.
    Rcp45,
    /// RCP 8.5.
    Rcp85,
}

impl Rcp {
    /// All pathways, in catalog order.
    pub const ALL: [Self; 2] = [Self::Rcp45, Self::Rcp85];

    /// Parses the request selector (`4_5`, `8_5`).
    #[must_use]
    pub fn from_selector(value: &str) -> Option<Self> {
        match value {
            "4_5" => Some(Self::Rcp45),
            "8_5" => Some(Self::Rcp85),
            _ => None,
        }
    }

    /// Request selector string.
    #[must_use]
    pub const fn selector(self) -> &'static str {
        match self {
            Self::Rcp45 => "4_5",
            Self::Rcp85 => "8_5",
        }
    }

    const fn db_tag(self) -> &'static str {
        match self {
            Self::Rcp45 => "RCP45",
            Self::Rcp85 => "RCP85",
        }
    }
}

/// Climate model driving a projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ClimateModel {
    /// Hadley GEM2-ES.
    Hadley,
    /// GCM4 ESM2 1850-2100.
    Gcm4,
    /// RCM4 ESM2 22 km.
    Rcm4,
}

impl ClimateModel {
    /// All climate models, in catalog order.
    pub const ALL: [Self; 3] = [Self::Hadley, Self::Gcm4, Self::Rcm4];

    /// Parses the request selector (`Hadley`, `GCM4`, `RCM4`).
    #[must_use]
    pub fn from_selector(value: &str) -> Option<Self> {
        match value {
            "Hadley" => Some(Self::Hadley),
            "GCM4" => Some(Self::Gcm4),
            "RCM4" => Some(Self::Rcm4),
            _ => None,
        }
    }

    /// Request selector string.
    #[must_use]
    pub const fn selector(self) -> &'static str {
        match self {
            Self::Hadley => "Hadley",
            Self::Gcm4 => "GCM4",
            Self::Rcm4 => "RCM4",
        }
    }

    const fn db_name(self) -> &'static str {
        match self {
            Self::Hadley => "Hadley GEM2-ES",
            Self::Gcm4 => "GCM4_ESM2_1850-2100",
            Self::Rcm4 => "RCM4_ESM2_22km",
        }
    }
}

/// Climate scenario an epoch belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Scenario {
    /// Observed / past climate.
    Past,
    /// A projection under an emission pathway and climate model.
    Projected {
        /// Emission pathway.
        rcp: Rcp,
        /// Climate model.
        model: ClimateModel,
    },
}

impl Scenario {
    /// The scenario used when a request omits the selector.
    pub const DEFAULT_PROJECTION: Self = Self::Projected {
        rcp: Rcp::Rcp45,
        model: ClimateModel::Rcm4,
    };
}

impl Default for Scenario {
    fn default() -> Self {
        Self::DEFAULT_PROJECTION
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Past => write!(f, "past"),
            Self::Projected { rcp, model } => write!(f, "{}/{}", rcp.selector(), model.selector()),
        }
    }
}

/// Thirty-year normals periods.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NormalsPeriod {
    P1941_1970,
    P1951_1980,
    P1961_1990,
    P1971_2000,
    P1981_2010,
    P1991_2020,
    P2001_2030,
    P2011_2040,
    P2021_2050,
    P2031_2060,
    P2041_2070,
    P2051_2080,
    P2061_2090,
    P2071_2100,
}

impl NormalsPeriod {
    /// Periods computed from observations.
    pub const PAST: [Self; 5] = [
        Self::P1941_1970,
        Self::P1951_1980,
        Self::P1961_1990,
        Self::P1971_2000,
        Self::P1981_2010,
    ];

    /// Periods computed from climate projections.
    pub const PROJECTED: [Self; 9] = [
        Self::P1991_2020,
        Self::P2001_2030,
        Self::P2011_2040,
        Self::P2021_2050,
        Self::P2031_2060,
        Self::P2041_2070,
        Self::P2051_2080,
        Self::P2061_2090,
        Self::P2071_2100,
    ];

    /// First year of the thirty-year window.
    #[must_use]
    pub const fn start(self) -> i32 {
        match self {
            Self::P1941_1970 => 1941,
            Self::P1951_1980 => 1951,
            Self::P1961_1990 => 1961,
            Self::P1971_2000 => 1971,
            Self::P1981_2010 => 1981,
            Self::P1991_2020 => 1991,
            Self::P2001_2030 => 2001,
            Self::P2011_2040 => 2011,
            Self::P2021_2050 => 2021,
            Self::P2031_2060 => 2031,
            Self::P2041_2070 => 2041,
            Self::P2051_2080 => 2051,
            Self::P2061_2090 => 2061,
            Self::P2071_2100 => 2071,
        }
    }

    /// Returns true for periods computed from observations.
    #[must_use]
    pub const fn is_past(self) -> bool {
        self.start() <= 1981
    }

    /// The years this period generates weather for: its central decade,
    /// extended to 2100 for the last projected period.
    #[must_use]
    pub const fn generation_years(self) -> YearRange {
        let lo = self.start() + 10;
        let hi = match self {
            Self::P2071_2100 => 2100,
            _ => lo + 9,
        };
        YearRange { lo, hi }
    }

    /// Short request string (`1981_2010`).
    #[must_use]
    pub fn short(self) -> String {
        format!("{}_{}", self.start(), self.start() + 29)
    }

    /// Parses a short request string.
    #[must_use]
    pub fn from_short(value: &str) -> Option<Self> {
        Self::PAST
            .iter()
            .chain(Self::PROJECTED.iter())
            .copied()
            .find(|p| p.short() == value)
    }

    fn db_stem(self) -> String {
        format!("Canada-USA {}-{}", self.start(), self.start() + 29)
    }
}

impl fmt::Display for NormalsPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short())
    }
}

/// Daily observation databases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DailyDb {
    /// 1900-1949.
    D1900_1949,
    /// 1950-1979.
    D1950_1979,
    /// 1980-2019.
    D1980_2019,
    /// The live database, refreshed daily.
    Live2020_2021,
}

impl DailyDb {
    /// All databases, oldest first.
    pub const ALL: [Self; 4] = [Self::D1900_1949, Self::D1950_1979, Self::D1980_2019, Self::Live2020_2021];

    /// Years covered by the database.
    #[must_use]
    pub const fn years(self) -> YearRange {
        match self {
            Self::D1900_1949 => YearRange { lo: 1900, hi: 1949 },
            Self::D1950_1979 => YearRange { lo: 1950, hi: 1979 },
            Self::D1980_2019 => YearRange { lo: 1980, hi: 2019 },
            Self::Live2020_2021 => YearRange { lo: 2020, hi: 2021 },
        }
    }

    /// Returns true for the database replaced by the daily refresh.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Live2020_2021)
    }

    const fn file_name(self) -> &'static str {
        match self {
            Self::D1900_1949 => "Canada-USA 1900-1950.DailyDB",
            Self::D1950_1979 => "Canada-USA 1950-1980.DailyDB",
            Self::D1980_2019 => "Canada-USA 1980-2020.DailyDB",
            Self::Live2020_2021 => "Canada-USA 2020-2021.DailyDB",
        }
    }
}

/// Which of the two live daily folders is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DailySlot {
    /// `DailyLatest`.
    #[default]
    Primary,
    /// `DailyLatestAlt`.
    Alternate,
}

impl DailySlot {
    /// The other slot.
    #[must_use]
    pub const fn toggled(self) -> Self {
        match self {
            Self::Primary => Self::Alternate,
            Self::Alternate => Self::Primary,
        }
    }

    /// Folder name under `Weather/`.
    #[must_use]
    pub const fn folder(self) -> &'static str {
        match self {
            Self::Primary => "DailyLatest",
            Self::Alternate => "DailyLatestAlt",
        }
    }
}

/// How a weather generation request sources its years.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Source {
    /// Generate from normals, even for past years.
    FromNormals,
    /// Use observations where a daily database covers the year.
    #[default]
    FromObservation,
}

impl Source {
    /// Engine command value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FromNormals => "FromNormals",
            Self::FromObservation => "FromObservation",
        }
    }

    /// Parses the request value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "FromNormals" => Some(Self::FromNormals),
            "FromObservation" => Some(Self::FromObservation),
            _ => None,
        }
    }
}

/// Where the engine data files live: `<root>/data` and `<root>/models`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataLayout {
    /// Installation root.
    pub root: PathBuf,
}

impl DataLayout {
    /// Creates a layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The `data/` directory.
    #[must_use]
    pub fn data(&self) -> PathBuf {
        self.root.join("data")
    }

    /// The `models/` directory.
    #[must_use]
    pub fn models(&self) -> PathBuf {
        self.root.join("models")
    }

    /// The `data/Weather/` directory.
    #[must_use]
    pub fn weather(&self) -> PathBuf {
        self.data().join("Weather")
    }

    pub(crate) fn join_display(path: &Path) -> String {
        path.display().to_string()
    }
}

/// The role an epoch plays; normals and generation never share an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EpochRole {
    /// Serves normals requests.
    Normals,
    /// Serves weather generation.
    Generation,
}

/// Stable identifier of an epoch within a catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpochId(String);

impl EpochId {
    /// Borrows the identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EpochId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An immutable dataset slice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epoch {
    id: EpochId,
    role: EpochRole,
    scenario: Scenario,
    normals: NormalsPeriod,
    daily: Option<DailyDb>,
    workers: usize,
}

impl Epoch {
    /// Creates an epoch. `workers` is clamped to at least one.
    #[must_use]
    pub fn new(
        role: EpochRole,
        scenario: Scenario,
        normals: NormalsPeriod,
        daily: Option<DailyDb>,
        workers: usize,
    ) -> Self {
        let id = Self::compose_id(role, scenario, normals, daily);
        Self {
            id,
            role,
            scenario,
            normals,
            daily,
            workers: workers.max(1),
        }
    }

    fn compose_id(role: EpochRole, scenario: Scenario, normals: NormalsPeriod, daily: Option<DailyDb>) -> EpochId {
        let role_s = match role {
            EpochRole::Normals => "normals",
            EpochRole::Generation => "wg",
        };
        let mut id = format!("{role_s}:{scenario}:{}", normals.short());
        if let Some(d) = daily {
            id.push_str(&format!(":daily{}", d.years()));
        }
        EpochId(id)
    }

    /// Identifier, unique within a catalog.
    #[must_use]
    pub const fn id(&self) -> &EpochId {
        &self.id
    }

    /// Role of the epoch.
    #[must_use]
    pub const fn role(&self) -> EpochRole {
        self.role
    }

    /// Scenario tag.
    #[must_use]
    pub const fn scenario(&self) -> Scenario {
        self.scenario
    }

    /// Normals period.
    #[must_use]
    pub const fn normals(&self) -> NormalsPeriod {
        self.normals
    }

    /// Daily database, if any.
    #[must_use]
    pub const fn daily(&self) -> Option<DailyDb> {
        self.daily
    }

    /// Engine workers for this epoch (1 means a single synchronous instance).
    #[must_use]
    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// Returns true if the epoch reads the live daily database.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.daily.is_some_and(DailyDb::is_live)
    }

    /// Valid year interval for the given source: the daily database when
    /// observations are preferred and present, the normals years otherwise.
    #[must_use]
    pub fn interval(&self, source: Source) -> YearRange {
        match (source, self.daily) {
            (Source::FromObservation, Some(daily)) => daily.years(),
            _ => self.normals.generation_years(),
        }
    }

    /// Effective engine source: observation is downgraded when the epoch has no
    /// daily database.
    #[must_use]
    pub const fn effective_source(&self, requested: Source) -> Source {
        match (requested, self.daily) {
            (Source::FromObservation, None) => Source::FromNormals,
            (s, _) => s,
        }
    }

    /// Engine initialization command for this epoch.
    #[must_use]
    pub fn init_command(&self, layout: &DataLayout, slot: DailySlot) -> String {
        let shore = layout.data().join("Layers").join("Shore.ann");
        let normals_dir = layout.weather().join("Normals");
        let normals_file = match self.scenario {
            Scenario::Past => format!("{}.NormalsDB", self.normals.db_stem()),
            Scenario::Projected { rcp, model } => format!(
                "{} {}_{}.NormalsDB",
                self.normals.db_stem(),
                model.db_name(),
                rcp.db_tag()
            ),
        };
        let dem = layout.data().join("DEM").join("Monde_30s(SRTM30).tif");
        let gribs = layout.weather().join("Gribs").join("HRDPS daily.Gribs");

        let mut parts = vec![
            format!("Shore={}", DataLayout::join_display(&shore)),
            format!("Normals={}", DataLayout::join_display(&normals_dir.join(normals_file))),
            format!("DEM={}", DataLayout::join_display(&dem)),
            format!("Gribs={}", DataLayout::join_display(&gribs)),
        ];
        if let Some(daily) = self.daily {
            let folder = if daily.is_live() { slot.folder() } else { "Daily" };
            let path = layout.weather().join(folder).join(daily.file_name());
            parts.push(format!("Daily={}", DataLayout::join_display(&path)));
        }
        parts.join("&")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn year_range_rejects_inverted() {
        let err = YearRange::new(2001, 2000).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidYearRange { from: 2001, to: 2000 }));
        assert_eq!(YearRange::new(2000, 2000).unwrap().len(), 1);
    }

    #[test]
    fn normals_generation_years() {
        assert_eq!(NormalsPeriod::P1941_1970.generation_years(), YearRange { lo: 1951, hi: 1960 });
        assert_eq!(NormalsPeriod::P1981_2010.generation_years(), YearRange { lo: 1991, hi: 2000 });
        assert_eq!(NormalsPeriod::P2061_2090.generation_years(), YearRange { lo: 2071, hi: 2080 });
        assert_eq!(NormalsPeriod::P2071_2100.generation_years(), YearRange { lo: 2081, hi: 2100 });
    }

    #[test]
    fn normals_short_roundtrip() {
        for p in NormalsPeriod::PAST.iter().chain(NormalsPeriod::PROJECTED.iter()) {
            assert_eq!(NormalsPeriod::from_short(&p.short()), Some(*p));
        }
        assert!(NormalsPeriod::P1981_2010.is_past());
        assert!(!NormalsPeriod::P1991_2020.is_past());
        assert_eq!(NormalsPeriod::from_short("1990_2019"), None);
    }

    #[test]
    fn interval_depends_on_source() {
        let epoch = Epoch::new(
            EpochRole::Generation,
            Scenario::Past,
            NormalsPeriod::P1981_2010,
            Some(DailyDb::D1980_2019),
            2,
        );
        assert_eq!(epoch.interval(Source::FromObservation), YearRange { lo: 1980, hi: 2019 });
        assert_eq!(epoch.interval(Source::FromNormals), YearRange { lo: 1991, hi: 2000 });
        assert_eq!(epoch.effective_source(Source::FromObservation), Source::FromObservation);

        let normals_only = Epoch::new(EpochRole::Generation, Scenario::Past, NormalsPeriod::P1981_2010, None, 0);
        assert_eq!(normals_only.workers(), 1);
        assert_eq!(normals_only.effective_source(Source::FromObservation), Source::FromNormals);
    }

    #[test]
    fn init_command_switches_live_folder() {
        let layout = DataLayout::new("/srv/biosim");
        let live = Epoch::new(
            EpochRole::Generation,
            Scenario::Past,
            NormalsPeriod::P1981_2010,
            Some(DailyDb::Live2020_2021),
            1,
        );
        let primary = live.init_command(&layout, DailySlot::Primary);
        let alternate = live.init_command(&layout, DailySlot::Alternate);
        assert!(primary.contains("DailyLatest"));
        assert!(!primary.contains("DailyLatestAlt"));
        assert!(alternate.contains("DailyLatestAlt"));
        assert!(primary.starts_with("Shore="));
        assert_eq!(primary.split('&').count(), 5);

        let projected = Epoch::new(
            EpochRole::Normals,
            Scenario::Projected { rcp: Rcp::Rcp85, model: ClimateModel::Hadley },
            NormalsPeriod::P2041_2070,
            None,
            1,
        );
        let cmd = projected.init_command(&layout, DailySlot::Primary);
        assert!(cmd.contains("Canada-USA 2041-2070 Hadley GEM2-ES_RCP85.NormalsDB"));
        assert!(!cmd.contains("Daily="));
    }

    #[test]
    fn ids_distinguish_roles() {
        let a = Epoch::new(EpochRole::Normals, Scenario::Past, NormalsPeriod::P1941_1970, None, 1);
        let b = Epoch::new(EpochRole::Generation, Scenario::Past, NormalsPeriod::P1941_1970, None, 1);
        assert_ne!(a.id(), b.id());
    }
}
