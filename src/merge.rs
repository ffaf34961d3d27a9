//! Stitching per-epoch results into one series per location.
//!
//! Every span of a request produces one engine reply per location. The merger
//! parses each reply into replicates, checks that headers and replicate counts
//! agree, fixes the year column and appends replicate *r* of a span right after
//! replicate *r* of the previous span.
//!
//! Two modes exist:
//! - weather generation: year values `<= 0` are offsets from the span's last
//!   year and are rebased to absolute years;
//! - model output: years are recounted from the span's first year, bumping on
//!   each change of the engine's year value, and every row is tagged with a
//!   [`DataType`] relative to the last observed year.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::engine::TeleIo;
use crate::epoch::YearRange;
use crate::error::MergeError;

/// Name of the year column.
pub const YEAR_FIELD: &str = "Year";

/// How rows relate to observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DataType {
    /// Before the last observed year.
    RealData,
    /// The last observed year, partly observed and partly simulated.
    RealDataSimulated,
    /// After the last observed year.
    Simulated,
}

impl DataType {
    /// Classifies `year`; everything is simulated without observations.
    #[must_use]
    pub fn classify(year: i32, last_observed: Option<i32>) -> Self {
        match last_observed {
            Some(last) if year < last => Self::RealData,
            Some(last) if year == last => Self::RealDataSimulated,
            _ => Self::Simulated,
        }
    }

    /// Output label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RealData => "Real_Data",
            Self::RealDataSimulated => "Real_Data/Simulated",
            Self::Simulated => "Simulated",
        }
    }
}

/// Merge behavior for the year column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Weather generator output.
    WeatherGeneration,
    /// Model output tagged against the last observed year.
    ModelOutput {
        /// Last observed year, `None` when generation was forced.
        last_observed: Option<i32>,
    },
}

/// One engine reply split into replicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationResult {
    header: Vec<String>,
    replicates: Vec<Vec<Vec<String>>>,
}

impl LocationResult {
    /// Parses a reply holding `replicates` equally sized blocks of rows.
    ///
    /// # Errors
    ///
    /// A non-success reply yields `MergeError::EngineStatus` with the engine
    /// message; malformed text yields the matching structural error.
    pub fn parse(reply: &TeleIo, replicates: usize) -> Result<Self, MergeError> {
        if !reply.is_success() {
            return Err(MergeError::EngineStatus {
                message: reply.msg.clone(),
            });
        }

        let mut lines = reply.text.lines().filter(|l| !l.trim().is_empty());
        let header: Vec<String> = lines
            .next()
            .ok_or(MergeError::MissingHeader)?
            .split(',')
            .map(str::to_string)
            .collect();
        let rows: Vec<&str> = lines.collect();

        if replicates == 0 || rows.len() % replicates != 0 {
            return Err(MergeError::RaggedReplicates {
                lines: rows.len(),
                replicates,
            });
        }

        let mut parsed = Vec::with_capacity(rows.len());
        for (idx, line) in rows.iter().enumerate() {
            let fields: Vec<String> = line.split(',').map(str::to_string).collect();
            if fields.len() != header.len() {
                return Err(MergeError::MalformedRow {
                    row: idx + 1,
                    expected: header.len(),
                    actual: fields.len(),
                });
            }
            parsed.push(fields);
        }

        let per_replicate = rows.len() / replicates;
        let replicates = if per_replicate == 0 {
            vec![Vec::new(); replicates]
        } else {
            parsed.chunks(per_replicate).map(<[Vec<String>]>::to_vec).collect()
        };

        Ok(Self { header, replicates })
    }

    /// Header fields.
    #[must_use]
    pub fn header(&self) -> &[String] {
        &self.header
    }

    /// Number of replicates.
    #[must_use]
    pub fn replicate_count(&self) -> usize {
        self.replicates.len()
    }
}

/// One output row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesRow {
    /// Fields in header order, year already absolute.
    pub fields: Vec<String>,
    /// Data type tag in model mode.
    pub data_type: Option<DataType>,
}

/// A continuous multi-year series for one location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedSeries {
    mode: MergeMode,
    header: Vec<String>,
    replicates: Vec<Vec<SeriesRow>>,
    spans: Vec<YearRange>,
}

impl MergedSeries {
    /// An empty series expecting `replicates` replicates.
    #[must_use]
    pub fn new(mode: MergeMode, replicates: usize) -> Self {
        Self {
            mode,
            header: Vec::new(),
            replicates: vec![Vec::new(); replicates],
            spans: Vec::new(),
        }
    }

    /// Engine header fields (without `Rep` and `DataType`).
    #[must_use]
    pub fn header(&self) -> &[String] {
        &self.header
    }

    /// Rows of each replicate.
    #[must_use]
    pub fn replicates(&self) -> &[Vec<SeriesRow>] {
        &self.replicates
    }

    /// Spans merged so far, oldest first.
    #[must_use]
    pub fn spans(&self) -> &[YearRange] {
        &self.spans
    }

    /// Appends the next span's result.
    ///
    /// # Errors
    ///
    /// Fails on header or replicate count mismatch, on a span that does not
    /// follow the previous one, and on years outside `bounds`. The series is
    /// unchanged on error.
    pub fn append(&mut self, bounds: YearRange, part: LocationResult) -> Result<(), MergeError> {
        if let Some(previous) = self.spans.last() {
            if bounds.lo <= previous.hi {
                return Err(MergeError::OutOfOrder {
                    previous: previous.to_string(),
                    next: bounds.to_string(),
                });
            }
            if part.header != self.header {
                return Err(MergeError::HeaderMismatch {
                    expected: self.header.join(","),
                    actual: part.header.join(","),
                });
            }
        }
        if part.replicates.len() != self.replicates.len() {
            return Err(MergeError::ReplicateMismatch {
                expected: self.replicates.len(),
                actual: part.replicates.len(),
            });
        }

        let year_idx = part.header.iter().position(|f| f == YEAR_FIELD);
        let mut converted = Vec::with_capacity(part.replicates.len());
        for rows in part.replicates {
            converted.push(self.convert_replicate(rows, year_idx, bounds)?);
        }

        if self.spans.is_empty() {
            self.header = part.header;
        }
        for (target, rows) in self.replicates.iter_mut().zip(converted) {
            target.extend(rows);
        }
        self.spans.push(bounds);
        Ok(())
    }

    fn convert_replicate(
        &self,
        rows: Vec<Vec<String>>,
        year_idx: Option<usize>,
        bounds: YearRange,
    ) -> Result<Vec<SeriesRow>, MergeError> {
        match self.mode {
            MergeMode::WeatherGeneration => rows
                .into_iter()
                .map(|mut fields| {
                    if let Some(idx) = year_idx {
                        let year = rebase_year(&fields[idx], bounds)?;
                        fields[idx] = year.to_string();
                    }
                    Ok(SeriesRow { fields, data_type: None })
                })
                .collect(),
            MergeMode::ModelOutput { last_observed } => {
                let mut year = bounds.lo - 1;
                let mut last_seen: Option<String> = None;
                let mut out = Vec::with_capacity(rows.len());
                for mut fields in rows {
                    let effective = match year_idx {
                        Some(idx) => {
                            if last_seen.as_deref() != Some(fields[idx].as_str()) {
                                year += 1;
                                last_seen = Some(fields[idx].clone());
                            }
                            if year > bounds.hi {
                                return Err(MergeError::YearOutOfSpan {
                                    year,
                                    lo: bounds.lo,
                                    hi: bounds.hi,
                                });
                            }
                            fields[idx] = year.to_string();
                            year
                        }
                        None => bounds.lo,
                    };
                    out.push(SeriesRow {
                        fields,
                        data_type: Some(DataType::classify(effective, last_observed)),
                    });
                }
                Ok(out)
            }
        }
    }

    /// Renders `Rep,<header>[,DataType]` followed by every row, replicate by
    /// replicate.
    #[must_use]
    pub fn to_csv(&self) -> String {
        let tagged = matches!(self.mode, MergeMode::ModelOutput { .. });
        let mut out = format!("Rep,{}", self.header.join(","));
        if tagged {
            out.push_str(",DataType");
        }
        out.push('\n');
        for (rep, rows) in self.replicates.iter().enumerate() {
            for row in rows {
                out.push_str(&rep.to_string());
                out.push(',');
                out.push_str(&row.fields.join(","));
                if let Some(dt) = row.data_type {
                    out.push(',');
                    out.push_str(dt.as_str());
                }
                out.push('\n');
            }
        }
        out
    }

    /// Renders `{ "<rep>": [ { field: value, ... }, ... ] }`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut root = Map::new();
        for (rep, rows) in self.replicates.iter().enumerate() {
            let records: Vec<Value> = rows
                .iter()
                .map(|row| {
                    let mut record: Map<String, Value> = self
                        .header
                        .iter()
                        .zip(&row.fields)
                        .map(|(k, v)| (k.clone(), json_scalar(v)))
                        .collect();
                    if let Some(dt) = row.data_type {
                        record.insert("DataType".to_string(), Value::String(dt.as_str().to_string()));
                    }
                    Value::Object(record)
                })
                .collect();
            root.insert(rep.to_string(), Value::Array(records));
        }
        Value::Object(root)
    }
}

fn rebase_year(raw: &str, bounds: YearRange) -> Result<i32, MergeError> {
    let value: i32 = raw.trim().parse().map_err(|_| MergeError::InvalidYear {
        value: raw.to_string(),
    })?;
    let year = if value <= 0 { bounds.hi + value } else { value };
    if bounds.contains(year) {
        Ok(year)
    } else {
        Err(MergeError::YearOutOfSpan {
            year,
            lo: bounds.lo,
            hi: bounds.hi,
        })
    }
}

pub(crate) fn json_scalar(raw: &str) -> Value {
    if let Ok(i) = raw.parse::<i64>() {
        return Value::from(i);
    }
    match raw.parse::<f64>() {
        Ok(f) if f.is_finite() => Value::from(f),
        _ => Value::String(raw.to_string()),
    }
}

/// Folds span results for one location into a [`MergedSeries`].
#[derive(Debug, Clone, Copy)]
pub struct ResultMerger {
    mode: MergeMode,
    replicates: usize,
}

impl ResultMerger {
    /// Creates a merger.
    #[must_use]
    pub const fn new(mode: MergeMode, replicates: usize) -> Self {
        Self { mode, replicates }
    }

    /// Merges `(bounds, reply)` pairs in order; the first non-success reply
    /// short-circuits with its message.
    ///
    /// # Errors
    ///
    /// See [`LocationResult::parse`] and [`MergedSeries::append`].
    pub fn merge<'a, I>(&self, parts: I) -> Result<MergedSeries, MergeError>
    where
        I: IntoIterator<Item = (YearRange, &'a TeleIo)>,
    {
        let mut series = MergedSeries::new(self.mode, self.replicates);
        for (bounds, reply) in parts {
            self.append(&mut series, bounds, reply)?;
        }
        Ok(series)
    }

    /// Appends one more span to an existing series.
    ///
    /// # Errors
    ///
    /// See [`ResultMerger::merge`].
    pub fn append(&self, series: &mut MergedSeries, bounds: YearRange, reply: &TeleIo) -> Result<(), MergeError> {
        let part = LocationResult::parse(reply, self.replicates)?;
        series.append(bounds, part)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn yr(lo: i32, hi: i32) -> YearRange {
        YearRange::new(lo, hi).unwrap()
    }

    /// Two rows per year per replicate, relative years.
    fn relative(bounds: YearRange, reps: usize) -> TeleIo {
        let n = bounds.len() as i32;
        let mut text = String::from("Year,Month,TN");
        for rep in 0..reps {
            for i in 0..n {
                for month in [1, 7] {
                    text.push_str(&format!("\n{},{month},{rep}.5", i - (n - 1)));
                }
            }
        }
        TeleIo::success(text)
    }

    fn absolute(bounds: YearRange, reps: usize) -> TeleIo {
        let mut text = String::from("Year,Month,TN");
        for rep in 0..reps {
            for year in bounds.lo..=bounds.hi {
                text.push_str(&format!("\n{year},1,{rep}.5"));
            }
        }
        TeleIo::success(text)
    }

    fn years_of(series: &MergedSeries, rep: usize) -> Vec<i32> {
        series.replicates()[rep]
            .iter()
            .map(|r| r.fields[0].parse().unwrap())
            .collect()
    }

    #[test]
    fn relative_years_are_rebased_on_span_end() {
        let merger = ResultMerger::new(MergeMode::WeatherGeneration, 2);
        let a = relative(yr(1965, 1970), 2);
        let b = absolute(yr(1971, 1972), 2);
        let series = merger.merge([(yr(1965, 1970), &a), (yr(1971, 1972), &b)]).unwrap();

        let years = years_of(&series, 1);
        assert_eq!(years.first(), Some(&1965));
        assert_eq!(years.last(), Some(&1972));
        assert!(years.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(series.spans(), &[yr(1965, 1970), yr(1971, 1972)]);
        // Replicate 1 keeps its own values across spans.
        assert!(series.replicates()[1].iter().all(|r| r.fields[2] == "1.5"));
    }

    #[test]
    fn engine_status_short_circuits() {
        let merger = ResultMerger::new(MergeMode::WeatherGeneration, 1);
        let ok = absolute(yr(2000, 2001), 1);
        let failed = TeleIo::error("Error: station not found");
        let err = merger.merge([(yr(2000, 2001), &ok), (yr(2002, 2003), &failed)]).unwrap_err();
        assert_eq!(err.to_string(), "Error: station not found");
    }

    #[test]
    fn header_mismatch_is_fatal() {
        let merger = ResultMerger::new(MergeMode::WeatherGeneration, 1);
        let a = absolute(yr(2000, 2000), 1);
        let b = TeleIo::success("Year,Month,TX\n2001,1,3.0");
        let err = merger.merge([(yr(2000, 2000), &a), (yr(2001, 2001), &b)]).unwrap_err();
        assert!(matches!(err, MergeError::HeaderMismatch { .. }));
    }

    #[test]
    fn ragged_replicates_are_rejected() {
        let reply = TeleIo::success("Year,TN\n2000,1\n2001,2\n2002,3");
        let err = LocationResult::parse(&reply, 2).unwrap_err();
        assert!(matches!(err, MergeError::RaggedReplicates { lines: 3, replicates: 2 }));
    }

    #[test]
    fn malformed_row_is_rejected() {
        let reply = TeleIo::success("Year,TN\n2000,1,9");
        let err = LocationResult::parse(&reply, 1).unwrap_err();
        assert!(matches!(err, MergeError::MalformedRow { row: 1, expected: 2, actual: 3 }));
    }

    #[test]
    fn out_of_order_spans_are_rejected() {
        let merger = ResultMerger::new(MergeMode::WeatherGeneration, 1);
        let a = absolute(yr(2000, 2001), 1);
        let b = absolute(yr(1990, 1991), 1);
        let err = merger.merge([(yr(2000, 2001), &a), (yr(1990, 1991), &b)]).unwrap_err();
        assert!(matches!(err, MergeError::OutOfOrder { .. }));
    }

    #[test]
    fn model_output_recounts_and_tags_years() {
        let merger = ResultMerger::new(
            MergeMode::ModelOutput {
                last_observed: Some(2020),
            },
            1,
        );
        // Engine years are opaque labels; only changes matter.
        let first = TeleIo::success("Year,DD\n7,1\n7,2\n8,3");
        let second = TeleIo::success("Year,DD\n-1,4\n0,5");
        let series = merger.merge([(yr(2019, 2020), &first), (yr(2021, 2022), &second)]).unwrap();

        let csv = series.to_csv();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "Rep,Year,DD,DataType");
        assert_eq!(lines[1], "0,2019,1,Real_Data");
        assert_eq!(lines[2], "0,2019,2,Real_Data");
        assert_eq!(lines[3], "0,2020,3,Real_Data/Simulated");
        assert_eq!(lines[4], "0,2021,4,Simulated");
        assert_eq!(lines[5], "0,2022,5,Simulated");
    }

    #[test]
    fn model_output_without_observations_is_simulated() {
        let merger = ResultMerger::new(MergeMode::ModelOutput { last_observed: None }, 1);
        let reply = TeleIo::success("Year,DD\n1,1");
        let series = merger.merge([(yr(1950, 1950), &reply)]).unwrap();
        assert_eq!(series.replicates()[0][0].data_type, Some(DataType::Simulated));
    }

    #[test]
    fn model_years_overflowing_span_are_rejected() {
        let merger = ResultMerger::new(MergeMode::ModelOutput { last_observed: None }, 1);
        let reply = TeleIo::success("Year,DD\n1,1\n2,1\n3,1");
        let err = merger.merge([(yr(2000, 2001), &reply)]).unwrap_err();
        assert!(matches!(err, MergeError::YearOutOfSpan { year: 2002, .. }));
    }

    #[test]
    fn json_groups_rows_by_replicate() {
        let merger = ResultMerger::new(MergeMode::WeatherGeneration, 2);
        let reply = absolute(yr(2000, 2000), 2);
        let json = merger.merge([(yr(2000, 2000), &reply)]).unwrap().to_json();
        assert_eq!(json["0"][0]["Year"], 2000);
        assert_eq!(json["1"][0]["TN"], 1.5);
        assert_eq!(json["1"][0]["Month"], 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn appending_equals_merging_everything(
            lengths in prop::collection::vec(1i32..6, 1..6),
            reps in 1usize..4,
            model in any::<bool>(),
        ) {
            let mode = if model {
                MergeMode::ModelOutput { last_observed: Some(1960) }
            } else {
                MergeMode::WeatherGeneration
            };
            let merger = ResultMerger::new(mode, reps);

            let mut lo = 1950;
            let mut parts = Vec::new();
            for len in &lengths {
                let bounds = yr(lo, lo + len - 1);
                parts.push((bounds, relative(bounds, reps)));
                lo = bounds.hi + 1;
            }

            let all = merger.merge(parts.iter().map(|(b, r)| (*b, r))).unwrap();

            let (last, head) = parts.split_last().unwrap();
            let mut incremental = merger.merge(head.iter().map(|(b, r)| (*b, r))).unwrap();
            merger.append(&mut incremental, last.0, &last.1).unwrap();

            prop_assert_eq!(&all, &incremental);
            let total: i32 = lengths.iter().sum();
            prop_assert_eq!(all.replicates()[0].len(), (total * 2) as usize);
        }
    }
}
