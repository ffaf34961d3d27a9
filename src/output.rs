//! Response payloads and their CSV / JSON renderings.

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::cache::CacheHandle;
use crate::engine::TeleIo;
use crate::merge::{json_scalar, MergedSeries};
use crate::request::OutputFormat;

/// Normals replies, one per location in request order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalsOutput {
    /// Engine replies.
    pub replies: Vec<TeleIo>,
}

impl NormalsOutput {
    /// Tables concatenated in location order; a failed location contributes
    /// its status message.
    #[must_use]
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        for reply in &self.replies {
            let block = if reply.is_success() { &reply.text } else { &reply.msg };
            out.push_str(block);
            if !block.ends_with('\n') {
                out.push('\n');
            }
        }
        out
    }

    /// `{ "<location>": [ { field: value } ] }`, or the status message for a
    /// failed location.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let root: Map<String, Value> = self
            .replies
            .iter()
            .enumerate()
            .map(|(i, reply)| {
                let value = if reply.is_success() {
                    table_records(&reply.text)
                } else {
                    Value::String(reply.msg.clone())
                };
                (i.to_string(), value)
            })
            .collect();
        Value::Object(root)
    }
}

fn table_records(text: &str) -> Value {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let Some(header) = lines.next() else {
        return Value::Array(Vec::new());
    };
    let fields: Vec<&str> = header.split(',').collect();
    Value::Array(
        lines
            .map(|line| {
                let record: Map<String, Value> = fields
                    .iter()
                    .zip(line.split(','))
                    .map(|(k, v)| ((*k).to_string(), json_scalar(v)))
                    .collect();
                Value::Object(record)
            })
            .collect(),
    )
}

/// Merged series, one per location in request order; a failed location holds
/// its error message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesOutput {
    /// Per-location results.
    pub locations: Vec<Result<MergedSeries, String>>,
}

impl SeriesOutput {
    /// Number of locations with data.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.locations.iter().filter(|l| l.is_ok()).count()
    }

    /// One block per location, each starting with its own header line.
    #[must_use]
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        for location in &self.locations {
            match location {
                Ok(series) => out.push_str(&series.to_csv()),
                Err(message) => {
                    out.push_str(message);
                    out.push('\n');
                }
            }
        }
        out
    }

    /// `{ "<location>": { "<rep>": [ ... ] } }`, or the error message for a
    /// failed location.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let root: Map<String, Value> = self
            .locations
            .iter()
            .enumerate()
            .map(|(i, location)| {
                let value = match location {
                    Ok(series) => series.to_json(),
                    Err(message) => Value::String(message.clone()),
                };
                (i.to_string(), value)
            })
            .collect();
        Value::Object(root)
    }
}

/// Coordinate caps per request kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MaxCoordinates {
    /// Weather generation and model requests.
    #[serde(rename = "maxWeatherGeneration")]
    pub generation: usize,
    /// Normals requests.
    #[serde(rename = "maxNormals")]
    pub normals: usize,
}

impl MaxCoordinates {
    /// `generation,normals` or the JSON object.
    #[must_use]
    pub fn render(&self, format: OutputFormat) -> String {
        match format {
            OutputFormat::Csv => format!("{},{}", self.generation, self.normals),
            OutputFormat::Json => json!({ "maxWeatherGeneration": self.generation, "maxNormals": self.normals }).to_string(),
        }
    }
}

/// Result of [`BioSimService::process`](crate::service::BioSimService::process).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Normals tables.
    Normals(NormalsOutput),
    /// Cache handles of generated weather, one per location.
    Handles(Vec<CacheHandle>),
    /// Model output series.
    Series(SeriesOutput),
}

impl Response {
    /// Renders the response body.
    #[must_use]
    pub fn render(&self, format: OutputFormat) -> String {
        match (self, format) {
            (Self::Normals(n), OutputFormat::Csv) => n.to_csv(),
            (Self::Normals(n), OutputFormat::Json) => n.to_json().to_string(),
            (Self::Handles(h), OutputFormat::Csv) => h.iter().map(CacheHandle::as_str).collect::<Vec<_>>().join(" "),
            (Self::Handles(h), OutputFormat::Json) => Value::from(h.iter().map(CacheHandle::as_str).collect::<Vec<_>>()).to_string(),
            (Self::Series(s), OutputFormat::Csv) => s.to_csv(),
            (Self::Series(s), OutputFormat::Json) => s.to_json().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epoch::YearRange;
    use crate::merge::{MergeMode, ResultMerger};

    #[test]
    fn normals_csv_keeps_failures_in_place() {
        let output = NormalsOutput {
            replies: vec![
                TeleIo::success("Month,TN\n1,-10.5"),
                TeleIo::error("Error: station not found"),
            ],
        };
        assert_eq!(output.to_csv(), "Month,TN\n1,-10.5\nError: station not found\n");
        let json = output.to_json();
        assert_eq!(json["0"][0]["TN"], -10.5);
        assert_eq!(json["1"], "Error: station not found");
    }

    #[test]
    fn series_render_per_location() {
        let reply = TeleIo::success("Year,TN\n2000,1.5");
        let series = ResultMerger::new(MergeMode::WeatherGeneration, 1)
            .merge([(YearRange::new(2000, 2000).unwrap(), &reply)])
            .unwrap();
        let output = SeriesOutput {
            locations: vec![Ok(series), Err("Error: nope".to_string())],
        };
        assert_eq!(output.succeeded(), 1);
        assert_eq!(output.to_csv(), "Rep,Year,TN\n0,2000,1.5\nError: nope\n");
        let json = output.to_json();
        assert_eq!(json["0"]["0"][0]["Year"], 2000);
        assert_eq!(json["1"], "Error: nope");
    }

    #[test]
    fn handles_and_caps_render() {
        let response = Response::Handles(vec![CacheHandle::new("a1"), CacheHandle::new("b2")]);
        assert_eq!(response.render(OutputFormat::Csv), "a1 b2");
        assert_eq!(response.render(OutputFormat::Json), r#"["a1","b2"]"#);

        let caps = MaxCoordinates { generation: 10, normals: 50 };
        assert_eq!(caps.render(OutputFormat::Csv), "10,50");
        let json: Value = serde_json::from_str(&caps.render(OutputFormat::Json)).unwrap();
        assert_eq!(json["maxNormals"], 50);
    }
}
