//! A deterministic in-process engine.
//!
//! `ScriptedEngine` speaks the engine command dialect closely enough to drive
//! every layer of the crate without the real simulation binaries:
//! - weather generation emits `Year,Month,TN,TX` rows, two per year and replicate,
//!   with absolute years when `First_year` is given and relative offsets
//!   `-(n-1)..=0` otherwise;
//! - normals emit twelve monthly rows;
//! - model execution maps every input row to `Year,Month,DD`.
//!
//! The reply comment carries the initialization command and the metadata echoes
//! the call command, so callers can tell which backend served a call.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{Engine, EngineFactory, TeleIo, SUCCESS};

type Latency = Arc<dyn Fn(&str) -> Duration + Send + Sync>;

fn parse_command(command: &str) -> HashMap<&str, &str> {
    command
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .collect()
}

fn number<T: std::str::FromStr>(params: &HashMap<&str, &str>, key: &str) -> Option<T> {
    params.get(key).and_then(|v| v.parse().ok())
}

/// Scripted engine instance.
#[derive(Clone, Default)]
pub struct ScriptedEngine {
    init: Option<String>,
    failing_latitude: Option<f64>,
    panic_latitude: Option<f64>,
    latency: Option<Latency>,
}

impl ScriptedEngine {
    /// Creates an uninitialized engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls at this latitude return `Error: station not found`.
    #[must_use]
    pub fn with_failing_latitude(mut self, latitude: f64) -> Self {
        self.failing_latitude = Some(latitude);
        self
    }

    /// Calls at this latitude panic.
    #[must_use]
    pub fn with_panic_latitude(mut self, latitude: f64) -> Self {
        self.panic_latitude = Some(latitude);
        self
    }

    fn check_location(&self, params: &HashMap<&str, &str>) -> Option<TeleIo> {
        let latitude: Option<f64> = number(params, "Latitude");
        if latitude.is_some() && latitude == self.panic_latitude {
            panic!("scripted engine crashed at latitude {latitude:?}");
        }
        if latitude.is_some() && latitude == self.failing_latitude {
            return Some(TeleIo::error("Error: station not found"));
        }
        None
    }

    fn reply(&self, command: &str, text: String) -> TeleIo {
        let mut reply = TeleIo::success(text);
        reply.comment = self.init.clone().unwrap_or_default();
        reply.metadata = command.to_string();
        reply
    }

    fn pause(&self, command: &str) {
        if let Some(latency) = &self.latency {
            let delay = latency(command);
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
        }
    }
}

impl fmt::Debug for ScriptedEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedEngine")
            .field("init", &self.init)
            .field("failing_latitude", &self.failing_latitude)
            .field("panic_latitude", &self.panic_latitude)
            .finish_non_exhaustive()
    }
}

impl Engine for ScriptedEngine {
    fn initialize(&mut self, init: &str) -> String {
        if init.contains("FAIL") {
            return format!("Error: cannot open database ({init})");
        }
        self.init = Some(init.to_string());
        SUCCESS.to_string()
    }

    fn normals(&mut self, command: &str) -> TeleIo {
        let params = parse_command(command);
        if let Some(err) = self.check_location(&params) {
            return err;
        }
        self.pause(command);
        let latitude: f64 = number(&params, "Latitude").unwrap_or(0.0);
        let mut text = String::from("Month,TN,TX,P");
        for month in 1..=12 {
            let tn = f64::from(month) - latitude / 10.0;
            text.push_str(&format!("\n{month},{tn:.1},{:.1},{:.1}", tn + 10.0, f64::from(month) * 5.0));
        }
        self.reply(command, text)
    }

    fn generate(&mut self, command: &str) -> TeleIo {
        let params = parse_command(command);
        if let Some(err) = self.check_location(&params) {
            return err;
        }
        self.pause(command);
        let replications = number::<usize>(&params, "Replications").unwrap_or(1).max(1);
        let first_year: Option<i32> = number(&params, "First_year");
        let nb_years: i32 = match (first_year, number::<i32>(&params, "Last_year")) {
            (Some(first), Some(last)) => last - first + 1,
            _ => number::<i32>(&params, "nb_years").unwrap_or(1),
        }
        .max(1);

        let mut text = String::from("Year,Month,TN,TX");
        for rep in 0..replications {
            for i in 0..nb_years {
                let year = first_year.map_or(i - (nb_years - 1), |first| first + i);
                for month in [1, 7] {
                    let tn = f64::from(month) - 5.0 + rep as f64;
                    text.push_str(&format!("\n{year},{month},{tn:.1},{:.1}", tn + 12.0));
                }
            }
        }
        self.reply(command, text)
    }

    fn execute(&mut self, command: &str, input: &TeleIo) -> TeleIo {
        if !input.is_success() {
            return TeleIo::error(input.msg.clone());
        }
        let params = parse_command(command);
        let threshold: f64 = params
            .get("Parameters")
            .and_then(|p| p.split('+').find_map(|kv| kv.strip_prefix("Threshold=")))
            .and_then(|v| v.parse().ok())
            .unwrap_or(5.0);

        let mut lines = input.text.lines();
        let Some(header) = lines.next() else {
            return TeleIo::error("Error: empty weather input");
        };
        let fields: Vec<&str> = header.split(',').collect();
        let (Some(year_idx), Some(tn_idx), Some(tx_idx)) = (
            fields.iter().position(|f| *f == "Year"),
            fields.iter().position(|f| *f == "TN"),
            fields.iter().position(|f| *f == "TX"),
        ) else {
            return TeleIo::error("Error: weather input lacks Year, TN or TX");
        };
        let month_idx = fields.iter().position(|f| *f == "Month");

        let mut text = String::from("Year,Month,DD");
        for line in lines.filter(|l| !l.trim().is_empty()) {
            let values: Vec<&str> = line.split(',').collect();
            let tn: f64 = values.get(tn_idx).and_then(|v| v.parse().ok()).unwrap_or(0.0);
            let tx: f64 = values.get(tx_idx).and_then(|v| v.parse().ok()).unwrap_or(0.0);
            let year = values.get(year_idx).copied().unwrap_or("0");
            let month = month_idx.and_then(|i| values.get(i).copied()).unwrap_or("1");
            let dd = ((tn + tx) / 2.0 - threshold).max(0.0);
            text.push_str(&format!("\n{year},{month},{dd:.1}"));
        }
        self.reply(command, text)
    }

    fn help(&self) -> String {
        "Scripted engine: degree-days above Threshold from TN and TX".to_string()
    }

    fn default_parameters(&self) -> String {
        "Threshold=5".to_string()
    }

    fn weather_variables_needed(&self) -> String {
        "TN+TX+P".to_string()
    }
}

/// Factory producing configured [`ScriptedEngine`]s.
#[derive(Clone, Default)]
pub struct ScriptedFactory {
    template: ScriptedEngine,
    created: Arc<AtomicUsize>,
}

impl ScriptedFactory {
    /// Creates a factory for plain scripted engines.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Engines answer `Error: station not found` at this latitude.
    #[must_use]
    pub fn with_failing_latitude(mut self, latitude: f64) -> Self {
        self.template = self.template.with_failing_latitude(latitude);
        self
    }

    /// Engines panic at this latitude.
    #[must_use]
    pub fn with_panic_latitude(mut self, latitude: f64) -> Self {
        self.template = self.template.with_panic_latitude(latitude);
        self
    }

    /// Engines sleep for `latency(command)` before answering normals and
    /// generation calls.
    #[must_use]
    pub fn with_latency(mut self, latency: impl Fn(&str) -> Duration + Send + Sync + 'static) -> Self {
        self.template.latency = Some(Arc::new(latency));
        self
    }

    /// Number of engines created so far.
    #[must_use]
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for ScriptedFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedFactory")
            .field("template", &self.template)
            .field("created", &self.created())
            .finish()
    }
}

impl EngineFactory for ScriptedFactory {
    fn create(&self, _target: &str) -> Box<dyn Engine> {
        self.created.fetch_add(1, Ordering::Relaxed);
        Box::new(self.template.clone())
    }
}
