//! Engine abstraction and engine handles.
//!
//! The simulation engine is an opaque collaborator: it is initialized once with
//! a data-set command, then answers plain-text commands with a [`TeleIo`] reply.
//! An [`EngineHandle`] owns either one synchronous instance or a pool of workers,
//! each with a private instance created by an [`EngineFactory`].

mod handle;
mod pool;

/// Deterministic in-process engine used by tests, benches and demos.
pub mod scripted;

pub use handle::{EngineHandle, HandleStats, PreparedBackend};

use serde::{Deserialize, Serialize};

/// Status string of a successful engine reply.
pub const SUCCESS: &str = "Success";

/// Reply record exchanged with the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeleIo {
    /// Status: `Success` or an error message.
    pub msg: String,
    /// Free-form comment.
    pub comment: String,
    /// Engine metadata, passed through unchanged.
    pub metadata: String,
    /// Tabular text; the first line is a comma-separated header.
    pub text: String,
    /// Whether `data` is compressed.
    pub compress: bool,
    /// Optional binary payload, passed through unchanged.
    pub data: Vec<u8>,
}

impl TeleIo {
    /// A successful reply carrying `text`.
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            msg: SUCCESS.to_string(),
            text: text.into(),
            ..Self::default()
        }
    }

    /// An error reply; `msg` replaces the data.
    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            msg: msg.into(),
            ..Self::default()
        }
    }

    /// Returns true if the status is `Success`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.msg == SUCCESS
    }
}

/// A single-location engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    /// Climate normals.
    Normals {
        /// Engine command string.
        command: String,
    },
    /// Weather generation.
    Generate {
        /// Engine command string.
        command: String,
    },
    /// Model execution over previously generated weather.
    Execute {
        /// Engine command string (model parameters).
        command: String,
        /// Weather input.
        input: TeleIo,
    },
}

/// The opaque simulation engine.
///
/// Implementations are created per worker and never shared between threads.
pub trait Engine: Send {
    /// Loads the data set; returns `Success` or an error message.
    fn initialize(&mut self, init: &str) -> String;

    /// Computes climate normals.
    fn normals(&mut self, command: &str) -> TeleIo;

    /// Generates daily weather.
    fn generate(&mut self, command: &str) -> TeleIo;

    /// Runs a model over weather input.
    fn execute(&mut self, command: &str, input: &TeleIo) -> TeleIo;

    /// Help text of the loaded model.
    fn help(&self) -> String;

    /// Default parameters of the loaded model.
    fn default_parameters(&self) -> String;

    /// Weather variables the loaded model needs, `+`-separated.
    fn weather_variables_needed(&self) -> String;

    /// Runs one call.
    fn call(&mut self, call: &EngineCall) -> TeleIo {
        match call {
            EngineCall::Normals { command } => self.normals(command),
            EngineCall::Generate { command } => self.generate(command),
            EngineCall::Execute { command, input } => self.execute(command, input),
        }
    }
}

/// Creates fresh, uninitialized engine instances.
pub trait EngineFactory: Send + Sync {
    /// Creates an instance for `target` (an epoch or model name).
    fn create(&self, target: &str) -> Box<dyn Engine>;
}

impl<F> EngineFactory for F
where
    F: Fn(&str) -> Box<dyn Engine> + Send + Sync,
{
    fn create(&self, target: &str) -> Box<dyn Engine> {
        self(target)
    }
}

/// Static engine metadata reported once at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineMetadata {
    /// Help text.
    pub help: String,
    /// Default parameters.
    pub default_parameters: String,
    /// Required weather variables.
    pub required_variables: Vec<String>,
}

impl EngineMetadata {
    pub(crate) fn collect(engine: &dyn Engine) -> Self {
        let required_variables = engine
            .weather_variables_needed()
            .split('+')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect();
        Self {
            help: engine.help(),
            default_parameters: engine.default_parameters(),
            required_variables,
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs one call, turning a panic into an error reply.
pub(crate) fn call_guarded(engine: &mut dyn Engine, call: &EngineCall) -> TeleIo {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| engine.call(call))) {
        Ok(reply) => reply,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(%message, "engine call panicked");
            TeleIo::error(format!("Error: engine failure ({message})"))
        }
    }
}

/// Creates an engine, turning a panicking factory into an error status.
pub(crate) fn create_guarded(factory: &dyn EngineFactory, target: &str) -> Result<Box<dyn Engine>, String> {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| factory.create(target)))
        .map_err(|payload| format!("Error: engine creation panicked ({})", panic_message(payload.as_ref())))
}

/// Initializes an engine, turning a panic into an error status.
pub(crate) fn initialize_guarded(engine: &mut dyn Engine, init: &str) -> String {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| engine.initialize(init)))
        .unwrap_or_else(|payload| format!("Error: engine panicked during initialization ({})", panic_message(payload.as_ref())))
}

#[cfg(test)]
mod tests {
    use super::scripted::ScriptedEngine;
    use super::*;

    #[test]
    fn teleio_status() {
        assert!(TeleIo::success("Year\n1").is_success());
        let err = TeleIo::error("Error: nope");
        assert!(!err.is_success());
        assert!(err.text.is_empty());
    }

    #[test]
    fn metadata_splits_variables() {
        let engine = ScriptedEngine::new();
        let meta = EngineMetadata::collect(&engine);
        assert_eq!(meta.required_variables, vec!["TN", "TX", "P"]);
        assert_eq!(meta.default_parameters, "Threshold=5");
    }

    #[test]
    fn closures_are_factories() {
        let factory = |_: &str| -> Box<dyn Engine> { Box::new(ScriptedEngine::new()) };
        let mut engine = factory.create("wg");
        assert_eq!(engine.initialize("Normals=x"), SUCCESS);
    }

    #[test]
    fn guarded_call_catches_panics() {
        let mut engine = ScriptedEngine::new().with_panic_latitude(13.0);
        assert_eq!(engine.initialize("Normals=x"), SUCCESS);
        let reply = call_guarded(
            &mut engine,
            &EngineCall::Generate {
                command: "Latitude=13&Longitude=-70&nb_years=1".to_string(),
            },
        );
        assert!(!reply.is_success());
        assert!(reply.msg.contains("engine failure"));
    }
}
