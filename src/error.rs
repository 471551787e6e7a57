use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while configuring or running a simulation.
#[derive(Error, Debug)]
pub enum SimError {
    /// Malformed demographic model, unknown or duplicated sampled demes,
    /// rate parameters that do not fit the requested mode.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Rate/position arrays that cannot form a valid rate map.
    #[error("rate map error: {message}")]
    MapConstruction { message: String },

    /// Failures raised by the ancestry or mutation engine.
    #[error("simulation error: {message}")]
    Simulation { message: String },

    #[error("parse error in {} at line {line}: {message}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("demes error: {0}")]
    Demes(#[from] demes::DemesError),

    #[error("tskit error: {0}")]
    Tskit(#[from] tskit::TskitError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SimError>;

impl SimError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn map_construction(message: impl Into<String>) -> Self {
        Self::MapConstruction {
            message: message.into(),
        }
    }

    pub fn simulation(message: impl Into<String>) -> Self {
        Self::Simulation {
            message: message.into(),
        }
    }

    pub fn parse(path: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            line,
            message: message.into(),
        }
    }
}
