
pub mod config;
pub mod correlation;
pub mod data;
pub mod error;
pub mod io;
pub mod miner;
pub mod pattern;
pub mod significance;
pub mod surrogate;

pub use config::AnalysisConfig;
pub use data::{Channel, Count, Database, SpikeTrain, Window};
pub use error::{AnalysisError, Result};
pub use miner::{AnalysisReport, CancelToken, Miner, SurrogateMiner};
pub use pattern::Pattern;
pub use surrogate::SurrogateMethod;

/// Objects that can be recorded in the log
pub trait Loggable {
    fn log(&self, message: &str, level: tracing::Level );
}
