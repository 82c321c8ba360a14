//! Risk prediction engine

mod accuracy;
mod features;
mod model;

pub use accuracy::{AccuracyTracker, DEFAULT_HISTORY_SIZE};
pub use features::{FeatureExtractor, DEFAULT_WINDOW_SIZE};
pub use model::{HeuristicModel, RiskModel, VOLATILITY_THRESHOLD};
