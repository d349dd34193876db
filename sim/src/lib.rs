//! `sim`: Scenario simulator: ground-truth trajectories, noisy measurements, run logs.

pub mod metrics;
pub mod noise;
pub mod replay;
pub mod scenarios;
pub mod trajectory;

pub use metrics::EstimationMetrics;
pub use noise::multi_normal;
pub use replay::{load_log, save_log, RunLog};
pub use scenarios::{Scenario, ScenarioConfig, ScenarioKind};
pub use trajectory::{Stage, StageVector, Trajectory2D};
