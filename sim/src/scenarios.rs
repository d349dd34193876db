//! Scenario definitions.
//!
//! Each scenario is a named single-target trajectory plus a position sensor.
//! All scenarios are deterministic given the same seed.

use crate::replay::RunLog;
use crate::trajectory::{Stage, StageVector, Trajectory2D};
use anyhow::Result;
use motion_models::position_noise;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Which pre-defined scenario to load.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
pub enum ScenarioKind {
    /// Constant velocity throughout
    Straight,
    /// Cruise, then a long acceleration phase
    Accelerating,
    /// Cruise, then a sustained coordinated turn
    Turning,
    /// Alternating cruise, turns and accelerations
    Maneuvering,
}

/// Timing and sensor parameters shared by all scenarios.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ScenarioConfig {
    /// Sample period (s)
    pub dt: f64,
    /// Position measurement std dev per axis (m)
    pub meas_std: [f64; 2],
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self { dt: 1.0, meas_std: [10.0, 10.0] }
    }
}

/// A fully configured simulation scenario.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub seed: u64,
    pub config: ScenarioConfig,
    pub start: [f64; 6],
    pub stages: Vec<Stage>,
}

impl Scenario {
    /// Build the named scenario. Uses `seed` for repeatability.
    pub fn build(kind: ScenarioKind, seed: u64) -> Self {
        Self::build_with(kind, seed, ScenarioConfig::default())
    }

    pub fn build_with(kind: ScenarioKind, seed: u64, config: ScenarioConfig) -> Self {
        let (name, stages) = match kind {
            ScenarioKind::Straight => ("straight", straight()),
            ScenarioKind::Accelerating => ("accelerating", accelerating()),
            ScenarioKind::Turning => ("turning", turning()),
            ScenarioKind::Maneuvering => ("maneuvering", maneuvering()),
        };
        Scenario {
            name: name.into(),
            seed,
            config,
            start: [0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            stages,
        }
    }

    pub fn trajectory(&self) -> Result<Trajectory2D> {
        let mut traj = Trajectory2D::new(self.config.dt, self.start);
        traj.add_stages(&self.stages)?;
        Ok(traj)
    }

    /// Propagate the truth and draw the measurements.
    pub fn generate(&self) -> Result<RunLog> {
        let traj = self.trajectory()?;
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let r = position_noise(&self.config.meas_std);
        let measurements = traj
            .measure(&r, &mut rng)?
            .into_iter()
            .map(|z| [z[0], z[1]])
            .collect();
        info!(scenario = %self.name, seed = self.seed, steps = traj.len(), "generated run");
        Ok(RunLog {
            scenario_name: self.name.clone(),
            seed: self.seed,
            dt: self.config.dt,
            meas_std: self.config.meas_std,
            truth: traj.states().to_vec(),
            measurements,
        })
    }
}

fn cv(len: usize, vx: f64, vy: f64) -> Stage {
    Stage::Cv { len, velocity: StageVector::Axes([Some(vx), Some(vy)]) }
}

fn cruise(len: usize) -> Stage {
    Stage::Cv { len, velocity: StageVector::Axes([None, None]) }
}

// ---------------------------------------------------------------------------
// Scenario 1: Straight
// ---------------------------------------------------------------------------
fn straight() -> Vec<Stage> {
    vec![cv(200, 30.0, 20.0)]
}

// ---------------------------------------------------------------------------
// Scenario 2: Accelerating
// ---------------------------------------------------------------------------
fn accelerating() -> Vec<Stage> {
    vec![
        cv(60, 30.0, 20.0),
        Stage::Ca { len: 60, acceleration: StageVector::AlongHeading(3.0) },
        cruise(60),
    ]
}

// ---------------------------------------------------------------------------
// Scenario 3: Turning
// ---------------------------------------------------------------------------
fn turning() -> Vec<Stage> {
    vec![cv(60, 50.0, 0.0), Stage::Ct { len: 90, omega: 2.0 }, cruise(60)]
}

// ---------------------------------------------------------------------------
// Scenario 4: Maneuvering
// ---------------------------------------------------------------------------
fn maneuvering() -> Vec<Stage> {
    vec![
        cv(50, 30.0, 20.0),
        Stage::Ct { len: 45, omega: 4.0 },
        cruise(40),
        Stage::Ca { len: 30, acceleration: StageVector::Axes([Some(2.0), Some(-1.0)]) },
        Stage::Ct { len: 60, omega: -3.0 },
        cruise(50),
    ]
}
