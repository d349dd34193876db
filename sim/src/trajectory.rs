//! Piecewise ground-truth trajectories in the plane.
//!
//! The true state is the 2-axis constant-acceleration layout
//! `[x, vx, ax, y, vy, ay]`. A trajectory is built from stages, each of which
//! propagates the current head with one motion model for a number of steps:
//!
//! ```text
//!   start ──cv──► ... ──ca──► ... ──ct──► ...
//! ```

use crate::noise::multi_normal;
use anyhow::{ensure, Result};
use estimator_core::{DMat, DVec};
use motion_models::{ca_transition, ct2d_transition, cv_transition};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Either explicit per-axis values (`None` keeps the current value) or a
/// magnitude applied along the current heading.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum StageVector {
    Axes([Option<f64>; 2]),
    AlongHeading(f64),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "model", rename_all = "lowercase")]
pub enum Stage {
    /// Constant velocity; accelerations are cleared.
    Cv { len: usize, velocity: StageVector },
    /// Constant acceleration.
    Ca { len: usize, acceleration: StageVector },
    /// Coordinated turn at `omega` degrees per second; accelerations are cleared.
    Ct { len: usize, omega: f64 },
}

impl Stage {
    pub fn len(&self) -> usize {
        match self {
            Stage::Cv { len, .. } | Stage::Ca { len, .. } | Stage::Ct { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// [x, vx, y, vy] inside [x, vx, ax, y, vy, ay]
const CV_SEL: [usize; 4] = [0, 1, 3, 4];

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Trajectory2D {
    dt: f64,
    head: [f64; 6],
    states: Vec<[f64; 6]>,
    stages: Vec<Stage>,
}

impl Trajectory2D {
    pub fn new(dt: f64, start: [f64; 6]) -> Self {
        Self { dt, head: start, states: vec![start], stages: Vec::new() }
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Number of states including the start.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn states(&self) -> &[[f64; 6]] {
        &self.states
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Unit vector of the current velocity.
    fn heading(&self) -> Result<(f64, f64)> {
        let (vx, vy) = (self.head[1], self.head[4]);
        let speed = vx.hypot(vy);
        ensure!(speed > 0.0, "magnitude along heading needs a non-zero velocity");
        Ok((vx / speed, vy / speed))
    }

    /// Apply `v` to the head components at `ix`, `iy`.
    fn assign(&mut self, v: &StageVector, ix: usize, iy: usize) -> Result<()> {
        match v {
            StageVector::Axes([x, y]) => {
                if let Some(x) = x {
                    self.head[ix] = *x;
                }
                if let Some(y) = y {
                    self.head[iy] = *y;
                }
            }
            StageVector::AlongHeading(m) => {
                let (ux, uy) = self.heading()?;
                self.head[ix] = m * ux;
                self.head[iy] = m * uy;
            }
        }
        Ok(())
    }

    fn run_sub(&mut self, f: &DMat, len: usize) {
        for _ in 0..len {
            let sub = DVec::from_iterator(4, CV_SEL.iter().map(|&i| self.head[i]));
            let next = f * sub;
            for (k, &i) in CV_SEL.iter().enumerate() {
                self.head[i] = next[k];
            }
            self.states.push(self.head);
        }
    }

    /// Append stages, propagating the head through each in turn.
    pub fn add_stages(&mut self, stages: &[Stage]) -> Result<()> {
        for stage in stages {
            match stage {
                Stage::Cv { len, velocity } => {
                    self.assign(velocity, 1, 4)?;
                    self.head[2] = 0.0;
                    self.head[5] = 0.0;
                    self.run_sub(&cv_transition(2, self.dt), *len);
                }
                Stage::Ca { len, acceleration } => {
                    self.assign(acceleration, 2, 5)?;
                    let f = ca_transition(2, self.dt);
                    for _ in 0..*len {
                        let next = &f * DVec::from_row_slice(&self.head);
                        self.head.copy_from_slice(next.as_slice());
                        self.states.push(self.head);
                    }
                }
                Stage::Ct { len, omega } => {
                    self.head[2] = 0.0;
                    self.head[5] = 0.0;
                    self.run_sub(&ct2d_transition(2, *omega, self.dt), *len);
                }
            }
            self.stages.push(stage.clone());
        }
        Ok(())
    }

    /// True positions `[x, y]`.
    pub fn positions(&self) -> Vec<DVec> {
        self.states.iter().map(|s| DVec::from_vec(vec![s[0], s[3]])).collect()
    }

    /// Noisy position measurements with covariance `r`, one per state.
    pub fn measure<R: Rng + ?Sized>(&self, r: &DMat, rng: &mut R) -> Result<Vec<DVec>> {
        self.positions().iter().map(|p| multi_normal(p, r, rng)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn cv_then_ca_then_ct() {
        let mut traj = Trajectory2D::new(1.0, [0.0; 6]);
        traj.add_stages(&[
            Stage::Cv { len: 10, velocity: StageVector::Axes([Some(10.0), Some(0.0)]) },
            Stage::Ca { len: 2, acceleration: StageVector::AlongHeading(1.0) },
            Stage::Ct { len: 4, omega: 22.5 },
        ])
        .unwrap();
        assert_eq!(traj.len(), 17);
        assert_eq!(traj.stages().len(), 3);

        let s = traj.states()[10];
        assert_abs_diff_eq!(s[0], 100.0, epsilon = 1e-9);
        let s = traj.states()[12];
        assert_abs_diff_eq!(s[1], 12.0, epsilon = 1e-9);
        assert_abs_diff_eq!(s[0], 100.0 + 10.0 * 2.0 + 0.5 * 4.0, epsilon = 1e-9);
        // 4 × 22.5° turns the velocity by 90°
        let s = traj.states()[16];
        assert_abs_diff_eq!(s[1], 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(s[4], 12.0, epsilon = 1e-9);
        assert_eq!(s[2], 0.0);
    }

    #[test]
    fn along_heading_needs_motion() {
        let mut traj = Trajectory2D::new(1.0, [0.0; 6]);
        let stage = Stage::Cv { len: 3, velocity: StageVector::AlongHeading(5.0) };
        let err = traj.add_stages(&[stage]);
        assert!(err.is_err());
    }

    #[test]
    fn measurements_are_seeded() {
        let mut traj = Trajectory2D::new(0.5, [0.0, 1.0, 0.0, 0.0, 1.0, 0.0]);
        let stage = Stage::Cv { len: 5, velocity: StageVector::Axes([None, None]) };
        traj.add_stages(&[stage]).unwrap();
        let r = DMat::identity(2, 2) * 4.0;
        let a = traj.measure(&r, &mut ChaCha8Rng::seed_from_u64(3)).unwrap();
        let b = traj.measure(&r, &mut ChaCha8Rng::seed_from_u64(3)).unwrap();
        assert_eq!(a.len(), traj.len());
        assert_eq!(a, b);
    }

    #[test]
    fn stage_json_shape() {
        let json = r#"{"model":"cv","len":3,"velocity":[30.0,null]}"#;
        let stage: Stage = serde_json::from_str(json).unwrap();
        assert_eq!(stage, Stage::Cv { len: 3, velocity: StageVector::Axes([Some(30.0), None]) });
        let stage: Stage = serde_json::from_str(r#"{"model":"ct","len":1,"omega":3.0}"#).unwrap();
        assert_eq!(stage.len(), 1);
    }
}
