//! Filter construction and the per-run evaluation loop.

use anyhow::{ensure, Result};
use estimator_core::{
    BoxedFilter, DVec, EkfConfig, ExtendedKalmanFilter, Filter, ImmConfig, ImmFilter,
    KalmanFilter, KfConfig, ModelEntry, ModelSwitch, ModelType,
};
use motion_models::{
    ca_noise, ca_observation, ca_transition, ct2d_noise, cv_noise, cv_observation,
    cv_transition, position_noise, single_point_init, CoordinatedTurn2D, KinematicSwitch,
    SwitchConfig,
};
use serde::{Deserialize, Serialize};
use sim::{EstimationMetrics, RunLog};
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum FilterKind {
    /// Linear KF, constant velocity
    KfCv,
    /// Linear KF, constant acceleration
    KfCa,
    /// EKF, coordinated turn with estimated turn rate
    EkfCt,
    /// IMM over CV, CA and CT
    Imm,
}

/// Tuning of the filters built by `tracklab`. Loadable from JSON (`--config`).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    /// CV white-acceleration std dev (m/s²)
    pub cv_accel_std: f64,
    /// CA per-step acceleration increment std dev (m/s²)
    pub ca_accel_std: f64,
    /// CT white-acceleration std dev (m/s²)
    pub ct_accel_std: f64,
    /// CT turn-rate increment std dev (deg/s)
    pub ct_turn_std: f64,
    /// Speed bound used for the initial velocity variance (m/s)
    pub vmax: f64,
    pub ekf: EkfConfig,
    pub imm: ImmConfig,
    pub switch: SwitchConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            cv_accel_std: 1.0,
            ca_accel_std: 0.5,
            ct_accel_std: 1.0,
            ct_turn_std: 0.5,
            vmax: 300.0,
            ekf: EkfConfig::default(),
            imm: ImmConfig::default(),
            switch: SwitchConfig::default(),
        }
    }
}

/// Result of filtering one run log.
#[derive(Clone, Debug)]
pub struct RunSummary {
    pub metrics: EstimationMetrics,
    pub description: String,
    pub final_state: DVec,
}

fn kf(kind: ModelType, dt: f64, meas_std: &[f64; 2], cfg: &RunConfig) -> Result<KalmanFilter> {
    let r = position_noise(meas_std);
    let config = match kind {
        ModelType::Ca => KfConfig::new(
            ca_transition(2, dt),
            ca_observation(2),
            ca_noise(2, dt, cfg.ca_accel_std),
            r,
        ),
        _ => KfConfig::new(
            cv_transition(2, dt),
            cv_observation(2),
            cv_noise(2, dt, cfg.cv_accel_std),
            r,
        ),
    };
    Ok(KalmanFilter::new(config)?)
}

fn ct_ekf(dt: f64, meas_std: &[f64; 2], cfg: &RunConfig) -> Result<BoxedFilter> {
    let ekf = ExtendedKalmanFilter::additive(
        CoordinatedTurn2D::new(2, dt)?,
        ct2d_noise(2, dt, cfg.ct_accel_std, cfg.ct_turn_std),
        position_noise(meas_std),
        5,
        cfg.ekf.clone(),
    )?;
    Ok(Box::new(ekf))
}

/// Build the requested filter and the state layout it estimates in.
pub fn build_filter(
    kind: FilterKind,
    log: &RunLog,
    cfg: &RunConfig,
) -> Result<(BoxedFilter, ModelType)> {
    let (dt, std) = (log.dt, &log.meas_std);
    Ok(match kind {
        FilterKind::KfCv => {
            (Box::new(kf(ModelType::Cv, dt, std, cfg)?) as BoxedFilter, ModelType::Cv)
        }
        FilterKind::KfCa => {
            (Box::new(kf(ModelType::Ca, dt, std, cfg)?) as BoxedFilter, ModelType::Ca)
        }
        FilterKind::EkfCt => (ct_ekf(dt, std, cfg)?, ModelType::Ct),
        FilterKind::Imm => {
            let mut imm = ImmFilter::new(KinematicSwitch::new(cfg.switch.clone()), cfg.imm.clone());
            imm.add_models(
                vec![
                    ModelEntry::new(
                        Box::new(kf(ModelType::Cv, dt, std, cfg)?) as BoxedFilter,
                        ModelType::Cv,
                    ),
                    ModelEntry::new(
                        Box::new(kf(ModelType::Ca, dt, std, cfg)?) as BoxedFilter,
                        ModelType::Ca,
                    ),
                    ModelEntry::new(ct_ekf(dt, std, cfg)?, ModelType::Ct),
                ],
                None,
                None,
            )?;
            (Box::new(imm) as BoxedFilter, ModelType::Cv)
        }
    })
}

/// Position and velocity `[x, y]` of a state in the given layout.
fn kinematics(layout: &ModelType, x: &DVec) -> ([f64; 2], [f64; 2]) {
    match layout {
        ModelType::Ca => ([x[0], x[3]], [x[1], x[4]]),
        _ => ([x[0], x[2]], [x[1], x[3]]),
    }
}

/// Initialise from the first measurement and filter the rest of the log.
pub fn run_filter(kind: FilterKind, log: &RunLog, cfg: &RunConfig) -> Result<RunSummary> {
    ensure!(log.measurements.len() >= 2, "run log needs at least two measurements");
    let (mut filter, layout) = build_filter(kind, log, cfg)?;

    let r = position_noise(&log.meas_std);
    let z0 = DVec::from_row_slice(&log.measurements[0]);
    let (x0, p0) = single_point_init(&z0, &r, &[cfg.vmax, cfg.vmax])?;
    let switch = KinematicSwitch::new(cfg.switch.clone());
    let x0 = switch.switch_state(&x0, &ModelType::Cv, &layout)?;
    let p0 = switch.switch_cov(&p0, &ModelType::Cv, &layout)?;
    filter.init(&x0, &p0)?;

    let mut metrics = EstimationMetrics::default();
    for (k, (truth, z)) in log.truth.iter().zip(&log.measurements).enumerate().skip(1) {
        let (x, _) = filter.step(&DVec::from_row_slice(z), None)?;
        let (pos, vel) = kinematics(&layout, &x);
        metrics.record([truth[0], truth[3]], pos, [truth[1], truth[4]], vel);
        debug!(step = k, x = pos[0], y = pos[1], "filtered");
    }

    Ok(RunSummary {
        metrics,
        description: filter.to_string(),
        final_state: filter.state()?,
    })
}
