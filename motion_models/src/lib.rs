//! `motion_models`: Kinematic models for the estimators in `estimator_core`.
//!
//! # Module layout
//! - [`kinematic`]: CV / CA polynomial matrices, coordinated turn
//! - [`observation`]: Range / bearing measurement model
//! - [`switch`]: `KinematicSwitch` between CV, CA and CT layouts
//! - [`init`]: Single-point track initialisation

pub mod init;
pub mod kinematic;
pub mod observation;
pub mod switch;

pub use init::single_point_init;
pub use kinematic::{
    ca_noise, ca_observation, ca_transition, ct2d_noise, ct2d_transition, cv_noise,
    cv_observation, cv_transition, poly_noise_dc, poly_noise_dd, poly_transition,
    position_noise, position_observation, CoordinatedTurn2D,
};
pub use observation::{wrap_angle, RangeBearing2D};
pub use switch::{KinematicSwitch, SwitchConfig};
