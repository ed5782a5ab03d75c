//! `sim`: target trajectories, a noisy position sensor, scenarios and run logs.

pub mod replay;
pub mod scenarios;
pub mod sensor;
pub mod target;

pub use replay::{load_log, save_log, Frame, RunLog, TargetRecord, TargetStats};
pub use scenarios::{Scenario, ScenarioKind};
pub use sensor::{PositionSensor, SensorParams};
pub use target::{MotionSpec, Target};
