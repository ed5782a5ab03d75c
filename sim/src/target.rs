//! Target trajectory models and state propagation.
//!
//! Each target carries a true planar state in the estimator's canonical order
//! `[x, vx, ax, y, vy, ay]` and a [`MotionSpec`] describing how it moves.

use serde::{Deserialize, Serialize};

/// Describes target motion over time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MotionSpec {
    /// No acceleration. Any stored acceleration is cleared.
    ConstantVelocity,
    /// Constant acceleration `ax, ay` in m/s².
    ConstantAccel { ax: f64, ay: f64 },
    /// Switch motion model at given sim times.
    /// `segments` is sorted by start time: `[(t_start, MotionSpec), ...]`.
    /// The active segment is the last one whose `t_start <= t`.
    Segmented { segments: Vec<(f64, MotionSpec)> },
}

impl MotionSpec {
    /// Acceleration `(ax, ay)` in force at time `t`. Before the first segment
    /// the target coasts at constant velocity.
    pub fn acceleration(&self, t: f64) -> (f64, f64) {
        match self {
            Self::ConstantVelocity => (0.0, 0.0),
            Self::ConstantAccel { ax, ay } => (*ax, *ay),
            Self::Segmented { segments } => segments
                .iter()
                .filter(|(start, _)| *start <= t)
                .last()
                .map(|(_, spec)| spec.acceleration(t))
                .unwrap_or((0.0, 0.0)),
        }
    }
}

/// A simulated target with ground-truth state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Target {
    /// Unique target ID (used for statistics)
    pub id: u64,
    /// True state `[x, vx, ax, y, vy, ay]`
    pub state: [f64; 6],
    pub motion: MotionSpec,
}

impl Target {
    pub fn new(id: u64, pos: [f64; 2], vel: [f64; 2], motion: MotionSpec) -> Self {
        Self {
            id,
            state: [pos[0], vel[0], 0.0, pos[1], vel[1], 0.0],
            motion,
        }
    }

    /// Propagate true state by `dt` seconds according to the motion active at `t`.
    pub fn step(&mut self, t: f64, dt: f64) {
        let (ax, ay) = self.motion.acceleration(t);
        for (offset, a) in [(0, ax), (3, ay)] {
            let s = &mut self.state[offset..offset + 3];
            s[0] += s[1] * dt + 0.5 * a * dt * dt;
            s[1] += a * dt;
            s[2] = a;
        }
    }

    /// 2D position
    pub fn pos_2d(&self) -> (f64, f64) {
        (self.state[0], self.state[3])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn constant_velocity_moves_linearly() {
        let mut t = Target::new(0, [0.0, 10.0], [5.0, -1.0], MotionSpec::ConstantVelocity);
        for k in 0..10 {
            t.step(k as f64, 1.0);
        }
        let (x, y) = t.pos_2d();
        assert_abs_diff_eq!(x, 50.0);
        assert_abs_diff_eq!(y, 0.0);
    }

    #[test]
    fn constant_acceleration_is_exact() {
        let mut t = Target::new(1, [0.0, 0.0], [0.0, 0.0], MotionSpec::ConstantAccel { ax: 2.0, ay: 0.0 });
        for k in 0..4 {
            t.step(k as f64 * 0.5, 0.5);
        }
        // x = a·t²/2 at t = 2
        assert_abs_diff_eq!(t.state[0], 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(t.state[1], 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(t.state[2], 2.0);
    }

    #[test]
    fn segments_switch_at_their_start_time() {
        let motion = MotionSpec::Segmented {
            segments: vec![
                (0.0, MotionSpec::ConstantVelocity),
                (10.0, MotionSpec::ConstantAccel { ax: 0.0, ay: 3.0 }),
                (20.0, MotionSpec::ConstantVelocity),
            ],
        };
        assert_eq!(motion.acceleration(5.0), (0.0, 0.0));
        assert_eq!(motion.acceleration(10.0), (0.0, 3.0));
        assert_eq!(motion.acceleration(25.0), (0.0, 0.0));

        let mut t = Target::new(2, [0.0, 0.0], [1.0, 0.0], motion);
        for k in 0..30 {
            t.step(k as f64, 1.0);
        }
        // 10 s at 3 m/s² leaves vy = 30 and clears the acceleration afterwards
        assert_abs_diff_eq!(t.state[4], 30.0, epsilon = 1e-9);
        assert_abs_diff_eq!(t.state[5], 0.0);
    }
}
