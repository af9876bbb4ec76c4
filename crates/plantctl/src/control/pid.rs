//! PID loop: tuning, runtime state, and the per-scan update algorithm
//! (spec §4.4).

use crate::clock::MonoMs;
use crate::registry::types::{ActuatorCommand, CommandCode, Quality};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PidMode {
    Off,
    Manual,
    Auto,
}

impl PidMode {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::Off,
            1 => Self::Manual,
            2 => Self::Auto,
            _ => return None,
        })
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Off => 0,
            Self::Manual => 1,
            Self::Auto => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SlotRef {
    pub station: String,
    pub slot: usize,
}

#[derive(Debug, Clone)]
pub struct PidLoop {
    pub id: u32,
    pub name: String,
    pub enabled: bool,
    pub mode: PidMode,
    pub input: SlotRef,
    pub output: SlotRef,
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    pub setpoint: f32,
    pub output_min: f32,
    pub output_max: f32,
    pub deadband: f32,
    pub integral_bound: f32,
    /// Derivative low-pass coefficient, in `[0, 1)`.
    pub derivative_filter: f32,

    // Runtime state.
    last_error: Option<f32>,
    integral: f32,
    filtered_derivative: f32,
    last_pv: Option<f32>,
    last_update_ms: MonoMs,
    last_output: f32,
    warned_on_bad_quality: bool,
}

impl PidLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u32,
        name: impl Into<String>,
        input: SlotRef,
        output: SlotRef,
        kp: f32,
        ki: f32,
        kd: f32,
        setpoint: f32,
        output_min: f32,
        output_max: f32,
        deadband: f32,
        integral_bound: f32,
        derivative_filter: f32,
    ) -> crate::error::CoreResult<Self> {
        if output_min > output_max {
            return Err(crate::error::CoreError::InvalidParam(
                "output_min must be <= output_max".into(),
            ));
        }
        Ok(Self {
            id,
            name: name.into(),
            enabled: true,
            mode: PidMode::Auto,
            input,
            output,
            kp,
            ki,
            kd,
            setpoint,
            output_min,
            output_max,
            deadband,
            integral_bound,
            derivative_filter,
            last_error: None,
            integral: 0.0,
            filtered_derivative: 0.0,
            last_pv: None,
            last_update_ms: 0,
            last_output: 0.0,
            warned_on_bad_quality: false,
        })
    }

    pub fn last_output(&self) -> f32 {
        self.last_output
    }

    pub fn integral(&self) -> f32 {
        self.integral
    }

    /// Run one scan of the PID algorithm. Returns `None` when the loop is
    /// disabled/off, or when the input sample is unreadable/not GOOD — in
    /// which case the last output is held and a WARN is logged exactly once
    /// per bad-quality transition. `manual_cv` supplies the operator value
    /// consumed in MANUAL mode.
    pub fn update(
        &mut self,
        sample: Option<(f32, Quality)>,
        manual_cv: Option<f32>,
        now: MonoMs,
    ) -> Option<f32> {
        if !self.enabled || self.mode == PidMode::Off {
            return None;
        }

        let (pv, quality) = match sample {
            Some(s) => s,
            None => (0.0, Quality::NotConnected),
        };

        if sample.is_none() || quality != Quality::Good {
            if !self.warned_on_bad_quality {
                tracing::warn!(loop_id = self.id, name = %self.name, "PID input unreadable or not GOOD, holding last output");
                self.warned_on_bad_quality = true;
            }
            return Some(self.last_output);
        }
        self.warned_on_bad_quality = false;

        if self.mode == PidMode::Manual {
            let cv = manual_cv.unwrap_or(self.last_output);
            let clamped = cv.clamp(self.output_min, self.output_max);
            self.last_output = clamped;
            self.last_update_ms = now;
            self.last_pv = Some(pv);
            return Some(clamped);
        }

        let dt_ms = now.saturating_sub(self.last_update_ms).max(1);
        let dt = dt_ms as f32 / 1000.0;

        let mut error = self.setpoint - pv;
        if error.abs() < self.deadband {
            error = 0.0;
        }

        let prev_error = self.last_error.unwrap_or(error);

        let p_term = self.kp * error;
        self.integral += self.ki * error * dt;
        self.integral = self.integral.clamp(-self.integral_bound, self.integral_bound);

        let d_raw = (error - prev_error) / dt;
        self.filtered_derivative =
            self.filtered_derivative * self.derivative_filter + d_raw * (1.0 - self.derivative_filter);

        let mut output = p_term + self.integral + self.kd * self.filtered_derivative;

        if output > self.output_max {
            output = self.output_max;
            if error > 0.0 {
                self.integral -= self.ki * error * dt;
            }
        }
        if output < self.output_min {
            output = self.output_min;
            if error < 0.0 {
                self.integral -= self.ki * error * dt;
            }
        }

        self.last_error = Some(error);
        self.last_pv = Some(pv);
        self.last_update_ms = now;
        self.last_output = output;

        Some(output)
    }

    /// Project a PID output value onto an actuator command, per the
    /// `> 0.5 -> PWM`, `> 0 -> ON`, else `OFF` rule.
    pub fn project_output(output: f32) -> ActuatorCommand {
        if output > 0.5 {
            ActuatorCommand { code: CommandCode::Pwm, pwm_duty: output.round().clamp(0.0, 100.0) as u8, forced: false }
        } else if output > 0.0 {
            ActuatorCommand { code: CommandCode::On, pwm_duty: 0, forced: false }
        } else {
            ActuatorCommand { code: CommandCode::Off, pwm_duty: 0, forced: false }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_loop() -> PidLoop {
        PidLoop::new(
            1,
            "ph-control",
            SlotRef { station: "rtu-1".into(), slot: 1 },
            SlotRef { station: "rtu-1".into(), slot: 9 },
            2.0,
            0.1,
            0.5,
            7.0,
            0.0,
            100.0,
            0.1,
            1000.0,
            0.0,
        )
        .unwrap()
    }

    #[test]
    fn rejects_inverted_output_bounds() {
        let err = PidLoop::new(
            1,
            "bad",
            SlotRef { station: "rtu-1".into(), slot: 1 },
            SlotRef { station: "rtu-1".into(), slot: 9 },
            1.0,
            0.0,
            0.0,
            0.0,
            100.0,
            0.0,
            0.0,
            10.0,
            0.0,
        )
        .unwrap_err();
        assert_eq!(err.kind_name(), "INVALID_PARAM");
    }

    #[test]
    fn ph_control_basic_scenario() {
        let mut pid = make_loop();
        let cv = pid.update(Some((6.0, Quality::Good)), None, 100).unwrap();
        assert!((1.8..=2.2).contains(&cv), "cv={cv}");
        let cmd = PidLoop::project_output(cv);
        assert_eq!(cmd.code, CommandCode::Pwm);
        assert_eq!(cmd.pwm_duty, 2);
    }

    #[test]
    fn sensor_loss_holds_last_output() {
        let mut pid = make_loop();
        let first = pid.update(Some((6.0, Quality::Good)), None, 100).unwrap();
        let held = pid.update(Some((6.0, Quality::Bad)), None, 200).unwrap();
        assert_eq!(first, held);
    }

    #[test]
    fn zero_dt_is_clamped_and_output_is_finite() {
        let mut pid = make_loop();
        let cv = pid.update(Some((6.0, Quality::Good)), None, 0).unwrap();
        assert!(cv.is_finite());
        let cv2 = pid.update(Some((6.0, Quality::Good)), None, 0).unwrap();
        assert!(cv2.is_finite());
    }

    #[test]
    fn deadband_zeroes_small_error() {
        let mut pid = make_loop();
        pid.deadband = 2.0;
        let cv = pid.update(Some((6.5, Quality::Good)), None, 100).unwrap();
        // error = 0.5 < deadband(2.0) -> treated as zero, integral stays 0.
        assert_eq!(pid.integral(), 0.0);
        assert_eq!(cv, 0.0);
    }

    #[test]
    fn manual_mode_uses_operator_value() {
        let mut pid = make_loop();
        pid.mode = PidMode::Manual;
        let cv = pid.update(Some((6.0, Quality::Good)), Some(42.0), 100).unwrap();
        assert_eq!(cv, 42.0);
    }

    proptest::proptest! {
        #[test]
        fn output_always_within_bounds(pv in -1000.0f32..1000.0, dt in 1u64..10_000) {
            let mut pid = make_loop();
            let cv = pid.update(Some((pv, Quality::Good)), None, dt).unwrap();
            assert!(cv >= pid.output_min && cv <= pid.output_max);
            assert!(pid.integral().abs() <= pid.integral_bound);
        }
    }
}
