//! Interlock: safety rule evaluated ahead of PID loops each scan (spec
//! §4.4). Fail-safe on sensor loss: a BAD/NOT_CONNECTED/UNCERTAIN condition
//! sample is always treated as "condition met" rather than ignored.

use crate::clock::MonoMs;
use crate::control::pid::SlotRef;
use crate::registry::types::{ActuatorCommand, CommandCode, Quality};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Above,
    Below,
    Equal,
    NotEqual,
}

impl Predicate {
    fn evaluate(self, value: f32, threshold: f32) -> bool {
        match self {
            Predicate::Above => value > threshold,
            Predicate::Below => value < threshold,
            Predicate::Equal => (value - threshold).abs() < f32::EPSILON,
            Predicate::NotEqual => (value - threshold).abs() >= f32::EPSILON,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterlockAction {
    ForceOff,
    ForceOn,
    SetValue,
    AlarmOnly,
}

#[derive(Debug, Clone)]
pub struct Interlock {
    pub id: u32,
    pub name: String,
    pub enabled: bool,
    pub condition: SlotRef,
    pub predicate: Predicate,
    pub threshold: f32,
    pub debounce_ms: u64,
    pub action: InterlockAction,
    pub action_target: SlotRef,
    pub action_value: f32,

    // Runtime state.
    tripped: bool,
    condition_start: Option<MonoMs>,
    trip_time: Option<MonoMs>,
}

impl Interlock {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u32,
        name: impl Into<String>,
        condition: SlotRef,
        predicate: Predicate,
        threshold: f32,
        debounce_ms: u64,
        action: InterlockAction,
        action_target: SlotRef,
        action_value: f32,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            enabled: true,
            condition,
            predicate,
            threshold,
            debounce_ms,
            action,
            action_target,
            action_value,
            tripped: false,
            condition_start: None,
            trip_time: None,
        }
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped
    }

    /// Clear the tripped flag. A cleared condition alone never untrips; only
    /// this explicit call does.
    pub fn reset(&mut self) {
        self.tripped = false;
        self.trip_time = None;
        self.condition_start = None;
    }

    /// Evaluate one scan. `sample` is `None` when the condition slot is
    /// unreadable. Returns the forced action command when tripped and the
    /// action is not `AlarmOnly`.
    pub fn evaluate(&mut self, sample: Option<(f32, Quality)>, now: MonoMs) -> Option<ActuatorCommand> {
        if !self.enabled {
            return None;
        }

        let condition_met = match sample {
            Some((value, Quality::Good)) => self.predicate.evaluate(value, self.threshold),
            // Fail-safe: any non-GOOD or missing sample is treated as condition met.
            _ => true,
        };

        if condition_met && !self.tripped {
            let start = *self.condition_start.get_or_insert(now);
            if now.saturating_sub(start) >= self.debounce_ms {
                self.tripped = true;
                self.trip_time = Some(now);
            }
        }
        if !condition_met {
            self.condition_start = None;
        }

        if self.tripped && self.action != InterlockAction::AlarmOnly {
            Some(self.action_command())
        } else {
            None
        }
    }

    fn action_command(&self) -> ActuatorCommand {
        match self.action {
            InterlockAction::ForceOff => ActuatorCommand { code: CommandCode::Off, pwm_duty: 0, forced: true },
            InterlockAction::ForceOn => ActuatorCommand { code: CommandCode::On, pwm_duty: 0, forced: true },
            InterlockAction::SetValue => ActuatorCommand {
                code: CommandCode::Pwm,
                pwm_duty: self.action_value.round().clamp(0.0, 100.0) as u8,
                forced: true,
            },
            InterlockAction::AlarmOnly => ActuatorCommand { code: CommandCode::Off, pwm_duty: 0, forced: false },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make(debounce_ms: u64) -> Interlock {
        Interlock::new(
            1,
            "level-high",
            SlotRef { station: "rtu-1".into(), slot: 2 },
            Predicate::Above,
            5.0,
            debounce_ms,
            InterlockAction::ForceOff,
            SlotRef { station: "rtu-1".into(), slot: 9 },
            0.0,
        )
    }

    #[test]
    fn fail_safe_on_sensor_loss_trips_after_debounce() {
        let mut il = make(200);
        // First scan: NOT_CONNECTED -> condition treated as met, debounce starts.
        assert!(il.evaluate(Some((0.0, Quality::NotConnected)), 0).is_none());
        assert!(!il.is_tripped());
        // 200ms later: debounce satisfied, trips and forces the action.
        let cmd = il.evaluate(Some((0.0, Quality::NotConnected)), 200).unwrap();
        assert!(il.is_tripped());
        assert_eq!(cmd.code, CommandCode::Off);
    }

    #[test]
    fn cleared_condition_alone_never_untrips() {
        let mut il = make(0);
        il.evaluate(Some((6.0, Quality::Good)), 0); // trips immediately, delay=0
        assert!(il.is_tripped());
        il.evaluate(Some((1.0, Quality::Good)), 10); // condition clears
        assert!(il.is_tripped(), "must remain tripped without explicit reset");
        il.reset();
        assert!(!il.is_tripped());
    }

    #[test]
    fn zero_delay_trips_on_first_scan() {
        let mut il = make(0);
        let cmd = il.evaluate(Some((6.0, Quality::Good)), 0).unwrap();
        assert!(il.is_tripped());
        assert_eq!(cmd.code, CommandCode::Off);
    }

    #[test]
    fn alarm_only_never_writes_a_command() {
        let mut il = Interlock::new(
            2,
            "alarm-only",
            SlotRef { station: "rtu-1".into(), slot: 2 },
            Predicate::Above,
            5.0,
            0,
            InterlockAction::AlarmOnly,
            SlotRef { station: "rtu-1".into(), slot: 9 },
            0.0,
        );
        let cmd = il.evaluate(Some((6.0, Quality::Good)), 0);
        assert!(il.is_tripped());
        assert!(cmd.is_none());
    }

    proptest::proptest! {
        #[test]
        fn tripped_only_transitions_true_to_false_via_explicit_reset(steps in proptest::collection::vec(0.0f32..10.0, 1..20)) {
            let mut il = make(0);
            let mut was_tripped = false;
            for (i, v) in steps.iter().enumerate() {
                il.evaluate(Some((*v, Quality::Good)), i as u64);
                if was_tripped {
                    assert!(il.is_tripped(), "tripped flipped false without explicit reset");
                }
                was_tripped = il.is_tripped();
            }
        }
    }
}
