//! Alarm Evaluator (component F): rule-based raise/clear with an ISA-18.2
//! style lifecycle, a flood-rate metric, and operator shelving.

use crate::clock::MonoMs;
use crate::error::{CoreError, CoreResult};
use crate::registry::types::Quality;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

const FLOOD_WINDOW_CAPACITY: usize = 600;
const FLOOD_WINDOW_MS: u64 = 10 * 60 * 1000;
const ACTIVE_SNAPSHOT_CAP: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Discrete,
    AnalogHigh,
    AnalogLow,
    RateOfChange,
    Communication,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub id: u32,
    pub station: String,
    pub slot: usize,
    pub kind: RuleKind,
    pub priority: Priority,
    pub setpoint: f32,
    pub deadband: f32,
    pub debounce_ms: u64,
}

/// Alarm lifecycle state (§4.5): raise, ack, clear, ack-of-clear (terminal,
/// the event is then dropped from the active list).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmState {
    ActiveUnack,
    ActiveAck,
    ClearedUnack,
    ClearedAck,
}

#[derive(Debug)]
pub struct AlarmEvent {
    pub rule_id: u32,
    pub state: AlarmState,
    pub raised_at: MonoMs,
    pub cleared_at: Option<MonoMs>,
    pub acked_at: Option<MonoMs>,
    pub last_value: f32,
    pub shelved_reason: Option<String>,
    pub shelved_until: Option<MonoMs>,

    condition_start: Option<MonoMs>,
}

impl AlarmEvent {
    fn new(rule_id: u32, now: MonoMs, value: f32) -> Self {
        Self {
            rule_id,
            state: AlarmState::ActiveUnack,
            raised_at: now,
            cleared_at: None,
            acked_at: None,
            last_value: value,
            shelved_reason: None,
            shelved_until: None,
            condition_start: None,
        }
    }

    pub fn is_shelved(&self, now: MonoMs) -> bool {
        match self.shelved_until {
            Some(until) => now < until,
            None => false,
        }
    }
}

struct Inner {
    rules: Vec<Rule>,
    events: Vec<AlarmEvent>,
    raise_timestamps: VecDeque<MonoMs>,
}

pub struct AlarmEvaluator {
    inner: Mutex<Inner>,
}

impl Default for AlarmEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl AlarmEvaluator {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner { rules: Vec::new(), events: Vec::new(), raise_timestamps: VecDeque::new() }) }
    }

    pub fn add_rule(&self, rule: Rule) -> CoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.rules.iter().any(|r| r.id == rule.id) {
            return Err(CoreError::Duplicate(format!("alarm rule {}", rule.id)));
        }
        inner.rules.push(rule);
        Ok(())
    }

    fn predicate_met(rule: &Rule, sample: Option<(f32, Quality)>) -> bool {
        match rule.kind {
            RuleKind::Communication => !matches!(sample, Some((_, Quality::Good))),
            _ => {
                let (value, quality) = match sample {
                    Some(s) => s,
                    None => return true,
                };
                if quality != Quality::Good {
                    return true;
                }
                match rule.kind {
                    RuleKind::AnalogHigh => value > rule.setpoint + rule.deadband,
                    RuleKind::AnalogLow => value < rule.setpoint - rule.deadband,
                    RuleKind::Discrete => (value - rule.setpoint).abs() >= f32::EPSILON,
                    RuleKind::RateOfChange => value.abs() > rule.setpoint,
                    RuleKind::Communication => unreachable!(),
                }
            }
        }
    }

    /// Evaluate every rule against its current sample. `sample_of` resolves
    /// a rule to its condition value (`None` when the slot is unreadable).
    pub fn evaluate(&self, now: MonoMs, mut sample_of: impl FnMut(&Rule) -> Option<(f32, Quality)>) {
        let mut inner = self.inner.lock().unwrap();
        let rules = inner.rules.clone();
        for rule in &rules {
            let sample = sample_of(rule);
            let met = Self::predicate_met(rule, sample);
            let value = sample.map(|(v, _)| v).unwrap_or(0.0);

            let idx = inner.events.iter().position(|e| e.rule_id == rule.id);
            match idx {
                None => {
                    if met {
                        Self::raise_debounced(&mut inner, rule, now, value);
                    }
                }
                Some(i) => {
                    if met {
                        inner.events[i].last_value = value;
                        if matches!(inner.events[i].state, AlarmState::ClearedUnack | AlarmState::ClearedAck) {
                            // condition re-met after clearing: treat as a fresh raise.
                            Self::raise_debounced(&mut inner, rule, now, value);
                        }
                    } else {
                        let event = &mut inner.events[i];
                        event.condition_start = None;
                        match event.state {
                            AlarmState::ActiveUnack => {
                                event.state = AlarmState::ClearedUnack;
                                event.cleared_at = Some(now);
                            }
                            AlarmState::ActiveAck => {
                                event.state = AlarmState::ClearedAck;
                                event.cleared_at = Some(now);
                            }
                            AlarmState::ClearedUnack | AlarmState::ClearedAck => {}
                        }
                    }
                }
            }
        }
    }

    fn raise_debounced(inner: &mut Inner, rule: &Rule, now: MonoMs, value: f32) {
        let existing = inner.events.iter_mut().find(|e| {
            e.rule_id == rule.id && matches!(e.state, AlarmState::ClearedUnack | AlarmState::ClearedAck)
        });
        if let Some(event) = existing {
            match event.condition_start {
                None => event.condition_start = Some(now),
                Some(start) => {
                    if now.saturating_sub(start) >= rule.debounce_ms {
                        event.state = AlarmState::ActiveUnack;
                        event.raised_at = now;
                        event.cleared_at = None;
                        event.acked_at = None;
                        event.last_value = value;
                        inner.raise_timestamps.push_back(now);
                        if inner.raise_timestamps.len() > FLOOD_WINDOW_CAPACITY {
                            inner.raise_timestamps.pop_front();
                        }
                    }
                }
            }
            return;
        }

        // No existing event for this rule: debounce a first-time raise.
        let pending_key = rule.id;
        // Store debounce progress on a synthetic not-yet-active event so a
        // single raise_debounced call tree remains the only mutation path.
        if let Some(event) = inner.events.iter_mut().find(|e| e.rule_id == pending_key && e.condition_start.is_some())
        {
            if now.saturating_sub(event.condition_start.unwrap()) >= rule.debounce_ms {
                event.state = AlarmState::ActiveUnack;
                event.raised_at = now;
                event.last_value = value;
                inner.raise_timestamps.push_back(now);
                if inner.raise_timestamps.len() > FLOOD_WINDOW_CAPACITY {
                    inner.raise_timestamps.pop_front();
                }
            }
            return;
        }

        if rule.debounce_ms == 0 {
            let mut event = AlarmEvent::new(rule.id, now, value);
            event.condition_start = Some(now);
            inner.raise_timestamps.push_back(now);
            if inner.raise_timestamps.len() > FLOOD_WINDOW_CAPACITY {
                inner.raise_timestamps.pop_front();
            }
            inner.events.push(event);
        } else {
            let mut pending = AlarmEvent::new(rule.id, now, value);
            pending.state = AlarmState::ClearedAck; // inert placeholder until debounce elapses
            pending.condition_start = Some(now);
            inner.events.push(pending);
        }
    }

    /// Acknowledge an active or cleared-unacked alarm. Acknowledging a
    /// `CLEARED_UNACK` alarm is terminal: the event is dropped.
    pub fn acknowledge(&self, rule_id: u32, now: MonoMs) -> CoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let idx = inner
            .events
            .iter()
            .position(|e| e.rule_id == rule_id)
            .ok_or_else(|| CoreError::NotFound(format!("alarm {rule_id}")))?;
        match inner.events[idx].state {
            AlarmState::ActiveUnack => {
                inner.events[idx].state = AlarmState::ActiveAck;
                inner.events[idx].acked_at = Some(now);
                Ok(())
            }
            AlarmState::ClearedUnack => {
                inner.events.remove(idx);
                Ok(())
            }
            AlarmState::ActiveAck | AlarmState::ClearedAck => Ok(()),
        }
    }

    pub fn shelve(&self, rule_id: u32, reason: impl Into<String>, until: MonoMs) -> CoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let event = inner
            .events
            .iter_mut()
            .find(|e| e.rule_id == rule_id)
            .ok_or_else(|| CoreError::NotFound(format!("alarm {rule_id}")))?;
        event.shelved_reason = Some(reason.into());
        event.shelved_until = Some(until);
        Ok(())
    }

    /// Snapshot of active (non-terminal, non-shelved) alarms, auto-expiring
    /// shelves whose expiry has passed.
    pub fn active_snapshot(&self, now: MonoMs) -> Vec<AlarmEvent> {
        let mut inner = self.inner.lock().unwrap();
        for e in inner.events.iter_mut() {
            if let Some(until) = e.shelved_until {
                if now >= until {
                    e.shelved_reason = None;
                    e.shelved_until = None;
                }
            }
        }
        inner
            .events
            .iter()
            .filter(|e| !e.is_shelved(now))
            .filter(|e| matches!(e.state, AlarmState::ActiveUnack | AlarmState::ActiveAck | AlarmState::ClearedUnack))
            .take(ACTIVE_SNAPSHOT_CAP)
            .cloned()
            .collect()
    }

    /// Count of raises within the trailing 10-minute window, computed on
    /// demand from the rolling timestamp buffer — never suppressive.
    pub fn raises_per_window(&self, now: MonoMs) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.raise_timestamps.iter().filter(|&&t| now.saturating_sub(t) < FLOOD_WINDOW_MS).count()
    }
}

impl Clone for AlarmEvent {
    fn clone(&self) -> Self {
        Self {
            rule_id: self.rule_id,
            state: self.state,
            raised_at: self.raised_at,
            cleared_at: self.cleared_at,
            acked_at: self.acked_at,
            last_value: self.last_value,
            shelved_reason: self.shelved_reason.clone(),
            shelved_until: self.shelved_until,
            condition_start: self.condition_start,
        }
    }
}
