//! Authority Manager (component C): a four-state handoff per RTU enforcing
//! single-writer semantics between controller and RTU, gated by a
//! monotonically increasing epoch.

use crate::clock::MonoMs;
use crate::error::{CoreError, CoreResult};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorityState {
    Autonomous,
    HandoffPending,
    Supervised,
    Releasing,
}

#[derive(Debug, Clone)]
struct AuthorityContext {
    epoch: u32,
    state: AuthorityState,
    request_time: Option<MonoMs>,
    grant_time: Option<MonoMs>,
    controller_online: bool,
}

impl AuthorityContext {
    fn new() -> Self {
        Self {
            epoch: 1,
            state: AuthorityState::Autonomous,
            request_time: None,
            grant_time: None,
            controller_online: false,
        }
    }
}

/// Snapshot returned to callers; never an internal borrow.
#[derive(Debug, Clone, Copy)]
pub struct AuthoritySnapshot {
    pub epoch: u32,
    pub state: AuthorityState,
    pub controller_online: bool,
}

/// Callback fired after the per-manager lock is released, so implementors
/// may safely re-enter the manager from inside the callback.
pub type StateChangeCallback = Box<dyn Fn(&str, AuthorityState) + Send + Sync>;

pub struct AuthorityManager {
    inner: Mutex<HashMap<String, AuthorityContext>>,
    handoff_timeout_ms: u64,
    on_change: Option<StateChangeCallback>,
}

impl AuthorityManager {
    pub fn new(handoff_timeout_ms: u64) -> Self {
        Self { inner: Mutex::new(HashMap::new()), handoff_timeout_ms, on_change: None }
    }

    pub fn with_callback(handoff_timeout_ms: u64, cb: StateChangeCallback) -> Self {
        Self { inner: Mutex::new(HashMap::new()), handoff_timeout_ms, on_change: Some(cb) }
    }

    fn fire(&self, station: &str, state: AuthorityState) {
        if let Some(cb) = &self.on_change {
            cb(station, state);
        }
    }

    pub fn snapshot(&self, station: &str) -> AuthoritySnapshot {
        let inner = self.inner.lock().unwrap();
        let ctx = inner.get(station);
        match ctx {
            Some(c) => AuthoritySnapshot { epoch: c.epoch, state: c.state, controller_online: c.controller_online },
            None => AuthoritySnapshot { epoch: 1, state: AuthorityState::Autonomous, controller_online: false },
        }
    }

    /// AUTONOMOUS --local request_authority--> HANDOFF_PENDING
    pub fn request_authority(&self, station: &str, now: MonoMs) -> CoreResult<()> {
        let new_state;
        {
            let mut inner = self.inner.lock().unwrap();
            let ctx = inner.entry(station.to_string()).or_insert_with(AuthorityContext::new);
            if ctx.state != AuthorityState::Autonomous {
                return Err(CoreError::Busy(format!("{station} is not AUTONOMOUS")));
            }
            ctx.state = AuthorityState::HandoffPending;
            ctx.request_time = Some(now);
            new_state = ctx.state;
        }
        self.fire(station, new_state);
        Ok(())
    }

    /// HANDOFF_PENDING --inbound grant(epoch_rtu)--> SUPERVISED
    pub fn grant(&self, station: &str, epoch_rtu: u32, now: MonoMs) -> CoreResult<()> {
        let new_state;
        {
            let mut inner = self.inner.lock().unwrap();
            let ctx = inner
                .get_mut(station)
                .ok_or_else(|| CoreError::NotFound(station.to_string()))?;
            if ctx.state != AuthorityState::HandoffPending {
                return Err(CoreError::Protocol(format!(
                    "grant with no pending request for {station}"
                )));
            }
            ctx.state = AuthorityState::Supervised;
            ctx.epoch = epoch_rtu;
            ctx.grant_time = Some(now);
            ctx.controller_online = true;
            new_state = ctx.state;
        }
        self.fire(station, new_state);
        Ok(())
    }

    /// SUPERVISED --local release_authority--> RELEASING
    pub fn release_authority(&self, station: &str, now: MonoMs) -> CoreResult<()> {
        let new_state;
        {
            let mut inner = self.inner.lock().unwrap();
            let ctx = inner
                .get_mut(station)
                .ok_or_else(|| CoreError::NotFound(station.to_string()))?;
            if ctx.state != AuthorityState::Supervised {
                return Err(CoreError::Protocol(format!("{station} is not SUPERVISED")));
            }
            ctx.state = AuthorityState::Releasing;
            ctx.request_time = Some(now);
            new_state = ctx.state;
        }
        self.fire(station, new_state);
        Ok(())
    }

    /// RELEASING --inbound released(epoch_rtu)--> AUTONOMOUS
    pub fn released(&self, station: &str, epoch_rtu: u32) -> CoreResult<()> {
        let new_state;
        {
            let mut inner = self.inner.lock().unwrap();
            let ctx = inner
                .get_mut(station)
                .ok_or_else(|| CoreError::NotFound(station.to_string()))?;
            if ctx.state != AuthorityState::Releasing {
                return Err(CoreError::Protocol(format!(
                    "released with no pending release for {station}"
                )));
            }
            ctx.state = AuthorityState::Autonomous;
            ctx.epoch = epoch_rtu;
            ctx.controller_online = false;
            new_state = ctx.state;
        }
        self.fire(station, new_state);
        Ok(())
    }

    /// `any` --force_release--> AUTONOMOUS, bumping the epoch unconditionally.
    pub fn force_release(&self, station: &str) -> CoreResult<()> {
        let new_state;
        {
            let mut inner = self.inner.lock().unwrap();
            let ctx = inner.entry(station.to_string()).or_insert_with(AuthorityContext::new);
            ctx.epoch = ctx.epoch.wrapping_add(1);
            ctx.state = AuthorityState::Autonomous;
            ctx.controller_online = false;
            new_state = ctx.state;
        }
        self.fire(station, new_state);
        Ok(())
    }

    /// Check both handoff timeouts for every tracked station. Call once per
    /// scan (or supervisor tick) with the current monotonic time.
    pub fn check_timeouts(&self, now: MonoMs) {
        let mut expired = Vec::new();
        {
            let mut inner = self.inner.lock().unwrap();
            for (station, ctx) in inner.iter_mut() {
                match ctx.state {
                    AuthorityState::HandoffPending => {
                        if let Some(req) = ctx.request_time {
                            if now.saturating_sub(req) > self.handoff_timeout_ms {
                                ctx.state = AuthorityState::Autonomous;
                                ctx.controller_online = false;
                                expired.push((station.clone(), ctx.state));
                            }
                        }
                    }
                    AuthorityState::Releasing => {
                        if let Some(req) = ctx.request_time {
                            if now.saturating_sub(req) > self.handoff_timeout_ms {
                                ctx.epoch = ctx.epoch.wrapping_add(1);
                                ctx.state = AuthorityState::Autonomous;
                                ctx.controller_online = false;
                                expired.push((station.clone(), ctx.state));
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        for (station, state) in expired {
            self.fire(&station, state);
        }
    }

    /// Returns `Ok(())` only when the station is SUPERVISED and the command
    /// epoch is either the sentinel `0` or `>=` the current epoch.
    pub fn validate_command(&self, station: &str, command_epoch: u32) -> CoreResult<()> {
        let inner = self.inner.lock().unwrap();
        let ctx = inner
            .get(station)
            .ok_or_else(|| CoreError::NotFound(station.to_string()))?;
        if ctx.state != AuthorityState::Supervised {
            return Err(CoreError::Permission(format!("{station} is not SUPERVISED")));
        }
        if command_epoch == 0 || command_epoch >= ctx.epoch {
            Ok(())
        } else {
            Err(CoreError::Permission(format!(
                "stale epoch {command_epoch} < current {}",
                ctx.epoch
            )))
        }
    }
}
