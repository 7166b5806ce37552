//! SEARCHING stance body.
//!
//! Phase A runs once to completion: a passive near-full rotation that keeps
//! overwriting the center estimate with the last heading seen over safe
//! floor. An escape or engagement that cuts it short restarts it on the next
//! SEARCHING entry. Phase B is a
//! tick-driven cycle of short turn pulses and pauses, alternating direction
//! on every new search episode. Nothing here blocks the loop.

use crate::config::ControllerConfig;
use crate::error::ActuatorFault;
use crate::hardware::{apply_drive, stop_all, DriveCommand, Hardware};
use crate::maneuver::{HeadingTurn, TurnDirection, TurnStatus};
use crate::sensors::Signals;
use crate::state::RobotState;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Floor at or below this danger level counts as safely inside the ring.
pub const SAFE_FLOOR_LEVEL: u8 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchAction {
    Scanning,
    ScanComplete,
    Pulsing,
    ProtectiveTurn,
    Pausing,
    Yielded,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct PassiveScan {
    start_angle: f64,
    deadline_ms: u64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Pulse {
    Idle,
    Turning(HeadingTurn),
    Protective(HeadingTurn),
    Pausing { until_ms: u64 },
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Phase {
    NotStarted,
    PassiveScan(PassiveScan),
    Pulsed(Pulse),
}

#[derive(Clone, Debug)]
pub struct SearchController {
    phase: Phase,
    direction: TurnDirection,
    overruns: u64,
}

impl Default for SearchController {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchController {
    pub fn new() -> Self {
        Self {
            phase: Phase::NotStarted,
            direction: TurnDirection::Left,
            overruns: 0,
        }
    }

    pub fn is_passively_scanning(&self) -> bool {
        matches!(self.phase, Phase::PassiveScan(_))
    }

    pub fn passive_scan_start_angle(&self) -> Option<f64> {
        match self.phase {
            Phase::PassiveScan(scan) => Some(scan.start_angle),
            _ => None,
        }
    }

    pub fn direction(&self) -> TurnDirection {
        self.direction
    }

    /// Turn-to-heading waits that hit their deadline.
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    /// One-time setup on entering SEARCHING. Until a passive scan has
    /// finished, every entry starts one from the current heading with a fresh
    /// deadline; afterwards each entry flips the pulse direction.
    pub fn enter(&mut self, heading: f64, now_ms: u64, cfg: &ControllerConfig) {
        self.phase = match self.phase {
            Phase::NotStarted | Phase::PassiveScan(_) => {
                if self.is_passively_scanning() {
                    debug!(heading, "restarting interrupted passive scan");
                } else {
                    debug!(heading, "starting passive scan");
                }
                Phase::PassiveScan(PassiveScan {
                    start_angle: heading,
                    deadline_ms: now_ms.saturating_add(cfg.passive_scan_timeout_ms),
                })
            }
            Phase::Pulsed(_) => {
                self.direction = self.direction.flipped();
                Phase::Pulsed(Pulse::Idle)
            }
        };
    }

    pub fn tick<H: Hardware + ?Sized>(
        &mut self,
        hw: &mut H,
        state: &mut RobotState,
        signals: &Signals,
        cfg: &ControllerConfig,
    ) -> Result<SearchAction, ActuatorFault> {
        let now = hw.now_ms();
        match self.phase {
            Phase::NotStarted => {
                self.enter(signals.heading_deg, now, cfg);
                self.tick(hw, state, signals, cfg)
            }
            Phase::PassiveScan(scan) => self.scan_tick(hw, state, signals, scan, now, cfg),
            Phase::Pulsed(pulse) => self.pulse_tick(hw, state, signals, pulse, now, cfg),
        }
    }

    fn scan_tick<H: Hardware + ?Sized>(
        &mut self,
        hw: &mut H,
        state: &mut RobotState,
        signals: &Signals,
        scan: PassiveScan,
        now: u64,
        cfg: &ControllerConfig,
    ) -> Result<SearchAction, ActuatorFault> {
        if signals.danger_level <= SAFE_FLOOR_LEVEL {
            state.center_vector = Some(signals.heading_deg);
        }

        let rotated = (signals.heading_deg - scan.start_angle).abs();
        let timed_out = now >= scan.deadline_ms;
        if rotated >= cfg.scan_target_deg() || timed_out {
            stop_all(hw)?;
            if timed_out {
                self.overruns += 1;
                warn!(rotated, "passive scan timed out");
            }
            debug!(rotated, center = ?state.center_vector, "passive scan complete");
            self.phase = Phase::Pulsed(Pulse::Idle);
            return Ok(SearchAction::ScanComplete);
        }

        apply_drive(hw, DriveCommand::spin(self.direction.sign() * cfg.search_speed))?;
        Ok(SearchAction::Scanning)
    }

    fn pulse_tick<H: Hardware + ?Sized>(
        &mut self,
        hw: &mut H,
        state: &RobotState,
        signals: &Signals,
        pulse: Pulse,
        now: u64,
        cfg: &ControllerConfig,
    ) -> Result<SearchAction, ActuatorFault> {
        let heading = signals.heading_deg;

        if signals.in_danger_zone(cfg) && !matches!(pulse, Pulse::Protective(_)) {
            let direction = state
                .center_vector
                .map(|center| TurnDirection::toward(heading, center))
                .unwrap_or(self.direction);
            let turn = HeadingTurn::by(
                heading,
                cfg.protective_turn_deg,
                direction,
                now,
                cfg.turn_timeout_ms,
            );
            debug!(danger = signals.danger_level, ?direction, "protective turn");
            apply_drive(hw, turn.command(cfg.search_speed))?;
            self.phase = Phase::Pulsed(Pulse::Protective(turn));
            return Ok(SearchAction::ProtectiveTurn);
        }

        match pulse {
            Pulse::Idle => {
                let turn = HeadingTurn::by(
                    heading,
                    cfg.search_pulse_deg,
                    self.direction,
                    now,
                    cfg.turn_timeout_ms,
                );
                apply_drive(hw, turn.command(cfg.search_speed))?;
                self.phase = Phase::Pulsed(Pulse::Turning(turn));
                Ok(SearchAction::Pulsing)
            }
            Pulse::Turning(turn) | Pulse::Protective(turn) => {
                let action = if matches!(pulse, Pulse::Protective(_)) {
                    SearchAction::ProtectiveTurn
                } else {
                    SearchAction::Pulsing
                };
                match turn.poll(heading, now) {
                    TurnStatus::InProgress => {
                        apply_drive(hw, turn.command(cfg.search_speed))?;
                        Ok(action)
                    }
                    status => {
                        if status == TurnStatus::TimedOut {
                            self.overruns += 1;
                            warn!(target_deg = turn.target(), "search turn timed out");
                        }
                        stop_all(hw)?;
                        self.phase = Phase::Pulsed(Pulse::Pausing {
                            until_ms: now.saturating_add(cfg.search_pause_ms),
                        });
                        Ok(SearchAction::Pausing)
                    }
                }
            }
            Pulse::Pausing { until_ms } => {
                if now >= until_ms {
                    self.phase = Phase::Pulsed(Pulse::Idle);
                    Ok(SearchAction::Yielded)
                } else {
                    Ok(SearchAction::Pausing)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::testing::ScriptedHardware;

    fn signals(heading: f64, danger: u8) -> Signals {
        Signals {
            enemy_visible: false,
            danger_level: danger,
            heading_deg: heading,
            rate_dps: 0.0,
            wheel_speed: 0.0,
        }
    }

    fn after_scan(cfg: &ControllerConfig) -> SearchController {
        let mut search = SearchController::new();
        search.enter(0.0, 0, cfg);
        let action = search
            .tick(
                &mut ScriptedHardware::new(),
                &mut RobotState::new(),
                &signals(cfg.scan_target_deg(), 1),
                cfg,
            )
            .unwrap();
        assert_eq!(action, SearchAction::ScanComplete);
        search
    }

    #[test]
    fn passive_scan_records_last_safe_heading_and_stops_short_of_a_revolution() {
        let cfg = ControllerConfig::default();
        let mut hw = ScriptedHardware::new();
        let mut state = RobotState::new();
        let mut search = SearchController::new();
        search.enter(10.0, 0, &cfg);
        assert!(search.is_passively_scanning());
        assert_eq!(search.passive_scan_start_angle(), Some(10.0));

        let samples = [(10.0, 1), (100.0, 2), (200.0, 5), (300.0, 6)];
        for (heading, danger) in samples {
            let action = search
                .tick(&mut hw, &mut state, &signals(heading, danger), &cfg)
                .unwrap();
            assert_eq!(action, SearchAction::Scanning);
        }
        assert_eq!(state.center_vector, Some(100.0));
        assert!(hw.last_command().right > 0.0);

        let action = search
            .tick(&mut hw, &mut state, &signals(10.0 + cfg.scan_target_deg(), 6), &cfg)
            .unwrap();
        assert_eq!(action, SearchAction::ScanComplete);
        assert!(!search.is_passively_scanning());
        assert!(!hw.is_running());
    }

    #[test]
    fn passive_scan_is_bounded_by_its_timeout() {
        let cfg = ControllerConfig::default();
        let mut hw = ScriptedHardware::new();
        let mut state = RobotState::new();
        let mut search = SearchController::new();
        search.enter(0.0, 0, &cfg);
        hw.now = cfg.passive_scan_timeout_ms;
        let action = search
            .tick(&mut hw, &mut state, &signals(5.0, 1), &cfg)
            .unwrap();
        assert_eq!(action, SearchAction::ScanComplete);
        assert_eq!(search.overruns(), 1);
    }

    #[test]
    fn pulses_turn_pause_then_yield() {
        let cfg = ControllerConfig::default();
        let mut hw = ScriptedHardware::new();
        let mut state = RobotState::new();
        let mut search = after_scan(&cfg);
        search.enter(0.0, 0, &cfg);
        let direction = search.direction();
        assert_eq!(direction, TurnDirection::Right);

        let a = search.tick(&mut hw, &mut state, &signals(0.0, 1), &cfg).unwrap();
        assert_eq!(a, SearchAction::Pulsing);
        assert!(hw.last_command().left > 0.0, "right turn drives the left wheel forward");

        let reached = -cfg.search_pulse_deg;
        let a = search.tick(&mut hw, &mut state, &signals(reached, 1), &cfg).unwrap();
        assert_eq!(a, SearchAction::Pausing);
        assert!(!hw.is_running());

        hw.now += cfg.search_pause_ms;
        let a = search.tick(&mut hw, &mut state, &signals(reached, 1), &cfg).unwrap();
        assert_eq!(a, SearchAction::Yielded);

        let a = search.tick(&mut hw, &mut state, &signals(reached, 1), &cfg).unwrap();
        assert_eq!(a, SearchAction::Pulsing);
    }

    #[test]
    fn direction_alternates_across_episodes() {
        let cfg = ControllerConfig::default();
        let mut search = after_scan(&cfg);
        let mut seen = Vec::new();
        for _ in 0..4 {
            search.enter(0.0, 0, &cfg);
            seen.push(search.direction());
        }
        assert_eq!(
            seen,
            vec![
                TurnDirection::Right,
                TurnDirection::Left,
                TurnDirection::Right,
                TurnDirection::Left
            ]
        );
    }

    #[test]
    fn interrupted_scan_restarts_from_the_new_heading() {
        let cfg = ControllerConfig::default();
        let mut hw = ScriptedHardware::new();
        let mut state = RobotState::new();
        let mut search = SearchController::new();
        search.enter(0.0, 0, &cfg);
        search
            .tick(&mut hw, &mut state, &signals(90.0, 1), &cfg)
            .unwrap();
        assert_eq!(state.center_vector, Some(90.0));

        search.enter(250.0, 800, &cfg);
        assert!(search.is_passively_scanning());
        assert_eq!(search.passive_scan_start_angle(), Some(250.0));
        assert_eq!(search.direction(), TurnDirection::Left);

        hw.now = cfg.passive_scan_timeout_ms;
        let action = search
            .tick(&mut hw, &mut state, &signals(260.0, 1), &cfg)
            .unwrap();
        assert_eq!(action, SearchAction::Scanning, "deadline restarts with the scan");
        assert_eq!(state.center_vector, Some(260.0));

        let action = search
            .tick(&mut hw, &mut state, &signals(250.0 + cfg.scan_target_deg(), 6), &cfg)
            .unwrap();
        assert_eq!(action, SearchAction::ScanComplete);
        assert_eq!(search.overruns(), 0);

        search.enter(0.0, hw.now, &cfg);
        assert_eq!(search.direction(), TurnDirection::Right);
    }

    #[test]
    fn danger_while_pulsing_turns_toward_the_center_estimate() {
        let cfg = ControllerConfig::default();
        let mut hw = ScriptedHardware::new();
        let mut state = RobotState::new();
        state.center_vector = Some(-90.0);
        let mut search = after_scan(&cfg);
        search.enter(0.0, 0, &cfg);
        search.enter(0.0, 0, &cfg);
        assert_eq!(search.direction(), TurnDirection::Left);

        let a = search.tick(&mut hw, &mut state, &signals(0.0, 6), &cfg).unwrap();
        assert_eq!(a, SearchAction::ProtectiveTurn);
        assert!(hw.last_command().left > 0.0, "center lies to the right");

        let a = search.tick(&mut hw, &mut state, &signals(-10.0, 6), &cfg).unwrap();
        assert_eq!(a, SearchAction::ProtectiveTurn);
    }

    #[test]
    fn frozen_heading_times_out_the_pulse() {
        let cfg = ControllerConfig::default();
        let mut hw = ScriptedHardware::new();
        let mut state = RobotState::new();
        let mut search = after_scan(&cfg);
        search.enter(0.0, 0, &cfg);

        search.tick(&mut hw, &mut state, &signals(0.0, 1), &cfg).unwrap();
        hw.now = cfg.turn_timeout_ms;
        let a = search.tick(&mut hw, &mut state, &signals(0.0, 1), &cfg).unwrap();
        assert_eq!(a, SearchAction::Pausing);
        assert_eq!(search.overruns(), 1);
    }
}
