//! One control tick: SensorFusion, then the stance machine, then exactly one
//! stance body. The body that runs owns the actuators for the tick.

use crate::attack::{AttackController, AttackOutcome, RetreatReason};
use crate::config::ControllerConfig;
use crate::error::{ActuatorFault, ControlError};
use crate::escape::{self, EscapeReport};
use crate::hardware::{set_stop_action_all, stop_all, Hardware, StopAction};
use crate::maneuver::TurnStatus;
use crate::opening::{OpeningAction, OpeningController};
use crate::search::{SearchAction, SearchController};
use crate::sensors::{SensorFusion, Signals};
use crate::stance::{self, Transition};
use crate::state::{RobotState, Stance, StrategyBook};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "body", content = "result")]
pub enum BodyReport {
    Escape(EscapeReport),
    Opening(OpeningAction),
    Attack(AttackOutcome),
    Search(SearchAction),
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    pub tick: u64,
    pub signals: Signals,
    pub transition: Transition,
    pub stalled: bool,
    pub confidence: i32,
    pub body: BodyReport,
    /// Stance after the body ran; differs from `transition.to` when the body
    /// asked for a hand-off.
    pub stance: Stance,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchStats {
    pub ticks: u64,
    pub init_ticks: u64,
    pub searching_ticks: u64,
    pub engaged_ticks: u64,
    pub engagements: u64,
    pub escapes: u64,
    pub retreats: u64,
    pub stall_events: u64,
    pub confidence_min: i32,
    pub confidence_max: i32,
    pub final_confidence: i32,
    pub sensor_faults: u64,
    pub timing_overruns: u64,
}

impl MatchStats {
    fn new(confidence: i32) -> Self {
        Self {
            confidence_min: confidence,
            confidence_max: confidence,
            final_confidence: confidence,
            ..Self::default()
        }
    }

    fn record_stance(&mut self, stance: Stance) {
        self.ticks += 1;
        match stance {
            Stance::Init => self.init_ticks += 1,
            Stance::Searching => self.searching_ticks += 1,
            Stance::Engaged => self.engaged_ticks += 1,
        }
    }

    fn record_confidence(&mut self, confidence: i32) {
        self.confidence_min = self.confidence_min.min(confidence);
        self.confidence_max = self.confidence_max.max(confidence);
        self.final_confidence = confidence;
    }
}

#[derive(Clone, Debug)]
pub struct Controller {
    cfg: ControllerConfig,
    state: RobotState,
    fusion: SensorFusion,
    attack: AttackController,
    search: SearchController,
    opening: OpeningController,
    stats: MatchStats,
    escape_overruns: u64,
}

impl Controller {
    pub fn new(cfg: ControllerConfig) -> Result<Self, ControlError> {
        cfg.validate()?;
        let state = RobotState::new();
        let stats = MatchStats::new(state.confidence.value());
        Ok(Self {
            attack: AttackController::new(StrategyBook::from_config(&cfg)),
            cfg,
            state,
            fusion: SensorFusion::new(),
            search: SearchController::new(),
            opening: OpeningController::new(),
            stats,
            escape_overruns: 0,
        })
    }

    pub fn cfg(&self) -> &ControllerConfig {
        &self.cfg
    }

    pub fn state(&self) -> &RobotState {
        &self.state
    }

    pub fn stats(&self) -> &MatchStats {
        &self.stats
    }

    /// Pre-match setup: motors braked in place and stopped.
    pub fn prepare<H: Hardware + ?Sized>(&mut self, hw: &mut H) -> Result<(), ActuatorFault> {
        set_stop_action_all(hw, StopAction::Hold)?;
        stop_all(hw)
    }

    pub fn tick<H: Hardware + ?Sized>(&mut self, hw: &mut H) -> Result<TickReport, ControlError> {
        let snapshot = self.fusion.sample(hw)?;
        let signals = Signals::derive(&snapshot, &self.cfg);
        self.state.danger_level = signals.danger_level;

        let decision = stance::decide(self.state.stance, &signals, &self.cfg);
        let (transition, stalled, body) = if decision.escape {
            let (transition, body) = self.escape_tick(hw, &signals)?;
            (transition, false, body)
        } else {
            let transition = stance::commit(hw, &mut self.state, decision.next)?;
            if transition.entered {
                self.enter(hw, transition.to, &signals);
            }
            let stalled = self.state.stall.is_stalled(
                transition.to,
                signals.wheel_speed,
                self.cfg.stall_speed_threshold,
                self.state.tick,
                self.cfg.stall_loop_threshold,
            );
            let body = self.run_body(hw, &signals, transition.to, stalled)?;
            (transition, stalled, body)
        };

        self.stats.record_stance(transition.to);
        self.stats.record_confidence(self.state.confidence.value());
        self.stats.sensor_faults = self.fusion.fault_count();
        self.stats.timing_overruns =
            self.search.overruns() + self.opening.overruns() + self.escape_overruns;

        let report = TickReport {
            tick: self.state.tick,
            signals,
            transition,
            stalled,
            confidence: self.state.confidence.value(),
            body,
            stance: self.state.stance,
        };
        self.state.tick += 1;
        Ok(report)
    }

    fn escape_tick<H: Hardware + ?Sized>(
        &mut self,
        hw: &mut H,
        signals: &Signals,
    ) -> Result<(Transition, BodyReport), ActuatorFault> {
        let from = self.state.stance;
        let report = escape::execute(hw, &mut self.state, &self.cfg, self.search.direction())?;
        self.stats.escapes += 1;
        if report.turn_status == TurnStatus::TimedOut {
            self.escape_overruns += 1;
        }
        self.state.stall.reset();
        let transition = Transition {
            from,
            ..stance::commit(hw, &mut self.state, Stance::Searching)?
        };
        // Every escape starts a fresh search episode from the new heading.
        let heading = Some(hw.heading_deg())
            .filter(|heading| heading.is_finite())
            .unwrap_or(signals.heading_deg);
        self.search.enter(heading, hw.now_ms(), &self.cfg);
        Ok((transition, BodyReport::Escape(report)))
    }

    fn enter<H: Hardware + ?Sized>(&mut self, hw: &mut H, stance: Stance, signals: &Signals) {
        match stance {
            Stance::Engaged => {
                self.stats.engagements += 1;
                self.attack.enter(&mut self.state, signals.heading_deg);
            }
            Stance::Searching => self.search.enter(signals.heading_deg, hw.now_ms(), &self.cfg),
            Stance::Init => {}
        }
    }

    fn run_body<H: Hardware + ?Sized>(
        &mut self,
        hw: &mut H,
        signals: &Signals,
        stance: Stance,
        stalled: bool,
    ) -> Result<BodyReport, ActuatorFault> {
        match stance {
            Stance::Init => {
                let action = self.opening.deduce_starting_position(
                    hw,
                    &mut self.fusion,
                    &mut self.state,
                    &self.cfg,
                    self.search.direction(),
                )?;
                Ok(BodyReport::Opening(action))
            }
            Stance::Searching => {
                let action = self.search.tick(hw, &mut self.state, signals, &self.cfg)?;
                Ok(BodyReport::Search(action))
            }
            Stance::Engaged => {
                let outcome = self
                    .attack
                    .tick(hw, &mut self.state, signals, stalled, &self.cfg)?;
                if let AttackOutcome::Retreat(reason) = outcome {
                    self.stats.retreats += 1;
                    if reason == RetreatReason::Overpowered {
                        self.stats.stall_events += 1;
                    }
                    self.state.stall.reset();
                    stance::request(hw, &mut self.state, Stance::Searching)?;
                    debug!(tick = self.state.tick, ?reason, "retreating to search");
                }
                Ok(BodyReport::Attack(outcome))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::testing::{Call, ScriptedHardware};
    use crate::hardware::{FloorColor, Motor};
    use crate::state::AttackStrategy;

    fn controller() -> Controller {
        Controller::new(ControllerConfig::default()).unwrap()
    }

    #[test]
    fn rejects_an_invalid_config() {
        let cfg = ControllerConfig {
            tick_ms: 0,
            ..ControllerConfig::default()
        };
        assert!(matches!(
            Controller::new(cfg),
            Err(ControlError::InvalidConfig(_))
        ));
    }

    #[test]
    fn prepare_holds_and_stops_both_motors() {
        let mut hw = ScriptedHardware::new();
        controller().prepare(&mut hw).unwrap();
        assert_eq!(
            hw.calls,
            vec![
                Call::StopAction(Motor::Left, StopAction::Hold),
                Call::StopAction(Motor::Right, StopAction::Hold),
                Call::Stop(Motor::Left),
                Call::Stop(Motor::Right),
            ]
        );
    }

    #[test]
    fn first_tick_leaves_init() {
        let mut hw = ScriptedHardware::new();
        let mut ctl = controller();
        let report = ctl.tick(&mut hw).unwrap();
        assert_eq!(report.transition.to, Stance::Init);
        assert!(report.transition.entered);
        assert!(matches!(report.body, BodyReport::Opening(_)));
        assert_eq!(report.stance, Stance::Searching);

        let report = ctl.tick(&mut hw).unwrap();
        assert!(report.transition.entered);
        assert_eq!(report.transition.to, Stance::Searching);
        assert_eq!(report.body, BodyReport::Search(SearchAction::Scanning));
    }

    #[test]
    fn visible_enemy_engages_and_sets_up_the_attack_once() {
        let mut hw = ScriptedHardware::new();
        let mut ctl = controller();
        ctl.tick(&mut hw).unwrap();

        hw.distance = 20.0;
        hw.wheel_speed = 500.0;
        hw.heading = 77.0;
        let report = ctl.tick(&mut hw).unwrap();
        assert_eq!(report.transition.to, Stance::Engaged);
        assert!(report.transition.entered);
        assert!(matches!(report.body, BodyReport::Attack(AttackOutcome::Pushing(_))));
        assert_eq!(ctl.state().current_attack, Some(AttackStrategy::StraightPush));
        assert_eq!(ctl.state().attack_heading, 77.0);

        hw.heading = 80.0;
        let report = ctl.tick(&mut hw).unwrap();
        assert!(!report.transition.entered);
        assert_eq!(ctl.state().attack_heading, 77.0);
        assert_eq!(ctl.stats().engagements, 1);
    }

    #[test]
    fn losing_the_target_stops_the_motors_before_searching() {
        let mut hw = ScriptedHardware::new();
        let mut ctl = controller();
        ctl.tick(&mut hw).unwrap();
        hw.distance = 20.0;
        hw.wheel_speed = 500.0;
        ctl.tick(&mut hw).unwrap();
        assert!(hw.is_running());

        hw.distance = 200.0;
        hw.calls.clear();
        let report = ctl.tick(&mut hw).unwrap();
        assert_eq!(report.transition.to, Stance::Searching);
        assert_eq!(hw.calls[0], Call::Stop(Motor::Left));
        assert_eq!(hw.calls[1], Call::Stop(Motor::Right));
    }

    #[test]
    fn stalled_push_retreats_and_costs_confidence() {
        let mut hw = ScriptedHardware::new();
        let mut ctl = controller();
        ctl.tick(&mut hw).unwrap();

        hw.distance = 20.0;
        hw.wheel_speed = 0.0;
        let threshold = u64::from(ctl.cfg().stall_loop_threshold);
        let mut retreated_at = None;
        for i in 0..threshold + 2 {
            let report = ctl.tick(&mut hw).unwrap();
            if report.stalled {
                retreated_at = Some(i);
                assert_eq!(report.stance, Stance::Searching);
                break;
            }
        }
        assert_eq!(retreated_at, Some(threshold - 1));
        assert_eq!(ctl.state().confidence.value(), 5);
        assert_eq!(ctl.stats().stall_events, 1);
        assert!(!hw.is_running());
    }

    #[test]
    fn reengaging_after_a_stall_reselects_the_strategy() {
        let mut hw = ScriptedHardware::new();
        let mut ctl = controller();
        ctl.tick(&mut hw).unwrap();

        hw.distance = 20.0;
        hw.wheel_speed = 0.0;
        hw.heading = 15.0;
        let threshold = u64::from(ctl.cfg().stall_loop_threshold);
        for _ in 0..threshold {
            if ctl.tick(&mut hw).unwrap().stalled {
                break;
            }
        }
        assert_eq!(ctl.state().stance, Stance::Searching);
        assert_eq!(ctl.state().confidence.value(), 5);

        hw.heading = 40.0;
        let report = ctl.tick(&mut hw).unwrap();
        assert_eq!(report.transition.from, Stance::Searching);
        assert_eq!(report.transition.to, Stance::Engaged);
        assert!(report.transition.entered);
        assert!(!report.stalled);
        assert_eq!(ctl.state().current_attack, Some(AttackStrategy::HookLeft));
        assert_eq!(ctl.state().attack_heading, 40.0);
        assert_eq!(ctl.stats().engagements, 2);
    }

    #[test]
    fn danger_outside_engaged_escapes_and_skips_the_body() {
        let mut hw = ScriptedHardware::new();
        let mut ctl = controller();
        ctl.tick(&mut hw).unwrap();

        hw.color = Ok(FloorColor::Boundary);
        hw.distance = 20.0;
        let report = ctl.tick(&mut hw).unwrap();
        assert!(matches!(report.body, BodyReport::Escape(_)));
        assert_eq!(report.transition.to, Stance::Searching);
        assert_eq!(report.stance, Stance::Searching);
        assert_eq!(ctl.stats().escapes, 1);
        assert!(!hw.is_running());
    }

    #[test]
    fn engaged_robot_keeps_pushing_on_the_boundary() {
        let mut hw = ScriptedHardware::new();
        let mut ctl = controller();
        ctl.tick(&mut hw).unwrap();
        hw.distance = 20.0;
        hw.wheel_speed = 500.0;
        ctl.tick(&mut hw).unwrap();

        hw.color = Ok(FloorColor::Boundary);
        let report = ctl.tick(&mut hw).unwrap();
        assert_eq!(report.stance, Stance::Engaged);
        let BodyReport::Attack(AttackOutcome::Pushing(cmd)) = report.body else {
            panic!("expected a push, got {:?}", report.body);
        };
        // Boundary tier slows the push to 80 %.
        assert!(cmd.left <= ctl.cfg().base_speed * 0.8 + 1e-9);
    }

    #[test]
    fn stats_track_ticks_and_confidence() {
        let mut hw = ScriptedHardware::new();
        let mut ctl = controller();
        for _ in 0..5 {
            ctl.tick(&mut hw).unwrap();
        }
        let stats = ctl.stats();
        assert_eq!(stats.ticks, 5);
        assert_eq!(stats.init_ticks + stats.searching_ticks + stats.engaged_ticks, 5);
        assert_eq!(stats.confidence_min, 10);
        assert_eq!(stats.final_confidence, 10);
        assert_eq!(ctl.state().tick, 5);
    }

    #[test]
    fn actuator_fault_surfaces_as_control_error() {
        let mut hw = ScriptedHardware::new();
        hw.fail_motor = Some(Motor::Left);
        let err = controller().tick(&mut hw).unwrap_err();
        assert!(matches!(err, ControlError::Actuator(_)));
    }
}
