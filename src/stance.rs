//! Top-level stance selection.
//!
//! Fixed priority, first match wins:
//! 1. danger outside ENGAGED: escape, then SEARCHING
//! 2. ENGAGED without a visible enemy: SEARCHING
//! 3. enemy visible: ENGAGED
//! 4. anything but INIT: SEARCHING
//! 5. stay in INIT
//!
//! Survival preempts offense; the order must not change.

use crate::config::ControllerConfig;
use crate::error::ActuatorFault;
use crate::hardware::{stop_all, Hardware};
use crate::sensors::Signals;
use crate::state::{RobotState, Stance};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Decision {
    pub next: Stance,
    /// Run the escape reflex before settling into `next`.
    pub escape: bool,
}

pub fn decide(stance: Stance, signals: &Signals, cfg: &ControllerConfig) -> Decision {
    if signals.in_danger_zone(cfg) && stance != Stance::Engaged {
        return Decision {
            next: Stance::Searching,
            escape: true,
        };
    }
    let next = if stance == Stance::Engaged && !signals.enemy_visible {
        Stance::Searching
    } else if signals.enemy_visible {
        Stance::Engaged
    } else if stance != Stance::Init {
        Stance::Searching
    } else {
        Stance::Init
    };
    Decision {
        next,
        escape: false,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: Stance,
    pub to: Stance,
    /// The body of `to` did not run on the previous tick; one-time entry
    /// setup is due.
    pub entered: bool,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// Commits this tick's stance. Updates `previous_stance` exactly once per
/// tick and hands the actuators over stopped when leaving for a non-ENGAGED
/// stance. Any real change of stance is an entry, including a return to the
/// stance a body just handed off from.
pub fn commit<H: Hardware + ?Sized>(
    hw: &mut H,
    state: &mut RobotState,
    next: Stance,
) -> Result<Transition, ActuatorFault> {
    let from = state.stance;
    state.stance = next;
    if from != next {
        debug!(tick = state.tick, %from, to = %next, "stance transition");
        if next != Stance::Engaged {
            stop_all(hw)?;
        }
    }
    let entered = from != next || state.previous_stance != Some(next);
    state.previous_stance = Some(next);
    Ok(Transition {
        from,
        to: next,
        entered,
    })
}

/// Stance change asked for by a stance body (INIT hand-off, attack retreat).
/// Takes effect for the next tick's body; `previous_stance` is left alone so
/// the next tick still sees the entry edge.
pub fn request<H: Hardware + ?Sized>(
    hw: &mut H,
    state: &mut RobotState,
    to: Stance,
) -> Result<(), ActuatorFault> {
    if state.stance == to {
        return Ok(());
    }
    debug!(tick = state.tick, from = %state.stance, %to, "stance requested by body");
    state.stance = to;
    if to != Stance::Engaged {
        stop_all(hw)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::testing::{Call, ScriptedHardware};
    use crate::hardware::Motor;

    fn signals(enemy_visible: bool, danger_level: u8) -> Signals {
        Signals {
            enemy_visible,
            danger_level,
            heading_deg: 0.0,
            rate_dps: 0.0,
            wheel_speed: 0.0,
        }
    }

    #[test]
    fn danger_preempts_a_visible_enemy_outside_engaged() {
        let cfg = ControllerConfig::default();
        let decision = decide(Stance::Searching, &signals(true, 6), &cfg);
        assert_eq!(
            decision,
            Decision {
                next: Stance::Searching,
                escape: true
            }
        );
        assert!(decide(Stance::Init, &signals(false, 5), &cfg).escape);
    }

    #[test]
    fn engaged_keeps_pushing_in_danger_while_enemy_visible() {
        let cfg = ControllerConfig::default();
        let decision = decide(Stance::Engaged, &signals(true, 6), &cfg);
        assert_eq!(decision.next, Stance::Engaged);
        assert!(!decision.escape);
    }

    #[test]
    fn remaining_rules_in_priority_order() {
        let cfg = ControllerConfig::default();
        assert_eq!(
            decide(Stance::Engaged, &signals(false, 1), &cfg).next,
            Stance::Searching
        );
        assert_eq!(
            decide(Stance::Searching, &signals(true, 1), &cfg).next,
            Stance::Engaged
        );
        assert_eq!(
            decide(Stance::Init, &signals(true, 1), &cfg).next,
            Stance::Engaged
        );
        assert_eq!(
            decide(Stance::Searching, &signals(false, 2), &cfg).next,
            Stance::Searching
        );
        assert_eq!(
            decide(Stance::Init, &signals(false, 0), &cfg).next,
            Stance::Init
        );
    }

    #[test]
    fn commit_flags_entry_once_and_stops_on_handoff() {
        let mut hw = ScriptedHardware::new();
        let mut state = RobotState::new();

        let t = commit(&mut hw, &mut state, Stance::Init).unwrap();
        assert!(t.entered && !t.changed());

        let t = commit(&mut hw, &mut state, Stance::Engaged).unwrap();
        assert!(t.entered && t.changed());
        assert!(hw.calls.is_empty(), "entering ENGAGED must not stop motors");

        let t = commit(&mut hw, &mut state, Stance::Engaged).unwrap();
        assert!(!t.entered);

        let t = commit(&mut hw, &mut state, Stance::Searching).unwrap();
        assert!(t.entered);
        assert_eq!(
            hw.calls,
            vec![Call::Stop(Motor::Left), Call::Stop(Motor::Right)]
        );
    }

    #[test]
    fn body_request_keeps_the_entry_edge_for_the_next_tick() {
        let mut hw = ScriptedHardware::new();
        let mut state = RobotState::new();
        commit(&mut hw, &mut state, Stance::Init).unwrap();

        request(&mut hw, &mut state, Stance::Engaged).unwrap();
        assert_eq!(state.stance, Stance::Engaged);
        assert_eq!(state.previous_stance, Some(Stance::Init));

        let t = commit(&mut hw, &mut state, Stance::Engaged).unwrap();
        assert!(t.entered);
        assert!(!t.changed());
    }

    #[test]
    fn returning_right_after_a_body_handoff_is_a_fresh_entry() {
        let mut hw = ScriptedHardware::new();
        let mut state = RobotState::new();
        commit(&mut hw, &mut state, Stance::Engaged).unwrap();
        commit(&mut hw, &mut state, Stance::Engaged).unwrap();

        request(&mut hw, &mut state, Stance::Searching).unwrap();
        assert_eq!(state.previous_stance, Some(Stance::Engaged));

        let t = commit(&mut hw, &mut state, Stance::Engaged).unwrap();
        assert!(t.changed());
        assert!(t.entered);
    }
}
