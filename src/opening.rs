//! INIT stance body: settle, look once, optionally dash, then orient and hand
//! over to SEARCHING or ENGAGED. The very first INIT tick never leaves the
//! robot idling unless a dash is configured, and the dash itself is a
//! tick-by-tick drive that the danger and enemy rules can preempt.

use crate::config::ControllerConfig;
use crate::error::ActuatorFault;
use crate::hardware::{apply_drive, DriveCommand, Hardware};
use crate::maneuver::{turn_blocking, TurnDirection, TurnStatus};
use crate::sensors::{is_enemy_ahead, SensorFusion};
use crate::stance;
use crate::state::{RobotState, Stance};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum OpeningAction {
    /// Enemy seen right after the settle pause.
    Engage,
    Dashing,
    Oriented { status: TurnStatus },
}

#[derive(Clone, Debug, Default)]
pub struct OpeningController {
    settled: bool,
    dash_ticks: u64,
    overruns: u64,
}

impl OpeningController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    /// Runs one INIT tick.
    pub fn deduce_starting_position<H: Hardware + ?Sized>(
        &mut self,
        hw: &mut H,
        fusion: &mut SensorFusion,
        state: &mut RobotState,
        cfg: &ControllerConfig,
        direction: TurnDirection,
    ) -> Result<OpeningAction, ActuatorFault> {
        if !self.settled {
            self.settled = true;
            hw.sleep_ms(cfg.init_settle_ms);
            // The tick's sample predates the settle pause; look again.
            let distance = fusion.read_distance(hw);
            if is_enemy_ahead(distance, cfg.enemy_distance_threshold_cm) {
                info!(tick = state.tick, "enemy in sight at the start");
                stance::request(hw, state, Stance::Engaged)?;
                return Ok(OpeningAction::Engage);
            }
        }

        if self.dash_ticks < cfg.ticks_for(cfg.opening_dash_ms) {
            if self.dash_ticks == 0 {
                debug!(ms = cfg.opening_dash_ms, "opening dash");
            }
            self.dash_ticks += 1;
            apply_drive(hw, DriveCommand::straight(cfg.base_speed).clamped(cfg.max_speed))?;
            return Ok(OpeningAction::Dashing);
        }

        let status = turn_blocking(
            hw,
            cfg.init_orient_turn_deg,
            direction,
            cfg.search_speed,
            cfg.turn_timeout_ms,
            cfg.tick_ms,
        )?;
        if status == TurnStatus::TimedOut {
            self.overruns += 1;
            warn!("orienting turn timed out");
        }
        stance::request(hw, state, Stance::Searching)?;
        Ok(OpeningAction::Oriented { status })
    }
}
