//! Deterministic sumo arena implementing [`Hardware`].
//!
//! A circular ring with painted danger bands, a differential-drive robot with
//! first-order motor response, and a scripted opponent. Time only moves inside
//! `sleep_ms`, in fixed physics steps, so a seed replays the same match.

use crate::error::{ActuatorFault, SensorFault};
use crate::hardware::{FloorColor, Hardware, Motor, StopAction};
use crate::rng::SeededRng;
use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, TAU};

pub const RING_RADIUS_CM: f64 = 77.0;
pub const ROBOT_RADIUS_CM: f64 = 8.0;
pub const MAX_MOTOR_SPEED: f64 = 1050.0;
/// What the proximity sensor reports with nothing in its cone.
pub const NO_ECHO_CM: f64 = 255.0;

const WHEEL_RADIUS_CM: f64 = 2.8;
const TRACK_WIDTH_CM: f64 = 12.0;
const COLOR_SENSOR_OFFSET_CM: f64 = 7.0;
const EYES_HALF_ANGLE_DEG: f64 = 12.0;
const PHYSICS_STEP_MS: u64 = 5;
const MOTOR_TAU_MS: f64 = 60.0;
const COAST_TAU_MS: f64 = 300.0;
/// Share of an off-axis shove that turns into body rotation.
const TORQUE_GAIN: f64 = 0.6;

const OPPONENT_SIGHT_CM: f64 = 90.0;
const OPPONENT_FOV_RAD: f64 = 35.0 * PI / 180.0;
const OPPONENT_EDGE_MARGIN_CM: f64 = 14.0;
const OPPONENT_TURN_GAIN: f64 = 4.0;

/// Painted band under a point `radius_cm` from the ring center.
pub fn floor_at_radius(radius_cm: f64) -> FloorColor {
    if radius_cm > RING_RADIUS_CM {
        FloorColor::Background
    } else if radius_cm > 72.0 {
        FloorColor::Boundary
    } else if radius_cm > 66.0 {
        FloorColor::DeepWarning
    } else if radius_cm > 58.0 {
        FloorColor::Warning
    } else if radius_cm > 45.0 {
        FloorColor::Caution
    } else {
        FloorColor::InnerSafe
    }
}

fn wrap_pi(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI {
        wrapped + TAU
    } else {
        wrapped
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Robot,
    Opponent,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimOptions {
    pub seed: u32,
    /// Opponent pushing strength relative to the robot. Drawn from the seed
    /// when unset.
    pub opponent_strength: Option<f64>,
    pub opponent_top_speed_cm_s: Option<f64>,
    /// Opponent never moves on its own.
    pub passive_opponent: bool,
    /// Per-read probability of an implausible sensor value.
    pub sensor_glitch_rate: f64,
    /// Gyro heading stops updating, as with a stalled sensor stream.
    pub freeze_heading: bool,
    /// Both motors start refusing commands at this sim time.
    pub motor_failure_ms: Option<u64>,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            seed: 1,
            opponent_strength: None,
            opponent_top_speed_cm_s: None,
            passive_opponent: false,
            sensor_glitch_rate: 0.0,
            freeze_heading: false,
            motor_failure_ms: None,
        }
    }
}

impl SimOptions {
    pub fn seeded(seed: u32) -> Self {
        Self {
            seed,
            ..Self::default()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    /// World heading, radians, counter-clockwise from +x.
    pub theta: f64,
}

impl Pose {
    pub fn new(x: f64, y: f64, heading_deg: f64) -> Self {
        Self {
            x,
            y,
            theta: heading_deg.to_radians(),
        }
    }

    fn radius(&self) -> f64 {
        self.x.hypot(self.y)
    }

    fn forward(&self) -> (f64, f64) {
        (self.theta.cos(), self.theta.sin())
    }
}

/// World state for traces.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimSnapshot {
    pub t_ms: u64,
    pub robot: Pose,
    pub opponent: Pose,
    pub contact: bool,
    pub eliminated: Option<Side>,
}

#[derive(Clone, Copy, Debug)]
struct MotorState {
    commanded: f64,
    actual: f64,
    running: bool,
    stop_action: StopAction,
}

impl MotorState {
    fn new() -> Self {
        Self {
            commanded: 0.0,
            actual: 0.0,
            running: false,
            stop_action: StopAction::Coast,
        }
    }

    fn step(&mut self, dt_ms: f64) {
        let target = if self.running { self.commanded } else { 0.0 };
        let tau = if self.running || self.stop_action != StopAction::Coast {
            MOTOR_TAU_MS
        } else {
            COAST_TAU_MS
        };
        self.actual += (target - self.actual) * (dt_ms / tau).min(1.0);
    }

    fn linear_cm_s(&self) -> f64 {
        self.actual.to_radians() * WHEEL_RADIUS_CM
    }
}

#[derive(Clone, Copy, Debug)]
struct Opponent {
    pose: Pose,
    strength: f64,
    top_speed: f64,
    wander_heading: f64,
    next_decision_ms: u64,
    speed: f64,
    omega: f64,
}

#[derive(Clone, Debug)]
pub struct ArenaSim {
    opts: SimOptions,
    rng: SeededRng,
    glitch_rng: SeededRng,
    robot: Pose,
    left: MotorState,
    right: MotorState,
    opponent: Opponent,
    gyro_deg: f64,
    gyro_zero: f64,
    gyro_rate_dps: f64,
    /// Fraction of wheel rotation that survives the current contact load.
    load: f64,
    contact: bool,
    now_ms: u64,
    eliminated: Option<Side>,
}

impl ArenaSim {
    pub fn new(opts: SimOptions) -> Self {
        let mut rng = SeededRng::new(opts.seed);
        let axis = rng.next_f64(0.0, TAU);
        let (ax, ay) = (axis.cos(), axis.sin());
        let robot = Pose {
            x: -30.0 * ax,
            y: -30.0 * ay,
            theta: rng.next_f64(0.0, TAU),
        };
        let opponent_pose = Pose {
            x: 30.0 * ax,
            y: 30.0 * ay,
            theta: wrap_pi(axis + PI + rng.next_f64(-0.6, 0.6)),
        };
        let strength = opts
            .opponent_strength
            .unwrap_or_else(|| rng.next_f64(0.7, 1.3));
        let top_speed = opts
            .opponent_top_speed_cm_s
            .unwrap_or_else(|| rng.next_f64(25.0, 40.0));
        let glitch_rng = SeededRng::new(opts.seed ^ 0x5EED_5EED);

        Self {
            opponent: Opponent {
                pose: opponent_pose,
                strength,
                top_speed,
                wander_heading: opponent_pose.theta,
                next_decision_ms: 0,
                speed: 0.0,
                omega: 0.0,
            },
            opts,
            rng,
            glitch_rng,
            robot,
            left: MotorState::new(),
            right: MotorState::new(),
            gyro_deg: 0.0,
            gyro_zero: 0.0,
            gyro_rate_dps: 0.0,
            load: 1.0,
            contact: false,
            now_ms: 0,
            eliminated: None,
        }
    }

    /// Overrides the seeded start layout.
    pub fn place(&mut self, robot: Pose, opponent: Pose) {
        self.robot = robot;
        self.opponent.pose = opponent;
        self.opponent.wander_heading = opponent.theta;
    }

    pub fn eliminated(&self) -> Option<Side> {
        self.eliminated
    }

    pub fn opponent_strength(&self) -> f64 {
        self.opponent.strength
    }

    pub fn snapshot(&self) -> SimSnapshot {
        SimSnapshot {
            t_ms: self.now_ms,
            robot: self.robot,
            opponent: self.opponent.pose,
            contact: self.contact,
            eliminated: self.eliminated,
        }
    }

    fn motor(&mut self, motor: Motor) -> Result<&mut MotorState, ActuatorFault> {
        if let Some(at) = self.opts.motor_failure_ms {
            if self.now_ms >= at {
                return Err(ActuatorFault::new(motor, "motor not responding"));
            }
        }
        Ok(match motor {
            Motor::Left => &mut self.left,
            Motor::Right => &mut self.right,
        })
    }

    fn glitch(&mut self) -> bool {
        self.opts.sensor_glitch_rate > 0.0 && self.glitch_rng.chance(self.opts.sensor_glitch_rate)
    }

    fn step(&mut self, dt_ms: u64) {
        if self.eliminated.is_some() {
            self.now_ms += dt_ms;
            return;
        }
        let dt_ms_f = dt_ms as f64;
        let dt = dt_ms_f / 1000.0;

        self.left.step(dt_ms_f);
        self.right.step(dt_ms_f);
        let (vl, vr) = (self.left.linear_cm_s(), self.right.linear_cm_s());
        let speed = (vl + vr) / 2.0;
        let mut omega = (vr - vl) / TRACK_WIDTH_CM;

        if !self.opts.passive_opponent {
            self.drive_opponent();
        }

        let (fx, fy) = self.robot.forward();
        let mut robot_v = (speed * fx, speed * fy);
        let (ox, oy) = self.opponent.pose.forward();
        let mut opp_v = (self.opponent.speed * ox, self.opponent.speed * oy);

        let dx = self.opponent.pose.x - self.robot.x;
        let dy = self.opponent.pose.y - self.robot.y;
        let dist = dx.hypot(dy);
        self.contact = dist < 2.0 * ROBOT_RADIUS_CM && dist > f64::EPSILON;
        self.load = 1.0;
        if self.contact {
            let n = (dx / dist, dy / dist);
            let ours_n = robot_v.0 * n.0 + robot_v.1 * n.1;
            let theirs_n = -(opp_v.0 * n.0 + opp_v.1 * n.1);
            let ours = ours_n.max(0.0);
            let theirs = theirs_n.max(0.0) * self.opponent.strength;
            let combined = (ours - theirs) / (1.0 + self.opponent.strength);

            robot_v.0 += (combined - ours_n) * n.0;
            robot_v.1 += (combined - ours_n) * n.1;
            opp_v.0 += (combined + theirs_n) * n.0;
            opp_v.1 += (combined + theirs_n) * n.1;

            if ours > 1e-6 {
                self.load = (combined / ours).clamp(0.0, 1.0);
            }
            // A shove off our centerline spins us away from the contact side.
            let offset = fx * n.1 - fy * n.0;
            omega -= offset * theirs * TORQUE_GAIN / ROBOT_RADIUS_CM;
        }

        self.robot.x += robot_v.0 * dt;
        self.robot.y += robot_v.1 * dt;
        self.robot.theta = wrap_pi(self.robot.theta + omega * dt);
        self.opponent.pose.x += opp_v.0 * dt;
        self.opponent.pose.y += opp_v.1 * dt;
        self.opponent.pose.theta = wrap_pi(self.opponent.pose.theta + self.opponent.omega * dt);
        self.separate();

        self.gyro_rate_dps = omega.to_degrees();
        if !self.opts.freeze_heading {
            self.gyro_deg += omega.to_degrees() * dt;
        }
        self.now_ms += dt_ms;

        if self.robot.radius() > RING_RADIUS_CM {
            self.eliminated = Some(Side::Robot);
        } else if self.opponent.pose.radius() > RING_RADIUS_CM {
            self.eliminated = Some(Side::Opponent);
        }
    }

    fn separate(&mut self) {
        let dx = self.opponent.pose.x - self.robot.x;
        let dy = self.opponent.pose.y - self.robot.y;
        let dist = dx.hypot(dy);
        let overlap = 2.0 * ROBOT_RADIUS_CM - dist;
        if overlap > 0.0 && dist > f64::EPSILON {
            let (nx, ny) = (dx / dist, dy / dist);
            let half = overlap / 2.0;
            self.robot.x -= nx * half;
            self.robot.y -= ny * half;
            self.opponent.pose.x += nx * half;
            self.opponent.pose.y += ny * half;
        }
    }

    fn drive_opponent(&mut self) {
        let opp = self.opponent.pose;
        let to_robot = (self.robot.x - opp.x, self.robot.y - opp.y);
        let dist = to_robot.0.hypot(to_robot.1);
        let bearing = to_robot.1.atan2(to_robot.0);

        let (desired, speed) = if dist < OPPONENT_SIGHT_CM
            && wrap_pi(bearing - opp.theta).abs() < OPPONENT_FOV_RAD
        {
            (bearing, self.opponent.top_speed)
        } else if opp.radius() > RING_RADIUS_CM - OPPONENT_EDGE_MARGIN_CM {
            ((-opp.y).atan2(-opp.x), self.opponent.top_speed * 0.5)
        } else {
            if self.now_ms >= self.opponent.next_decision_ms {
                self.opponent.wander_heading = opp.theta + self.rng.next_f64(-1.5, 1.5);
                self.opponent.next_decision_ms =
                    self.now_ms + 400 + u64::from(self.rng.next_int(800));
            }
            (self.opponent.wander_heading, self.opponent.top_speed * 0.4)
        };

        let error = wrap_pi(desired - opp.theta);
        self.opponent.omega = (error * OPPONENT_TURN_GAIN).clamp(-PI, PI);
        self.opponent.speed = if error.abs() > PI / 3.0 {
            speed * 0.2
        } else {
            speed
        };
    }
}

impl Hardware for ArenaSim {
    fn set_speed(&mut self, motor: Motor, speed: f64) -> Result<(), ActuatorFault> {
        if !speed.is_finite() {
            return Err(ActuatorFault::new(motor, format!("non-finite speed {speed}")));
        }
        self.motor(motor)?.commanded = speed.clamp(-MAX_MOTOR_SPEED, MAX_MOTOR_SPEED);
        Ok(())
    }

    fn start(&mut self, motor: Motor) -> Result<(), ActuatorFault> {
        self.motor(motor)?.running = true;
        Ok(())
    }

    fn stop(&mut self, motor: Motor) -> Result<(), ActuatorFault> {
        self.motor(motor)?.running = false;
        Ok(())
    }

    fn speed(&mut self, motor: Motor) -> Result<f64, ActuatorFault> {
        let load = self.load;
        Ok(self.motor(motor)?.actual * load)
    }

    fn set_stop_action(&mut self, motor: Motor, action: StopAction) -> Result<(), ActuatorFault> {
        self.motor(motor)?.stop_action = action;
        Ok(())
    }

    fn distance_cm(&mut self) -> f64 {
        if self.glitch() {
            return -1.0;
        }
        let (fx, fy) = self.robot.forward();
        let eye = (
            self.robot.x + fx * ROBOT_RADIUS_CM,
            self.robot.y + fy * ROBOT_RADIUS_CM,
        );
        let dx = self.opponent.pose.x - eye.0;
        let dy = self.opponent.pose.y - eye.1;
        let center_dist = dx.hypot(dy);
        let off_axis = wrap_pi(dy.atan2(dx) - self.robot.theta).abs().to_degrees();
        let surface = (center_dist - ROBOT_RADIUS_CM).max(0.0);
        if (off_axis <= EYES_HALF_ANGLE_DEG || center_dist <= ROBOT_RADIUS_CM) && surface < NO_ECHO_CM {
            surface
        } else {
            NO_ECHO_CM
        }
    }

    fn heading_deg(&mut self) -> f64 {
        if self.glitch() {
            return f64::NAN;
        }
        self.gyro_deg - self.gyro_zero
    }

    fn rate_dps(&mut self) -> f64 {
        if self.glitch() {
            return f64::INFINITY;
        }
        self.gyro_rate_dps
    }

    fn reset_heading(&mut self) {
        self.gyro_zero = self.gyro_deg;
    }

    fn floor_color(&mut self) -> Result<FloorColor, SensorFault> {
        if self.glitch() {
            return Err(SensorFault::UnrecognizedColor(3));
        }
        let (fx, fy) = self.robot.forward();
        let x = self.robot.x + fx * COLOR_SENSOR_OFFSET_CM;
        let y = self.robot.y + fy * COLOR_SENSOR_OFFSET_CM;
        Ok(floor_at_radius(x.hypot(y)))
    }

    fn wait_for_start(&mut self) {}

    fn sleep_ms(&mut self, ms: u64) {
        let mut remaining = ms;
        while remaining > 0 {
            let dt = remaining.min(PHYSICS_STEP_MS);
            self.step(dt);
            remaining -= dt;
        }
    }

    fn now_ms(&self) -> u64 {
        self.now_ms
    }

    fn stop_requested(&self) -> bool {
        self.eliminated.is_some()
    }
}
