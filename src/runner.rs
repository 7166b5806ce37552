use crate::config::ControllerConfig;
use crate::controller::{Controller, MatchStats, TickReport};
use crate::error::ControlError;
use crate::hardware::{stop_all, Hardware};
use crate::sim::{ArenaSim, Side, SimOptions, SimSnapshot};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{error, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    TimeUp,
    StopSignal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopSummary {
    pub ticks: u64,
    pub elapsed_ms: u64,
    pub stop: StopReason,
}

/// Fixed-cadence control loop. Waits for the go-signal, then ticks every
/// `tick_ms` until the match duration elapses or the hardware reports an
/// external stop. An actuator fault ends the match: both motors get a
/// best-effort stop and the fault is returned.
pub fn drive<H, F>(hw: &mut H, ctl: &mut Controller, mut on_tick: F) -> Result<LoopSummary, ControlError>
where
    H: Hardware + ?Sized,
    F: FnMut(&TickReport, &H),
{
    let tick_ms = ctl.cfg().tick_ms;
    let duration = ctl.cfg().match_duration_ms;

    ctl.prepare(hw)?;
    hw.wait_for_start();
    hw.reset_heading();
    let start = hw.now_ms();
    info!(preset = %ctl.cfg().id, tick_ms, ?duration, "match started");

    let stop = loop {
        if hw.stop_requested() {
            break StopReason::StopSignal;
        }
        let elapsed = hw.now_ms().saturating_sub(start);
        if duration.is_some_and(|limit| elapsed >= limit) {
            break StopReason::TimeUp;
        }

        let tick_start = hw.now_ms();
        match ctl.tick(hw) {
            Ok(report) => on_tick(&report, &*hw),
            Err(err) => {
                if let Err(stop_err) = stop_all(hw) {
                    error!(%stop_err, "emergency stop failed");
                }
                error!(%err, tick = ctl.state().tick, "match aborted");
                return Err(err);
            }
        }
        let spent = hw.now_ms().saturating_sub(tick_start);
        hw.sleep_ms(tick_ms.saturating_sub(spent));
    };

    stop_all(hw).map_err(ControlError::from)?;
    let summary = LoopSummary {
        ticks: ctl.stats().ticks,
        elapsed_ms: hw.now_ms().saturating_sub(start),
        stop,
    };
    info!(
        ticks = summary.ticks,
        elapsed_ms = summary.elapsed_ms,
        ?stop,
        "match finished"
    );
    Ok(summary)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOutcome {
    Won,
    Lost,
    TimeUp,
    Stopped,
}

impl MatchOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Won => "won",
            Self::Lost => "lost",
            Self::TimeUp => "time_up",
            Self::Stopped => "stopped",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunMetrics {
    pub preset: String,
    pub seed: u32,
    pub outcome: MatchOutcome,
    pub ticks: u64,
    pub elapsed_ms: u64,
    pub opponent_strength: f64,
    pub stats: MatchStats,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TraceEntry {
    pub tick: TickReport,
    pub world: SimSnapshot,
}

#[derive(Clone, Debug)]
pub struct RunArtifact {
    pub metrics: RunMetrics,
    pub trace: Vec<TraceEntry>,
}

/// Plays one simulated match of `cfg` against the seeded arena.
pub fn run_simulated(cfg: &ControllerConfig, opts: &SimOptions, record_trace: bool) -> Result<RunArtifact> {
    let mut ctl = Controller::new(cfg.clone())
        .with_context(|| format!("invalid config {}", cfg.id))?;
    let mut sim = ArenaSim::new(opts.clone());
    let mut trace = Vec::new();

    let summary = drive(&mut sim, &mut ctl, |report, sim: &ArenaSim| {
        if record_trace {
            trace.push(TraceEntry {
                tick: *report,
                world: sim.snapshot(),
            });
        }
    })
    .with_context(|| format!("match {} seed {} aborted", cfg.id, opts.seed))?;

    let outcome = match (sim.eliminated(), summary.stop) {
        (Some(Side::Opponent), _) => MatchOutcome::Won,
        (Some(Side::Robot), _) => MatchOutcome::Lost,
        (None, StopReason::TimeUp) => MatchOutcome::TimeUp,
        (None, StopReason::StopSignal) => MatchOutcome::Stopped,
    };

    Ok(RunArtifact {
        metrics: RunMetrics {
            preset: cfg.id.clone(),
            seed: opts.seed,
            outcome,
            ticks: summary.ticks,
            elapsed_ms: summary.elapsed_ms,
            opponent_strength: sim.opponent_strength(),
            stats: ctl.stats().clone(),
        },
        trace,
    })
}

pub fn write_trace(path: &Path, trace: &[TraceEntry]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_vec_pretty(trace)?)
        .with_context(|| format!("failed writing trace {}", path.display()))?;
    Ok(())
}
