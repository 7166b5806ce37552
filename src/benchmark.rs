use crate::config::{preset_names, ControllerConfig};
use crate::runner::{run_simulated, write_trace, MatchOutcome, RunMetrics};
use crate::sim::SimOptions;
use crate::util::seed_to_hex;
use anyhow::{anyhow, Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    Wins,
    Survival,
    Aggression,
}

impl Objective {
    pub fn run_value(self, metrics: &RunMetrics, match_duration_ms: Option<u64>) -> f64 {
        let won = f64::from(u8::from(metrics.outcome == MatchOutcome::Won));
        let survived = f64::from(u8::from(metrics.outcome != MatchOutcome::Lost));
        // Earlier wins score higher; without a time limit every win is equal.
        let speed_bonus = match match_duration_ms {
            Some(limit) if limit > 0 && won > 0.0 => {
                1.0 - (metrics.elapsed_ms as f64 / limit as f64).min(1.0)
            }
            _ => 0.0,
        };
        let ticks = metrics.stats.ticks.max(1) as f64;
        let engaged_share = metrics.stats.engaged_ticks as f64 / ticks;
        match self {
            Self::Wins => won * 100.0 + speed_bonus * 50.0 + survived * 20.0,
            Self::Survival => {
                survived * 100.0 + won * 30.0 - metrics.stats.escapes as f64 * 0.5
            }
            Self::Aggression => {
                engaged_share * 100.0 + won * 50.0 + metrics.stats.engagements as f64 * 0.5
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Wins => "wins",
            Self::Survival => "survival",
            Self::Aggression => "aggression",
        }
    }
}

#[derive(Clone, Debug)]
pub struct BenchmarkConfig {
    pub configs: Vec<ControllerConfig>,
    pub seeds: Vec<u32>,
    /// Template for every match; the seed is replaced per run.
    pub sim: SimOptions,
    pub objective: Objective,
    pub out_dir: PathBuf,
    pub save_top: usize,
    pub jobs: Option<usize>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunRecord {
    pub preset: String,
    pub seed: u32,
    pub seed_hex: String,
    pub outcome: MatchOutcome,
    pub elapsed_ms: u64,
    pub ticks: u64,
    pub opponent_strength: f64,
    pub engagements: u64,
    pub escapes: u64,
    pub retreats: u64,
    pub stall_events: u64,
    pub final_confidence: i32,
    pub sensor_faults: u64,
    pub timing_overruns: u64,
    pub objective_value: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PresetAggregate {
    pub preset: String,
    pub runs: usize,
    pub wins: usize,
    pub losses: usize,
    pub time_ups: usize,
    pub win_rate: f64,
    pub loss_rate: f64,
    pub avg_win_ms: f64,
    pub avg_engagements: f64,
    pub avg_escapes: f64,
    pub avg_retreats: f64,
    pub avg_final_confidence: f64,
    pub objective_value: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SavedTraceRecord {
    pub rank: usize,
    pub preset: String,
    pub seed: u32,
    pub seed_hex: String,
    pub outcome: MatchOutcome,
    pub objective_value: f64,
    pub path: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub generated_unix_s: u64,
    pub objective: Objective,
    pub jobs: Option<usize>,
    pub presets: Vec<String>,
    pub seeds: Vec<u32>,
    pub run_count: usize,
    pub preset_rankings: Vec<PresetAggregate>,
    pub runs: Vec<RunRecord>,
    pub saved_traces: Vec<SavedTraceRecord>,
}

/// Comma-separated preset names, or every preset when unset.
pub fn resolve_presets(input: Option<&str>) -> Result<Vec<ControllerConfig>> {
    let names: Vec<&str> = match input {
        None => preset_names().to_vec(),
        Some(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .collect(),
    };
    if names.is_empty() {
        return Err(anyhow!("--presets resolved to empty list"));
    }
    names
        .into_iter()
        .map(|name| {
            ControllerConfig::preset(name).ok_or_else(|| {
                anyhow!(
                    "unknown preset '{name}', expected one of: {}",
                    preset_names().join(", ")
                )
            })
        })
        .collect()
}

pub fn run_benchmark(config: BenchmarkConfig) -> Result<BenchmarkReport> {
    if config.seeds.is_empty() {
        return Err(anyhow!("benchmark requires at least one seed"));
    }
    if config.configs.is_empty() {
        return Err(anyhow!("benchmark requires at least one preset"));
    }
    if config.jobs == Some(0) {
        return Err(anyhow!("benchmark --jobs must be >= 1 when provided"));
    }
    fs::create_dir_all(&config.out_dir)
        .with_context(|| format!("failed creating {}", config.out_dir.display()))?;

    let run_jobs: Vec<(&ControllerConfig, u32)> = config
        .configs
        .iter()
        .flat_map(|cfg| config.seeds.iter().map(move |seed| (cfg, *seed)))
        .collect();

    let run_one = |(cfg, seed): &(&ControllerConfig, u32)| -> Result<RunRecord> {
        let opts = SimOptions {
            seed: *seed,
            ..config.sim.clone()
        };
        let artifact = run_simulated(cfg, &opts, false)
            .with_context(|| format!("benchmark run failed for preset={} seed={seed:#x}", cfg.id))?;
        let objective_value = config
            .objective
            .run_value(&artifact.metrics, cfg.match_duration_ms);
        Ok(record(&artifact.metrics, objective_value))
    };

    let run_results: Vec<Result<RunRecord>> = if let Some(jobs) = config.jobs {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build()
            .context("failed to build rayon threadpool")?;
        pool.install(|| run_jobs.par_iter().map(run_one).collect())
    } else {
        run_jobs.par_iter().map(run_one).collect()
    };
    let mut runs = run_results.into_iter().collect::<Result<Vec<_>>>()?;

    let rankings = aggregate(&runs);

    runs.sort_by(|a, b| {
        b.objective_value
            .total_cmp(&a.objective_value)
            .then_with(|| a.elapsed_ms.cmp(&b.elapsed_ms))
            .then_with(|| a.preset.cmp(&b.preset))
            .then_with(|| a.seed.cmp(&b.seed))
    });

    let saved_traces = if config.save_top > 0 {
        save_top_traces(&config, &runs)?
    } else {
        Vec::new()
    };

    write_runs_csv(&config.out_dir.join("runs.csv"), &runs)?;
    write_rankings_csv(&config.out_dir.join("rankings.csv"), &rankings)?;

    let report = BenchmarkReport {
        generated_unix_s: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs(),
        objective: config.objective,
        jobs: config.jobs,
        presets: config.configs.iter().map(|cfg| cfg.id.clone()).collect(),
        seeds: config.seeds.clone(),
        run_count: runs.len(),
        preset_rankings: rankings,
        runs,
        saved_traces,
    };

    let report_path = config.out_dir.join("summary.json");
    fs::write(
        &report_path,
        serde_json::to_vec_pretty(&report).context("failed to serialize summary json")?,
    )
    .with_context(|| format!("failed writing {}", report_path.display()))?;
    info!(
        runs = report.run_count,
        out = %config.out_dir.display(),
        "benchmark complete"
    );

    Ok(report)
}

fn record(metrics: &RunMetrics, objective_value: f64) -> RunRecord {
    RunRecord {
        preset: metrics.preset.clone(),
        seed: metrics.seed,
        seed_hex: seed_to_hex(metrics.seed),
        outcome: metrics.outcome,
        elapsed_ms: metrics.elapsed_ms,
        ticks: metrics.ticks,
        opponent_strength: metrics.opponent_strength,
        engagements: metrics.stats.engagements,
        escapes: metrics.stats.escapes,
        retreats: metrics.stats.retreats,
        stall_events: metrics.stats.stall_events,
        final_confidence: metrics.stats.final_confidence,
        sensor_faults: metrics.stats.sensor_faults,
        timing_overruns: metrics.stats.timing_overruns,
        objective_value,
    }
}

fn aggregate(runs: &[RunRecord]) -> Vec<PresetAggregate> {
    let mut grouped: HashMap<&str, Vec<&RunRecord>> = HashMap::new();
    for run in runs {
        grouped.entry(run.preset.as_str()).or_default().push(run);
    }

    let mut rankings: Vec<PresetAggregate> = grouped
        .into_iter()
        .map(|(preset, preset_runs)| {
            let n = preset_runs.len() as f64;
            let count = |outcome| preset_runs.iter().filter(|r| r.outcome == outcome).count();
            let wins = count(MatchOutcome::Won);
            let losses = count(MatchOutcome::Lost);
            let time_ups = count(MatchOutcome::TimeUp);
            let mean = |f: fn(&RunRecord) -> f64| preset_runs.iter().map(|r| f(r)).sum::<f64>() / n;
            let win_ms: u64 = preset_runs
                .iter()
                .filter(|r| r.outcome == MatchOutcome::Won)
                .map(|r| r.elapsed_ms)
                .sum();

            PresetAggregate {
                preset: preset.to_string(),
                runs: preset_runs.len(),
                wins,
                losses,
                time_ups,
                win_rate: wins as f64 / n,
                loss_rate: losses as f64 / n,
                avg_win_ms: if wins > 0 {
                    win_ms as f64 / wins as f64
                } else {
                    0.0
                },
                avg_engagements: mean(|r| r.engagements as f64),
                avg_escapes: mean(|r| r.escapes as f64),
                avg_retreats: mean(|r| r.retreats as f64),
                avg_final_confidence: mean(|r| f64::from(r.final_confidence)),
                objective_value: mean(|r| r.objective_value),
            }
        })
        .collect();

    rankings.sort_by(|a, b| {
        b.objective_value
            .total_cmp(&a.objective_value)
            .then_with(|| b.win_rate.total_cmp(&a.win_rate))
            .then_with(|| a.preset.cmp(&b.preset))
    });
    rankings
}

/// Matches are deterministic per seed, so the best runs are replayed with
/// the trace on instead of keeping every trace in memory.
fn save_top_traces(config: &BenchmarkConfig, ranked: &[RunRecord]) -> Result<Vec<SavedTraceRecord>> {
    let save_dir = config.out_dir.join("top-runs");
    fs::create_dir_all(&save_dir)
        .with_context(|| format!("failed creating {}", save_dir.display()))?;

    let mut saved = Vec::new();
    for (idx, run) in ranked.iter().take(config.save_top).enumerate() {
        let rank = idx + 1;
        let cfg = config
            .configs
            .iter()
            .find(|cfg| cfg.id == run.preset)
            .ok_or_else(|| anyhow!("no config for preset {}", run.preset))?;
        let opts = SimOptions {
            seed: run.seed,
            ..config.sim.clone()
        };
        let artifact = run_simulated(cfg, &opts, true)?;

        let base = format!(
            "rank{rank:02}-{}-seed{:08x}-{}",
            run.preset,
            run.seed,
            run.outcome.as_str()
        );
        let trace_path = save_dir.join(format!("{base}.trace.json"));
        write_trace(&trace_path, &artifact.trace)?;

        let meta_path = save_dir.join(format!("{base}.json"));
        fs::write(
            &meta_path,
            serde_json::to_vec_pretty(&artifact.metrics)
                .context("failed to serialize top run metadata")?,
        )
        .with_context(|| format!("failed writing {}", meta_path.display()))?;

        saved.push(SavedTraceRecord {
            rank,
            preset: run.preset.clone(),
            seed: run.seed,
            seed_hex: run.seed_hex.clone(),
            outcome: run.outcome,
            objective_value: run.objective_value,
            path: trace_path.to_string_lossy().into_owned(),
        });
    }
    Ok(saved)
}

fn write_runs_csv(path: &Path, rows: &[RunRecord]) -> Result<()> {
    let mut csv = String::from(
        "preset,seed_hex,seed,outcome,elapsed_ms,ticks,opponent_strength,engagements,escapes,retreats,stall_events,final_confidence,sensor_faults,timing_overruns,objective_value\n",
    );
    for row in rows {
        csv.push_str(&format!(
            "{},{},{},{},{},{},{:.3},{},{},{},{},{},{},{},{:.3}\n",
            row.preset,
            row.seed_hex,
            row.seed,
            row.outcome.as_str(),
            row.elapsed_ms,
            row.ticks,
            row.opponent_strength,
            row.engagements,
            row.escapes,
            row.retreats,
            row.stall_events,
            row.final_confidence,
            row.sensor_faults,
            row.timing_overruns,
            row.objective_value
        ));
    }
    fs::write(path, csv).with_context(|| format!("failed writing {}", path.display()))
}

fn write_rankings_csv(path: &Path, rows: &[PresetAggregate]) -> Result<()> {
    let mut csv = String::from(
        "rank,preset,runs,wins,losses,time_ups,win_rate,loss_rate,avg_win_ms,avg_engagements,avg_escapes,avg_retreats,avg_final_confidence,objective_value\n",
    );
    for (idx, row) in rows.iter().enumerate() {
        csv.push_str(&format!(
            "{},{},{},{},{},{},{:.4},{:.4},{:.1},{:.2},{:.2},{:.2},{:.2},{:.4}\n",
            idx + 1,
            row.preset,
            row.runs,
            row.wins,
            row.losses,
            row.time_ups,
            row.win_rate,
            row.loss_rate,
            row.avg_win_ms,
            row.avg_engagements,
            row.avg_escapes,
            row.avg_retreats,
            row.avg_final_confidence,
            row.objective_value
        ));
    }
    fs::write(path, csv).with_context(|| format!("failed writing {}", path.display()))
}
