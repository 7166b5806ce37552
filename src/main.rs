use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use sumo_autopilot::benchmark::{resolve_presets, run_benchmark, BenchmarkConfig, Objective};
use sumo_autopilot::config::{preset_names, ControllerConfig};
use sumo_autopilot::runner::{run_simulated, write_trace};
use sumo_autopilot::sim::SimOptions;
use sumo_autopilot::util::{parse_seed, parse_seed_csv, parse_seed_file, seed_range, seed_to_hex};

#[derive(Parser, Debug)]
#[command(name = "sumo-autopilot")]
#[command(about = "Layered stance controller for an autonomous sumo robot, with a seeded arena simulator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List built-in controller presets
    ListPresets,
    /// Print a resolved controller config as JSON
    ShowConfig {
        #[arg(long, default_value = "balanced")]
        preset: String,
        /// JSON config file; overrides --preset
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Play one simulated match
    Run {
        #[arg(long, default_value = "balanced")]
        preset: String,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, default_value = "0x00000001")]
        seed: String,
        /// Match length override; 0 runs until a robot leaves the ring
        #[arg(long)]
        duration_ms: Option<u64>,
        /// Probability of an implausible reading per sensor read
        #[arg(long, default_value_t = 0.0)]
        glitch_rate: f64,
        /// Write the per-tick trace as JSON
        #[arg(long)]
        trace: Option<PathBuf>,
    },
    /// Run presets x seeds in parallel and rank the presets
    Bench {
        #[arg(long)]
        presets: Option<String>,
        #[arg(long)]
        seeds: Option<String>,
        #[arg(long)]
        seed_file: Option<PathBuf>,
        #[arg(long)]
        seed_start: Option<String>,
        #[arg(long, default_value_t = 16)]
        seed_count: u32,
        #[arg(long)]
        duration_ms: Option<u64>,
        #[arg(long, default_value_t = 0.0)]
        glitch_rate: f64,
        #[arg(long, value_enum, default_value_t = CliObjective::Wins)]
        objective: CliObjective,
        #[arg(long, default_value = "bench-out")]
        out_dir: PathBuf,
        #[arg(long, default_value_t = 3)]
        save_top: usize,
        #[arg(long)]
        jobs: Option<usize>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliObjective {
    Wins,
    Survival,
    Aggression,
}

impl From<CliObjective> for Objective {
    fn from(value: CliObjective) -> Self {
        match value {
            CliObjective::Wins => Objective::Wins,
            CliObjective::Survival => Objective::Survival,
            CliObjective::Aggression => Objective::Aggression,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Commands::ListPresets => {
            for name in preset_names() {
                if let Some(cfg) = ControllerConfig::preset(name) {
                    println!("{name:12} {}", cfg.description);
                }
            }
        }
        Commands::ShowConfig { preset, config } => {
            let cfg = load_config(&preset, config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&cfg)?);
        }
        Commands::Run {
            preset,
            config,
            seed,
            duration_ms,
            glitch_rate,
            trace,
        } => {
            let mut cfg = load_config(&preset, config.as_deref())?;
            apply_duration(&mut cfg, duration_ms);
            let seed = parse_seed(&seed)?;
            let opts = SimOptions {
                sensor_glitch_rate: glitch_rate,
                ..SimOptions::seeded(seed)
            };
            let artifact = run_simulated(&cfg, &opts, trace.is_some())?;
            let metrics = &artifact.metrics;
            let stats = &metrics.stats;

            println!("preset={}", metrics.preset);
            println!("seed={}", seed_to_hex(seed));
            println!("outcome={}", metrics.outcome.as_str());
            println!("elapsed_ms={}", metrics.elapsed_ms);
            println!("ticks={}", metrics.ticks);
            println!("opponent_strength={:.3}", metrics.opponent_strength);
            println!("engagements={}", stats.engagements);
            println!("escapes={}", stats.escapes);
            println!("retreats={}", stats.retreats);
            println!("stall_events={}", stats.stall_events);
            println!(
                "confidence={} (min {}, max {})",
                stats.final_confidence, stats.confidence_min, stats.confidence_max
            );
            println!("sensor_faults={}", stats.sensor_faults);
            println!("timing_overruns={}", stats.timing_overruns);
            if let Some(path) = trace {
                write_trace(&path, &artifact.trace)?;
                println!("trace={}", path.display());
            }
        }
        Commands::Bench {
            presets,
            seeds,
            seed_file,
            seed_start,
            seed_count,
            duration_ms,
            glitch_rate,
            objective,
            out_dir,
            save_top,
            jobs,
        } => {
            let mut configs = resolve_presets(presets.as_deref())?;
            for cfg in &mut configs {
                apply_duration(cfg, duration_ms);
            }
            let seeds = resolve_seeds(seeds.as_deref(), seed_file.as_deref(), seed_start.as_deref(), seed_count)?;
            let report = run_benchmark(BenchmarkConfig {
                configs,
                seeds,
                sim: SimOptions {
                    sensor_glitch_rate: glitch_rate,
                    ..SimOptions::default()
                },
                objective: objective.into(),
                out_dir: out_dir.clone(),
                save_top,
                jobs,
            })?;

            println!("runs={}", report.run_count);
            println!("objective={}", report.objective.as_str());
            for (idx, row) in report.preset_rankings.iter().enumerate() {
                println!(
                    "rank={} preset={} win_rate={:.3} loss_rate={:.3} objective={:.3}",
                    idx + 1,
                    row.preset,
                    row.win_rate,
                    row.loss_rate,
                    row.objective_value
                );
            }
            println!("out_dir={}", out_dir.display());
        }
    }

    Ok(())
}

fn load_config(preset: &str, path: Option<&Path>) -> Result<ControllerConfig> {
    if let Some(path) = path {
        return ControllerConfig::load(path);
    }
    ControllerConfig::preset(preset).ok_or_else(|| {
        anyhow!(
            "unknown preset '{preset}'. available: {}",
            preset_names().join(", ")
        )
    })
}

fn apply_duration(cfg: &mut ControllerConfig, duration_ms: Option<u64>) {
    match duration_ms {
        Some(0) => cfg.match_duration_ms = None,
        Some(ms) => cfg.match_duration_ms = Some(ms),
        None => {}
    }
}

fn resolve_seeds(
    csv: Option<&str>,
    file: Option<&Path>,
    start: Option<&str>,
    count: u32,
) -> Result<Vec<u32>> {
    if let Some(csv) = csv {
        return parse_seed_csv(csv);
    }
    if let Some(file) = file {
        return parse_seed_file(file);
    }
    let start = match start {
        Some(raw) => parse_seed(raw)?,
        None => 1,
    };
    if count == 0 {
        return Err(anyhow!("--seed-count must be >= 1"));
    }
    Ok(seed_range(start, count))
}
