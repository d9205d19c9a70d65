use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use wingman::planners::rl::{Algorithm, EnvConfig, TrainConfig, Trainer, write_initial_policy};

/// Hidden layer sizes for freshly initialized policies
const INIT_HIDDEN: [usize; 2] = [64, 64];

/// Collect rollouts and evaluate fighter controllers in a headless arena
#[derive(Parser, Debug)]
#[command(name = "wingman", version)]
struct Args {
    /// Action source for rollouts
    #[arg(long, value_enum, default_value_t = Algorithm::Fallback, env = "WINGMAN_ALGORITHM")]
    algorithm: Algorithm,

    /// Total transitions to collect
    #[arg(long, default_value_t = 100_000, env = "WINGMAN_TIMESTEPS")]
    timesteps: usize,

    /// Parallel environments
    #[arg(long, default_value_t = 8, env = "WINGMAN_ENVS")]
    envs: usize,

    #[arg(long, default_value_t = 0, env = "WINGMAN_SEED")]
    seed: u64,

    /// Step limit per episode
    #[arg(long, default_value_t = 5000, env = "WINGMAN_MAX_STEPS")]
    max_steps: usize,

    /// Policy artifact used by `--algorithm policy`
    #[arg(long, value_name = "PATH", env = "WINGMAN_MODEL")]
    model: Option<PathBuf>,

    /// Run full evaluation episodes instead of collecting rollouts
    #[arg(long)]
    eval: bool,

    /// Run one short smoke episode
    #[arg(long)]
    test: bool,

    /// Episodes for `--eval`
    #[arg(long, default_value_t = 10, env = "WINGMAN_EPISODES")]
    episodes: usize,

    /// Write a freshly initialized policy artifact and exit
    #[arg(long, value_name = "PATH")]
    init_policy: Option<PathBuf>,

    /// Write the evaluation summary as JSON
    #[arg(long, value_name = "PATH")]
    summary: Option<PathBuf>,
}

fn init_logging() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("wingman=debug,info"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber failed")
}

fn main() -> Result<()> {
    dotenv().ok();
    let args = Args::parse();
    init_logging()?;

    let env_config = EnvConfig {
        max_steps: args.max_steps,
        seed: args.seed,
        ..EnvConfig::default()
    };

    if let Some(path) = &args.init_policy {
        write_initial_policy(&env_config, path, &INIT_HIDDEN, args.seed)
            .with_context(|| format!("writing initial policy to {}", path.display()))?;
        return Ok(());
    }

    let config = TrainConfig {
        algorithm: args.algorithm,
        total_timesteps: args.timesteps,
        num_envs: args.envs,
        model_path: args.model.clone(),
        env_config,
        ..TrainConfig::default()
    };
    tracing::info!("Algorithm: {:?}, seed: {}", config.algorithm, args.seed);

    let mut trainer = Trainer::new(config).context("cannot set up rollouts")?;

    if args.test {
        let episode = trainer.smoke_test();
        anyhow::ensure!(!episode.is_empty(), "smoke episode produced no transitions");
    } else if args.eval {
        let metrics = trainer.evaluate(args.episodes);
        if let Some(path) = &args.summary {
            let json = serde_json::to_string_pretty(&metrics)?;
            fs::write(path, json)
                .with_context(|| format!("writing evaluation summary to {}", path.display()))?;
            tracing::info!("Wrote evaluation summary to {}", path.display());
        }
    } else {
        trainer.collect();
    }

    Ok(())
}
