use std::sync::Arc;

use structopt::StructOpt;
use tracing::{debug, error, info};
use tracing_error::ErrorLayer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

mod analysis;
mod cli;
mod config;
mod error;
mod filter;
mod mining;
mod output;
mod pool;
mod position;
mod protocol_config;
mod record;
mod seeds;
mod uci;

use cli::{InputSource, Opt};
use config::Config;
use error::{MiningError, Result};
use filter::Filter;
use mining::MiningStats;
use output::OutputPaths;
use pool::EnginePool;
use record::MiningConfig;

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .with(ErrorLayer::default())
        .init();

    let opt = Opt::from_args();
    debug!(?opt, "puzzlecrate started");

    match try_main(opt) {
        Ok(stats) => {
            info!(?stats, "mining run complete");
            Ok(())
        }
        Err(err) => {
            error!(%err, "mining run failed");
            let code = match err {
                MiningError::ConfigInvalid(_) | MiningError::SeedLoad(_) | MiningError::DslParse(_) => 2,
                _ => 1,
            };
            std::process::exit(code);
        }
    }
}

fn try_main(opt: Opt) -> Result<MiningStats> {
    let input_source = opt.input_source()?;

    let config_text = std::fs::read_to_string(&opt.config).map_err(|err| {
        MiningError::ConfigInvalid(format!("reading '{}': {err}", opt.config.display()))
    })?;
    let config = Config::from_toml_str(&config_text)?;

    let chess960 = opt.chess960 || config.chess960;
    let infinite = opt.random_infinite || config.random_infinite;
    let nodes_cap = opt.max_nodes.unwrap_or(config.max_nodes);
    let duration_cap_ms = opt.max_duration.unwrap_or(config.max_duration_ms);
    let engine_instances = opt.engine_instances.unwrap_or(config.engine_instances);
    let max_waves = opt.max_waves.unwrap_or(config.max_waves);
    let max_frontier = opt.max_frontier.unwrap_or(config.max_frontier);
    let max_total = opt.max_total.unwrap_or(config.max_total);
    let random_seeds = opt.random_count.unwrap_or(config.random_count);

    let accelerate = Filter::parse(opt.puzzle_accelerate.as_deref().unwrap_or(&config.puzzle_accelerate))?;
    let quality = Filter::parse(opt.puzzle_quality.as_deref().unwrap_or(&config.puzzle_quality))?;
    let winning = Filter::parse(opt.puzzle_winning.as_deref().unwrap_or(&config.puzzle_winning))?;
    let drawing = Filter::parse(opt.puzzle_drawing.as_deref().unwrap_or(&config.puzzle_drawing))?;
    let verify = Filter::verify(&quality, &winning, &drawing);

    let created_ms = chrono::Utc::now().timestamp_millis();
    let outputs = OutputPaths::derive(&opt.output, chess960, created_ms);

    let mining_config = MiningConfig::new(
        accelerate,
        verify,
        outputs,
        nodes_cap,
        duration_cap_ms,
        chess960,
        infinite,
        random_seeds,
        max_frontier,
        max_waves,
        max_total,
    );

    let initial_records = match input_source {
        InputSource::Seeds(path) => seeds::load_fen_list(&path, chess960, created_ms)?,
        InputSource::Pgn(path) => seeds::load_pgn(&path, chess960, created_ms)?,
        InputSource::Random(count) => seeds::random(count, chess960, created_ms),
    };

    let protocol = Arc::new(config.engine);
    let pool = EnginePool::create(engine_instances as usize, protocol, chess960)?;

    mining::run(&pool, initial_records, &mining_config)
}
