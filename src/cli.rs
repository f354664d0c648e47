//! The command-line front-end: flag parsing and its translation into a [`MiningConfig`] (§6.4).

use std::path::PathBuf;

use structopt::StructOpt;

use crate::error::{MiningError, Result};

#[derive(Debug, StructOpt)]
#[structopt(name = "puzzlecrate", about = "Mines chess puzzles from UCI engine analysis")]
pub struct Opt {
    /// Run configuration TOML: engine protocol descriptor plus caps and filter defaults.
    #[structopt(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Output root: a directory (generated filenames) or a `.json`/`.jsonl` file-like path.
    #[structopt(short, long, default_value = ".")]
    pub output: PathBuf,

    /// FEN-list seed file, one input source of three.
    #[structopt(long)]
    pub seeds: Option<PathBuf>,
    /// PGN seed file, one input source of three.
    #[structopt(long)]
    pub pgn: Option<PathBuf>,
    /// Generate this many random seed positions, one input source of three.
    #[structopt(long)]
    pub random: Option<u32>,

    #[structopt(long)]
    pub chess960: bool,
    /// Refill the frontier with random seeds forever instead of stopping when it empties.
    #[structopt(long)]
    pub random_infinite: bool,

    #[structopt(long)]
    pub max_nodes: Option<u32>,
    /// Milliseconds, or a suffixed duration such as `2s` / `500ms` / `1m`.
    #[structopt(long, parse(try_from_str = parse_duration_ms))]
    pub max_duration: Option<u32>,
    #[structopt(long)]
    pub engine_instances: Option<u32>,
    #[structopt(long)]
    pub max_waves: Option<u32>,
    #[structopt(long)]
    pub max_frontier: Option<u32>,
    #[structopt(long)]
    pub max_total: Option<u64>,
    #[structopt(long)]
    pub random_count: Option<u32>,

    #[structopt(long)]
    pub puzzle_accelerate: Option<String>,
    #[structopt(long)]
    pub puzzle_quality: Option<String>,
    #[structopt(long)]
    pub puzzle_winning: Option<String>,
    #[structopt(long)]
    pub puzzle_drawing: Option<String>,
}

/// Parses a `--max-duration` value as plain milliseconds or a `ms`/`s`/`m`-suffixed duration.
fn parse_duration_ms(raw: &str) -> std::result::Result<u32, String> {
    let trimmed = raw.trim();
    let split_at = trimmed.find(|c: char| !c.is_ascii_digit()).unwrap_or(trimmed.len());
    let (digits, suffix) = trimmed.split_at(split_at);

    if digits.is_empty() {
        return Err(format!("invalid duration '{raw}'"));
    }
    let value: u64 = digits.parse().map_err(|_| format!("invalid duration '{raw}'"))?;

    let ms = match suffix {
        "" | "ms" => value,
        "s" => value
            .checked_mul(1_000)
            .ok_or_else(|| format!("duration '{raw}' overflows"))?,
        "m" => value
            .checked_mul(60_000)
            .ok_or_else(|| format!("duration '{raw}' overflows"))?,
        other => return Err(format!("unknown duration suffix '{other}' in '{raw}'")),
    };

    u32::try_from(ms).map_err(|_| format!("duration '{raw}' exceeds the millisecond cap's range"))
}

/// The three input sources are mutually exclusive; exactly one must be given.
pub enum InputSource {
    Seeds(PathBuf),
    Pgn(PathBuf),
    Random(u32),
}

impl Opt {
    pub fn input_source(&self) -> Result<InputSource> {
        let given: Vec<InputSource> = [
            self.seeds.clone().map(InputSource::Seeds),
            self.pgn.clone().map(InputSource::Pgn),
            self.random.map(InputSource::Random),
        ]
        .into_iter()
        .flatten()
        .collect();

        match given.len() {
            1 => Ok(given.into_iter().next().unwrap()),
            0 => Err(MiningError::ConfigInvalid(
                "exactly one of --seeds, --pgn, or --random is required".into(),
            )),
            _ => Err(MiningError::ConfigInvalid(
                "--seeds, --pgn, and --random are mutually exclusive".into(),
            )),
        }
    }
}
