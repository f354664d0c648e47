//! Line-oriented UCI wire protocol: commands sent to, and messages parsed from, an engine child
//! process.
//!
//! Generic over the stdin/stdout types so tests can substitute an in-memory pipe for a real
//! child process.

use std::fmt::Display;
use std::io::{BufRead, Write};

use tracing::{debug, warn};

use crate::analysis::{Bound, Eval, PvOutput, Wdl};
use crate::error::{MiningError, Result};

pub struct Protocol<W, R> {
    stdin: W,
    stdout: R,
}

impl<W: Write, R: BufRead> Protocol<W, R> {
    pub fn new(stdin: W, stdout: R) -> Self {
        Self { stdin, stdout }
    }

    pub fn send(&mut self, command: &Command) -> Result<()> {
        let line = command.to_string();
        debug!(uci = %line, "send");
        writeln!(self.stdin, "{line}").map_err(|err| {
            MiningError::WorkerBroken(format!("writing '{line}' to engine: {err}"))
        })?;
        self.stdin
            .flush()
            .map_err(|err| MiningError::WorkerBroken(format!("flushing engine stdin: {err}")))
    }

    /// Reads and parses the next meaningful line, skipping blank lines and lines that don't
    /// parse as a known message.
    pub fn recv(&mut self) -> Result<Msg> {
        loop {
            let line = self.recv_line()?;
            if let Some(msg) = Msg::parse(&line) {
                return Ok(msg);
            }
        }
    }

    /// Reads the next non-blank line verbatim, without attempting to parse it into a [`Msg`].
    /// Used for handshake tokens (`isready`/`readyok`) whose exact spelling is configurable per
    /// engine rather than fixed by the wire grammar.
    pub fn recv_line(&mut self) -> Result<String> {
        loop {
            let mut line = String::new();
            let bytes = self
                .stdout
                .read_line(&mut line)
                .map_err(|err| MiningError::WorkerBroken(format!("reading engine: {err}")))?;

            if bytes == 0 {
                return Err(MiningError::WorkerBroken("engine stdout closed".into()));
            }

            let line = line.trim().to_owned();
            if line.is_empty() {
                continue;
            }
            debug!(uci = %line, "recv");
            return Ok(line);
        }
    }
}

/// Command sent to the engine.
#[derive(Debug, Clone)]
pub enum Command {
    Uci,
    SetOption { name: String, value: String },
    NewGame,
    Position { fen: String },
    /// The `go` line, pre-rendered from the protocol descriptor's node/duration templates
    /// (see `EngineProtocolConfig::render_go`). Empty means `go infinite`.
    Go { suffix: String },
    Stop,
    Quit,
    /// A literal line taken verbatim from the protocol descriptor's `setup` array.
    Literal(String),
}

impl Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use Command::*;

        match self {
            Uci => write!(f, "uci"),
            SetOption { name, value } => write!(f, "setoption name {name} value {value}"),
            NewGame => write!(f, "ucinewgame"),
            Position { fen } => write!(f, "position fen {fen}"),
            Go { suffix } if suffix.is_empty() => write!(f, "go infinite"),
            Go { suffix } => write!(f, "go {suffix}"),
            Stop => write!(f, "stop"),
            Quit => write!(f, "quit"),
            Literal(line) => write!(f, "{line}"),
        }
    }
}

/// Message received from the engine.
#[derive(Debug, Clone)]
pub enum Msg {
    Id { name: Option<String> },
    UciOk,
    ReadyOk,
    BestMove(String),
    Info(RawInfo),
}

/// One parsed `info` line, prior to being folded into an [`Analysis`](crate::analysis::Analysis).
#[derive(Debug, Clone)]
pub struct RawInfo {
    pub pv: PvOutput,
}

impl Msg {
    fn parse_id(args: &str) -> Option<Self> {
        let name = args.split_once(" name ").map(|(_, name)| name.trim().to_owned());
        Some(Self::Id { name })
    }

    fn parse_bestmove(args: &str) -> Option<Self> {
        let args = args.trim();
        let mv = args.split_whitespace().next().unwrap_or(args);
        if mv.is_empty() {
            return None;
        }
        Some(Self::BestMove(mv.to_owned()))
    }

    fn parse(line: &str) -> Option<Self> {
        let idx = line.find(' ').unwrap_or(line.len());
        let cmd = &line[..idx];
        let args = line[idx..].trim_start();

        match cmd {
            "id" => Self::parse_id(args),
            "uciok" => Some(Self::UciOk),
            "readyok" => Some(Self::ReadyOk),
            "bestmove" => Self::parse_bestmove(args),
            "info" => match parse_info(args) {
                Ok(Some(pv)) => Some(Self::Info(RawInfo { pv })),
                Ok(None) => None,
                Err(err) => {
                    warn!(?err, line, "malformed info line");
                    None
                }
            },
            _ => None,
        }
    }
}

/// Parses the argument tokens of an `info` line into a [`PvOutput`].
///
/// Returns `Ok(None)` for pure debug-string info lines (`info string ...`) that carry no
/// analysis data, rather than an error, since those are routine.
fn parse_info(args: &str) -> Result<Option<PvOutput>> {
    let args = match args.split_once(" string ") {
        Some((before, msg)) => {
            debug!(info = msg, "engine info string");
            if before.trim().is_empty() {
                return Ok(None);
            }
            before
        }
        None => args,
    };

    let mut tokens = args.split_whitespace().peekable();

    let mut multipv = 1u32;
    let mut depth = 0u32;
    let mut seldepth = 0u32;
    let mut eval = None;
    let mut bound = Bound::Exact;
    let mut wdl = None;
    let mut nodes = 0u64;
    let mut nps = 0u64;
    let mut time_ms = 0u64;
    let mut hashfull_permille = 0u32;
    let mut tbhits = 0u64;
    let mut pv_moves = Vec::new();

    while let Some(token) = tokens.next() {
        match token {
            "multipv" => multipv = next_parsed(&mut tokens, "multipv")?,
            "depth" => depth = next_parsed(&mut tokens, "depth")?,
            "seldepth" => seldepth = next_parsed(&mut tokens, "seldepth")?,
            "nodes" => nodes = next_parsed(&mut tokens, "nodes")?,
            "nps" => nps = next_parsed(&mut tokens, "nps")?,
            "time" => time_ms = next_parsed(&mut tokens, "time")?,
            "hashfull" => hashfull_permille = next_parsed(&mut tokens, "hashfull")?,
            "tbhits" => tbhits = next_parsed(&mut tokens, "tbhits")?,
            "score" => {
                let kind = tokens
                    .next()
                    .ok_or_else(|| MiningError::WorkerBroken("missing score type".into()))?;
                let value: i32 = next_parsed(&mut tokens, "score value")?;
                eval = Some(match kind {
                    "cp" => Eval::Centipawn(value),
                    "mate" => Eval::Mate(value),
                    other => {
                        return Err(MiningError::WorkerBroken(format!(
                            "unknown score type '{other}'"
                        )))
                    }
                });

                bound = match tokens.peek().copied() {
                    Some("lowerbound") => {
                        tokens.next();
                        Bound::Lower
                    }
                    Some("upperbound") => {
                        tokens.next();
                        Bound::Upper
                    }
                    _ => Bound::Exact,
                };
            }
            "wdl" => {
                let win = next_parsed(&mut tokens, "wdl win")?;
                let draw = next_parsed(&mut tokens, "wdl draw")?;
                let loss = next_parsed(&mut tokens, "wdl loss")?;
                wdl = Some(Wdl { win, draw, loss });
            }
            "pv" => {
                pv_moves.clear();
                while let Some(mv) = tokens.peek() {
                    if is_uci_move(mv) {
                        pv_moves.push((*mv).to_owned());
                        tokens.next();
                    } else {
                        break;
                    }
                }
            }
            // Unknown keys (currentmove, currmovenumber, cpuload, refutation, currline, sbhits,
            // ...) are skipped per the protocol contract.
            _ => (),
        }
    }

    let Some(eval) = eval else {
        return Ok(None);
    };

    Ok(Some(PvOutput {
        multipv,
        eval,
        wdl,
        depth,
        seldepth,
        nodes,
        nps,
        time_ms,
        hashfull_permille,
        tbhits,
        bound,
        pv_moves,
    }))
}

fn next_parsed<T: std::str::FromStr>(
    tokens: &mut std::iter::Peekable<std::str::SplitWhitespace>,
    what: &str,
) -> Result<T> {
    tokens
        .next()
        .ok_or_else(|| MiningError::WorkerBroken(format!("missing {what}")))?
        .parse()
        .map_err(|_| MiningError::WorkerBroken(format!("invalid {what}")))
}

fn is_uci_move(token: &str) -> bool {
    let bytes = token.as_bytes();
    matches!(bytes.len(), 4 | 5)
        && bytes[0].is_ascii_lowercase()
        && bytes[1].is_ascii_digit()
        && bytes[2].is_ascii_lowercase()
        && bytes[3].is_ascii_digit()
}

/// Exposes whatever bytes have been written to an in-memory stdin, for tests that assert on the
/// exact sequence of commands a worker sent.
#[cfg(test)]
impl<W: AsRef<[u8]>, R> Protocol<W, R> {
    pub(crate) fn stdin_bytes(&self) -> &[u8] {
        self.stdin.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn protocol(input: &str) -> Protocol<Vec<u8>, Cursor<Vec<u8>>> {
        Protocol::new(Vec::new(), Cursor::new(input.as_bytes().to_vec()))
    }

    #[test]
    fn parses_bestmove() {
        let mut proto = protocol("bestmove e2e4 ponder e7e5\n");
        assert!(matches!(proto.recv().unwrap(), Msg::BestMove(m) if m == "e2e4"));
    }

    #[test]
    fn parses_cp_info_line() {
        let mut proto =
            protocol("info depth 10 seldepth 12 multipv 1 score cp 34 nodes 100 nps 1000 time 50 pv e2e4 e7e5\n");
        let Msg::Info(info) = proto.recv().unwrap() else {
            panic!("expected info");
        };
        assert_eq!(info.pv.eval, Eval::Centipawn(34));
        assert_eq!(info.pv.depth, 10);
        assert_eq!(info.pv.pv_moves, vec!["e2e4", "e7e5"]);
    }

    #[test]
    fn parses_mate_with_wdl_and_bound() {
        let mut proto =
            protocol("info depth 5 score mate 3 upperbound wdl 950 40 10 pv d1h5\n");
        let Msg::Info(info) = proto.recv().unwrap() else {
            panic!("expected info");
        };
        assert_eq!(info.pv.eval, Eval::Mate(3));
        assert_eq!(info.pv.bound, Bound::Upper);
        assert_eq!(
            info.pv.wdl,
            Some(Wdl {
                win: 950,
                draw: 40,
                loss: 10
            })
        );
    }

    #[test]
    fn skips_pure_debug_string_lines() {
        let mut proto = protocol("info string NNUE evaluation enabled\nbestmove e2e4\n");
        assert!(matches!(proto.recv().unwrap(), Msg::BestMove(_)));
    }

    #[test]
    fn go_command_renders_suffix() {
        let cmd = Command::Go {
            suffix: "nodes 1000 movetime 500".into(),
        };
        assert_eq!(cmd.to_string(), "go nodes 1000 movetime 500");
    }

    #[test]
    fn go_command_falls_back_to_infinite() {
        let cmd = Command::Go {
            suffix: String::new(),
        };
        assert_eq!(cmd.to_string(), "go infinite");
    }
}
