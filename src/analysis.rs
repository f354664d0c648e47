//! The structured view over one engine search: [`Eval`], [`Wdl`], [`PvOutput`] and [`Analysis`].

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// A bound flag as reported by the `score ... lowerbound|upperbound` UCI token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bound {
    Exact,
    Lower,
    Upper,
}

/// Evaluation of a position: either a centipawn score, a forced mate, or invalid (no score seen
/// yet).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Eval {
    Centipawn(i32),
    Mate(i32),
    Invalid,
}

impl Eval {
    pub fn is_valid(self) -> bool {
        !matches!(self, Eval::Invalid)
    }
}

/// Ordering mirrors the usual engine-score convention: a positive mate beats any centipawn
/// value, a negative mate loses to any centipawn value, and between two mates of the same sign
/// the shorter one is better. `Invalid` sorts below everything else.
impl Ord for Eval {
    fn cmp(&self, other: &Self) -> Ordering {
        use Eval::*;

        match (self, other) {
            (Invalid, Invalid) => Ordering::Equal,
            (Invalid, _) => Ordering::Less,
            (_, Invalid) => Ordering::Greater,
            (Centipawn(a), Centipawn(b)) => a.cmp(b),
            (Mate(a), Centipawn(_)) if *a >= 0 => Ordering::Greater,
            (Centipawn(_), Mate(b)) if *b >= 0 => Ordering::Less,
            (Mate(_), Centipawn(_)) => Ordering::Less,
            (Centipawn(_), Mate(_)) => Ordering::Greater,
            (Mate(a), Mate(b)) if *a >= 0 && *b >= 0 => b.cmp(a),
            (Mate(a), Mate(b)) if *a < 0 && *b < 0 => a.cmp(b),
            (Mate(a), Mate(b)) if *a >= 0 && *b < 0 => Ordering::Greater,
            (Mate(_), Mate(_)) => Ordering::Less,
        }
    }
}

impl PartialOrd for Eval {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for Eval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Eval::Centipawn(cp) => {
                let sign = if *cp < 0 { "-" } else { "" };
                write!(f, "{sign}{}.{:02}", (cp.abs()) / 100, (cp.abs()) % 100)
            }
            Eval::Mate(m) => write!(f, "#{m}"),
            Eval::Invalid => write!(f, "invalid"),
        }
    }
}

/// Win/draw/loss permille triple, from the side-to-move's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wdl {
    pub win: u32,
    pub draw: u32,
    pub loss: u32,
}

/// A single MultiPV line, as last updated by the engine during one search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PvOutput {
    pub multipv: u32,
    pub eval: Eval,
    pub wdl: Option<Wdl>,
    pub depth: u32,
    pub seldepth: u32,
    pub nodes: u64,
    pub nps: u64,
    pub time_ms: u64,
    pub hashfull_permille: u32,
    pub tbhits: u64,
    pub bound: Bound,
    pub pv_moves: Vec<String>,
}

impl PvOutput {
    pub fn best_move(&self) -> Option<&str> {
        self.pv_moves.first().map(String::as_str)
    }
}

/// The full result of one `go` ... `bestmove` search, keyed by MultiPV index.
///
/// Insertion order into the underlying map does not matter: multipv indices are the identity,
/// and a later `info` line for the same index always replaces the earlier one ("latest wins").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Analysis {
    lines: BTreeMap<u32, PvOutput>,
    /// Raw UCI lines observed during the search, `info ...` lines followed by the final
    /// `bestmove ...` line, kept verbatim so output records can round-trip faithfully.
    raw_lines: Vec<String>,
}

impl Analysis {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn pv(&self, multipv: u32) -> Option<&PvOutput> {
        self.lines.get(&multipv)
    }

    pub fn best_move(&self) -> Option<&str> {
        self.pv(1).and_then(PvOutput::best_move)
    }

    pub fn raw_lines(&self) -> &[String] {
        &self.raw_lines
    }

    /// Records an `info` line's parsed PV output, overwriting any earlier entry for the same
    /// MultiPV index.
    pub fn record_pv(&mut self, pv: PvOutput, raw_line: String) {
        self.lines.insert(pv.multipv, pv);
        self.raw_lines.push(raw_line);
    }

    pub fn record_raw(&mut self, raw_line: String) {
        self.raw_lines.push(raw_line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pv(eval: Eval) -> PvOutput {
        PvOutput {
            multipv: 1,
            eval,
            wdl: None,
            depth: 10,
            seldepth: 10,
            nodes: 1,
            nps: 1,
            time_ms: 1,
            hashfull_permille: 0,
            tbhits: 0,
            bound: Bound::Exact,
            pv_moves: vec!["e2e4".into()],
        }
    }

    #[test]
    fn positive_mate_beats_any_centipawn() {
        assert!(Eval::Mate(5) > Eval::Centipawn(i32::MAX));
    }

    #[test]
    fn negative_mate_loses_to_any_centipawn() {
        assert!(Eval::Mate(-5) < Eval::Centipawn(i32::MIN));
    }

    #[test]
    fn shorter_mate_wins_same_sign() {
        assert!(Eval::Mate(1) > Eval::Mate(3));
        assert!(Eval::Mate(-3) > Eval::Mate(-1));
    }

    #[test]
    fn latest_pv_for_multipv_replaces_earlier() {
        let mut analysis = Analysis::default();
        analysis.record_pv(pv(Eval::Centipawn(10)), "info ...".into());
        analysis.record_pv(pv(Eval::Centipawn(25)), "info ...".into());
        assert_eq!(analysis.pv(1).unwrap().eval, Eval::Centipawn(25));
        assert_eq!(analysis.raw_lines().len(), 2);
    }

    #[test]
    fn best_move_is_first_pv_move() {
        let mut analysis = Analysis::default();
        analysis.record_pv(pv(Eval::Centipawn(10)), "info ...".into());
        assert_eq!(analysis.best_move(), Some("e2e4"));
    }
}
