//! Seed ingestion (§6.3): random position generation, FEN-list files, and PGN traversal, all
//! producing plain [`Record`]s ready for the first wave.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use pgn_reader::{BufferedReader, SanPlus, Skip, Visitor};
use rand::Rng;
use shakmaty::Position as ShakmatyPosition;
use tracing::warn;

use crate::error::{MiningError, Result};
use crate::position::Position;
use crate::record::Record;

const STANDARD_STARTPOS_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Generates `count` random legal positions, rejecting any where the side to move is in check
/// (property 10). Chess960 positions are walked under Chess960 castling-rights rules from the
/// standard starting array; generating a genuine Fischer-Random starting array is not attempted.
pub fn random(count: u32, chess960: bool, created_ms: i64) -> Vec<Record> {
    let mut rng = rand::thread_rng();
    let mut records = Vec::with_capacity(count as usize);

    while records.len() < count as usize {
        let mut position = Position::from_fen(STANDARD_STARTPOS_FEN, chess960)
            .expect("standard starting FEN is always valid");

        let walk_len = rng.gen_range(0..=20u32);
        for _ in 0..walk_len {
            let successors = position.legal_successors();
            if successors.is_empty() {
                break;
            }
            let idx = rng.gen_range(0..successors.len());
            position = successors[idx].1.clone();
        }

        if !position.is_check() {
            records.push(Record::new(position, None, String::new(), created_ms));
        }
    }

    records
}

/// Parses a FEN-list file: UTF-8, one or two FENs per line (`parent;position` when two),
/// `#`/`//` comments, blank lines skipped, parse errors skip the line rather than aborting the
/// load.
pub fn load_fen_list(path: &Path, chess960: bool, created_ms: i64) -> Result<Vec<Record>> {
    let file = File::open(path)
        .map_err(|err| MiningError::SeedLoad(format!("opening '{}': {err}", path.display())))?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();

    for (lineno, line) in reader.lines().enumerate() {
        let line = line
            .map_err(|err| MiningError::SeedLoad(format!("reading '{}': {err}", path.display())))?;
        let trimmed = line.trim();

        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("//") {
            continue;
        }

        match parse_fen_list_line(trimmed, chess960) {
            Ok((parent, position)) => {
                records.push(Record::new(position, parent, String::new(), created_ms));
            }
            Err(err) => {
                warn!(line = lineno + 1, %err, "skipping unparsable FEN list line");
            }
        }
    }

    Ok(records)
}

fn parse_fen_list_line(line: &str, chess960: bool) -> Result<(Option<Position>, Position)> {
    match line.split_once(';') {
        Some((parent_fen, position_fen)) => {
            let parent = Position::from_fen(parent_fen.trim(), chess960)?;
            let position = Position::from_fen(position_fen.trim(), chess960)?;
            Ok((Some(parent), position))
        }
        None => Ok((None, Position::from_fen(line, chess960)?)),
    }
}

/// Traverses a PGN file's mainline and variations, yielding one Record per ply with
/// `parent = pre-move position`, `position = post-move position`. Input-only: no SAN/ECO export.
pub fn load_pgn(path: &Path, chess960: bool, created_ms: i64) -> Result<Vec<Record>> {
    let file = File::open(path)
        .map_err(|err| MiningError::SeedLoad(format!("opening '{}': {err}", path.display())))?;

    let mut visitor = PgnRecordCollector::new(chess960, created_ms);
    let mut reader = BufferedReader::new(file);

    loop {
        match reader.read_game(&mut visitor) {
            Ok(Some(())) => continue,
            Ok(None) => break,
            Err(err) => {
                return Err(MiningError::SeedLoad(format!(
                    "parsing '{}': {err}",
                    path.display()
                )))
            }
        }
    }

    Ok(visitor.records)
}

struct PgnRecordCollector {
    chess960: bool,
    created_ms: i64,
    stack: Vec<Position>,
    records: Vec<Record>,
}

impl PgnRecordCollector {
    fn new(chess960: bool, created_ms: i64) -> Self {
        Self {
            chess960,
            created_ms,
            stack: Vec::new(),
            records: Vec::new(),
        }
    }
}

impl Visitor for PgnRecordCollector {
    type Result = ();

    fn begin_game(&mut self) {
        self.stack.clear();
        self.stack.push(Position::startpos());
    }

    fn san(&mut self, san_plus: SanPlus) {
        let Some(parent) = self.stack.last().cloned() else {
            return;
        };

        let board = parent.board();
        let Ok(mov) = san_plus.san.to_move(board) else {
            warn!(san = %san_plus, "skipping illegal SAN move during PGN traversal");
            return;
        };

        let mut next_board = board.clone();
        next_board.play_unchecked(mov);
        let next = Position::from_board(next_board, self.chess960);

        self.records.push(Record::new(
            next.clone(),
            Some(parent),
            String::new(),
            self.created_ms,
        ));
        self.stack.push(next);
    }

    fn begin_variation(&mut self) -> Skip {
        // A variation replaces the last played move, so it branches from the position two deep
        // on the stack (the position the just-pushed move was played from).
        if self.stack.len() >= 2 {
            let branch_point = self.stack[self.stack.len() - 2].clone();
            self.stack.push(branch_point);
        }
        Skip(false)
    }

    fn end_variation(&mut self) {
        self.stack.pop();
    }

    fn end_game(&mut self) -> Self::Result {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_seeds_are_never_in_check() {
        let records = random(25, false, 0);
        assert_eq!(records.len(), 25);
        assert!(records.iter().all(|r| !r.position.is_check()));
    }

    #[test]
    fn fen_list_line_with_single_fen_has_no_parent() {
        let (parent, position) =
            parse_fen_list_line("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1", false)
                .unwrap();
        assert!(parent.is_none());
        assert_eq!(position.dedup_key(), Position::startpos().dedup_key());
    }

    #[test]
    fn fen_list_line_with_semicolon_carries_parent() {
        let line = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1;\
                    rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1";
        let (parent, _position) = parse_fen_list_line(line, false).unwrap();
        assert!(parent.is_some());
    }

    #[test]
    fn fen_list_load_skips_comments_and_blank_lines() {
        let dir = std::env::temp_dir().join(format!("mining-seed-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("seeds.txt");
        std::fs::write(
            &path,
            "# a comment\n\n// another comment\nrnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1\nnot a fen\n",
        )
        .unwrap();

        let records = load_fen_list(&path, false, 0).unwrap();
        assert_eq!(records.len(), 1);
    }
}
