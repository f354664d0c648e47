//! The opaque Position/Move leaf model, backed by `shakmaty`.
//!
//! Only the canonical FEN string form ever leaves this module for de-duplication purposes; the
//! rest of the crate never matches on `shakmaty` types directly.

use std::fmt::{self, Display};
use std::str::FromStr;

use shakmaty::fen::Fen;
use shakmaty::uci::UciMove;
use shakmaty::{CastlingMode, Chess, EnPassantMode, Position as _};

use crate::error::{MiningError, Result};

/// A legal chess position, keyed for de-duplication by its canonical FEN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    board: Chess,
    castling_mode: CastlingMode,
}

impl Position {
    pub fn startpos() -> Self {
        Self {
            board: Chess::new(),
            castling_mode: CastlingMode::Standard,
        }
    }

    /// Parses a FEN string into a legal position.
    ///
    /// `chess960` selects the castling-rights interpretation used when validating the position,
    /// not the starting array itself.
    pub fn from_fen(fen: &str, chess960: bool) -> Result<Self> {
        let castling_mode = if chess960 {
            CastlingMode::Chess960
        } else {
            CastlingMode::Standard
        };

        let parsed = Fen::from_str(fen)
            .map_err(|err| MiningError::SeedLoad(format!("invalid FEN '{fen}': {err}")))?;
        let board = parsed
            .into_position(castling_mode)
            .map_err(|err| MiningError::SeedLoad(format!("illegal position '{fen}': {err}")))?;

        Ok(Self {
            board,
            castling_mode,
        })
    }

    /// The canonical FEN string used for de-duplication across the run.
    ///
    /// The first four space-separated fields (pieces, side to move, castling, en-passant) are
    /// what actually identifies the position; halfmove/fullmove counters are included for
    /// faithful serialization but never consulted when comparing keys.
    pub fn canonical_fen(&self) -> String {
        Fen::from_position(self.board.clone(), EnPassantMode::Always).to_string()
    }

    /// The first four fields of the FEN, used as the de-duplication key.
    pub fn dedup_key(&self) -> String {
        self.canonical_fen()
            .splitn(5, ' ')
            .take(4)
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn is_check(&self) -> bool {
        self.board.is_check()
    }

    /// Every legal successor position reachable from here, paired with the move played.
    pub fn legal_successors(&self) -> Vec<(UciMove, Position)> {
        self.board
            .legal_moves()
            .into_iter()
            .map(|mov| {
                let uci = mov.to_uci(self.castling_mode);
                let mut next = self.board.clone();
                next.play_unchecked(mov);
                (
                    uci,
                    Position {
                        board: next,
                        castling_mode: self.castling_mode,
                    },
                )
            })
            .collect()
    }

    /// Applies a move given in UCI long-algebraic form, returning the successor position.
    pub fn apply_uci(&self, uci: &str) -> Result<Position> {
        let mov = UciMove::from_ascii(uci.as_bytes())
            .map_err(|err| MiningError::WorkerBroken(format!("invalid move '{uci}': {err}")))?
            .to_move(&self.board)
            .map_err(|err| MiningError::WorkerBroken(format!("illegal move '{uci}': {err}")))?;

        let mut next = self.board.clone();
        next.play_unchecked(mov);
        Ok(Position {
            board: next,
            castling_mode: self.castling_mode,
        })
    }

    pub fn chess960(&self) -> bool {
        matches!(self.castling_mode, CastlingMode::Chess960)
    }

    /// Exposes the underlying board for SAN resolution during PGN traversal. Crate-internal
    /// only: every other consumer treats Position as opaque.
    pub(crate) fn board(&self) -> &Chess {
        &self.board
    }

    pub(crate) fn from_board(board: Chess, chess960: bool) -> Self {
        Self {
            board,
            castling_mode: if chess960 {
                CastlingMode::Chess960
            } else {
                CastlingMode::Standard
            },
        }
    }
}

impl Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical_fen())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startpos_is_not_in_check() {
        assert!(!Position::startpos().is_check());
    }

    #[test]
    fn startpos_has_twenty_legal_moves() {
        assert_eq!(Position::startpos().legal_successors().len(), 20);
    }

    #[test]
    fn dedup_key_ignores_move_counters() {
        let a = Position::from_fen(
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
            false,
        )
        .unwrap();
        let b = Position::from_fen(
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 3 17",
            false,
        )
        .unwrap();
        assert_eq!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn apply_uci_rejects_illegal_move() {
        let pos = Position::startpos();
        assert!(pos.apply_uci("e2e5").is_err());
    }

    #[test]
    fn apply_uci_plays_legal_move() {
        let pos = Position::startpos();
        let next = pos.apply_uci("e2e4").unwrap();
        assert_ne!(pos.canonical_fen(), next.canonical_fen());
    }

    #[test]
    fn rejects_malformed_fen() {
        assert!(Position::from_fen("not a fen", false).is_err());
    }
}
