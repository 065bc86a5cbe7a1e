// src/search/syzygy.rs
//! Syzygy endgame tablebase probing.
//!
//! Uses shakmaty-syzygy to probe WDL (Win/Draw/Loss) and DTZ (Distance To
//! Zeroing) tables when the board has few enough pieces. Conversion:
//! `chess::Board` → FEN string → `shakmaty::Chess` (only at low piece
//! counts, so the round trip is off the hot path).

use crate::game::Game;
use anyhow::Result;
use chess::ChessMove;
use shakmaty::fen::Fen;
use shakmaty::CastlingMode;
use shakmaty_syzygy::{Tablebase, Wdl};
use std::path::Path;
use tracing::info;

/// Outcome of a WDL probe, from the probed side's perspective. Cursed wins
/// and blessed losses resolve under the 50-move rule and report as draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    NotFound,
    Win,
    Loss,
    Draw,
}

/// The narrow seam the search consumes tablebases through. Drivers without
/// tables plug in [`NullTablebase`]; tests plug in fakes.
pub trait TablebaseProbe: Send + Sync {
    fn probe(&self, game: &Game) -> Probe;

    /// Distance-to-zeroing probe: the outcome, the table's best move and
    /// its DTZ count. `None` when the position is not covered.
    fn probe_dtz(&self, game: &Game) -> Option<(Probe, ChessMove, i32)>;
}

/// Probe that never finds anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTablebase;

impl TablebaseProbe for NullTablebase {
    fn probe(&self, _game: &Game) -> Probe {
        Probe::NotFound
    }

    fn probe_dtz(&self, _game: &Game) -> Option<(Probe, ChessMove, i32)> {
        None
    }
}

/// Wrapper around shakmaty-syzygy tables with conversion from `chess` types.
pub struct SyzygyTablebase {
    tb: Tablebase<shakmaty::Chess>,
    max_pieces: usize,
}

impl SyzygyTablebase {
    /// Load every table found in `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut tb = Tablebase::new();
        let count = tb.add_directory(path.as_ref())?;
        let max_pieces = tb.max_pieces();
        info!(count, max_pieces, "syzygy tables loaded");
        Ok(Self { tb, max_pieces })
    }

    pub fn max_pieces(&self) -> usize {
        self.max_pieces
    }

    fn can_probe(&self, game: &Game) -> bool {
        game.board().combined().popcnt() as usize <= self.max_pieces
    }

    fn to_shakmaty(game: &Game) -> Option<shakmaty::Chess> {
        let fen: Fen = game.fen().parse().ok()?;
        fen.into_position(CastlingMode::Standard).ok()
    }

    fn wdl_to_probe(wdl: Wdl) -> Probe {
        match wdl {
            Wdl::Win => Probe::Win,
            Wdl::Loss => Probe::Loss,
            Wdl::CursedWin | Wdl::Draw | Wdl::BlessedLoss => Probe::Draw,
        }
    }
}

impl TablebaseProbe for SyzygyTablebase {
    fn probe(&self, game: &Game) -> Probe {
        if !self.can_probe(game) {
            return Probe::NotFound;
        }
        let Some(pos) = Self::to_shakmaty(game) else {
            return Probe::NotFound;
        };
        match self.tb.probe_wdl_after_zeroing(&pos) {
            Ok(wdl) => Self::wdl_to_probe(wdl),
            Err(_) => Probe::NotFound,
        }
    }

    fn probe_dtz(&self, game: &Game) -> Option<(Probe, ChessMove, i32)> {
        if !self.can_probe(game) {
            return None;
        }
        let pos = Self::to_shakmaty(game)?;
        let wdl = self.tb.probe_wdl_after_zeroing(&pos).ok()?;
        let (best, dtz) = self.tb.best_move(&pos).ok()??;
        let mv: ChessMove = best
            .to_uci(CastlingMode::Standard)
            .to_string()
            .parse()
            .ok()?;
        Some((Self::wdl_to_probe(wdl), mv, dtz.ignore_rounding().0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_tablebase_never_hits() {
        let game = Game::from_fen("k7/8/8/8/8/8/8/K6R w - - 0 1").unwrap();
        assert_eq!(NullTablebase.probe(&game), Probe::NotFound);
        assert!(NullTablebase.probe_dtz(&game).is_none());
    }
}
