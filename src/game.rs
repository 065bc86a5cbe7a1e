//! Position snapshot consumed by the search tree.
//!
//! `chess::Board` carries the piece placement, castling and en-passant state
//! and the zobrist hash. The snapshot adds what the search needs per node on
//! top of that: the halfmove clock, metadata about the move that produced
//! the position, and small caches that are filled in lazily while the tree
//! is shared between worker threads.

use anyhow::{anyhow, Result};
use chess::{Board, ChessMove, Color, MoveGen, Piece};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

#[derive(Debug)]
pub struct Game {
    board: Board,
    last_move: Option<ChessMove>,
    last_was_capture: bool,
    last_was_en_passant: bool,
    halfmove_clock: u32,
    // Caches below are written through shared references while the owning
    // node sits in a live tree, so they are atomic cells.
    repetitions: AtomicI32,
    check_mate: AtomicBool,
    stale_mate: AtomicBool,
}

impl Game {
    pub fn new(board: Board) -> Self {
        Self {
            board,
            last_move: None,
            last_was_capture: false,
            last_was_en_passant: false,
            halfmove_clock: 0,
            repetitions: AtomicI32::new(-1),
            check_mate: AtomicBool::new(false),
            stale_mate: AtomicBool::new(false),
        }
    }

    /// Parse a full FEN, including the halfmove clock field the board type
    /// itself does not track.
    pub fn from_fen(fen: &str) -> Result<Self> {
        let board =
            Board::from_str(fen).map_err(|e| anyhow!("invalid FEN {:?}: {}", fen, e))?;
        let halfmove_clock = fen
            .split_whitespace()
            .nth(4)
            .and_then(|field| field.parse().ok())
            .unwrap_or(0);
        let mut game = Self::new(board);
        game.halfmove_clock = halfmove_clock;
        Ok(game)
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn fen(&self) -> String {
        let board = self.board.to_string();
        let fields: Vec<&str> = board.split_whitespace().take(4).collect();
        format!("{} {} 1", fields.join(" "), self.halfmove_clock)
    }

    pub fn last_move(&self) -> Option<ChessMove> {
        self.last_move
    }

    pub fn last_move_was_capture(&self) -> bool {
        self.last_was_capture
    }

    pub fn last_move_was_en_passant(&self) -> bool {
        self.last_was_en_passant
    }

    pub fn halfmove_clock(&self) -> u32 {
        self.halfmove_clock
    }

    pub fn side_to_move(&self) -> Color {
        self.board.side_to_move()
    }

    /// Whether the side to move is in check.
    pub fn is_checked(&self) -> bool {
        self.board.checkers().popcnt() > 0
    }

    pub fn is_legal(&self, mv: ChessMove) -> bool {
        self.board.legal(mv)
    }

    /// Apply `mv` if it is legal, updating the halfmove clock and clearing
    /// the per-position caches. Returns false and leaves the snapshot
    /// untouched otherwise.
    pub fn make_move(&mut self, mv: ChessMove) -> bool {
        if !self.board.legal(mv) {
            return false;
        }
        let moved = self.board.piece_on(mv.get_source());
        let diagonal_pawn =
            moved == Some(Piece::Pawn) && mv.get_source().get_file() != mv.get_dest().get_file();
        let en_passant = diagonal_pawn && self.board.piece_on(mv.get_dest()).is_none();
        let capture = self.board.piece_on(mv.get_dest()).is_some() || diagonal_pawn;
        self.board = self.board.make_move_new(mv);
        self.halfmove_clock = if capture || moved == Some(Piece::Pawn) {
            0
        } else {
            self.halfmove_clock + 1
        };
        self.last_move = Some(mv);
        self.last_was_capture = capture;
        self.last_was_en_passant = en_passant;
        self.repetitions = AtomicI32::new(-1);
        self.check_mate = AtomicBool::new(false);
        self.stale_mate = AtomicBool::new(false);
        true
    }

    /// Feed every legal move to `f`. The generator already filters moves
    /// that would leave the mover in check.
    pub fn pseudo_legal_moves<F: FnMut(ChessMove)>(&self, mut f: F) {
        for mv in MoveGen::new_legal(&self.board) {
            f(mv);
        }
    }

    /// Draw by insufficient material: bare kings, a lone minor piece, or
    /// same-coloured bishops with nothing else on the board.
    pub fn is_dead_position(&self) -> bool {
        let minors = *self.board.pieces(Piece::Knight) | *self.board.pieces(Piece::Bishop);
        match self.board.combined().popcnt() {
            2 => true,
            3 => minors.popcnt() == 1,
            4 => {
                let bishops = *self.board.pieces(Piece::Bishop);
                if bishops.popcnt() != 2 {
                    return false;
                }
                if (bishops & *self.board.color_combined(Color::White)).popcnt() != 1 {
                    return false;
                }
                let mut shades = bishops
                    .map(|sq| (sq.get_rank().to_index() + sq.get_file().to_index()) % 2);
                shades.next() == shades.next()
            }
            _ => false,
        }
    }

    /// Positions are the same for repetition purposes when the placement,
    /// side to move, castling rights and en-passant square all match.
    pub fn is_same_position(&self, other: &Game) -> bool {
        self.board == other.board
    }

    /// Cached count of earlier occurrences of this position, if it has been
    /// computed.
    pub fn repetitions(&self) -> Option<i32> {
        let r = self.repetitions.load(Ordering::Relaxed);
        (r >= 0).then_some(r)
    }

    pub fn set_repetitions(&self, r: i32) {
        self.repetitions.store(r, Ordering::Relaxed);
    }

    pub fn is_check_mate(&self) -> bool {
        self.check_mate.load(Ordering::Relaxed)
    }

    pub fn set_check_mate(&self, value: bool) {
        self.check_mate.store(value, Ordering::Relaxed);
    }

    pub fn is_stale_mate(&self) -> bool {
        self.stale_mate.load(Ordering::Relaxed)
    }

    pub fn set_stale_mate(&self, value: bool) {
        self.stale_mate.store(value, Ordering::Relaxed);
    }
}

impl Default for Game {
    fn default() -> Self {
        Self::new(Board::default())
    }
}

impl Clone for Game {
    fn clone(&self) -> Self {
        Self {
            board: self.board,
            last_move: self.last_move,
            last_was_capture: self.last_was_capture,
            last_was_en_passant: self.last_was_en_passant,
            halfmove_clock: self.halfmove_clock,
            repetitions: AtomicI32::new(self.repetitions.load(Ordering::Relaxed)),
            check_mate: AtomicBool::new(self.check_mate.load(Ordering::Relaxed)),
            stale_mate: AtomicBool::new(self.stale_mate.load(Ordering::Relaxed)),
        }
    }
}
