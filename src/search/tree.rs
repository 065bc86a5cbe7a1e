// src/search/tree.rs
//! Scoped ownership of the search tree and the playout-score-propagate loop.
//!
//! `SearchTree` owns the root; dropping it releases the whole tree. Workers
//! call [`SearchTree::run_playout`] (or the rayon helper) to select a leaf,
//! resolve or evaluate it, and back-propagate the result. The stop flag is
//! observed between playouts, never inside one.

use crate::evaluator::Evaluator;
use crate::game::Game;
use crate::search::node::Node;
use crate::search::select::Playout;
use crate::search::syzygy::{NullTablebase, TablebaseProbe};
use crate::search::SearchSettings;
use anyhow::Result;
use chess::ChessMove;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

pub struct SearchTree {
    root: Arc<Node>,
    settings: SearchSettings,
    tablebase: Arc<dyn TablebaseProbe>,
    stop: AtomicBool,
}

impl SearchTree {
    pub fn new(game: Game, settings: SearchSettings) -> Self {
        Self::with_tablebase(game, settings, Arc::new(NullTablebase))
    }

    pub fn with_tablebase(
        game: Game,
        settings: SearchSettings,
        tablebase: Arc<dyn TablebaseProbe>,
    ) -> Self {
        Self {
            root: Node::new_root(game),
            settings,
            tablebase,
            stop: AtomicBool::new(false),
        }
    }

    pub fn root(&self) -> &Arc<Node> {
        &self.root
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Probe DTZ at the root; on a hit the tree is left holding the single
    /// best move as an exact child and the search can stop immediately.
    pub fn check_and_generate_dtz(&self) -> Option<i32> {
        self.root.check_and_generate_dtz(self.tablebase.as_ref())
    }

    /// Select and claim a leaf without resolving it. Callers that batch
    /// evaluations hand the leaf to their batcher and propagate later.
    pub fn playout(&self) -> Option<Playout> {
        Node::playout(&self.root, &self.settings)
    }

    /// One full playout: select a leaf, resolve or evaluate it, propagate.
    /// Returns false when no playout is available.
    pub fn run_playout(&self, evaluator: &dyn Evaluator) -> Result<bool> {
        let Some(playout) = self.playout() else {
            return Ok(false);
        };
        self.score_leaf(&playout.leaf, evaluator)?;
        playout.leaf.set_q_value_and_propagate();
        Ok(true)
    }

    fn score_leaf(&self, leaf: &Arc<Node>, evaluator: &dyn Evaluator) -> Result<()> {
        // Exact leaves and re-claimed terminals keep their value.
        if leaf.has_raw_q_value() {
            return Ok(());
        }
        leaf.generate_potentials(self.tablebase.as_ref());
        if leaf.has_raw_q_value() {
            return Ok(());
        }
        let moves = leaf.potential_moves();
        let eval = evaluator.evaluate(leaf.game(), &moves)?;
        leaf.set_evaluation(eval.value, &eval.priors);
        Ok(())
    }

    /// Run up to `count` playouts on the calling thread, stopping early on
    /// the stop flag or when the tree is saturated. Returns how many
    /// completed.
    pub fn run_playouts(&self, count: usize, evaluator: &dyn Evaluator) -> Result<usize> {
        let mut completed = 0;
        for _ in 0..count {
            if self.is_stopped() {
                break;
            }
            if !self.run_playout(evaluator)? {
                debug!(completed, "no playout available");
                break;
            }
            completed += 1;
        }
        Ok(completed)
    }

    /// Fan `count` playouts across the rayon pool. Saturated attempts are
    /// skipped rather than retried, so fewer than `count` may complete.
    pub fn parallel_playouts(&self, count: usize, evaluator: &dyn Evaluator) -> Result<usize> {
        use rayon::prelude::*;

        let completed = AtomicUsize::new(0);
        (0..count).into_par_iter().try_for_each(|_| -> Result<()> {
            if self.is_stopped() {
                return Ok(());
            }
            if self.run_playout(evaluator)? {
                completed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(())
        })?;
        Ok(completed.load(Ordering::Relaxed))
    }

    /// Advance the root by one move, reusing the explored subtree when the
    /// move has a materialized child. Must not run while playouts are in
    /// flight.
    pub fn advance(&mut self, mv: ChessMove) -> bool {
        match self.root.find_child(mv) {
            Some(child) => {
                child.set_as_root_node();
                self.root = child;
                true
            }
            None => {
                let mut game = self.root.game().clone();
                if !game.make_move(mv) {
                    return false;
                }
                self.root = Node::new_root(game);
                true
            }
        }
    }

    pub fn principal_variation(&self) -> (String, u32) {
        let mut depth = 0;
        let line = self.root.principal_variation(&mut depth);
        (line, depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::UniformEvaluator;
    use std::str::FromStr;

    #[test]
    fn test_advance_reuses_subtree() {
        let mut tree = SearchTree::new(Game::default(), SearchSettings::default());
        tree.run_playouts(30, &UniformEvaluator).unwrap();

        let mv = ChessMove::from_str("e2e4").unwrap();
        let child = tree.root().find_child(mv).expect("e2e4 explored");
        let visits = child.visited();
        assert!(visits >= 1);

        assert!(tree.advance(mv));
        assert!(Arc::ptr_eq(tree.root(), &child));
        assert!(tree.root().is_root_node());
        assert_eq!(tree.root().visited(), visits);
    }

    #[test]
    fn test_advance_unexplored_move_rebuilds() {
        let mut tree = SearchTree::new(Game::default(), SearchSettings::default());
        let mv = ChessMove::from_str("h2h3").unwrap();
        assert!(tree.advance(mv));
        assert_eq!(tree.root().game().last_move(), Some(mv));
        assert!(!tree.root().is_scoring_or_scored());
    }

    #[test]
    fn test_advance_rejects_illegal_move() {
        let mut tree = SearchTree::new(Game::default(), SearchSettings::default());
        assert!(!tree.advance(ChessMove::from_str("e2e5").unwrap()));
    }

    #[test]
    fn test_stop_flag_halts_playouts() {
        let tree = SearchTree::new(Game::default(), SearchSettings::default());
        tree.stop();
        let completed = tree.run_playouts(10, &UniformEvaluator).unwrap();
        assert_eq!(completed, 0);
        assert!(!tree.root().is_scoring_or_scored());
    }
}
