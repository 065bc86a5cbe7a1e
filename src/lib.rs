//! Monte Carlo tree search core for a neural-network chess engine.
//!
//! The tree grows lazily: every node keeps the moves it has not explored yet
//! as cheap "potential" entries and only allocates a child once the PUCT
//! selector actually descends through that move. Workers run playouts in
//! parallel against the shared tree; virtual loss spreads them across
//! siblings while a leaf is waiting for the evaluator.

pub mod evaluator;
pub mod game;
pub mod search;

pub use game::Game;
pub use search::{Node, SearchSettings, SearchTree};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_root_is_unscored() {
        let root = Node::new_root(Game::default());
        assert!(root.is_root_node());
        assert!(!root.has_q_value());
        assert!((root.p_value() - 1.0).abs() < f32::EPSILON);
    }
}
