//! The evaluation seam between the search and the neural network.
//!
//! The search never talks to an inference backend directly; it hands a leaf
//! position and its candidate moves to an [`Evaluator`] and gets back a value
//! and one prior per move. The batching layer that feeds a real network
//! lives outside this crate.

use crate::game::Game;
use chess::ChessMove;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EvaluatorError {
    #[error("evaluation failed: {0}")]
    EvaluationFailed(String),

    #[error("policy head returned {got} priors for {expected} moves")]
    PolicyShape { expected: usize, got: usize },
}

/// Network output for one leaf: a value in `[-1, 1]` for the player who
/// moved into the position, and one prior per candidate move in the order
/// the moves were given. Priors should sum to roughly 1.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub value: f32,
    pub priors: Vec<f32>,
}

pub trait Evaluator: Send + Sync {
    fn evaluate(&self, game: &Game, moves: &[ChessMove]) -> Result<Evaluation, EvaluatorError>;

    /// Evaluate several leaves at once. The default implementation loops;
    /// backends with real batch inference should override it.
    fn evaluate_batch(
        &self,
        batch: &[(&Game, &[ChessMove])],
    ) -> Result<Vec<Evaluation>, EvaluatorError> {
        batch
            .iter()
            .map(|(game, moves)| self.evaluate(game, moves))
            .collect()
    }
}

/// Equal priors, neutral value. Stands in for the network in tests and as a
/// fallback when inference is unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformEvaluator;

impl Evaluator for UniformEvaluator {
    fn evaluate(&self, _game: &Game, moves: &[ChessMove]) -> Result<Evaluation, EvaluatorError> {
        let n = moves.len().max(1);
        Ok(Evaluation {
            value: 0.0,
            priors: vec![1.0 / n as f32; moves.len()],
        })
    }
}
