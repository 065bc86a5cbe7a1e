// src/search/report.rs
//! Score conversion and human-readable views of the search tree.

use crate::search::node::Node;
use crate::search::SearchSettings;
use std::cmp::Ordering;
use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;

/// Map a value in `(-1, 1)` onto the conventional centipawn scale.
pub fn score_to_cp(score: f32) -> i32 {
    (290.680_623_072 * (1.548_090_806 * f64::from(score)).tan()).round() as i32
}

/// Inverse of [`score_to_cp`].
pub fn cp_to_score(cp: i32) -> f32 {
    ((f64::from(cp) / 290.680_623_072).atan() / 1.548_090_806) as f32
}

/// Reporting order: most visited first, Q breaking ties.
fn by_score(a: &Arc<Node>, b: &Arc<Node>) -> Ordering {
    b.visited()
        .cmp(&a.visited())
        .then_with(|| b.q_value().total_cmp(&a.q_value()))
}

impl Node {
    /// The child the search currently prefers, if any has been visited.
    pub fn best_child(&self) -> Option<Arc<Node>> {
        self.children()
            .into_iter()
            .filter(|child| child.has_q_value())
            .min_by(by_score)
    }

    pub fn sorted_children(&self) -> Vec<Arc<Node>> {
        let mut children = self.children();
        children.sort_by(by_score);
        children
    }

    /// The move line the search prefers from this node, in coordinate
    /// notation. `depth` counts the plies emitted.
    pub fn principal_variation(&self, depth: &mut u32) -> String {
        let best = self.best_child();
        if self.is_root_node() {
            return match best {
                Some(child) => child.principal_variation(depth),
                None => String::new(),
            };
        }
        *depth += 1;
        let own = self
            .game()
            .last_move()
            .map(|mv| mv.to_string())
            .unwrap_or_default();
        match best {
            Some(child) => format!("{} {}", own, child.principal_variation(depth)),
            None => own,
        }
    }

    /// Moves leading from the root to this node, oldest first.
    pub fn move_line(&self) -> String {
        let mut moves = Vec::new();
        if let Some(mv) = self.game().last_move() {
            moves.push(mv.to_string());
        }
        let mut cursor = self.parent();
        while let Some(node) = cursor {
            if let Some(mv) = node.game().last_move() {
                moves.push(mv.to_string());
            }
            cursor = node.parent();
        }
        moves.reverse();
        moves.join(" ")
    }

    /// Indented dump of the subtree down to `max_depth` plies below the
    /// root, children ordered by the reporting criterion.
    pub fn print_tree(&self, settings: &SearchSettings, max_depth: u32) -> String {
        let mut out = String::new();
        self.print_tree_into(&mut out, settings, max_depth);
        out
    }

    fn print_tree_into(&self, out: &mut String, settings: &SearchSettings, max_depth: u32) {
        let depth = self.depth();
        out.push('\n');
        for _ in 0..depth {
            out.push_str("      |");
        }
        let mv = self
            .game()
            .last_move()
            .map(|mv| mv.to_string())
            .unwrap_or_else(|| "start".to_string());
        let q = self.q_value();
        let _ = write!(
            out,
            "{:>6} n: {:>5} p: {:>6.2}% q: {:>8.5} u: {:>7.5} q+u: {:>8.5} v: {:>7.4} h: {:>2} cp: {}",
            mv,
            i64::from(self.visited()) + self.virtual_loss(),
            self.p_value() * 100.0,
            q,
            self.u_value(settings),
            self.weighted_exploration_score(settings),
            self.raw_q_value().unwrap_or(-2.0),
            self.height(),
            score_to_cp(q),
        );
        if depth < max_depth {
            for child in self.sorted_children() {
                child.print_tree_into(out, settings, max_depth);
            }
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.move_line())
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Node(\"{}\", n: {}, q: {:.5}, p: {:.5})",
            self.move_line(),
            self.visited(),
            self.q_value(),
            self.p_value(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::{Evaluator, UniformEvaluator};
    use crate::game::Game;
    use crate::search::syzygy::NullTablebase;

    #[test]
    fn test_cp_zero_maps_to_zero() {
        assert_eq!(score_to_cp(0.0), 0);
        assert!(cp_to_score(0).abs() < 1e-6);
    }

    #[test]
    fn test_cp_known_value() {
        assert_eq!(score_to_cp(0.5), 284);
    }

    #[test]
    fn test_cp_round_trip() {
        for q in [-0.95, -0.5, -0.1, 0.0, 0.1, 0.5, 0.95] {
            let back = cp_to_score(score_to_cp(q));
            assert!((back - q).abs() < 1e-3, "q = {}, back = {}", q, back);
        }
    }

    #[test]
    fn test_cp_monotonic() {
        let mut last = score_to_cp(-0.99);
        for step in 1..=198 {
            let q = -0.99 + step as f32 * 0.01;
            let cp = score_to_cp(q);
            assert!(cp >= last);
            last = cp;
        }
    }

    #[test]
    fn test_best_child_prefers_visits_then_q() {
        let root = Node::new_root(Game::default());
        root.mark_scoring_or_scored();
        root.generate_potentials(&NullTablebase);
        let moves = root.potential_moves();
        let eval = UniformEvaluator.evaluate(root.game(), &moves).unwrap();
        root.set_evaluation(eval.value, &eval.priors);
        root.set_q_value_and_propagate();

        let score_child = |node: &Arc<Node>, value: f32| {
            node.mark_scoring_or_scored();
            node.generate_potentials(&NullTablebase);
            let n = node.potential_moves().len();
            node.set_evaluation(value, &vec![1.0 / n as f32; n]);
            node.set_q_value_and_propagate();
        };

        use std::str::FromStr;
        let weak = root
            .generate_child(chess::ChessMove::from_str("a2a3").unwrap())
            .unwrap();
        let strong = root
            .generate_child(chess::ChessMove::from_str("e2e4").unwrap())
            .unwrap();
        score_child(&weak, -0.3);
        score_child(&strong, 0.6);

        // Same visit count: Q decides.
        let best = root.best_child().unwrap();
        assert!(Arc::ptr_eq(&best, &strong));

        // A second visit lands on the weak child through a grandchild; more
        // visits now win even against a better Q.
        let reply = weak
            .generate_child(chess::ChessMove::from_str("e7e5").unwrap())
            .unwrap();
        score_child(&reply, -0.9);
        assert_eq!(weak.visited(), 2);
        let best = root.best_child().unwrap();
        assert!(Arc::ptr_eq(&best, &weak));

        let mut depth = 0;
        let pv = root.principal_variation(&mut depth);
        assert!(pv.starts_with("a2a3"));
        assert_eq!(depth, 2);
        assert_eq!(depth as usize, pv.split_whitespace().count());
    }

    #[test]
    fn test_print_tree_smoke() {
        let settings = SearchSettings::default();
        let root = Node::new_root(Game::default());
        root.mark_scoring_or_scored();
        root.generate_potentials(&NullTablebase);
        let moves = root.potential_moves();
        let eval = UniformEvaluator.evaluate(root.game(), &moves).unwrap();
        root.set_evaluation(eval.value, &eval.priors);
        root.set_q_value_and_propagate();

        let dump = root.print_tree(&settings, 1);
        assert!(dump.contains("start"));
        assert!(dump.contains(" q: "));
        assert!(dump.contains(" cp: "));
    }
}
