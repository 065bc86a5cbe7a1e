// src/search/select.rs
//! Leaf selection: PUCT scoring over materialized children and unexpanded
//! potentials, with virtual-loss spreading for parallel playouts.
//!
//! A descent walks from the start node towards the candidate with the best
//! weighted exploration score, materializing potentials as it goes. Nodes
//! that are busy (claimed but unscored) or unextendable charge the playout's
//! try and virtual-loss budgets and force a restart; once either budget runs
//! out the playout reports that no progress is possible.

use crate::search::node::Node;
use crate::search::SearchSettings;
use chess::ChessMove;
use std::sync::Arc;
use tracing::trace;

/// A completed descent: the claimed leaf, how many plies were walked to
/// reach it, and whether any node was materialized along the way.
pub struct Playout {
    pub leaf: Arc<Node>,
    pub depth: u32,
    pub created_node: bool,
}

/// A selection candidate: either a materialized child or a move that has not
/// been expanded yet. Both score through the same PUCT lens, so the selector
/// never cares which representation it is looking at.
enum Candidate<'a> {
    Child(&'a Arc<Node>),
    Potential { parent: &'a Node, p_value: f32 },
}

impl Candidate<'_> {
    fn p_value(&self) -> f32 {
        match self {
            Candidate::Child(node) => node.p_value(),
            Candidate::Potential { p_value, .. } => *p_value,
        }
    }

    /// For children the running mean (pessimal while a claim is in flight);
    /// for potentials the parent's default Q, except at the root where every
    /// move must be tried once before any is revisited.
    fn q_value(&self) -> f32 {
        match self {
            Candidate::Child(node) => node.q_value(),
            Candidate::Potential { parent, .. } => {
                if parent.is_root_node() {
                    1.0
                } else {
                    parent.q_value_default()
                }
            }
        }
    }

    fn u_value(&self, u_coeff: f32) -> f32 {
        match self {
            Candidate::Child(node) => {
                let n = i64::from(node.visited()) + node.virtual_loss();
                u_coeff * node.p_value() / (1.0 + n as f32)
            }
            Candidate::Potential { p_value, .. } => u_coeff * p_value,
        }
    }

    fn weighted_exploration_score(&self, u_coeff: f32) -> f32 {
        self.q_value() + self.u_value(u_coeff)
    }
}

/// A candidate after scoring, detached from the edge locks so the descent
/// can materialize it.
struct Scored {
    score: f32,
    q_value: f32,
    p_value: f32,
    pick: Pick,
}

enum Pick {
    Child(Arc<Node>),
    Potential(ChessMove),
}

/// Scan children (first) and potentials (second) for the best and runner-up
/// scores. Ties keep the earlier candidate.
fn pick_candidates(node: &Arc<Node>, u_coeff: f32) -> (Option<Scored>, Option<Scored>) {
    let mut best: Option<Scored> = None;
    let mut second: Option<Scored> = None;
    let edges = node.edges();

    let mut offer = |scored: Scored| {
        if best.as_ref().map_or(true, |b| scored.score > b.score) {
            second = best.take();
            best = Some(scored);
        } else if second.as_ref().map_or(true, |s| scored.score > s.score) {
            second = Some(scored);
        }
    };

    for child in &edges.children {
        let candidate = Candidate::Child(child);
        offer(Scored {
            score: candidate.weighted_exploration_score(u_coeff),
            q_value: candidate.q_value(),
            p_value: candidate.p_value(),
            pick: Pick::Child(Arc::clone(child)),
        });
    }
    for potential in &edges.potentials {
        let candidate = Candidate::Potential {
            parent: node.as_ref(),
            p_value: potential.p_value(),
        };
        offer(Scored {
            score: candidate.weighted_exploration_score(u_coeff),
            q_value: candidate.q_value(),
            p_value: candidate.p_value(),
            pick: Pick::Potential(potential.mv()),
        });
    }
    drop(edges);
    (best, second)
}

/// Minimum number of extra virtual losses that would drop the best
/// candidate's score below the runner-up's, from the PUCT curve of the
/// runner-up (`q`, `p`) and the shared exploration coefficient.
fn virtual_loss_distance(
    best_score: f32,
    q: f32,
    p: f32,
    u_coeff: f32,
    settings: &SearchSettings,
) -> i64 {
    let delta = best_score - q;
    if delta.abs() < 1e-6 {
        return 1;
    }
    if q > best_score {
        return settings.vld_max;
    }
    let n = (q + p * u_coeff - best_score) / delta;
    (n.ceil() as i64).clamp(1, settings.vld_max)
}

impl Node {
    /// Descend from `start` to a node ready for evaluation, claiming it and
    /// charging virtual loss along the path. Returns `None` when the try or
    /// virtual-loss budget runs out before a claimable leaf is found.
    pub fn playout(start: &Arc<Node>, settings: &SearchSettings) -> Option<Playout> {
        let mut try_limit = settings.try_playout_limit;
        let mut vld_budget = settings.vld_max;
        let mut created_node = false;

        'restart: loop {
            let mut depth = 0u32;
            let mut vld = vld_budget;
            let mut node = Arc::clone(start);

            loop {
                // A node nobody has scored yet, or whose value is exact, is
                // the playout target.
                if !node.mark_scoring_or_scored() || node.is_exact() {
                    node.add_virtual_loss(1);
                    trace!(depth, created_node, "claimed playout target");
                    return Some(Playout {
                        leaf: node,
                        depth,
                        created_node,
                    });
                }

                let already_playing_out = node.is_already_playing_out();
                let increment = if already_playing_out { vld - 1 } else { 1 };
                node.add_virtual_loss(increment);

                if already_playing_out || node.is_not_extendable() {
                    try_limit -= 1;
                    if try_limit <= 0 {
                        trace!("try budget exhausted");
                        return None;
                    }
                    vld_budget -= node.virtual_loss();
                    if vld_budget <= 0 {
                        trace!("virtual-loss budget exhausted");
                        return None;
                    }
                    continue 'restart;
                }

                let u_coeff = node.u_coeff(settings);
                let (best, second) = pick_candidates(&node, u_coeff);
                let Some(best) = best else {
                    debug_assert!(false, "extendable node with no candidates");
                    return None;
                };
                if let Some(second) = &second {
                    let vld_new = virtual_loss_distance(
                        best.score,
                        second.q_value,
                        second.p_value,
                        u_coeff,
                        settings,
                    );
                    vld = vld.min(vld_new);
                    debug_assert!(vld >= 1);
                }

                node = match best.pick {
                    Pick::Child(child) => child,
                    Pick::Potential(mv) => {
                        created_node = true;
                        match node.generate_child(mv) {
                            Some(child) => child,
                            None => {
                                debug_assert!(false, "failed to materialize best candidate");
                                return None;
                            }
                        }
                    }
                };
                depth += 1;
            }
        }
    }
}
