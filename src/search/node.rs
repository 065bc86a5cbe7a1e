// src/search/node.rs
//! Search tree vertex: visit statistics, lazily materialized children and
//! sign-flipping value back-propagation.
//!
//! A node starts life knowing only its position and the prior of the move
//! that produced it. The first playout to reach it claims it for scoring via
//! an atomic flag; scoring either resolves the position exactly (draw rules,
//! mate, tablebase) or generates one potential entry per legal move for the
//! evaluator to assign priors to. Children are allocated only when the
//! selector actually descends through a potential, so memory tracks visits
//! rather than branching factor.

use crate::game::Game;
use crate::search::report;
use crate::search::syzygy::{Probe, TablebaseProbe};
use crate::search::{SearchSettings, MAX_DEPTH};
use chess::ChessMove;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use tracing::trace;

/// Per-ply bonus that makes shallower mates score above deeper ones.
const MATE_DEPTH_BONUS: f32 = 1e-4;

/// Q reported for a node that has been claimed for scoring but carries no
/// value yet. Below every real Q, so concurrent playouts steer around
/// in-flight leaves.
pub(crate) const UNSCORED_Q: f32 = -2.0;

/// Bit pattern marking the cached exploration coefficient as stale.
const U_COEFF_UNSET: u32 = u32::MAX;

/// A move that has not been expanded into a child node yet, together with
/// the prior the policy head assigned to it.
#[derive(Debug, Clone)]
pub struct PotentialNode {
    mv: ChessMove,
    p_value: f32,
}

impl PotentialNode {
    fn new(mv: ChessMove) -> Self {
        Self { mv, p_value: 0.0 }
    }

    pub fn mv(&self) -> ChessMove {
        self.mv
    }

    pub fn p_value(&self) -> f32 {
        self.p_value
    }

    fn set_p_value(&mut self, p_value: f32) {
        self.p_value = p_value;
    }
}

/// Materialized children and unexpanded potentials, guarded together. A move
/// lives in exactly one of the two lists at any time.
#[derive(Default)]
pub(crate) struct Edges {
    pub(crate) children: Vec<Arc<Node>>,
    pub(crate) potentials: Vec<PotentialNode>,
}

/// Value statistics, serialized per node so that concurrent back-propagations
/// through a shared ancestor cannot tear the running mean.
#[derive(Default)]
struct ValueStats {
    q_value: Option<f32>,
    raw_q_value: Option<f32>,
    policy_sum: f32,
}

pub struct Node {
    game: Game,
    parent: RwLock<Weak<Node>>,
    p_value: f32,
    edges: RwLock<Edges>,
    values: Mutex<ValueStats>,
    visited: AtomicU32,
    virtual_loss: AtomicI64,
    u_coeff: AtomicU32,
    scoring_or_scored: AtomicBool,
    exact: AtomicBool,
    tb: AtomicBool,
}

impl Node {
    fn new(parent: Weak<Node>, game: Game, p_value: f32) -> Self {
        Self {
            game,
            parent: RwLock::new(parent),
            p_value,
            edges: RwLock::new(Edges::default()),
            values: Mutex::new(ValueStats::default()),
            visited: AtomicU32::new(0),
            virtual_loss: AtomicI64::new(0),
            u_coeff: AtomicU32::new(U_COEFF_UNSET),
            scoring_or_scored: AtomicBool::new(false),
            exact: AtomicBool::new(false),
            tb: AtomicBool::new(false),
        }
    }

    pub fn new_root(game: Game) -> Arc<Node> {
        Arc::new(Self::new(Weak::new(), game, 1.0))
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    pub fn parent(&self) -> Option<Arc<Node>> {
        self.parent.read().upgrade()
    }

    pub fn is_root_node(&self) -> bool {
        self.parent().is_none()
    }

    /// Walk the back-references up to the owning root.
    pub fn root_node(self: &Arc<Self>) -> Arc<Node> {
        let mut node = Arc::clone(self);
        while let Some(parent) = node.parent() {
            node = parent;
        }
        node
    }

    /// Plies between this node and the root.
    pub fn depth(&self) -> u32 {
        let mut depth = 0;
        let mut cursor = self.parent();
        while let Some(node) = cursor {
            depth += 1;
            cursor = node.parent();
        }
        depth
    }

    /// Height of the subtree below this node, in nodes.
    pub fn height(&self) -> u32 {
        1 + self
            .children()
            .iter()
            .map(|child| child.height())
            .max()
            .unwrap_or(0)
    }

    pub fn p_value(&self) -> f32 {
        self.p_value
    }

    pub fn visited(&self) -> u32 {
        self.visited.load(Ordering::Acquire)
    }

    pub fn virtual_loss(&self) -> i64 {
        self.virtual_loss.load(Ordering::Acquire)
    }

    pub(crate) fn add_virtual_loss(&self, amount: i64) {
        self.virtual_loss.fetch_add(amount, Ordering::AcqRel);
    }

    pub fn has_q_value(&self) -> bool {
        self.values.lock().q_value.is_some()
    }

    /// Running mean of back-propagated values, from the perspective of the
    /// player who moved into this node. Reads as [`UNSCORED_Q`] (below any
    /// real value) until the first back-propagation lands.
    pub fn q_value(&self) -> f32 {
        self.values.lock().q_value.unwrap_or(UNSCORED_Q)
    }

    /// Parent-side default Q reported for unexpanded moves.
    pub fn q_value_default(&self) -> f32 {
        self.values.lock().q_value.unwrap_or(0.0)
    }

    pub fn has_raw_q_value(&self) -> bool {
        self.values.lock().raw_q_value.is_some()
    }

    pub fn raw_q_value(&self) -> Option<f32> {
        self.values.lock().raw_q_value
    }

    /// Sum of the priors of children that have been visited at least once.
    pub fn policy_sum(&self) -> f32 {
        self.values.lock().policy_sum
    }

    pub fn is_exact(&self) -> bool {
        self.exact.load(Ordering::Acquire)
    }

    pub fn is_tb(&self) -> bool {
        self.tb.load(Ordering::Acquire)
    }

    /// Claim this node for scoring. Returns the previous state of the flag:
    /// the caller that sees `false` owns the score.
    pub fn mark_scoring_or_scored(&self) -> bool {
        self.scoring_or_scored.fetch_or(true, Ordering::AcqRel)
    }

    pub fn is_scoring_or_scored(&self) -> bool {
        self.scoring_or_scored.load(Ordering::Acquire)
    }

    /// A claimed leaf whose score has not landed yet.
    pub fn is_already_playing_out(&self) -> bool {
        self.visited() == 0 && self.virtual_loss() > 0
    }

    /// Nothing below this node can ever be explored: the value is exact, the
    /// game is over, or scoring found no legal moves.
    pub fn is_not_extendable(&self) -> bool {
        if self.is_exact() || self.game.is_check_mate() || self.game.is_stale_mate() {
            return true;
        }
        let edges = self.edges.read();
        edges.children.is_empty() && edges.potentials.is_empty() && self.is_scoring_or_scored()
    }

    pub(crate) fn edges(&self) -> RwLockReadGuard<'_, Edges> {
        self.edges.read()
    }

    pub fn has_children(&self) -> bool {
        !self.edges.read().children.is_empty()
    }

    pub fn has_potentials(&self) -> bool {
        !self.edges.read().potentials.is_empty()
    }

    /// Snapshot of the materialized children.
    pub fn children(&self) -> Vec<Arc<Node>> {
        self.edges.read().children.clone()
    }

    /// Snapshot of the unexpanded moves, in generation order.
    pub fn potential_moves(&self) -> Vec<ChessMove> {
        self.edges.read().potentials.iter().map(|p| p.mv()).collect()
    }

    pub fn find_child(&self, mv: ChessMove) -> Option<Arc<Node>> {
        self.edges
            .read()
            .children
            .iter()
            .find(|child| child.game.last_move() == Some(mv))
            .cloned()
    }

    pub fn is_first_child(&self) -> bool {
        match self.parent() {
            None => false,
            Some(parent) => parent
                .edges
                .read()
                .children
                .first()
                .is_some_and(|child| std::ptr::eq(child.as_ref(), self)),
        }
    }

    pub fn is_second_child(&self) -> bool {
        match self.parent() {
            None => false,
            Some(parent) => parent
                .edges
                .read()
                .children
                .get(1)
                .is_some_and(|child| std::ptr::eq(child.as_ref(), self)),
        }
    }

    /// The incoming move changed the tactical picture: capture, check or
    /// promotion.
    pub fn is_noisy(&self) -> bool {
        self.game.last_move_was_capture()
            || self.game.is_checked()
            || self
                .game
                .last_move()
                .and_then(|mv| mv.get_promotion())
                .is_some()
    }

    pub fn has_noisy_children(&self) -> bool {
        self.edges.read().children.iter().any(|child| child.is_noisy())
    }

    fn increment_visited(&self) {
        self.u_coeff.store(U_COEFF_UNSET, Ordering::Release);
        self.virtual_loss.store(0, Ordering::Release);
        self.visited.fetch_add(1, Ordering::AcqRel);
    }

    /// Exploration coefficient shared by all of this node's candidates,
    /// cached until the visit count changes.
    pub fn u_coeff(&self, settings: &SearchSettings) -> f32 {
        let bits = self.u_coeff.load(Ordering::Acquire);
        if bits != U_COEFF_UNSET {
            return f32::from_bits(bits);
        }
        let mut n: i64 = 0;
        for child in self.edges.read().children.iter() {
            n += i64::from(child.visited()) + child.virtual_loss();
        }
        let n = n.max(1) as f32;
        let coeff = settings.cpuct(n) * n.sqrt();
        self.u_coeff.store(coeff.to_bits(), Ordering::Release);
        coeff
    }

    /// Exploration term of the PUCT score, damped by this node's own visit
    /// weight.
    pub fn u_value(&self, settings: &SearchSettings) -> f32 {
        let Some(parent) = self.parent() else {
            return 0.0;
        };
        let n = i64::from(self.visited()) + self.virtual_loss();
        parent.u_coeff(settings) * self.p_value / (1.0 + n as f32)
    }

    pub fn weighted_exploration_score(&self, settings: &SearchSettings) -> f32 {
        self.q_value() + self.u_value(settings)
    }

    /// Count earlier occurrences of this position among the ancestors,
    /// stopping at the first irreversible move. Cached on the snapshot.
    pub fn repetitions(&self) -> i32 {
        if let Some(r) = self.game.repetitions() {
            return r;
        }
        let mut r = 0;
        let mut cursor = self.parent();
        while let Some(node) = cursor {
            if self.game.is_same_position(node.game()) {
                r += 1;
            }
            if r >= 2 {
                break;
            }
            if node.game().halfmove_clock() == 0 {
                break;
            }
            cursor = node.parent();
        }
        self.game.set_repetitions(r);
        r
    }

    pub fn is_three_fold(&self) -> bool {
        self.repetitions() >= 2
    }

    fn set_exact_result(&self, raw: f32, from_tb: bool) {
        self.values.lock().raw_q_value = Some(raw);
        if from_tb {
            self.tb.store(true, Ordering::Release);
        }
        self.exact.store(true, Ordering::Release);
    }

    /// Resolve this node's position: rule-based draws, tablebase hits and
    /// game-over states become exact values, everything else becomes one
    /// potential entry per legal move.
    pub fn generate_potentials(&self, tablebase: &dyn TablebaseProbe) {
        debug_assert!(!self.has_potentials());
        if self.has_potentials() {
            return;
        }

        if self.game.halfmove_clock() >= 100 {
            self.set_exact_result(0.0, false);
            return;
        }
        if self.game.is_dead_position() {
            self.set_exact_result(0.0, false);
            return;
        }
        if self.is_three_fold() {
            self.set_exact_result(0.0, false);
            return;
        }

        if !self.is_root_node() {
            match tablebase.probe(&self.game) {
                Probe::NotFound => {}
                Probe::Win => {
                    self.set_exact_result(1.0 - report::cp_to_score(1), true);
                    return;
                }
                Probe::Loss => {
                    self.set_exact_result(-1.0 + report::cp_to_score(1), true);
                    return;
                }
                Probe::Draw => {
                    self.set_exact_result(0.0, true);
                    return;
                }
            }
        }

        self.game.pseudo_legal_moves(|mv| self.generate_potential(mv));

        // The network never sees finished games; resolve them here.
        if !self.has_potentials() {
            if self.game.is_checked() {
                self.game.set_check_mate(true);
                let depth = self.depth().min(MAX_DEPTH);
                let raw = 1.0 + (MAX_DEPTH - depth) as f32 * MATE_DEPTH_BONUS;
                self.set_exact_result(raw, false);
            } else {
                self.game.set_stale_mate(true);
                self.set_exact_result(0.0, false);
            }
        }
    }

    /// Move-generation callback: append `mv` as a potential if the rules
    /// engine accepts it.
    pub fn generate_potential(&self, mv: ChessMove) {
        if !self.game.is_legal(mv) {
            return;
        }
        self.edges.write().potentials.push(PotentialNode::new(mv));
    }

    /// Store the evaluator's verdict: the raw value for this node and a
    /// prior for each potential, normalized defensively.
    pub fn set_evaluation(&self, value: f32, priors: &[f32]) {
        debug_assert!(!self.is_exact());
        debug_assert!((-1.0..=1.0).contains(&value));
        {
            let mut edges = self.edges.write();
            debug_assert_eq!(edges.potentials.len(), priors.len());
            let sum: f32 = priors.iter().copied().filter(|p| *p > 0.0).sum();
            let count = edges.potentials.len().max(1);
            for (potential, &prior) in edges.potentials.iter_mut().zip(priors) {
                let p = if sum > 0.0 {
                    prior.max(0.0) / sum
                } else {
                    1.0 / count as f32
                };
                potential.set_p_value(p);
            }
        }
        self.values.lock().raw_q_value = Some(value);
    }

    /// Promote the potential holding `mv` into a child node. If a concurrent
    /// playout already promoted it, the existing child is returned instead.
    pub fn generate_child(self: &Arc<Self>, mv: ChessMove) -> Option<Arc<Node>> {
        let mut edges = self.edges.write();
        let Some(index) = edges.potentials.iter().position(|p| p.mv() == mv) else {
            return edges
                .children
                .iter()
                .find(|child| child.game.last_move() == Some(mv))
                .cloned();
        };
        let potential = edges.potentials.remove(index);
        let mut game = self.game.clone();
        if !game.make_move(potential.mv()) {
            debug_assert!(false, "potential held an illegal move");
            return None;
        }
        let child = Arc::new(Node::new(Arc::downgrade(self), game, potential.p_value()));
        edges.children.push(Arc::clone(&child));
        trace!(mv = %mv, "materialized child");
        Some(child)
    }

    /// Detach this node from its parent so the driver can re-root the tree
    /// on it. Caller must guarantee no playout is in flight.
    pub fn set_as_root_node(self: &Arc<Self>) {
        if let Some(parent) = self.parent() {
            let mut edges = parent.edges.write();
            match edges
                .children
                .iter()
                .position(|child| Arc::ptr_eq(child, self))
            {
                Some(index) => {
                    edges.children.remove(index);
                }
                None => debug_assert!(false, "detaching from a parent that does not own this node"),
            }
        }
        *self.parent.write() = Weak::new();
    }

    /// First back-propagation for a freshly scored leaf: credit the prior to
    /// the parent's policy sum, adopt the raw value, then flow it to the
    /// root with the sign flipping at every ply.
    pub fn set_q_value_and_propagate(&self) {
        let parent = self.parent();
        if let Some(parent) = &parent {
            if self.visited() == 0 {
                parent.values.lock().policy_sum += self.p_value;
            }
        }
        let mut value = {
            let mut values = self.values.lock();
            let Some(raw) = values.raw_q_value else {
                debug_assert!(false, "propagating a node that was never scored");
                return;
            };
            values.q_value = Some(raw);
            self.increment_visited();
            raw
        };
        trace!(value, visited = self.visited(), "propagating leaf value");
        let mut cursor = parent;
        while let Some(node) = cursor {
            value = -value;
            node.back_propagate_value(value);
            cursor = node.parent();
        }
    }

    fn back_propagate_value(&self, value: f32) {
        let mut values = self.values.lock();
        debug_assert!(values.q_value.is_some());
        debug_assert!(self.visited() > 0);
        if let Some(q) = values.q_value {
            let n = self.visited() as f32;
            values.q_value = Some((n * q + value) / (n + 1.0));
        }
        self.increment_visited();
    }

    /// Probe distance-to-zeroing at the root and, on a hit, graft the single
    /// best move as an exact, already-propagated child. Short-circuits the
    /// search for this position. Returns the DTZ count on success.
    pub fn check_and_generate_dtz(self: &Arc<Self>, tablebase: &dyn TablebaseProbe) -> Option<i32> {
        debug_assert!(self.is_root_node());
        let (result, mv, dtz) = tablebase.probe_dtz(&self.game)?;
        let mut game = self.game.clone();
        if !game.make_move(mv) {
            // The probe handed back a move the rules engine rejects; fall
            // back to a normal search.
            return None;
        }
        let raw = match result {
            Probe::Win => 1.0 - report::cp_to_score(1),
            Probe::Loss => -1.0 + report::cp_to_score(1),
            Probe::Draw => 0.0,
            Probe::NotFound => return None,
        };
        let child = Arc::new(Node::new(Arc::downgrade(self), game, 1.0));
        child.mark_scoring_or_scored();
        child.set_exact_result(raw, true);

        // Values cannot flow through an unscored root.
        if !self.has_q_value() {
            self.mark_scoring_or_scored();
            {
                let mut values = self.values.lock();
                if values.raw_q_value.is_none() {
                    values.raw_q_value = Some(0.0);
                }
                values.q_value = values.raw_q_value;
            }
            self.increment_visited();
        }

        self.edges.write().children.push(Arc::clone(&child));
        child.set_q_value_and_propagate();
        Some(dtz)
    }
}
