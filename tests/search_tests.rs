//! End-to-end search scenarios driven through the public API.

use ardea::evaluator::UniformEvaluator;
use ardea::game::Game;
use ardea::search::{cp_to_score, Probe, SearchSettings, SearchTree, TablebaseProbe};
use chess::ChessMove;
use std::str::FromStr;
use std::sync::Arc;

fn mv(s: &str) -> ChessMove {
    ChessMove::from_str(s).unwrap()
}

#[test]
fn test_startpos_hundred_playouts() {
    let tree = SearchTree::new(Game::default(), SearchSettings::default());
    let completed = tree.run_playouts(101, &UniformEvaluator).unwrap();
    assert_eq!(completed, 101);

    let root = tree.root();
    assert_eq!(root.visited(), 101);
    assert_eq!(root.virtual_loss(), 0);

    let children = root.children();
    let child_visits: u32 = children.iter().map(|c| c.visited()).sum();
    assert_eq!(child_visits, root.visited() - 1);

    // Every root move is tried once before any is revisited.
    assert_eq!(children.len(), 20);
    assert!(children.iter().all(|c| c.visited() >= 1));

    let visited_priors: f32 = children
        .iter()
        .filter(|c| c.visited() >= 1)
        .map(|c| c.p_value())
        .sum();
    assert!((root.policy_sum() - visited_priors).abs() < 1e-4);

    for child in &children {
        assert!(child.q_value() >= -1.0 && child.q_value() <= 1.0);
    }

    let (pv, depth) = tree.principal_variation();
    assert!(!pv.is_empty());
    assert_eq!(depth as usize, pv.split_whitespace().count());
}

#[test]
fn test_mate_in_one_dominates_search() {
    // White mates with Qd8 or Qg7; both land on an exact child that the
    // selector then prefers over everything else.
    let game = Game::from_fen("6k1/8/6K1/8/3Q4/8/8/8 w - - 0 1").unwrap();
    let tree = SearchTree::new(game, SearchSettings::default());
    tree.run_playouts(200, &UniformEvaluator).unwrap();

    let root = tree.root();
    let mate = root
        .children()
        .into_iter()
        .find(|c| c.game().is_check_mate())
        .expect("a mating move was explored");
    assert!(mate.is_exact());
    let expected = 1.0 + 126.0 * 1e-4;
    assert!((mate.raw_q_value().unwrap() - expected).abs() < 1e-5);
    assert!((mate.q_value() - expected).abs() < 1e-5);

    // The mate flows back sign-flipped, dragging the root strongly negative.
    assert!(root.q_value() < -0.9);

    let (pv, depth) = tree.principal_variation();
    assert_eq!(depth, 1);
    let first = mv(pv.split_whitespace().next().unwrap());
    let best = root.find_child(first).unwrap();
    assert!(best.game().is_check_mate());
    assert!(best.visited() > 50);
}

#[test]
fn test_mate_outranks_tablebase_win() {
    let tb_win = 1.0 - cp_to_score(1);
    // Even the deepest mate scores above a tablebase win.
    let deepest_mate = 1.0;
    assert!(tb_win < deepest_mate);
    assert!(tb_win > 0.99);
}

struct FakeDtzProbe {
    result: Probe,
    mv: ChessMove,
    dtz: i32,
}

impl TablebaseProbe for FakeDtzProbe {
    fn probe(&self, _game: &Game) -> Probe {
        self.result
    }

    fn probe_dtz(&self, _game: &Game) -> Option<(Probe, ChessMove, i32)> {
        Some((self.result, self.mv, self.dtz))
    }
}

#[test]
fn test_dtz_root_short_circuits() {
    let game = Game::from_fen("8/P6k/8/8/8/8/8/K7 w - - 0 1").unwrap();
    let probe = Arc::new(FakeDtzProbe {
        result: Probe::Win,
        mv: mv("a7a8q"),
        dtz: 1,
    });
    let tree = SearchTree::with_tablebase(game, SearchSettings::default(), probe);

    assert_eq!(tree.check_and_generate_dtz(), Some(1));

    let root = tree.root();
    let children = root.children();
    assert_eq!(children.len(), 1);
    let child = &children[0];
    assert!((child.p_value() - 1.0).abs() < f32::EPSILON);
    assert!(child.is_exact());
    assert!(child.is_tb());
    let expected = 1.0 - cp_to_score(1);
    assert!((child.raw_q_value().unwrap() - expected).abs() < 1e-6);
    assert_eq!(child.visited(), 1);
    assert!(root.has_q_value());

    let (pv, depth) = tree.principal_variation();
    assert_eq!(pv, "a7a8q");
    assert_eq!(depth, 1);
}

#[test]
fn test_dtz_rejects_illegal_probe_move() {
    // The probe suggests a rook lift through the engine's own pawn; the DTZ
    // path must fail silently and leave the tree untouched.
    let game = Game::from_fen("8/P6k/8/8/8/8/8/K7 w - - 0 1").unwrap();
    let probe = Arc::new(FakeDtzProbe {
        result: Probe::Win,
        mv: mv("a1a8"),
        dtz: 1,
    });
    let tree = SearchTree::with_tablebase(game, SearchSettings::default(), probe);

    assert_eq!(tree.check_and_generate_dtz(), None);
    assert!(tree.root().children().is_empty());
    assert!(!tree.root().has_q_value());
}

#[test]
fn test_tablebase_hit_resolves_interior_node() {
    struct AlwaysWin;
    impl TablebaseProbe for AlwaysWin {
        fn probe(&self, _game: &Game) -> Probe {
            Probe::Win
        }
        fn probe_dtz(&self, _game: &Game) -> Option<(Probe, ChessMove, i32)> {
            None
        }
    }

    let game = Game::from_fen("8/P6k/8/8/8/8/8/K7 w - - 0 1").unwrap();
    let tree = SearchTree::with_tablebase(game, SearchSettings::default(), Arc::new(AlwaysWin));

    // First playout scores the root; the probe is skipped there.
    tree.run_playouts(2, &UniformEvaluator).unwrap();
    let root = tree.root();
    assert!(!root.is_tb());

    let child = root
        .children()
        .into_iter()
        .next()
        .expect("one child explored");
    assert!(child.is_exact());
    assert!(child.is_tb());
    assert!((child.raw_q_value().unwrap() - (1.0 - cp_to_score(1))).abs() < 1e-6);
    assert!(!child.has_potentials());
}

#[test]
fn test_exact_root_keeps_replaying() {
    // Stalemate root: the only node is exact after the first playout, and
    // every later playout keeps returning it.
    let game = Game::from_fen("k7/8/1Q6/8/8/8/8/K7 b - - 0 1").unwrap();
    let tree = SearchTree::new(game, SearchSettings::default());
    let completed = tree.run_playouts(5, &UniformEvaluator).unwrap();
    assert_eq!(completed, 5);
    let root = tree.root();
    assert!(root.is_exact());
    assert_eq!(root.visited(), 5);
    assert!(root.q_value().abs() < f32::EPSILON);
}
