//! Placement policy — pure selection of storage nodes for a chunk.
//!
//! No network I/O and no shared state: callers hand in a snapshot of
//! candidate nodes and get back an ordered selection. This keeps the
//! policy trivially unit-testable and keeps the strategy dispatch a
//! plain match over a tagged enum rather than a trait hierarchy.

use crate::config::PlacementStrategy;

/// A node as seen by the placement policy: just enough to filter and
/// rank candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementCandidate {
    pub node_id: String,
    pub capacity_bytes: u64,
    pub used_bytes: u64,
}

impl PlacementCandidate {
    pub fn free_bytes(&self) -> u64 {
        self.capacity_bytes.saturating_sub(self.used_bytes)
    }
}

/// Select up to `count` distinct nodes from `candidates`, excluding any
/// node_id in `exclude` and any node without room for `chunk_size`
/// bytes. Returns fewer than `count` nodes when not enough candidates
/// survive filtering — callers must treat that as partial placement.
pub fn select(
    candidates: &[PlacementCandidate],
    count: usize,
    exclude: &[String],
    chunk_size: u64,
    strategy: PlacementStrategy,
) -> Vec<String> {
    let mut eligible: Vec<&PlacementCandidate> = candidates
        .iter()
        .filter(|c| !exclude.contains(&c.node_id))
        .filter(|c| c.free_bytes() >= chunk_size)
        .collect();

    if eligible.is_empty() || count == 0 {
        return Vec::new();
    }

    match strategy {
        PlacementStrategy::Random => select_random(&eligible, count),
        PlacementStrategy::LeastLoaded => {
            eligible.sort_by(|a, b| b.free_bytes().cmp(&a.free_bytes()));
            eligible.into_iter().take(count).map(|c| c.node_id.clone()).collect()
        }
        PlacementStrategy::Diverse => select_diverse(&mut eligible, count),
    }
}

fn select_random(eligible: &[&PlacementCandidate], count: usize) -> Vec<String> {
    use rand::seq::SliceRandom;
    let mut rng = rand::thread_rng();
    let mut shuffled: Vec<&&PlacementCandidate> = eligible.iter().collect();
    shuffled.shuffle(&mut rng);
    shuffled.into_iter().take(count).map(|c| c.node_id.clone()).collect()
}

fn select_diverse(eligible: &mut [&PlacementCandidate], count: usize) -> Vec<String> {
    eligible.sort_by(|a, b| b.free_bytes().cmp(&a.free_bytes()));
    let len = eligible.len();
    if len <= count {
        return eligible.iter().map(|c| c.node_id.clone()).collect();
    }

    let k = std::cmp::max(1, len / count);
    let mut selected = Vec::with_capacity(count);
    let mut idx = 0;
    while idx < len && selected.len() < count {
        selected.push(eligible[idx].node_id.clone());
        idx += k;
    }
    // Fill any remainder from the head, skipping what's already chosen.
    let mut filler = 0;
    while selected.len() < count && filler < len {
        let candidate = &eligible[filler].node_id;
        if !selected.contains(candidate) {
            selected.push(candidate.clone());
        }
        filler += 1;
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, free_gib: u64) -> PlacementCandidate {
        PlacementCandidate {
            node_id: id.to_string(),
            capacity_bytes: free_gib * 1024 * 1024 * 1024,
            used_bytes: 0,
        }
    }

    #[test]
    fn excludes_named_nodes() {
        let pool = vec![candidate("a", 10), candidate("b", 10)];
        let picked = select(&pool, 2, &["a".to_string()], 1, PlacementStrategy::LeastLoaded);
        assert_eq!(picked, vec!["b".to_string()]);
    }

    #[test]
    fn least_loaded_orders_by_free_space_descending() {
        let pool = vec![candidate("a", 50), candidate("b", 90), candidate("c", 70)];
        let picked = select(&pool, 3, &[], 1, PlacementStrategy::LeastLoaded);
        assert_eq!(picked, vec!["b", "c", "a"]);
    }

    #[test]
    fn diverse_placement_matches_scenario_5() {
        let pool = vec![
            candidate("n0", 90),
            candidate("n1", 80),
            candidate("n2", 70),
            candidate("n3", 60),
            candidate("n4", 50),
        ];
        let picked = select(&pool, 3, &[], 1, PlacementStrategy::Diverse);
        assert_eq!(picked, vec!["n0", "n1", "n2"]);
    }

    #[test]
    fn partial_placement_when_not_enough_candidates() {
        let pool = vec![candidate("a", 10)];
        let picked = select(&pool, 3, &[], 1, PlacementStrategy::LeastLoaded);
        assert_eq!(picked, vec!["a".to_string()]);
    }

    #[test]
    fn filters_nodes_without_room() {
        let pool = vec![candidate("a", 1), candidate("b", 10)];
        let picked = select(&pool, 2, &[], 5 * 1024 * 1024 * 1024, PlacementStrategy::LeastLoaded);
        assert_eq!(picked, vec!["b".to_string()]);
    }

    #[test]
    fn no_duplicates_in_selection() {
        let pool = vec![candidate("a", 10), candidate("b", 10), candidate("c", 10)];
        let picked = select(&pool, 3, &[], 1, PlacementStrategy::Diverse);
        let unique: std::collections::HashSet<_> = picked.iter().collect();
        assert_eq!(unique.len(), picked.len());
    }
}
