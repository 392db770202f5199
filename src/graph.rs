// 🕸️ Entity Graph - relationship adjacency, shortest paths and build-out
//
// Adjacency is kept in ordered maps so that every traversal visits neighbors
// in ascending entity-id order. Identical graphs and queries always produce
// identical paths.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

/// Constraints on one shortest-path search
#[derive(Debug, Clone, Default)]
pub struct PathConstraints {
    pub max_degrees: u32,
    pub avoid: BTreeSet<i64>,
    pub forbid_avoided: bool,
    pub required_sources: BTreeSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct EntityGraph {
    adjacency: BTreeMap<i64, BTreeSet<i64>>,
    sources: BTreeMap<i64, BTreeSet<String>>,
}

impl EntityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_entity(&mut self, entity_id: i64, data_sources: impl IntoIterator<Item = String>) {
        self.adjacency.entry(entity_id).or_default();
        self.sources.entry(entity_id).or_default().extend(data_sources);
    }

    /// Relationships are symmetric; self-loops are ignored
    pub fn add_relationship(&mut self, entity_id: i64, related_id: i64) {
        if entity_id == related_id {
            return;
        }
        self.adjacency.entry(entity_id).or_default().insert(related_id);
        self.adjacency.entry(related_id).or_default().insert(entity_id);
    }

    pub fn contains(&self, entity_id: i64) -> bool {
        self.adjacency.contains_key(&entity_id)
    }

    pub fn neighbors(&self, entity_id: i64) -> impl Iterator<Item = i64> + '_ {
        self.adjacency
            .get(&entity_id)
            .into_iter()
            .flat_map(|neighbors| neighbors.iter().copied())
    }

    fn has_any_source(&self, entity_id: i64, required: &BTreeSet<String>) -> bool {
        self.sources
            .get(&entity_id)
            .map_or(false, |sources| !sources.is_disjoint(required))
    }

    /// Shortest simple path honoring the constraints.
    ///
    /// Preference order: satisfy sources and avoidance, then sources through
    /// avoided entities (unless forbidden), then avoidance alone, then any
    /// path (unless forbidden). A forbidden entity never appears in a result.
    pub fn shortest_path(
        &self,
        from: i64,
        to: i64,
        constraints: &PathConstraints,
    ) -> Option<Vec<i64>> {
        if !self.contains(from) || !self.contains(to) {
            return None;
        }
        if from == to {
            return Some(vec![from]);
        }

        let avoided: HashSet<i64> = constraints
            .avoid
            .iter()
            .copied()
            .filter(|id| *id != from && *id != to)
            .collect();
        let nothing = HashSet::new();
        let max = constraints.max_degrees;

        if !constraints.required_sources.is_empty() {
            let required = Some(&constraints.required_sources);
            if let Some(path) = self.search(from, to, max, &avoided, required) {
                return Some(path);
            }
            if !constraints.forbid_avoided {
                if let Some(path) = self.search(from, to, max, &nothing, required) {
                    return Some(path);
                }
            }
        }

        if let Some(path) = self.search(from, to, max, &avoided, None) {
            return Some(path);
        }
        if constraints.forbid_avoided {
            return None;
        }
        self.search(from, to, max, &nothing, None)
    }

    /// Breadth-first search over (entity, source-requirement-met) states.
    /// Endpoints never count toward the source requirement.
    fn search(
        &self,
        from: i64,
        to: i64,
        max_degrees: u32,
        blocked: &HashSet<i64>,
        required: Option<&BTreeSet<String>>,
    ) -> Option<Vec<i64>> {
        let mut visited: HashSet<(i64, bool)> = HashSet::new();
        let mut queue: VecDeque<(Vec<i64>, bool)> = VecDeque::new();

        visited.insert((from, false));
        queue.push_back((vec![from], false));

        while let Some((path, satisfied)) = queue.pop_front() {
            let current = match path.last() {
                Some(current) => *current,
                None => continue,
            };
            if current == to {
                if required.is_none() || satisfied {
                    return Some(path);
                }
                continue;
            }
            if path.len() > max_degrees as usize {
                continue;
            }

            for next in self.neighbors(current) {
                if blocked.contains(&next) || path.contains(&next) {
                    continue;
                }
                let next_satisfied = satisfied
                    || (next != to && required.map_or(false, |r| self.has_any_source(next, r)));
                if visited.insert((next, next_satisfied)) {
                    let mut extended = path.clone();
                    extended.push(next);
                    queue.push_back((extended, next_satisfied));
                }
            }
        }

        None
    }

    /// Entities within `hops` relationships of any seed, in discovery order,
    /// seeds excluded
    pub fn build_out(&self, seeds: &[i64], hops: u32) -> Vec<i64> {
        let mut discovered = Vec::new();
        let mut visited: HashSet<i64> = seeds.iter().copied().collect();
        let mut queue: VecDeque<(i64, u32)> = seeds.iter().map(|id| (*id, 0)).collect();

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= hops {
                continue;
            }
            for next in self.neighbors(current) {
                if visited.insert(next) {
                    discovered.push(next);
                    queue.push_back((next, depth + 1));
                }
            }
        }

        discovered
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// 1 - 2 - 3 - 6, with 7 as a second route 1 - 7 - 3
    fn create_test_graph() -> EntityGraph {
        let mut graph = EntityGraph::new();
        graph.add_entity(1, vec!["CUSTOMERS".to_string()]);
        graph.add_entity(2, vec!["WATCHLIST".to_string()]);
        graph.add_entity(3, vec!["EMPLOYEES".to_string()]);
        graph.add_entity(6, vec!["COMPANIES".to_string()]);
        graph.add_entity(7, vec!["CUSTOMERS".to_string()]);
        graph.add_relationship(1, 2);
        graph.add_relationship(2, 3);
        graph.add_relationship(3, 6);
        graph.add_relationship(1, 7);
        graph.add_relationship(7, 3);
        graph
    }

    fn constraints(max_degrees: u32) -> PathConstraints {
        PathConstraints {
            max_degrees,
            ..PathConstraints::default()
        }
    }

    #[test]
    fn test_shortest_path_respects_degree_bound() {
        let graph = create_test_graph();

        assert_eq!(graph.shortest_path(1, 3, &constraints(1)), None);
        assert_eq!(graph.shortest_path(1, 3, &constraints(2)), Some(vec![1, 2, 3]));
        assert_eq!(graph.shortest_path(1, 1, &constraints(1)), Some(vec![1]));
    }

    #[test]
    fn test_avoided_entity_is_discouraged() {
        let graph = create_test_graph();
        let mut c = constraints(3);
        c.avoid.insert(2);

        assert_eq!(graph.shortest_path(1, 3, &c), Some(vec![1, 7, 3]));

        c.avoid.insert(7);
        // no alternative, so the avoided route is still used
        assert_eq!(graph.shortest_path(1, 3, &c), Some(vec![1, 2, 3]));

        c.forbid_avoided = true;
        assert_eq!(graph.shortest_path(1, 3, &c), None);
    }

    #[test]
    fn test_required_sources_pick_matching_intermediate() {
        let graph = create_test_graph();
        let mut c = constraints(3);
        c.required_sources.insert("CUSTOMERS".to_string());

        assert_eq!(graph.shortest_path(1, 3, &c), Some(vec![1, 7, 3]));
    }

    #[test]
    fn test_forbidden_entity_beats_required_source() {
        let graph = create_test_graph();
        let mut c = constraints(3);
        c.required_sources.insert("WATCHLIST".to_string());
        c.avoid.insert(2);
        c.forbid_avoided = true;

        assert_eq!(graph.shortest_path(1, 3, &c), Some(vec![1, 7, 3]));
    }

    #[test]
    fn test_build_out_hops() {
        let graph = create_test_graph();

        assert!(graph.build_out(&[1], 0).is_empty());
        assert_eq!(graph.build_out(&[1], 1), vec![2, 7]);
        assert_eq!(graph.build_out(&[1], 2), vec![2, 7, 3]);
    }
}
