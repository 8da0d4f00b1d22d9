//! Affinity graph over atoms.
//!
//! Atoms live in an arena sorted by `(timestamp, id)`. Pairs are scored on
//! demand, only forward and only within the candidate time window, so the
//! number of scored pairs is bounded by `n * max_neighbors`.

use petgraph::unionfind::UnionFind;
use std::collections::{BTreeMap, HashMap};

use crate::consolidation::ConsolidationConfig;
use crate::types::MemoryAtom;
use crate::vector::cosine_similarity;

const MILLIS_PER_DAY: f32 = 86_400_000.0;

/// One atom in the arena. `owner` is the index of the molecule it already
/// belongs to, `None` for a free atom.
#[derive(Debug, Clone, Copy)]
pub struct Slot<'a> {
    pub atom: &'a MemoryAtom,
    pub owner: Option<usize>,
}

/// Weighted pair of arena indices. Recomputed every pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffinityEdge {
    pub i: usize,
    pub j: usize,
    pub weight: f32,
}

/// `beta * cos(v_i, v_j) + (1 - beta) * exp(-lambda * |t_i - t_j|)`, time in days.
pub fn affinity(a: &MemoryAtom, b: &MemoryAtom, config: &ConsolidationConfig) -> f32 {
    let cos = cosine_similarity(&a.embedding, &b.embedding);
    let days = (a.timestamp - b.timestamp).num_milliseconds().abs() as f32 / MILLIS_PER_DAY;
    config.beta * cos + (1.0 - config.beta) * (-config.decay_per_day * days).exp()
}

/// Sort slots into arena order.
pub fn arrange(slots: &mut [Slot<'_>]) {
    slots.sort_by(|a, b| {
        a.atom
            .timestamp
            .cmp(&b.atom.timestamp)
            .then_with(|| a.atom.id.cmp(&b.atom.id))
    });
}

/// Score each slot against at most `max_neighbors` later slots inside the
/// candidate window. Pairs of atoms that already share a molecule are skipped.
pub fn score_pairs(slots: &[Slot<'_>], config: &ConsolidationConfig) -> Vec<AffinityEdge> {
    let window_ms = config.candidate_window_days as i64 * 86_400_000;
    let mut edges = Vec::new();

    for (i, a) in slots.iter().enumerate() {
        let mut scored = 0;
        for (j, b) in slots.iter().enumerate().skip(i + 1) {
            if (b.atom.timestamp - a.atom.timestamp).num_milliseconds() > window_ms
                || scored >= config.max_neighbors
            {
                break;
            }
            if a.owner.is_some() && a.owner == b.owner {
                continue;
            }
            scored += 1;
            edges.push(AffinityEdge {
                i,
                j,
                weight: affinity(a.atom, b.atom, config),
            });
        }
    }
    edges
}

/// A group of free atoms that qualifies as a new molecule.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    /// Arena indices, ascending.
    pub members: Vec<usize>,
    /// Mean weight over the scored pairs inside the cluster.
    pub mean_weight: f32,
}

/// Free atoms that attach to an existing molecule.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    /// Index of the molecule.
    pub molecule: usize,
    /// Arena indices of the joining free atoms, ascending.
    pub members: Vec<usize>,
}

/// What a pass will write.
#[derive(Debug, Clone, Default)]
pub struct ClusterPlan {
    pub clusters: Vec<Cluster>,
    pub joins: Vec<Join>,
    /// Components that were too small or too loose.
    pub below_threshold: usize,
}

/// Group free slots into connected components over edges at or above the
/// edge threshold, then route each component: to the existing molecule it
/// has the highest mean affinity with, else to a new cluster if it is large
/// and dense enough.
pub fn plan_clusters(
    slots: &[Slot<'_>],
    edges: &[AffinityEdge],
    config: &ConsolidationConfig,
) -> ClusterPlan {
    let mut uf: UnionFind<usize> = UnionFind::new(slots.len());
    for e in edges {
        if e.weight >= config.edge_threshold && slots[e.i].owner.is_none() && slots[e.j].owner.is_none() {
            uf.union(e.i, e.j);
        }
    }
    let labels = uf.into_labeling();

    // Components keyed by their smallest member so the plan is deterministic.
    let mut by_label: HashMap<usize, Vec<usize>> = HashMap::new();
    for (index, slot) in slots.iter().enumerate() {
        if slot.owner.is_none() {
            by_label.entry(labels[index]).or_default().push(index);
        }
    }
    let components: BTreeMap<usize, Vec<usize>> = by_label
        .into_values()
        .map(|members| (members[0], members))
        .collect();
    let component_of: HashMap<usize, usize> = components
        .iter()
        .flat_map(|(&key, members)| members.iter().map(move |&m| (m, key)))
        .collect();

    // (component, molecule) -> (sum, count) over qualifying edges.
    let mut links: HashMap<(usize, usize), (f32, usize)> = HashMap::new();
    // component -> (sum, count) over every scored inner pair.
    let mut inner: HashMap<usize, (f32, usize)> = HashMap::new();
    for e in edges {
        let (a, b) = (&slots[e.i], &slots[e.j]);
        match (a.owner, b.owner) {
            (None, None) => {
                let (ca, cb) = (component_of[&e.i], component_of[&e.j]);
                if ca == cb {
                    let acc = inner.entry(ca).or_insert((0.0, 0));
                    acc.0 += e.weight;
                    acc.1 += 1;
                }
            }
            (None, Some(molecule)) | (Some(molecule), None) if e.weight >= config.edge_threshold => {
                let free = if a.owner.is_none() { e.i } else { e.j };
                let acc = links
                    .entry((component_of[&free], molecule))
                    .or_insert((0.0, 0));
                acc.0 += e.weight;
                acc.1 += 1;
            }
            _ => {}
        }
    }

    let mut plan = ClusterPlan::default();
    let mut joins: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (key, members) in components {
        let best = links
            .iter()
            .filter(|((component, _), _)| *component == key)
            .map(|((_, molecule), (sum, count))| (*molecule, sum / *count as f32))
            .max_by(|a, b| a.1.total_cmp(&b.1).then_with(|| b.0.cmp(&a.0)));
        if let Some((molecule, _)) = best {
            joins.entry(molecule).or_default().extend(members);
            continue;
        }

        let mean_weight = inner
            .get(&key)
            .map(|(sum, count)| sum / *count as f32)
            .unwrap_or(0.0);
        if members.len() >= config.min_cluster_size && mean_weight > config.cluster_threshold {
            plan.clusters.push(Cluster {
                members,
                mean_weight,
            });
        } else if members.len() > 1 {
            plan.below_threshold += 1;
        }
    }
    plan.joins = joins
        .into_iter()
        .map(|(molecule, mut members)| {
            members.sort_unstable();
            Join { molecule, members }
        })
        .collect();
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::testing::sample_atom;

    fn config() -> ConsolidationConfig {
        ConsolidationConfig::default()
    }

    fn free(atoms: &[MemoryAtom]) -> Vec<Slot<'_>> {
        let mut slots: Vec<Slot<'_>> = atoms.iter().map(|atom| Slot { atom, owner: None }).collect();
        arrange(&mut slots);
        slots
    }

    #[test]
    fn test_affinity_formula() {
        let a = sample_atom("a", 0);
        let mut b = sample_atom("b", 24);
        assert!((affinity(&a, &b, &config()) - (0.7 + 0.3 * (-0.1f32).exp())).abs() < 1e-5);

        b.embedding = vec![0.0, 0.0, 1.0];
        assert!((affinity(&a, &b, &config()) - 0.3 * (-0.1f32).exp()).abs() < 1e-5);
    }

    #[test]
    fn test_scoring_is_bounded() {
        let atoms: Vec<MemoryAtom> = (0..10).map(|h| sample_atom(&format!("a{}", h), h)).collect();
        let slots = free(&atoms);
        let bounded = ConsolidationConfig {
            max_neighbors: 2,
            ..config()
        };
        let edges = score_pairs(&slots, &bounded);
        // 8 atoms with two forward neighbours, one with one, the last with none.
        assert_eq!(edges.len(), 8 * 2 + 1);
        assert!(edges.iter().all(|e| e.j > e.i && e.j - e.i <= 2));

        let far = vec![sample_atom("x", 0), sample_atom("y", 24 * 30)];
        assert!(score_pairs(&free(&far), &config()).is_empty());
    }

    #[test]
    fn test_dense_component_becomes_cluster() {
        let mut atoms: Vec<MemoryAtom> = (0..4).map(|h| sample_atom(&format!("a{}", h), h)).collect();
        let mut outlier = sample_atom("z", 2);
        outlier.embedding = vec![0.0, 0.0, 1.0];
        atoms.push(outlier);

        let slots = free(&atoms);
        let edges = score_pairs(&slots, &config());
        let plan = plan_clusters(&slots, &edges, &config());

        assert_eq!(plan.clusters.len(), 1);
        let ids: Vec<&str> = plan.clusters[0]
            .members
            .iter()
            .map(|&i| slots[i].atom.id.as_str())
            .collect();
        assert_eq!(ids, vec!["a0", "a1", "a2", "a3"]);
        assert!(plan.clusters[0].mean_weight > 0.99);
        assert!(plan.joins.is_empty());
    }

    #[test]
    fn test_free_atoms_join_existing_molecule() {
        let members = vec![sample_atom("m1", 0), sample_atom("m2", 1)];
        let newcomers = vec![sample_atom("n1", 5)];
        let mut slots: Vec<Slot<'_>> = members
            .iter()
            .map(|atom| Slot { atom, owner: Some(0) })
            .chain(newcomers.iter().map(|atom| Slot { atom, owner: None }))
            .collect();
        arrange(&mut slots);

        let edges = score_pairs(&slots, &config());
        // The two members are not scored against each other.
        assert_eq!(edges.len(), 2);
        let plan = plan_clusters(&slots, &edges, &config());
        assert!(plan.clusters.is_empty());
        assert_eq!(plan.joins.len(), 1);
        assert_eq!(plan.joins[0].molecule, 0);
        assert_eq!(slots[plan.joins[0].members[0]].atom.id, "n1");
    }

    #[test]
    fn test_singletons_are_left_alone() {
        let atoms = vec![sample_atom("solo", 0)];
        let slots = free(&atoms);
        let plan = plan_clusters(&slots, &score_pairs(&slots, &config()), &config());
        assert!(plan.clusters.is_empty());
        assert_eq!(plan.below_threshold, 0);
    }
}
