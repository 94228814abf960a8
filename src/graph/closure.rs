//! Cycle-condensing transitive closure
//!
//! Strongly connected components are found with an iterative Tarjan walk.
//! Tarjan emits components dependencies-first, so the closure of each
//! component is built exactly once from the already-solved closures of the
//! components it points at. That memo is what keeps chains of diamonds
//! polynomial.

use crate::types::ChangeId;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Transitive, cycle-condensed dependencies of a set of changes
///
/// Sparse: changes without dependencies have no entry. A change never
/// appears in its own set, and all members of a cycle share the same set
/// apart from themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyMap {
    closures: HashMap<ChangeId, BTreeSet<ChangeId>>,
    direct: HashMap<ChangeId, Vec<ChangeId>>,
    cyclic: HashSet<ChangeId>,
}

impl DependencyMap {
    /// Condense `direct` edges (change -> its direct dependencies)
    ///
    /// `order` fixes the traversal order; ids reachable only as dependencies
    /// are treated as leaves.
    pub fn from_edges(order: &[ChangeId], direct: HashMap<ChangeId, Vec<ChangeId>>) -> Self {
        let mut closures = HashMap::new();
        let mut cyclic = HashSet::new();
        {
            let roots = order.iter().chain(direct.keys());
            let sccs = strongly_connected_components(roots, &direct);
            condense(&sccs, &direct, &mut closures, &mut cyclic);
        }

        Self {
            closures,
            direct,
            cyclic,
        }
    }

    /// Transitive dependencies of `id`, if it has any
    pub fn get(&self, id: &ChangeId) -> Option<&BTreeSet<ChangeId>> {
        self.closures.get(id)
    }

    /// Transitive dependencies of `id` (empty if none)
    pub fn dependencies_of<'a>(&'a self, id: &ChangeId) -> impl Iterator<Item = &'a ChangeId> {
        self.closures.get(id).into_iter().flatten()
    }

    /// Direct dependencies of `id`, as looked up
    pub fn direct_dependencies(&self, id: &ChangeId) -> &[ChangeId] {
        successors(&self.direct, id)
    }

    /// Whether `id` is part of a dependency cycle
    pub fn is_cyclic(&self, id: &ChangeId) -> bool {
        self.cyclic.contains(id)
    }

    /// Every change whose closure contains `id`
    pub fn dependents_of(&self, id: &ChangeId) -> BTreeSet<ChangeId> {
        self.closures
            .iter()
            .filter(|(_, deps)| deps.contains(id))
            .map(|(change, _)| change.clone())
            .collect()
    }

    /// Number of changes with at least one dependency
    pub fn len(&self) -> usize {
        self.closures.len()
    }

    /// No change has any dependency
    pub fn is_empty(&self) -> bool {
        self.closures.is_empty()
    }

    /// Iterate over `(change, closure)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&ChangeId, &BTreeSet<ChangeId>)> {
        self.closures.iter()
    }
}

fn successors<'a>(edges: &'a HashMap<ChangeId, Vec<ChangeId>>, id: &ChangeId) -> &'a [ChangeId] {
    edges.get(id).map_or(&[], Vec::as_slice)
}

/// Build one closure per component, reusing the closures of components
/// already solved
fn condense(
    sccs: &[Vec<&ChangeId>],
    direct: &HashMap<ChangeId, Vec<ChangeId>>,
    closures: &mut HashMap<ChangeId, BTreeSet<ChangeId>>,
    cyclic: &mut HashSet<ChangeId>,
) {
    let mut component_sets: Vec<BTreeSet<ChangeId>> = Vec::with_capacity(sccs.len());
    let mut component_of: HashMap<&ChangeId, usize> = HashMap::new();

    for scc in sccs {
        let members: HashSet<&ChangeId> = scc.iter().copied().collect();
        let mut set = BTreeSet::new();
        for member in scc {
            for dep in successors(direct, member) {
                set.insert(dep.clone());
                if members.contains(dep) {
                    continue;
                }
                if let Some(&solved) = component_of.get(dep) {
                    set.extend(component_sets[solved].iter().cloned());
                }
            }
        }

        if scc.len() > 1 {
            cyclic.extend(scc.iter().map(|m| (*m).clone()));
        }
        for &member in scc {
            let mut own = set.clone();
            own.remove(member);
            if !own.is_empty() {
                closures.insert(member.clone(), own);
            }
            component_of.insert(member, component_sets.len());
        }
        component_sets.push(set);
    }
}

/// Iterative Tarjan; components come out dependencies-first
fn strongly_connected_components<'a>(
    roots: impl Iterator<Item = &'a ChangeId>,
    edges: &'a HashMap<ChangeId, Vec<ChangeId>>,
) -> Vec<Vec<&'a ChangeId>> {
    let mut index: HashMap<&ChangeId, usize> = HashMap::new();
    let mut low: HashMap<&ChangeId, usize> = HashMap::new();
    let mut on_stack: HashSet<&ChangeId> = HashSet::new();
    let mut stack: Vec<&ChangeId> = Vec::new();
    let mut sccs = Vec::new();
    let mut next = 0usize;

    for root in roots {
        if index.contains_key(root) {
            continue;
        }
        index.insert(root, next);
        low.insert(root, next);
        next += 1;
        stack.push(root);
        on_stack.insert(root);

        let mut work: Vec<(&ChangeId, usize)> = vec![(root, 0)];
        while let Some(frame) = work.last_mut() {
            let node = frame.0;
            let deps = successors(edges, node);

            if frame.1 < deps.len() {
                let dep = &deps[frame.1];
                frame.1 += 1;
                if let Some(&dep_index) = index.get(dep) {
                    if on_stack.contains(dep) {
                        let lowest = low[node].min(dep_index);
                        low.insert(node, lowest);
                    }
                } else {
                    index.insert(dep, next);
                    low.insert(dep, next);
                    next += 1;
                    stack.push(dep);
                    on_stack.insert(dep);
                    work.push((dep, 0));
                }
                continue;
            }

            work.pop();
            let node_low = low[node];
            if let Some(&(parent, _)) = work.last() {
                let lowest = low[parent].min(node_low);
                low.insert(parent, lowest);
            }
            if node_low == index[node] {
                let mut scc = Vec::new();
                while let Some(member) = stack.pop() {
                    on_stack.remove(member);
                    scc.push(member);
                    if member == node {
                        break;
                    }
                }
                sccs.push(scc);
            }
        }
    }

    sccs
}
