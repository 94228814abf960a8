//! Disjoint transaction planning
//!
//! Partitions a candidate set into dependency-closed, pairwise-disjoint
//! transactions. Pure: the dependency map is computed by the caller, and the
//! policy for unresolved changes (grace window, rejection) is applied by the
//! pool.

use crate::error::PatchError;
use crate::graph::DependencyMap;
use crate::types::{Change, ChangeId};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

/// Planner options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanOptions {
    /// Longest transaction to keep; longer non-cyclic ones are truncated
    pub max_txn_length: Option<usize>,
    /// Put changes of the same project into the same transaction
    pub merge_projects: bool,
}

/// A dependency-closed group of changes, dependencies first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Members in submission order
    pub changes: Vec<ChangeId>,
    /// Contains at least one dependency cycle
    pub cyclic: bool,
}

impl Transaction {
    /// Number of members
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// No members
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Output of [`create_disjoint_transactions`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionPlan {
    /// Disjoint transactions, ordered by their first candidate
    pub transactions: Vec<Transaction>,
    /// Changes whose closure reaches outside the candidate set
    ///
    /// Each error is a `Dependency` wrapping `NotEligible` for the missing
    /// change. The caller decides between a silent retry and rejection.
    pub unresolved: Vec<PatchError>,
    /// Members of cyclic transactions longer than the limit
    pub too_long: Vec<PatchError>,
    /// Changes cut from the tail of truncated transactions
    pub dropped: Vec<ChangeId>,
}

impl TransactionPlan {
    /// All changes planned into some transaction
    pub fn planned(&self) -> impl Iterator<Item = &ChangeId> {
        self.transactions.iter().flat_map(|t| t.changes.iter())
    }
}

/// Group `candidates` into disjoint transactions
///
/// The plan of a change is the change itself plus its closure in `deps`.
/// Overlapping plans merge into one transaction. The output depends only on
/// the inputs, so planning the same round twice yields the same result.
pub fn create_disjoint_transactions(
    candidates: &[Change],
    deps: &DependencyMap,
    options: PlanOptions,
) -> TransactionPlan {
    let position: HashMap<&ChangeId, usize> = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| (&c.id, i))
        .collect();

    let mut plan = TransactionPlan::default();
    let mut resolved: Vec<usize> = Vec::new();

    for (i, change) in candidates.iter().enumerate() {
        match deps.dependencies_of(&change.id).find(|d| !position.contains_key(d)) {
            Some(missing) => {
                debug!(change = %change.id, missing = %missing, "Unresolved dependency");
                plan.unresolved.push(PatchError::dependency(
                    change.id.clone(),
                    PatchError::NotEligible {
                        change: missing.clone(),
                    },
                ));
            }
            None => resolved.push(i),
        }
    }

    let mut groups = UnionFind::new(candidates.len());
    for &i in &resolved {
        for dep in deps.dependencies_of(&candidates[i].id) {
            groups.union(i, position[dep]);
        }
    }
    if options.merge_projects {
        let mut first_of_project: HashMap<&str, usize> = HashMap::new();
        for &i in &resolved {
            let first = *first_of_project
                .entry(candidates[i].project.as_str())
                .or_insert(i);
            groups.union(first, i);
        }
    }

    let mut members: HashMap<usize, Vec<usize>> = HashMap::new();
    for &i in &resolved {
        members.entry(groups.find(i)).or_default().push(i);
    }

    let mut ordered: Vec<Vec<usize>> = members.into_values().collect();
    for group in &mut ordered {
        group.sort_by_key(|&i| (closure_len(deps, &candidates[i].id), i));
    }
    ordered.sort_by_key(|group| group.iter().min().copied());

    for group in ordered {
        let ids: Vec<ChangeId> = group.iter().map(|&i| candidates[i].id.clone()).collect();
        let cyclic = ids.iter().any(|id| deps.is_cyclic(id));
        let mut txn = Transaction {
            changes: ids,
            cyclic,
        };

        if let Some(limit) = options.max_txn_length {
            if txn.len() > limit {
                if txn.cyclic {
                    warn!(
                        size = txn.len(),
                        limit, "Cyclic transaction exceeds limit; rejecting all members"
                    );
                    plan.too_long
                        .extend(txn.changes.iter().map(|id| PatchError::TransactionTooLong {
                            change: id.clone(),
                            size: txn.len(),
                            limit,
                        }));
                    continue;
                }
                debug!(size = txn.len(), limit, "Truncating transaction");
                plan.dropped.extend(txn.changes.drain(limit..));
            }
        }

        if !txn.is_empty() {
            plan.transactions.push(txn);
        }
    }

    plan
}

/// Size of the closure of `id`, counting only members that exist in `deps`
fn closure_len(deps: &DependencyMap, id: &ChangeId) -> usize {
    deps.get(id).map_or(0, BTreeSet::len)
}

/// Disjoint-set forest over candidate indices
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra.max(rb)] = ra.min(rb);
        }
    }
}
