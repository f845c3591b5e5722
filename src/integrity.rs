use std::collections::{HashMap, HashSet};

use sea_orm::{ConnectionTrait, EntityTrait};
use serde::{Deserialize, Serialize};

use crate::error::ClosureTableError;
use crate::store::{ClosureRow, ClosureStore};
use crate::traits::TreeNode;

/// Differences between the stored closure rows and the rows implied by the
/// parent pointers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport<Id> {
    /// Implied by the parent pointers but absent from the table.
    pub missing: Vec<ClosureRow<Id>>,
    /// Stored but not implied by the parent pointers.
    pub unexpected: Vec<ClosureRow<Id>>,
    /// Nodes whose ancestor chain loops back on itself.
    pub cycles: Vec<Id>,
    /// Nodes whose parent id does not exist.
    pub dangling: Vec<Id>,
}

impl<Id> IntegrityReport<Id> {
    pub fn is_consistent(&self) -> bool {
        self.missing.is_empty()
            && self.unexpected.is_empty()
            && self.cycles.is_empty()
            && self.dangling.is_empty()
    }
}

/// Compare the closure table against the parent pointers without modifying
/// either.
pub async fn verify<M, C>(conn: &C) -> Result<IntegrityReport<M::Id>, ClosureTableError>
where
    M: TreeNode,
    C: ConnectionTrait,
{
    let parents = M::Entity::find()
        .all(conn)
        .await?
        .into_iter()
        .map(|node| (node.id(), node.parent_id()))
        .collect::<HashMap<_, _>>();

    let (expected, cycles, dangling) = expected_rows::<M::Id>(&parents);
    let stored = ClosureStore::<M>::new()
        .rows(conn)
        .await?
        .into_iter()
        .collect::<HashSet<_>>();

    let report = IntegrityReport {
        missing: expected.difference(&stored).cloned().collect(),
        unexpected: stored.difference(&expected).cloned().collect(),
        cycles,
        dangling,
    };

    if !report.is_consistent() {
        tracing::warn!(
            missing = report.missing.len(),
            unexpected = report.unexpected.len(),
            cycles = report.cycles.len(),
            dangling = report.dangling.len(),
            "closure table is inconsistent with the parent pointers"
        );
    }
    Ok(report)
}

type Expected<Id> = (HashSet<ClosureRow<Id>>, Vec<Id>, Vec<Id>);

fn expected_rows<Id>(parents: &HashMap<Id, Option<Id>>) -> Expected<Id>
where
    Id: Clone + Eq + std::hash::Hash,
{
    let mut rows = HashSet::new();
    let mut cycles = Vec::new();
    let mut dangling = HashSet::new();

    for node in parents.keys() {
        let mut seen = HashSet::new();
        let mut current = node.clone();
        let mut depth = 0;

        loop {
            if !seen.insert(current.clone()) {
                cycles.push(node.clone());
                break;
            }
            rows.insert(ClosureRow::new(current.clone(), node.clone(), depth));

            match parents.get(&current) {
                Some(Some(parent)) if parents.contains_key(parent) => {
                    current = parent.clone();
                    depth += 1;
                }
                Some(Some(_)) => {
                    dangling.insert(current.clone());
                    break;
                }
                _ => break,
            }
        }
    }

    (rows, cycles, dangling.into_iter().collect())
}
