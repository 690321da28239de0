//! Set reconciliation for many-to-many edges and permission grants, and
//! the orphan check that guards user deletion.

use std::collections::BTreeSet;

use crate::error::{ArborError, ArborResult};
use crate::models::permission::Permission;

/// Resolved edge changes, deduplicated and free of conflicts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled<K> {
    pub add: Vec<K>,
    pub remove: Vec<K>,
}

impl<K> Reconciled<K> {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// Takes `(key, identifier)` pairs that were already resolved and rejects
/// any key that appears in both lists. Two different identifiers that
/// resolve to the same entity count as the same key.
pub fn reconcile<K: Ord + Clone>(
    add: &[(K, String)],
    remove: &[(K, String)],
) -> ArborResult<Reconciled<K>> {
    let adding: BTreeSet<&K> = add.iter().map(|(k, _)| k).collect();
    if let Some((_, identifier)) = remove.iter().find(|(k, _)| adding.contains(k)) {
        return Err(ArborError::invalid(
            "identifier",
            format!("'{identifier}' requested in both add and remove"),
        ));
    }
    Ok(Reconciled {
        add: dedup(add),
        remove: dedup(remove),
    })
}

fn dedup<K: Ord + Clone>(items: &[(K, String)]) -> Vec<K> {
    let mut seen = BTreeSet::new();
    items
        .iter()
        .filter(|(k, _)| seen.insert(k.clone()))
        .map(|(k, _)| k.clone())
        .collect()
}

/// Net permission changes for a role update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionDelta {
    pub add: BTreeSet<Permission>,
    pub remove: BTreeSet<Permission>,
}

impl PermissionDelta {
    /// An add is a no-op if already granted or also requested for removal.
    /// A remove is a no-op unless currently granted.
    pub fn classify(
        current: &BTreeSet<Permission>,
        add: &[Permission],
        remove: &[Permission],
    ) -> Self {
        let removing: BTreeSet<Permission> = remove.iter().copied().collect();
        Self {
            add: add
                .iter()
                .copied()
                .filter(|p| !current.contains(p) && !removing.contains(p))
                .collect(),
            remove: removing
                .into_iter()
                .filter(|p| current.contains(p))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }

    /// The resulting grant set, computed from the pre-image.
    pub fn apply(&self, current: &BTreeSet<Permission>) -> BTreeSet<Permission> {
        current
            .iter()
            .filter(|p| !self.remove.contains(p))
            .chain(self.add.iter())
            .copied()
            .collect()
    }
}

/// Occupancy of one root organization the departing user belongs to.
#[derive(Debug, Clone)]
pub struct RootOccupancy<K> {
    pub root: K,
    /// Used in the refusal message.
    pub label: String,
    /// Other users that are direct members anywhere in the tree.
    pub others_in_tree: u64,
    /// Other users that are direct members of the root itself.
    pub others_in_root: u64,
}

/// Decides what happens to each root when a user is deleted. Returns the
/// roots whose whole tree must be removed with the user, or
/// `OrphanedOrganization` for the first tree that would keep users but
/// lose every root member.
pub fn plan_user_removal<K: Clone>(roots: &[RootOccupancy<K>]) -> ArborResult<Vec<K>> {
    let mut cascade = Vec::new();
    for occupancy in roots {
        if occupancy.others_in_tree == 0 {
            cascade.push(occupancy.root.clone());
        } else if occupancy.others_in_root == 0 {
            return Err(ArborError::OrphanedOrganization {
                organization: occupancy.label.clone(),
            });
        }
    }
    Ok(cascade)
}
