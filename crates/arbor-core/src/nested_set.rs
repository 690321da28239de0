//! Nested-set interval arithmetic.
//!
//! A tree is encoded by giving every node an interval `[left, right]`
//! such that a node's interval strictly contains the intervals of all its
//! descendants. Within one tree the endpoints are exactly `1..=2n`.
//!
//! The planners below compute layout changes in memory. `arbor-db`
//! executes them as bulk `UPDATE`s inside the same transaction that
//! carries the root's generation check.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval {
    pub left: i64,
    pub right: i64,
}

impl Interval {
    /// Layout of a freshly created root.
    pub const ROOT: Interval = Interval { left: 1, right: 2 };

    pub fn new(left: i64, right: i64) -> Self {
        Self { left, right }
    }

    /// Number of endpoints occupied by this node and its subtree.
    pub fn width(&self) -> i64 {
        self.right - self.left + 1
    }

    /// Strict containment, i.e. `self` is an ancestor of `other`.
    pub fn contains(&self, other: &Interval) -> bool {
        self.left < other.left && other.right < self.right
    }

    /// Inclusive containment (`BETWEEN`), i.e. `other` is in the subtree
    /// rooted at `self`, `self` included.
    pub fn encloses(&self, other: &Interval) -> bool {
        self.left <= other.left && other.right <= self.right
    }

    pub fn has_children(&self) -> bool {
        self.right - self.left > 1
    }
}

/// Where a new child goes and how the rest of the tree moves to make room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertionPlan {
    /// Endpoints strictly greater than this shift right by two.
    pub point: i64,
    pub child: Interval,
}

impl InsertionPlan {
    /// Appends as the rightmost child, or as the first child of a leaf.
    pub fn for_parent(parent: Interval) -> Self {
        let point = if parent.has_children() {
            parent.right - 1
        } else {
            parent.left
        };
        Self {
            point,
            child: Interval::new(point + 1, point + 2),
        }
    }

    pub const SHIFT: i64 = 2;

    /// Position of an existing node after the insertion.
    pub fn shift(&self, node: Interval) -> Interval {
        Interval {
            left: if node.left > self.point {
                node.left + Self::SHIFT
            } else {
                node.left
            },
            right: if node.right > self.point {
                node.right + Self::SHIFT
            } else {
                node.right
            },
        }
    }
}

/// Everything removed by deleting one node, and how the survivors close
/// the gap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalPlan<K> {
    pub target: Interval,
    /// The target and all its descendants.
    pub subtree: Vec<K>,
    /// Endpoints greater than `target.right` shrink by this much.
    pub width: i64,
    /// True when the target is the root, so the whole tree goes.
    pub removes_root: bool,
}

impl<K: Clone> RemovalPlan<K> {
    /// Plans the removal of `target` from a tree given as `(key, interval)`
    /// pairs. `tree` may include nodes outside the subtree; they are
    /// filtered by containment.
    pub fn plan<'a, I>(target: Interval, tree: I) -> Self
    where
        I: IntoIterator<Item = (&'a K, Interval)>,
        K: 'a,
    {
        let subtree = tree
            .into_iter()
            .filter(|(_, iv)| target.encloses(iv))
            .map(|(k, _)| k.clone())
            .collect();
        Self {
            target,
            subtree,
            width: target.width(),
            removes_root: target.left == Interval::ROOT.left,
        }
    }

    pub fn boundary(&self) -> i64 {
        self.target.right
    }

    /// Position of a surviving node after the removal.
    pub fn shift(&self, node: Interval) -> Interval {
        let boundary = self.boundary();
        Interval {
            left: if node.left > boundary {
                node.left - self.width
            } else {
                node.left
            },
            right: if node.right > boundary {
                node.right - self.width
            } else {
                node.right
            },
        }
    }
}

/// Checks that `nodes` form one well-formed tree: endpoints are exactly
/// `1..=2n`, the first endpoint belongs to a node enclosing all others,
/// and any two intervals are either disjoint or strictly nested.
pub fn is_well_formed(nodes: &[Interval]) -> bool {
    if nodes.is_empty() {
        return true;
    }
    let mut endpoints: Vec<i64> = nodes.iter().flat_map(|n| [n.left, n.right]).collect();
    endpoints.sort_unstable();
    let dense = endpoints
        .iter()
        .enumerate()
        .all(|(i, &e)| e == i as i64 + 1);
    if !dense || nodes.iter().any(|n| n.left >= n.right) {
        return false;
    }
    let Some(root) = nodes.iter().find(|n| n.left == 1) else {
        return false;
    };
    if root.right != 2 * nodes.len() as i64 {
        return false;
    }
    nodes.iter().enumerate().all(|(i, a)| {
        nodes[i + 1..].iter().all(|b| {
            let disjoint = a.right < b.left || b.right < a.left;
            disjoint || a.contains(b) || b.contains(a)
        })
    })
}
