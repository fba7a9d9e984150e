//! B-Tree implementation
//!
//! This is the in-memory index which buffers items between flushes.
//!

use std::ops::ControlFlow;

use anyhow::Result;
use thiserror::Error;

use super::iter::Iter;
use super::node::Node;
use crate::record::{Item, Row};

/// Minimum degree used when none is specified.
pub const DEFAULT_DEGREE: usize = 32;

/// Index specific errors.
#[derive(Error, Debug)]
pub enum IndexError {
    /// Supplied minimum degree too small
    #[error("degree: {0} must be >=2")]
    DegreeTooSmall(usize),

    /// A structural invariant does not hold
    #[error("invariant violated: {0}")]
    Invariant(String),
}

/// An in-memory B-Tree mapping primary key to row.
///
/// Every node except the root holds between `degree - 1` and `2 * degree - 1` items.
#[derive(Clone, Debug)]
pub struct Index {
    root: Node,
    degree: usize,
    len: usize,
}

impl Default for Index {
    fn default() -> Self {
        Self {
            root: Node::root(),
            degree: DEFAULT_DEGREE,
            len: 0,
        }
    }
}

impl Index {
    /// Create a new, empty index with the specified minimum degree.
    pub fn try_new(degree: usize) -> Result<Self> {
        if degree < 2 {
            return Err(IndexError::DegreeTooSmall(degree).into());
        }
        tracing::debug!(degree, "Creating index");
        Ok(Self {
            root: Node::root(),
            degree,
            len: 0,
        })
    }

    /// Insert an item, replacing any item with the same key. Returns the replaced item.
    pub fn upsert(&mut self, item: Item) -> Option<Item> {
        if self.root.is_full(self.degree) {
            // Split before descending, so the insert always lands in a non-full node
            let old_root = std::mem::replace(&mut self.root, Node::root());
            self.root = Node::grow(old_root, self.degree);
        }
        let old = self.root.insert_non_full(self.degree, item);
        if old.is_none() {
            self.len += 1;
        }
        old
    }

    /// Get the row for a key.
    pub fn get(&self, pk: i64) -> Option<&Row> {
        let mut node = &self.root;
        loop {
            match node.search(pk) {
                Ok(pos) => return Some(&node.items()[pos].row),
                Err(pos) => node = node.children().get(pos)?,
            }
        }
    }

    /// Does the index contain this key?
    pub fn contains(&self, pk: i64) -> bool {
        self.get(pk).is_some()
    }

    /// Return an iterator over all items in ascending key order.
    pub fn iter_ascend(&self) -> Iter<'_> {
        Iter::new(&self.root, self.len)
    }

    /// Visit items with `lo <= pk < hi` in ascending order until the callback returns break.
    ///
    /// Traversal stops at the first key `>= hi` it meets. On a well formed tree that is
    /// exactly the end of the range.
    pub fn ascend_range(&self, lo: i64, hi: i64, mut f: impl FnMut(&Item) -> ControlFlow<()>) {
        let _ = self.root.ascend_range(lo, hi, &mut f);
    }

    /// Return count of items.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Is the index empty?
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Return the minimum degree.
    pub fn degree(&self) -> usize {
        self.degree
    }

    /// Number of levels, counting a lone root leaf as 1.
    pub fn height(&self) -> usize {
        let mut height = 1;
        let mut node = &self.root;
        while let Some(child) = node.children().first() {
            height += 1;
            node = child;
        }
        height
    }

    /// Return the smallest key.
    pub fn first_key(&self) -> Option<i64> {
        let mut node = &self.root;
        while let Some(child) = node.children().first() {
            node = child;
        }
        node.items().first().map(|item| item.pk)
    }

    /// Return the largest key.
    pub fn last_key(&self) -> Option<i64> {
        let mut node = &self.root;
        while let Some(child) = node.children().last() {
            node = child;
        }
        node.items().last().map(|item| item.pk)
    }

    /// Log basic information about our index.
    pub fn info(&self) {
        tracing::info!(
            degree = self.degree,
            height = self.height(),
            items = self.len,
            first = ?self.first_key(),
            last = ?self.last_key(),
            "Index"
        );
    }

    /// Verify all the nodes in the tree.
    pub fn verify(&self) -> Result<()> {
        let mut leaf_depth = None;
        let count = self.verify_node(&self.root, 1, None, None, &mut leaf_depth)?;
        if count != self.len {
            return Err(invariant(format!("counted {count} items, len is {}", self.len)));
        }
        Ok(())
    }

    fn verify_node(
        &self,
        node: &Node,
        depth: usize,
        lower: Option<i64>,
        upper: Option<i64>,
        leaf_depth: &mut Option<usize>,
    ) -> Result<usize> {
        let items = node.items();
        let is_root = depth == 1;
        if items.len() > 2 * self.degree - 1 {
            return Err(invariant(format!("node at depth {depth} holds {}", items.len())));
        }
        if !is_root && items.len() < self.degree - 1 {
            return Err(invariant(format!("node at depth {depth} holds {}", items.len())));
        }
        for pair in items.windows(2) {
            if pair[0].pk >= pair[1].pk {
                return Err(invariant(format!("{} precedes {}", pair[0].pk, pair[1].pk)));
            }
        }
        if let (Some(lower), Some(first)) = (lower, items.first()) {
            if first.pk <= lower {
                return Err(invariant(format!("{} not above separator {lower}", first.pk)));
            }
        }
        if let (Some(upper), Some(last)) = (upper, items.last()) {
            if last.pk >= upper {
                return Err(invariant(format!("{} not below separator {upper}", last.pk)));
            }
        }

        if node.is_leaf() {
            match *leaf_depth {
                Some(d) if d != depth => {
                    return Err(invariant(format!("leaves at depths {d} and {depth}")));
                }
                _ => *leaf_depth = Some(depth),
            }
            return Ok(items.len());
        }

        let children = node.children();
        if children.len() != items.len() + 1 {
            return Err(invariant(format!(
                "{} items with {} children",
                items.len(),
                children.len()
            )));
        }
        let mut count = items.len();
        for (pos, child) in children.iter().enumerate() {
            let lo = if pos == 0 {
                lower
            } else {
                Some(items[pos - 1].pk)
            };
            let hi = items.get(pos).map(|item| item.pk).or(upper);
            count += self.verify_node(child, depth + 1, lo, hi, leaf_depth)?;
        }
        Ok(count)
    }
}

fn invariant(msg: String) -> anyhow::Error {
    IndexError::Invariant(msg).into()
}
