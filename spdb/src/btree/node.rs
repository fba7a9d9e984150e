//! B-Tree Node Types

use std::ops::ControlFlow;

use crate::record::Item;

/// A node owns its items and, when internal, its children outright. There are no parent
/// links: every operation walks the tree from the top down.
#[derive(Clone, Debug)]
pub(crate) enum Node {
    Internal(NodeInternal),
    Leaf(NodeLeaf),
}

#[derive(Clone, Debug, Default)]
pub(crate) struct NodeLeaf {
    items: Vec<Item>,
}

/// `children.len() == items.len() + 1`. Keys in `children[i]` sort below `items[i]` and keys
/// in `children[i + 1]` sort above it.
#[derive(Clone, Debug)]
pub(crate) struct NodeInternal {
    items: Vec<Item>,
    children: Vec<Node>,
}

impl Node {
    pub(crate) fn root() -> Self {
        Node::Leaf(NodeLeaf::default())
    }

    /// A new root over a single (full) child, which is split immediately.
    pub(crate) fn grow(child: Node, degree: usize) -> Self {
        let mut root = NodeInternal {
            items: Vec::with_capacity(2 * degree - 1),
            children: vec![child],
        };
        root.split_child(0, degree);
        Node::Internal(root)
    }

    pub(crate) fn items(&self) -> &[Item] {
        match self {
            Node::Internal(node) => &node.items,
            Node::Leaf(node) => &node.items,
        }
    }

    pub(crate) fn children(&self) -> &[Node] {
        match self {
            Node::Internal(node) => &node.children,
            Node::Leaf(_) => &[],
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.items().len()
    }

    pub(crate) fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf(_))
    }

    pub(crate) fn is_full(&self, degree: usize) -> bool {
        self.len() == 2 * degree - 1
    }

    /// `Ok(pos)` if `pk` is held here, otherwise `Err(pos)` of the first larger key.
    pub(crate) fn search(&self, pk: i64) -> Result<usize, usize> {
        self.items().binary_search_by_key(&pk, |item| item.pk)
    }

    /// Insert into a node which is known not to be full. Returns the replaced item, if any.
    pub(crate) fn insert_non_full(&mut self, degree: usize, item: Item) -> Option<Item> {
        match self {
            Node::Leaf(leaf) => match leaf.search(item.pk) {
                Ok(pos) => Some(std::mem::replace(&mut leaf.items[pos], item)),
                Err(pos) => {
                    leaf.items.insert(pos, item);
                    None
                }
            },
            Node::Internal(node) => {
                // An exact match at this level is the authoritative copy
                let mut pos = match node.search(item.pk) {
                    Ok(pos) => return Some(std::mem::replace(&mut node.items[pos], item)),
                    Err(pos) => pos,
                };
                if node.children[pos].is_full(degree) {
                    node.split_child(pos, degree);
                    // The promoted median may be our key, or we may belong to its right
                    match item.pk.cmp(&node.items[pos].pk) {
                        std::cmp::Ordering::Equal => {
                            return Some(std::mem::replace(&mut node.items[pos], item));
                        }
                        std::cmp::Ordering::Greater => pos += 1,
                        std::cmp::Ordering::Less => {}
                    }
                }
                node.children[pos].insert_non_full(degree, item)
            }
        }
    }

    /// Split a full node. Returns the median item and the new right sibling; `self` keeps the
    /// leading `degree - 1` items.
    fn split(&mut self, degree: usize) -> (Item, Node) {
        debug_assert!(self.is_full(degree));
        match self {
            Node::Leaf(leaf) => {
                let mut tail = leaf.items.split_off(degree - 1);
                let median = tail.remove(0);
                (median, Node::Leaf(NodeLeaf { items: tail }))
            }
            Node::Internal(node) => {
                let mut tail = node.items.split_off(degree - 1);
                let median = tail.remove(0);
                let children = node.children.split_off(degree);
                (
                    median,
                    Node::Internal(NodeInternal {
                        items: tail,
                        children,
                    }),
                )
            }
        }
    }

    /// In order visit of `[lo, hi)`.
    ///
    /// Stops as soon as a key `>= hi` is reached, without looking at anything further right.
    pub(crate) fn ascend_range(
        &self,
        lo: i64,
        hi: i64,
        f: &mut impl FnMut(&Item) -> ControlFlow<()>,
    ) -> ControlFlow<()> {
        let items = self.items();
        let children = self.children();
        // Subtrees left of the first key >= lo hold only keys < lo
        let start = items.partition_point(|item| item.pk < lo);
        for (pos, item) in items.iter().enumerate().skip(start) {
            if let Some(child) = children.get(pos) {
                if child.ascend_range(lo, hi, f).is_break() {
                    return ControlFlow::Break(());
                }
            }
            if item.pk >= hi {
                return ControlFlow::Break(());
            }
            if f(item).is_break() {
                return ControlFlow::Break(());
            }
        }
        match children.get(items.len()) {
            Some(child) => child.ascend_range(lo, hi, f),
            None => ControlFlow::Continue(()),
        }
    }
}

impl NodeLeaf {
    fn search(&self, pk: i64) -> Result<usize, usize> {
        self.items.binary_search_by_key(&pk, |item| item.pk)
    }
}

impl NodeInternal {
    fn search(&self, pk: i64) -> Result<usize, usize> {
        self.items.binary_search_by_key(&pk, |item| item.pk)
    }

    /// Split `children[pos]` and pull its median up into `items[pos]`.
    fn split_child(&mut self, pos: usize, degree: usize) {
        let (median, sibling) = self.children[pos].split(degree);
        self.items.insert(pos, median);
        self.children.insert(pos + 1, sibling);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Row;

    fn full_leaf(degree: usize) -> Node {
        let mut node = Node::root();
        for pk in 0..(2 * degree - 1) as i64 {
            node.insert_non_full(degree, Item::new(pk * 10, Row::new()));
        }
        node
    }

    #[test]
    fn it_splits_a_full_leaf() {
        let mut node = full_leaf(3);
        assert!(node.is_full(3));
        let (median, sibling) = node.split(3);
        assert_eq!(median.pk, 20);
        assert_eq!(node.items().iter().map(|i| i.pk).collect::<Vec<_>>(), [0, 10]);
        assert_eq!(sibling.items().iter().map(|i| i.pk).collect::<Vec<_>>(), [30, 40]);
    }

    #[test]
    fn it_grows_a_root() {
        let root = Node::grow(full_leaf(2), 2);
        assert!(!root.is_leaf());
        assert_eq!(root.len(), 1);
        assert_eq!(root.items()[0].pk, 10);
        assert_eq!(root.children().len(), 2);
        assert_eq!(root.children()[0].items()[0].pk, 0);
        assert_eq!(root.children()[1].items()[0].pk, 20);
    }

    #[test]
    fn it_replaces_a_promoted_median() {
        let mut root = Node::grow(full_leaf(2), 2);
        // Fill the right child (keys 20, 30, 40) so the next insert splits it
        root.insert_non_full(2, Item::new(30, Row::new()));
        root.insert_non_full(2, Item::new(40, Row::new()));
        assert!(root.children()[1].is_full(2));
        let old = root.insert_non_full(2, Item::new(30, Row::new()));
        assert_eq!(old.map(|i| i.pk), Some(30));
        // 30 was promoted, not duplicated
        assert_eq!(root.items().iter().map(|i| i.pk).collect::<Vec<_>>(), [10, 30]);
    }
}
