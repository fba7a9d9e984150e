use std::iter::FusedIterator;

use super::node::Node;
use crate::record::Item;

/// Ascending iterator over the items of an [`Index`](super::Index).
///
/// Traversal keeps an explicit stack of frames rather than recursing, so stack use does not
/// grow with tree height. The iterator borrows the index, which therefore cannot be modified
/// while it is live. It is not restartable: call
/// [`iter_ascend`](super::Index::iter_ascend) again to start over.
#[derive(Debug)]
pub struct Iter<'a> {
    stack: Vec<Frame<'a>>,
    remaining: usize,
}

#[derive(Debug)]
struct Frame<'a> {
    node: &'a Node,
    pos: usize,
}

impl<'a> Iter<'a> {
    pub(crate) fn new(root: &'a Node, len: usize) -> Self {
        let mut iter = Self {
            stack: Vec::new(),
            remaining: len,
        };
        iter.push_left(root);
        iter
    }

    /// Push `node` and the leftmost path beneath it.
    fn push_left(&mut self, mut node: &'a Node) {
        loop {
            self.stack.push(Frame { node, pos: 0 });
            match node.children().first() {
                Some(child) => node = child,
                None => return,
            }
        }
    }
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Item;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(frame) = self.stack.last_mut() {
            let node = frame.node;
            let pos = frame.pos;
            match node.items().get(pos) {
                Some(item) => {
                    frame.pos += 1;
                    // Everything in children[pos + 1] sorts between this item and the next
                    if let Some(child) = node.children().get(pos + 1) {
                        self.push_left(child);
                    }
                    self.remaining = self.remaining.saturating_sub(1);
                    return Some(item);
                }
                None => {
                    self.stack.pop();
                }
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Iter<'_> {}

impl FusedIterator for Iter<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::Index;
    use crate::record::Row;

    #[test]
    fn it_iterates_an_empty_tree() {
        let index = Index::default();
        let mut iter = index.iter_ascend();
        assert_eq!(iter.len(), 0);
        assert!(iter.next().is_none());
        assert!(iter.next().is_none());
    }

    #[test]
    fn it_keeps_frames_bounded_by_height() {
        let mut index = Index::try_new(2).expect("creates index");
        for pk in 0..1_000 {
            index.upsert(Item::new(pk, Row::new()));
        }
        let mut iter = index.iter_ascend();
        let mut deepest = iter.stack.len();
        let mut expected = 0;
        while let Some(item) = iter.next() {
            assert_eq!(item.pk, expected);
            expected += 1;
            deepest = deepest.max(iter.stack.len());
        }
        assert_eq!(expected, 1_000);
        assert!(deepest <= index.height());
    }
}
