// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use crate::codec::node::Node;

/// Depth-first, children before parents. Explicit stack, no recursion.
///
/// Yields `(level, node)` with the traversal root at level 0; a node's
/// parent is whatever was most recently yielded at `level - 1` after it,
/// which is all the back-reference the codec ever needs.
pub struct Dfs<'a> {
    stack: Vec<(usize, &'a Node, usize)>,
}

impl<'a> Iterator for Dfs<'a> {
    type Item = (usize, &'a Node);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let top = self.stack.last_mut()?;
            let node: &'a Node = top.1;
            let level = top.0;
            if top.2 < node.children().len() {
                let child = &node.children()[top.2];
                top.2 += 1;
                self.stack.push((level + 1, child, 0));
            } else {
                self.stack.pop();
                return Some((level, node));
            }
        }
    }
}

/// Depth-first, parents before children. Explicit stack, no recursion.
pub struct DfsR<'a> {
    stack: Vec<(usize, &'a Node)>,
}

impl<'a> Iterator for DfsR<'a> {
    type Item = (usize, &'a Node);

    fn next(&mut self) -> Option<Self::Item> {
        let (level, node) = self.stack.pop()?;
        for child in node.children().iter().rev() {
            self.stack.push((level + 1, child));
        }
        Some((level, node))
    }
}

impl Node {
    /// Leaves-first traversal of this subtree.
    pub fn dfs(&self) -> Dfs<'_> {
        Dfs {
            stack: vec![(0, self, 0)],
        }
    }

    /// Root-first traversal of this subtree.
    pub fn dfs_root_first(&self) -> DfsR<'_> {
        DfsR {
            stack: vec![(0, self)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::node::{NodeType, tag};

    fn sample() -> Node {
        // Sequence(Integer(1), Set(Boolean(true)), Null)
        Node::sequence()
            .with_child(Node::integer(1))
            .with_child(Node::set().with_child(Node::boolean(true)))
            .with_child(Node::null())
    }

    #[test]
    fn root_first_order_and_levels() {
        let root = sample();
        let seen: Vec<(usize, NodeType)> = root
            .dfs_root_first()
            .map(|(level, n)| (level, n.header.node_type))
            .collect();
        assert_eq!(seen, vec![
            (0, NodeType::Universal(tag::SEQUENCE)),
            (1, NodeType::Universal(tag::INTEGER)),
            (1, NodeType::Universal(tag::SET)),
            (2, NodeType::Universal(tag::BOOLEAN)),
            (1, NodeType::Universal(tag::NULL)),
        ]);
    }

    #[test]
    fn leaves_first_order() {
        let root = sample();
        let seen: Vec<NodeType> =
            root.dfs().map(|(_, n)| n.header.node_type).collect();
        assert_eq!(seen, vec![
            NodeType::Universal(tag::INTEGER),
            NodeType::Universal(tag::BOOLEAN),
            NodeType::Universal(tag::SET),
            NodeType::Universal(tag::NULL),
            NodeType::Universal(tag::SEQUENCE),
        ]);
    }
}
