//! Flat comment rows to reply forests, and back.
//!
//! Both directions walk with an explicit stack, so arbitrarily deep reply
//! chains never grow the call stack.

use std::collections::HashMap;

use serde::Serialize;
use utoipa::ToSchema;

use crate::models::{Comment, Id};

/// Replies nested deeper than this are shown but cannot be replied to.
pub const MAX_REPLY_DEPTH: usize = 3;

pub fn can_reply(depth: usize) -> bool {
    depth < MAX_REPLY_DEPTH
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct CommentNode {
    #[serde(flatten)]
    pub comment: Comment,
    pub replies: Vec<CommentNode>,
}

impl CommentNode {
    /// Number of comments in this subtree, the node included.
    pub fn size(&self) -> usize {
        let mut n = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            n += 1;
            stack.extend(node.replies.iter());
        }
        n
    }
}

// The derived drop would recurse once per nesting level.
impl Drop for CommentNode {
    fn drop(&mut self) {
        let mut stack = std::mem::take(&mut self.replies);
        while let Some(mut node) = stack.pop() {
            stack.append(&mut node.replies);
        }
    }
}

/// One entry of a pre-order walk.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatComment<'a> {
    pub depth: usize,
    pub comment: &'a Comment,
}

/// Assemble `comments` (arrival order) into a forest.
///
/// A comment whose parent is missing, lives on another post, or is itself
/// becomes a root. Members of a parent cycle are promoted to roots in arrival
/// order until the cycle is broken. Every input comment appears exactly once.
pub fn build(comments: Vec<Comment>) -> Vec<CommentNode> {
    let n = comments.len();
    let mut index: HashMap<Id, usize> = HashMap::with_capacity(n);
    for (i, c) in comments.iter().enumerate() {
        index.entry(c.id).or_insert(i);
    }

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut roots: Vec<usize> = Vec::new();
    for (i, c) in comments.iter().enumerate() {
        let parent = c
            .parent_id
            .and_then(|pid| index.get(&pid).copied())
            .filter(|&p| p != i && comments[p].post_id == c.post_id);
        match parent {
            Some(p) => children[p].push(i),
            None => roots.push(i),
        }
    }

    // Pre-order from the roots. Whatever stays unvisited hangs off a cycle.
    let mut visited = vec![false; n];
    let mut tree_children: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut order: Vec<usize> = Vec::with_capacity(n);
    let mut forest_roots: Vec<usize> = Vec::with_capacity(roots.len());

    for &r in &roots {
        forest_roots.push(r);
        walk(r, &children, &mut visited, &mut order, &mut tree_children);
    }
    for i in 0..n {
        if !visited[i] {
            tracing::warn!(comment_id = comments[i].id, "comment parent cycle; promoting to root");
            forest_roots.push(i);
            walk(i, &children, &mut visited, &mut order, &mut tree_children);
        }
    }

    // Children always come after their parent in `order`, so building in
    // reverse has every reply ready before its parent needs it.
    let mut slots: Vec<Option<Comment>> = comments.into_iter().map(Some).collect();
    let mut built: Vec<Option<CommentNode>> = (0..n).map(|_| None).collect();
    for &i in order.iter().rev() {
        let replies = tree_children[i]
            .iter()
            .filter_map(|&c| built[c].take())
            .collect();
        if let Some(comment) = slots[i].take() {
            built[i] = Some(CommentNode { comment, replies });
        }
    }
    forest_roots.into_iter().filter_map(|r| built[r].take()).collect()
}

fn walk(
    start: usize,
    children: &[Vec<usize>],
    visited: &mut [bool],
    order: &mut Vec<usize>,
    tree_children: &mut [Vec<usize>],
) {
    visited[start] = true;
    let mut stack = vec![start];
    while let Some(i) = stack.pop() {
        order.push(i);
        for &c in children[i].iter().rev() {
            if !visited[c] {
                visited[c] = true;
                tree_children[i].push(c);
                stack.push(c);
            }
        }
        tree_children[i].reverse();
    }
}

/// Pre-order walk with depths (roots at depth 0).
pub fn flatten(forest: &[CommentNode]) -> Vec<FlatComment<'_>> {
    let mut out = Vec::new();
    let mut stack: Vec<(usize, &CommentNode)> = forest.iter().rev().map(|n| (0, n)).collect();
    while let Some((depth, node)) = stack.pop() {
        out.push(FlatComment { depth, comment: &node.comment });
        stack.extend(node.replies.iter().rev().map(|r| (depth + 1, r)));
    }
    out
}

/// Total number of comments in a forest.
pub fn count(forest: &[CommentNode]) -> usize {
    forest.iter().map(CommentNode::size).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::HashSet;

    fn c(id: Id, parent: Option<Id>) -> Comment {
        on_post(id, parent, 1)
    }

    fn on_post(id: Id, parent: Option<Id>, post_id: Id) -> Comment {
        let base = Utc.with_ymd_and_hms(2024, 9, 1, 12, 0, 0).unwrap();
        Comment {
            id,
            post_id,
            parent_id: parent,
            user_id: 100 + id,
            content: format!("comment {id}"),
            upvotes: 0,
            downvotes: 0,
            created_at: base + Duration::seconds(id),
        }
    }

    fn ids(forest: &[CommentNode]) -> Vec<Id> {
        forest.iter().map(|n| n.comment.id).collect()
    }

    #[test]
    fn nests_replies_in_arrival_order() {
        let forest = build(vec![c(1, None), c(2, Some(1)), c(3, None), c(4, Some(1)), c(5, Some(2))]);
        assert_eq!(ids(&forest), vec![1, 3]);
        assert_eq!(ids(&forest[0].replies), vec![2, 4]);
        assert_eq!(ids(&forest[0].replies[0].replies), vec![5]);
        assert!(forest[1].replies.is_empty());
    }

    #[test]
    fn orphan_is_promoted_to_root() {
        let forest = build(vec![c(1, None), c(2, Some(99)), c(3, Some(2))]);
        assert_eq!(ids(&forest), vec![1, 2]);
        assert_eq!(ids(&forest[1].replies), vec![3]);
    }

    #[test]
    fn cross_post_parent_counts_as_orphan() {
        let forest = build(vec![on_post(1, None, 1), on_post(2, Some(1), 2)]);
        assert_eq!(ids(&forest), vec![1, 2]);
    }

    #[test]
    fn self_parent_and_cycles_are_not_dropped() {
        let forest = build(vec![c(1, Some(1)), c(2, Some(3)), c(3, Some(2))]);
        assert_eq!(count(&forest), 3);
        assert_eq!(ids(&forest), vec![1, 2]);
        assert_eq!(ids(&forest[1].replies), vec![3]);
    }

    #[test]
    fn child_before_parent_still_attaches() {
        let forest = build(vec![c(2, Some(1)), c(1, None)]);
        assert_eq!(ids(&forest), vec![1]);
        assert_eq!(ids(&forest[0].replies), vec![2]);
    }

    #[test]
    fn flatten_is_a_permutation_with_parents_first() {
        let input = vec![
            c(1, None), c(2, Some(1)), c(3, Some(2)), c(4, None), c(5, Some(1)),
            c(6, Some(42)), c(7, Some(6)), c(8, Some(4)),
        ];
        let forest = build(input.clone());
        let flat = flatten(&forest);
        assert_eq!(flat.len(), input.len());
        let seen: HashSet<Id> = flat.iter().map(|f| f.comment.id).collect();
        assert_eq!(seen.len(), input.len());

        let pos: HashMap<Id, usize> = flat.iter().enumerate().map(|(i, f)| (f.comment.id, i)).collect();
        for f in &flat {
            if let Some(p) = f.comment.parent_id {
                if let Some(pp) = pos.get(&p) {
                    assert!(*pp < pos[&f.comment.id], "{} must follow its parent {}", f.comment.id, p);
                }
            }
        }
        let depths: Vec<(Id, usize)> = flat.iter().map(|f| (f.comment.id, f.depth)).collect();
        assert_eq!(depths, vec![(1, 0), (2, 1), (3, 2), (5, 1), (4, 0), (8, 1), (6, 0), (7, 1)]);
    }

    #[test]
    fn very_deep_chain_does_not_overflow() {
        let mut input = vec![c(1, None)];
        for id in 2..=20_000 {
            input.push(c(id, Some(id - 1)));
        }
        let forest = build(input);
        assert_eq!(forest.len(), 1);
        assert_eq!(count(&forest), 20_000);
        let flat = flatten(&forest);
        assert_eq!(flat.last().map(|f| f.depth), Some(19_999));
    }

    #[test]
    fn rebuild_on_longer_list_is_stable() {
        let first = build(vec![c(1, None), c(2, Some(1))]);
        let second = build(vec![c(1, None), c(2, Some(1)), c(3, Some(1))]);
        assert_eq!(ids(&first), ids(&second));
        assert_eq!(ids(&second[0].replies), vec![2, 3]);
    }

    #[test]
    fn reply_depth_cap() {
        assert!(can_reply(0));
        assert!(can_reply(2));
        assert!(!can_reply(3));
    }
}
