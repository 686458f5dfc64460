// Flat-to-tree conversion for leveled comment query results

use uuid::Uuid;

use crate::models::{Comment, CommentTree};

/// Rebuild the nested comment tree from a flat comment set, grouping on
/// `parent_id` and sorting every sibling list by creation time ascending.
///
/// This is the same grouping the in-memory backend performs internally, so
/// both backends produce structurally identical trees from the same
/// comments. Rows whose parent is missing from the set are unreachable and
/// silently dropped; the recursive tree query never emits such rows.
pub fn build_comment_tree(comments: Vec<Comment>) -> Vec<CommentTree> {
    build_subtree(&comments, None)
}

fn build_subtree(comments: &[Comment], parent_id: Option<Uuid>) -> Vec<CommentTree> {
    let mut nodes: Vec<CommentTree> = comments
        .iter()
        .filter(|c| c.parent_id == parent_id)
        .map(|c| CommentTree {
            comment: c.clone(),
            children: build_subtree(comments, Some(c.id)),
        })
        .collect();

    nodes.sort_by_key(|n| n.comment.created_at);
    nodes
}
