// In-memory storage backend - the reference implementation for correctness
//
// One reader/writer lock guards both maps, so every validate-then-write
// sequence runs in a single critical section and reads hand out copies.
// Tree building is a recursive scan, O(n^2) per build; fine for the data
// volumes this backend is meant for (development and tests), not for
// production traffic - that is the postgres backend's job.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::instrument;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Comment, CommentTree, Post, PostWithComments};
use crate::storage::{clamp_page, Storage};

#[derive(Debug, Default)]
struct MemoryState {
    posts: HashMap<Uuid, Post>,
    comments: HashMap<Uuid, Comment>,
    closed: bool,
}

impl MemoryState {
    fn check_open(&self) -> AppResult<()> {
        if self.closed {
            return Err(AppError::ConnectionFailed(
                "memory storage is closed".to_string(),
            ));
        }
        Ok(())
    }

    fn require_post(&self, id: Uuid) -> AppResult<&Post> {
        self.posts
            .get(&id)
            .ok_or_else(|| AppError::NotFound(format!("post {} not found", id)))
    }

    /// Every comment of a post, creation time ascending.
    fn comments_of_post(&self, post_id: Uuid) -> Vec<Comment> {
        let mut comments: Vec<Comment> = self
            .comments
            .values()
            .filter(|c| c.post_id == post_id)
            .cloned()
            .collect();
        comments.sort_by_key(|c| c.created_at);
        comments
    }

    /// Recursive scan: collect the children of `parent_id` (roots when
    /// `None`), build each child's subtree, then order siblings by creation
    /// time.
    fn build_comment_tree(&self, post_id: Uuid, parent_id: Option<Uuid>) -> Vec<CommentTree> {
        let mut nodes: Vec<CommentTree> = self
            .comments
            .values()
            .filter(|c| c.post_id == post_id && c.parent_id == parent_id)
            .map(|c| CommentTree {
                comment: c.clone(),
                children: self.build_comment_tree(post_id, Some(c.id)),
            })
            .collect();

        nodes.sort_by_key(|n| n.comment.created_at);
        nodes
    }

    /// Depth-first cascade over the flat map. The acyclic parent invariant
    /// guarantees termination.
    fn delete_comment_recursive(&mut self, id: Uuid) {
        let children: Vec<Uuid> = self
            .comments
            .values()
            .filter(|c| c.parent_id == Some(id))
            .map(|c| c.id)
            .collect();
        for child_id in children {
            self.delete_comment_recursive(child_id);
        }
        self.comments.remove(&id);
    }
}

fn paginate<T>(items: Vec<T>, limit: i64, offset: i64) -> Vec<T> {
    let (limit, offset) = clamp_page(limit, offset);
    items
        .into_iter()
        .skip(offset as usize)
        .take(limit as usize)
        .collect()
}

/// Thread-safe map-based storage. All operations complete in bounded time
/// and never hold the lock across I/O.
#[derive(Debug)]
pub struct MemoryStorage {
    state: RwLock<MemoryState>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn create_post(&self, post: Post) -> AppResult<Post> {
        let mut state = self.state.write().await;
        state.check_open()?;

        if !post.is_valid() {
            return Err(AppError::InvalidInput(
                "post title or content violates length limits".to_string(),
            ));
        }
        if state.posts.contains_key(&post.id) {
            return Err(AppError::Duplicate(format!("post {} already exists", post.id)));
        }

        state.posts.insert(post.id, post.clone());
        Ok(post)
    }

    async fn get_post(&self, id: Uuid) -> AppResult<Post> {
        let state = self.state.read().await;
        state.check_open()?;
        state.require_post(id).cloned()
    }

    async fn get_posts(&self, limit: i64, offset: i64) -> AppResult<Vec<Post>> {
        let state = self.state.read().await;
        state.check_open()?;

        let mut posts: Vec<Post> = state.posts.values().cloned().collect();
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(posts, limit, offset))
    }

    async fn update_post(&self, post: Post) -> AppResult<Post> {
        let mut state = self.state.write().await;
        state.check_open()?;

        if !post.is_valid() {
            return Err(AppError::InvalidInput(
                "post title or content violates length limits".to_string(),
            ));
        }
        let existing_created_at = state.require_post(post.id)?.created_at;

        let updated = Post {
            created_at: existing_created_at,
            ..post
        };
        state.posts.insert(updated.id, updated.clone());
        Ok(updated)
    }

    #[instrument(skip(self))]
    async fn delete_post(&self, id: Uuid) -> AppResult<()> {
        let mut state = self.state.write().await;
        state.check_open()?;

        if state.posts.remove(&id).is_none() {
            return Err(AppError::NotFound(format!("post {} not found", id)));
        }

        // Cascade: drop every comment belonging to the post.
        state.comments.retain(|_, c| c.post_id != id);
        Ok(())
    }

    async fn toggle_post_comments(&self, id: Uuid, enabled: bool) -> AppResult<()> {
        let mut state = self.state.write().await;
        state.check_open()?;

        match state.posts.get_mut(&id) {
            Some(post) => {
                post.comments_enabled = enabled;
                Ok(())
            }
            None => Err(AppError::NotFound(format!("post {} not found", id))),
        }
    }

    #[instrument(skip(self, comment))]
    async fn create_comment(&self, comment: Comment) -> AppResult<Comment> {
        // The whole validate-then-insert sequence runs under the write
        // guard: a concurrent delete cannot slip between the parent check
        // and the insert.
        let mut state = self.state.write().await;
        state.check_open()?;

        let post = state.require_post(comment.post_id)?;
        if !post.can_add_comments() {
            return Err(AppError::CommentsDisabled(format!(
                "comments are disabled for post {}",
                comment.post_id
            )));
        }

        if let Some(parent_id) = comment.parent_id {
            let parent = state.comments.get(&parent_id).ok_or_else(|| {
                AppError::NotFound(format!("parent comment {} not found", parent_id))
            })?;
            if parent.post_id != comment.post_id {
                return Err(AppError::NotFound(format!(
                    "parent comment {} belongs to a different post",
                    parent_id
                )));
            }
        }

        if !comment.is_valid() {
            return Err(AppError::InvalidInput(
                "comment content violates length limits".to_string(),
            ));
        }
        if state.comments.contains_key(&comment.id) {
            return Err(AppError::Duplicate(format!(
                "comment {} already exists",
                comment.id
            )));
        }

        state.comments.insert(comment.id, comment.clone());
        Ok(comment)
    }

    async fn get_comment(&self, id: Uuid) -> AppResult<Comment> {
        let state = self.state.read().await;
        state.check_open()?;
        state
            .comments
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("comment {} not found", id)))
    }

    async fn get_comments_by_post_id(&self, post_id: Uuid) -> AppResult<Vec<Comment>> {
        let state = self.state.read().await;
        state.check_open()?;
        state.require_post(post_id)?;
        Ok(state.comments_of_post(post_id))
    }

    async fn get_comments_by_parent_id(
        &self,
        parent_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<Comment>> {
        let state = self.state.read().await;
        state.check_open()?;

        let mut children: Vec<Comment> = state
            .comments
            .values()
            .filter(|c| c.parent_id == Some(parent_id))
            .cloned()
            .collect();
        children.sort_by_key(|c| c.created_at);
        Ok(paginate(children, limit, offset))
    }

    async fn get_root_comments_by_post_id(
        &self,
        post_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<Comment>> {
        let state = self.state.read().await;
        state.check_open()?;
        state.require_post(post_id)?;

        let mut roots: Vec<Comment> = state
            .comments
            .values()
            .filter(|c| c.post_id == post_id && c.parent_id.is_none())
            .cloned()
            .collect();
        roots.sort_by_key(|c| c.created_at);
        Ok(paginate(roots, limit, offset))
    }

    #[instrument(skip(self))]
    async fn get_comment_tree(&self, post_id: Uuid) -> AppResult<Vec<CommentTree>> {
        let state = self.state.read().await;
        state.check_open()?;
        state.require_post(post_id)?;
        Ok(state.build_comment_tree(post_id, None))
    }

    #[instrument(skip(self))]
    async fn delete_comment(&self, id: Uuid) -> AppResult<()> {
        let mut state = self.state.write().await;
        state.check_open()?;

        if !state.comments.contains_key(&id) {
            return Err(AppError::NotFound(format!("comment {} not found", id)));
        }
        state.delete_comment_recursive(id);
        Ok(())
    }

    async fn get_post_with_comments(&self, id: Uuid) -> AppResult<PostWithComments> {
        let state = self.state.read().await;
        state.check_open()?;

        let post = state.require_post(id)?.clone();
        let comments = state.comments_of_post(id);
        Ok(PostWithComments { post, comments })
    }

    async fn health_check(&self) -> AppResult<()> {
        self.state.read().await.check_open()
    }

    async fn close(&self) -> AppResult<()> {
        let mut state = self.state.write().await;
        if state.closed {
            return Ok(());
        }
        state.posts.clear();
        state.comments.clear();
        state.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    fn post(title: &str) -> Post {
        Post::new(title, "content")
    }

    /// A comment with an explicit creation offset, so ordering tests do not
    /// depend on clock resolution.
    fn comment_at(post_id: Uuid, parent_id: Option<Uuid>, content: &str, offset_ms: i64) -> Comment {
        let mut comment = Comment::new(post_id, parent_id, content);
        comment.created_at = Utc::now() + Duration::milliseconds(offset_ms);
        comment
    }

    #[tokio::test]
    async fn test_create_and_get_post() {
        let storage = MemoryStorage::new();
        let created = storage.create_post(post("First")).await.unwrap();
        assert!(created.comments_enabled);

        let fetched = storage.get_post(created.id).await.unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn test_create_post_rejects_invalid() {
        let storage = MemoryStorage::new();

        let err = storage.create_post(post("")).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));

        let oversized = Post::new("Title", "x".repeat(10_001));
        let err = storage.create_post(oversized).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_create_post_rejects_duplicate_id() {
        let storage = MemoryStorage::new();
        let created = storage.create_post(post("First")).await.unwrap();

        let mut clone = post("Clone");
        clone.id = created.id;
        let err = storage.create_post(clone).await.unwrap_err();
        assert!(matches!(err, AppError::Duplicate(_)));
    }

    #[tokio::test]
    async fn test_get_posts_newest_first_with_pagination() {
        let storage = MemoryStorage::new();
        let base = Utc::now();
        for i in 0..5 {
            let mut p = post(&format!("post-{}", i));
            p.created_at = base + Duration::seconds(i);
            storage.create_post(p).await.unwrap();
        }

        let first_page = storage.get_posts(2, 0).await.unwrap();
        assert_eq!(first_page.len(), 2);
        assert_eq!(first_page[0].title, "post-4");
        assert_eq!(first_page[1].title, "post-3");

        let second_page = storage.get_posts(2, 2).await.unwrap();
        assert_eq!(second_page[0].title, "post-2");

        // Non-positive limit falls back to the default, negative offset to 0.
        let defaulted = storage.get_posts(0, -7).await.unwrap();
        assert_eq!(defaulted.len(), 5);

        assert!(storage.get_posts(10, 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_post_preserves_created_at() {
        let storage = MemoryStorage::new();
        let created = storage.create_post(post("Before")).await.unwrap();

        let mut updated = created.clone();
        updated.title = "After".to_string();
        updated.created_at = Utc::now() + Duration::days(1);

        let stored = storage.update_post(updated).await.unwrap();
        assert_eq!(stored.title, "After");
        assert_eq!(stored.created_at, created.created_at);
    }

    #[tokio::test]
    async fn test_update_missing_post() {
        let storage = MemoryStorage::new();
        let err = storage.update_post(post("Ghost")).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_post_cascades_to_comments() {
        let storage = MemoryStorage::new();
        let p = storage.create_post(post("Post")).await.unwrap();
        let root = storage
            .create_comment(comment_at(p.id, None, "root", 0))
            .await
            .unwrap();
        storage
            .create_comment(comment_at(p.id, Some(root.id), "child", 10))
            .await
            .unwrap();

        storage.delete_post(p.id).await.unwrap();

        let err = storage.get_comment(root.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        let err = storage.get_post(p.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_disabled_comments_reject_creation() {
        let storage = MemoryStorage::new();
        let p = storage.create_post(post("Post")).await.unwrap();
        storage.toggle_post_comments(p.id, false).await.unwrap();

        let err = storage
            .create_comment(comment_at(p.id, None, "blocked", 0))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::CommentsDisabled(_)));

        // Nothing was persisted.
        assert!(storage.get_comments_by_post_id(p.id).await.unwrap().is_empty());

        storage.toggle_post_comments(p.id, true).await.unwrap();
        storage
            .create_comment(comment_at(p.id, None, "allowed", 0))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_comment_on_missing_post() {
        let storage = MemoryStorage::new();
        let err = storage
            .create_comment(comment_at(Uuid::new_v4(), None, "orphan", 0))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_comment_with_missing_parent() {
        let storage = MemoryStorage::new();
        let p = storage.create_post(post("Post")).await.unwrap();

        let err = storage
            .create_comment(comment_at(p.id, Some(Uuid::new_v4()), "orphan", 0))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(storage.get_comments_by_post_id(p.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_comment_with_parent_from_other_post() {
        let storage = MemoryStorage::new();
        let first = storage.create_post(post("First")).await.unwrap();
        let second = storage.create_post(post("Second")).await.unwrap();
        let foreign_parent = storage
            .create_comment(comment_at(first.id, None, "root", 0))
            .await
            .unwrap();

        let err = storage
            .create_comment(comment_at(second.id, Some(foreign_parent.id), "cross", 10))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_comment_tree_shape() {
        let storage = MemoryStorage::new();
        let p = storage.create_post(post("Post")).await.unwrap();
        let a = storage
            .create_comment(comment_at(p.id, None, "a", 0))
            .await
            .unwrap();
        let b = storage
            .create_comment(comment_at(p.id, Some(a.id), "b", 10))
            .await
            .unwrap();
        let c = storage
            .create_comment(comment_at(p.id, Some(b.id), "c", 20))
            .await
            .unwrap();

        let tree = storage.get_comment_tree(p.id).await.unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].comment.id, a.id);
        assert_eq!(tree[0].children_count(), 1);
        assert_eq!(tree[0].children[0].comment.id, b.id);
        assert!(tree[0].children[0].has_children());
        assert_eq!(tree[0].children[0].children[0].comment.id, c.id);
        assert!(!tree[0].children[0].children[0].has_children());
    }

    #[tokio::test]
    async fn test_comment_tree_distinguishes_empty_from_missing() {
        let storage = MemoryStorage::new();
        let p = storage.create_post(post("Post")).await.unwrap();

        // Post exists, zero comments: a valid empty tree.
        assert!(storage.get_comment_tree(p.id).await.unwrap().is_empty());

        // Post absent: NotFound.
        let err = storage.get_comment_tree(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_cascade_delete_comment() {
        let storage = MemoryStorage::new();
        let p = storage.create_post(post("Post")).await.unwrap();
        let a = storage
            .create_comment(comment_at(p.id, None, "a", 0))
            .await
            .unwrap();
        let b = storage
            .create_comment(comment_at(p.id, Some(a.id), "b", 10))
            .await
            .unwrap();
        storage
            .create_comment(comment_at(p.id, Some(b.id), "c", 20))
            .await
            .unwrap();
        let survivor = storage
            .create_comment(comment_at(p.id, None, "survivor", 30))
            .await
            .unwrap();

        storage.delete_comment(a.id).await.unwrap();

        let remaining = storage.get_comments_by_post_id(p.id).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, survivor.id);
    }

    #[tokio::test]
    async fn test_delete_missing_comment() {
        let storage = MemoryStorage::new();
        let err = storage.delete_comment(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_root_comment_pagination_is_deterministic() {
        let storage = MemoryStorage::new();
        let p = storage.create_post(post("Post")).await.unwrap();
        for i in 0..5 {
            storage
                .create_comment(comment_at(p.id, None, &format!("root-{}", i), i * 100))
                .await
                .unwrap();
        }

        let first = storage
            .get_root_comments_by_post_id(p.id, 2, 0)
            .await
            .unwrap();
        let second = storage
            .get_root_comments_by_post_id(p.id, 2, 2)
            .await
            .unwrap();

        let contents: Vec<&str> = first
            .iter()
            .chain(second.iter())
            .map(|c| c.content.as_str())
            .collect();
        assert_eq!(contents, vec!["root-0", "root-1", "root-2", "root-3"]);

        assert!(storage
            .get_root_comments_by_post_id(p.id, 2, 5)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_children_pagination() {
        let storage = MemoryStorage::new();
        let p = storage.create_post(post("Post")).await.unwrap();
        let root = storage
            .create_comment(comment_at(p.id, None, "root", 0))
            .await
            .unwrap();
        for i in 0..4 {
            storage
                .create_comment(comment_at(
                    p.id,
                    Some(root.id),
                    &format!("child-{}", i),
                    (i + 1) * 100,
                ))
                .await
                .unwrap();
        }

        let page = storage
            .get_comments_by_parent_id(root.id, 3, 1)
            .await
            .unwrap();
        let contents: Vec<&str> = page.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, vec!["child-1", "child-2", "child-3"]);

        // Unknown parent is a pure filter, not an existence probe.
        assert!(storage
            .get_comments_by_parent_id(Uuid::new_v4(), 10, 0)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_get_post_with_comments() {
        let storage = MemoryStorage::new();
        let p = storage.create_post(post("Post")).await.unwrap();
        storage
            .create_comment(comment_at(p.id, None, "first", 0))
            .await
            .unwrap();
        storage
            .create_comment(comment_at(p.id, None, "second", 100))
            .await
            .unwrap();

        let bundle = storage.get_post_with_comments(p.id).await.unwrap();
        assert_eq!(bundle.post.id, p.id);
        assert_eq!(bundle.comments.len(), 2);
        assert_eq!(bundle.comments[0].content, "first");
    }

    #[tokio::test]
    async fn test_returned_copies_do_not_alias_state() {
        let storage = MemoryStorage::new();
        let p = storage.create_post(post("Post")).await.unwrap();

        let mut fetched = storage.get_post(p.id).await.unwrap();
        fetched.title = "mutated by caller".to_string();

        assert_eq!(storage.get_post(p.id).await.unwrap().title, "Post");
    }

    #[tokio::test]
    async fn test_operations_after_close_fail() {
        let storage = MemoryStorage::new();
        let p = storage.create_post(post("Post")).await.unwrap();

        storage.close().await.unwrap();
        // Close twice: still fine.
        storage.close().await.unwrap();

        assert!(matches!(
            storage.health_check().await.unwrap_err(),
            AppError::ConnectionFailed(_)
        ));
        assert!(matches!(
            storage.get_post(p.id).await.unwrap_err(),
            AppError::ConnectionFailed(_)
        ));
        assert!(matches!(
            storage.create_post(post("Late")).await.unwrap_err(),
            AppError::ConnectionFailed(_)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_comment_creation() {
        let storage = Arc::new(MemoryStorage::new());
        let p = storage.create_post(post("Post")).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let storage = storage.clone();
            let post_id = p.id;
            handles.push(tokio::spawn(async move {
                for _ in 0..5 {
                    storage
                        .create_comment(Comment::new(post_id, None, "concurrent"))
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let comments = storage.get_comments_by_post_id(p.id).await.unwrap();
        assert_eq!(comments.len(), 50);
    }
}
