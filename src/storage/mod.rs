// Storage abstraction - one contract, two interchangeable backends

pub mod converter;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::error::{AppError, AppResult};
use crate::models::{Comment, CommentTree, Post, PostWithComments};

/// Page size applied when a caller passes a non-positive limit.
pub const DEFAULT_PAGE_LIMIT: i64 = 10;

/// Clamp raw pagination inputs: non-positive limits fall back to
/// [`DEFAULT_PAGE_LIMIT`], negative offsets clamp to zero.
pub(crate) fn clamp_page(limit: i64, offset: i64) -> (i64, i64) {
    let limit = if limit <= 0 { DEFAULT_PAGE_LIMIT } else { limit };
    (limit, offset.max(0))
}

/// Contract both backends satisfy with identical semantics. Callers depend
/// only on this trait; the backend is picked once at startup by
/// [`create_storage`].
#[async_trait]
pub trait Storage: Send + Sync + std::fmt::Debug {
    // Post operations

    /// Store a new post and return the stored copy. Fails with
    /// `InvalidInput` on a title/content limit violation and `Duplicate` on
    /// an id collision.
    async fn create_post(&self, post: Post) -> AppResult<Post>;

    /// Fetch a post by id. `NotFound` when absent.
    async fn get_post(&self, id: Uuid) -> AppResult<Post>;

    /// List posts, newest first, with clamped pagination.
    async fn get_posts(&self, limit: i64, offset: i64) -> AppResult<Vec<Post>>;

    /// Replace a post's title, content, and comments flag. The original
    /// creation timestamp is preserved. `NotFound` when absent.
    async fn update_post(&self, post: Post) -> AppResult<Post>;

    /// Delete a post and every comment attached to it.
    async fn delete_post(&self, id: Uuid) -> AppResult<()>;

    /// Enable or disable commenting on a post.
    async fn toggle_post_comments(&self, id: Uuid, enabled: bool) -> AppResult<()>;

    // Comment operations

    /// Store a new comment. Fails with `NotFound` if the post is absent, if
    /// the parent is absent, or if the parent belongs to a different post;
    /// `CommentsDisabled` if the post does not accept comments.
    async fn create_comment(&self, comment: Comment) -> AppResult<Comment>;

    /// Fetch a comment by id. `NotFound` when absent.
    async fn get_comment(&self, id: Uuid) -> AppResult<Comment>;

    /// Every comment of a post, flat, creation time ascending. `NotFound`
    /// when the post itself is absent; an empty vec means the post exists
    /// and has no comments.
    async fn get_comments_by_post_id(&self, post_id: Uuid) -> AppResult<Vec<Comment>>;

    /// One page of a comment's direct children, creation time ascending.
    /// An unknown parent yields an empty page.
    async fn get_comments_by_parent_id(
        &self,
        parent_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<Comment>>;

    /// One page of a post's root comments, creation time ascending.
    /// `NotFound` when the post is absent.
    async fn get_root_comments_by_post_id(
        &self,
        post_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<Comment>>;

    /// The full nested comment tree of a post, children ordered by creation
    /// time at every level. `NotFound` when the post is absent.
    async fn get_comment_tree(&self, post_id: Uuid) -> AppResult<Vec<CommentTree>>;

    /// Delete a comment together with all of its descendants.
    async fn delete_comment(&self, id: Uuid) -> AppResult<()>;

    // Complex operations

    /// A post bundled with its full flat comment list.
    async fn get_post_with_comments(&self, id: Uuid) -> AppResult<PostWithComments>;

    // Lifecycle

    /// `Ok` while the backend can serve requests; `ConnectionFailed` after
    /// close or when the underlying store is unreachable.
    async fn health_check(&self) -> AppResult<()>;

    /// Release backend resources. Idempotent; every operation afterwards
    /// fails with `ConnectionFailed`.
    async fn close(&self) -> AppResult<()>;
}

/// Select a storage backend from configuration. Both variants satisfy the
/// same [`Storage`] contract, so call sites stay backend-agnostic.
pub async fn create_storage(config: &StorageConfig) -> AppResult<Arc<dyn Storage>> {
    match config.backend.as_str() {
        "postgres" => {
            let storage =
                postgres::PostgresStorage::connect(&config.database_url, config.max_connections)
                    .await?;
            storage.initialize().await?;
            Ok(Arc::new(storage))
        }
        "memory" => Ok(Arc::new(memory::MemoryStorage::new())),
        other => Err(AppError::ConfigurationError(format!(
            "unsupported storage backend: {}",
            other
        ))),
    }
}
