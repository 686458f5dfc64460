// Comment service - persists new comments and fans them out to live listeners

use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::broadcast::{Broadcaster, Subscription};
use crate::error::AppResult;
use crate::models::Comment;
use crate::storage::Storage;

/// Topic carrying newly created comments for one post.
pub fn comment_topic(post_id: Uuid) -> String {
    format!("post:{}:comments", post_id)
}

/// Glue between the storage contract and the broadcaster: a comment is
/// persisted first and published only on success, so a rejected create has
/// no broadcaster side effect.
#[derive(Clone)]
pub struct CommentService {
    storage: Arc<dyn Storage>,
    broadcaster: Arc<Broadcaster<Comment>>,
}

impl CommentService {
    pub fn new(storage: Arc<dyn Storage>, broadcaster: Arc<Broadcaster<Comment>>) -> Self {
        Self {
            storage,
            broadcaster,
        }
    }

    #[instrument(skip(self, content))]
    pub async fn create_comment(
        &self,
        post_id: Uuid,
        parent_id: Option<Uuid>,
        content: String,
    ) -> AppResult<Comment> {
        let comment = Comment::new(post_id, parent_id, content);
        let created = self.storage.create_comment(comment).await?;

        self.broadcaster
            .publish(&comment_topic(post_id), created.clone())
            .await;

        Ok(created)
    }

    /// Register a live listener for a post's comment stream. The caller
    /// owns the unsubscribe on every exit path.
    pub async fn subscribe_to_comments(
        &self,
        post_id: Uuid,
        subscriber_id: &str,
    ) -> Subscription<Comment> {
        self.broadcaster
            .subscribe(&comment_topic(post_id), subscriber_id)
            .await
    }

    pub async fn unsubscribe_from_comments(&self, post_id: Uuid, subscriber_id: &str) {
        self.broadcaster
            .unsubscribe(&comment_topic(post_id), subscriber_id)
            .await
    }

    pub async fn comment_subscriber_count(&self, post_id: Uuid) -> usize {
        self.broadcaster
            .subscriber_count(&comment_topic(post_id))
            .await
    }

    pub async fn health_check(&self) -> AppResult<()> {
        self.storage.health_check().await
    }
}
