// PostgreSQL storage backend - the durable store behind the Storage contract
//
// Every operation is a single round trip on a pooled connection. The tree
// read pushes the O(depth) traversal into the database with one recursive
// query instead of walking the parent chain in application code.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;
use tracing::instrument;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Comment, CommentTree, Post, PostWithComments};
use crate::storage::{clamp_page, converter, Storage};

#[derive(Debug)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    /// Connect a bounded pool and verify the server is reachable.
    pub async fn connect(database_url: &str, max_connections: u32) -> AppResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(8))
            .connect(database_url)
            .await
            .map_err(|e| {
                AppError::ConnectionFailed(format!("failed to connect to postgres: {}", e))
            })?;

        Ok(Self { pool })
    }

    /// Wrap an already-built pool (used by integration tests).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the tables and the indexes backing the paginated access
    /// patterns. Cascading foreign keys implement both delete cascades, and
    /// they double as the atomic backstop for comment creation racing a
    /// post/parent delete.
    pub async fn initialize(&self) -> AppResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS posts (
                id UUID PRIMARY KEY,
                title VARCHAR(255) NOT NULL,
                content TEXT NOT NULL,
                comments_enabled BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS comments (
                id UUID PRIMARY KEY,
                post_id UUID NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
                parent_id UUID REFERENCES comments(id) ON DELETE CASCADE,
                content TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        // Partial indexes matching the two paginated filters, plus the post
        // listing order.
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_comments_roots \
             ON comments(post_id, created_at) WHERE parent_id IS NULL",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_comments_children \
             ON comments(parent_id, created_at) WHERE parent_id IS NOT NULL",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_posts_created_at ON posts(created_at DESC)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    fn map_post(row: &PgRow) -> Post {
        Post {
            id: row.get("id"),
            title: row.get("title"),
            content: row.get("content"),
            comments_enabled: row.get("comments_enabled"),
            created_at: row.get("created_at"),
        }
    }

    fn map_comment(row: &PgRow) -> Comment {
        Comment {
            id: row.get("id"),
            post_id: row.get("post_id"),
            parent_id: row.get("parent_id"),
            content: row.get("content"),
            created_at: row.get("created_at"),
        }
    }

    async fn require_post(&self, id: Uuid) -> AppResult<()> {
        let row = sqlx::query("SELECT 1 FROM posts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        if row.is_none() {
            return Err(AppError::NotFound(format!("post {} not found", id)));
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn create_post(&self, post: Post) -> AppResult<Post> {
        if !post.is_valid() {
            return Err(AppError::InvalidInput(
                "post title or content violates length limits".to_string(),
            ));
        }

        let row = sqlx::query(
            r#"
            INSERT INTO posts (id, title, content, comments_enabled, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, title, content, comments_enabled, created_at
        "#,
        )
        .bind(post.id)
        .bind(&post.title)
        .bind(&post.content)
        .bind(post.comments_enabled)
        .bind(post.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(Self::map_post(&row))
    }

    async fn get_post(&self, id: Uuid) -> AppResult<Post> {
        let row = sqlx::query(
            "SELECT id, title, content, comments_enabled, created_at FROM posts WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::map_post(&r))
            .ok_or_else(|| AppError::NotFound(format!("post {} not found", id)))
    }

    async fn get_posts(&self, limit: i64, offset: i64) -> AppResult<Vec<Post>> {
        let (limit, offset) = clamp_page(limit, offset);

        let rows = sqlx::query(
            r#"
            SELECT id, title, content, comments_enabled, created_at
            FROM posts
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
        "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::map_post).collect())
    }

    async fn update_post(&self, post: Post) -> AppResult<Post> {
        if !post.is_valid() {
            return Err(AppError::InvalidInput(
                "post title or content violates length limits".to_string(),
            ));
        }

        // created_at is deliberately not part of the SET list.
        let row = sqlx::query(
            r#"
            UPDATE posts
            SET title = $2, content = $3, comments_enabled = $4
            WHERE id = $1
            RETURNING id, title, content, comments_enabled, created_at
        "#,
        )
        .bind(post.id)
        .bind(&post.title)
        .bind(&post.content)
        .bind(post.comments_enabled)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::map_post(&r))
            .ok_or_else(|| AppError::NotFound(format!("post {} not found", post.id)))
    }

    #[instrument(skip(self))]
    async fn delete_post(&self, id: Uuid) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("post {} not found", id)));
        }
        Ok(())
    }

    async fn toggle_post_comments(&self, id: Uuid, enabled: bool) -> AppResult<()> {
        let result = sqlx::query("UPDATE posts SET comments_enabled = $2 WHERE id = $1")
            .bind(id)
            .bind(enabled)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("post {} not found", id)));
        }
        Ok(())
    }

    #[instrument(skip(self, comment))]
    async fn create_comment(&self, comment: Comment) -> AppResult<Comment> {
        // Validation is a pair of single round trips, not a transaction; if
        // the post or parent is deleted between the check and the insert,
        // the foreign keys reject the insert and the error maps to NotFound.
        let row = sqlx::query("SELECT comments_enabled FROM posts WHERE id = $1")
            .bind(comment.post_id)
            .fetch_optional(&self.pool)
            .await?;
        let comments_enabled: bool = match row {
            Some(row) => row.get("comments_enabled"),
            None => {
                return Err(AppError::NotFound(format!(
                    "post {} not found",
                    comment.post_id
                )))
            }
        };
        if !comments_enabled {
            return Err(AppError::CommentsDisabled(format!(
                "comments are disabled for post {}",
                comment.post_id
            )));
        }

        if let Some(parent_id) = comment.parent_id {
            let row = sqlx::query("SELECT post_id FROM comments WHERE id = $1")
                .bind(parent_id)
                .fetch_optional(&self.pool)
                .await?;
            match row {
                Some(row) => {
                    let parent_post_id: Uuid = row.get("post_id");
                    if parent_post_id != comment.post_id {
                        return Err(AppError::NotFound(format!(
                            "parent comment {} belongs to a different post",
                            parent_id
                        )));
                    }
                }
                None => {
                    return Err(AppError::NotFound(format!(
                        "parent comment {} not found",
                        parent_id
                    )))
                }
            }
        }

        if !comment.is_valid() {
            return Err(AppError::InvalidInput(
                "comment content violates length limits".to_string(),
            ));
        }

        let row = sqlx::query(
            r#"
            INSERT INTO comments (id, post_id, parent_id, content, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, post_id, parent_id, content, created_at
        "#,
        )
        .bind(comment.id)
        .bind(comment.post_id)
        .bind(comment.parent_id)
        .bind(&comment.content)
        .bind(comment.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(Self::map_comment(&row))
    }

    async fn get_comment(&self, id: Uuid) -> AppResult<Comment> {
        let row = sqlx::query(
            "SELECT id, post_id, parent_id, content, created_at FROM comments WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::map_comment(&r))
            .ok_or_else(|| AppError::NotFound(format!("comment {} not found", id)))
    }

    async fn get_comments_by_post_id(&self, post_id: Uuid) -> AppResult<Vec<Comment>> {
        self.require_post(post_id).await?;

        let rows = sqlx::query(
            r#"
            SELECT id, post_id, parent_id, content, created_at
            FROM comments
            WHERE post_id = $1
            ORDER BY created_at ASC
        "#,
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::map_comment).collect())
    }

    async fn get_comments_by_parent_id(
        &self,
        parent_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<Comment>> {
        let (limit, offset) = clamp_page(limit, offset);

        // Served by idx_comments_children.
        let rows = sqlx::query(
            r#"
            SELECT id, post_id, parent_id, content, created_at
            FROM comments
            WHERE parent_id = $1
            ORDER BY created_at ASC
            LIMIT $2 OFFSET $3
        "#,
        )
        .bind(parent_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::map_comment).collect())
    }

    async fn get_root_comments_by_post_id(
        &self,
        post_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<Comment>> {
        self.require_post(post_id).await?;
        let (limit, offset) = clamp_page(limit, offset);

        // Served by idx_comments_roots.
        let rows = sqlx::query(
            r#"
            SELECT id, post_id, parent_id, content, created_at
            FROM comments
            WHERE post_id = $1 AND parent_id IS NULL
            ORDER BY created_at ASC
            LIMIT $2 OFFSET $3
        "#,
        )
        .bind(post_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::map_comment).collect())
    }

    #[instrument(skip(self))]
    async fn get_comment_tree(&self, post_id: Uuid) -> AppResult<Vec<CommentTree>> {
        self.require_post(post_id).await?;

        // Seed: the post's root comments. Step: join children onto rows
        // already selected. The level column keeps the result breadth-first
        // so the converter sees parents before children.
        let rows = sqlx::query(
            r#"
            WITH RECURSIVE comment_tree AS (
                SELECT id, post_id, parent_id, content, created_at, 0 AS level
                FROM comments
                WHERE post_id = $1 AND parent_id IS NULL

                UNION ALL

                SELECT c.id, c.post_id, c.parent_id, c.content, c.created_at, ct.level + 1
                FROM comments c
                INNER JOIN comment_tree ct ON c.parent_id = ct.id
            )
            SELECT id, post_id, parent_id, content, created_at
            FROM comment_tree
            ORDER BY level, created_at
        "#,
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await?;

        let comments: Vec<Comment> = rows.iter().map(Self::map_comment).collect();
        Ok(converter::build_comment_tree(comments))
    }

    #[instrument(skip(self))]
    async fn delete_comment(&self, id: Uuid) -> AppResult<()> {
        // Descendants go with it through the self-referencing cascade.
        let result = sqlx::query("DELETE FROM comments WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("comment {} not found", id)));
        }
        Ok(())
    }

    async fn get_post_with_comments(&self, id: Uuid) -> AppResult<PostWithComments> {
        let post = self.get_post(id).await?;
        let comments = self.get_comments_by_post_id(id).await?;
        Ok(PostWithComments { post, comments })
    }

    async fn health_check(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) -> AppResult<()> {
        // Idempotent; later operations fail at acquire time with a closed
        // pool, which maps to ConnectionFailed.
        self.pool.close().await;
        Ok(())
    }
}
