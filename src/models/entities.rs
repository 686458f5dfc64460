// Domain entities for posts and threaded comments

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Title length limit, in Unicode code points.
pub const MAX_TITLE_CHARS: usize = 255;
/// Post body length limit, in Unicode code points.
pub const MAX_POST_CONTENT_CHARS: usize = 10_000;
/// Comment body length limit, in Unicode code points.
pub const MAX_COMMENT_CONTENT_CHARS: usize = 2_000;

/// A post that comments attach to. `created_at` is set once at construction
/// and preserved across updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub comments_enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl Post {
    /// Build a new post with a generated id, the current UTC timestamp, and
    /// comments enabled.
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            content: content.into(),
            comments_enabled: true,
            created_at: Utc::now(),
        }
    }

    pub fn is_valid_title(&self) -> bool {
        let len = self.title.chars().count();
        len > 0 && len <= MAX_TITLE_CHARS
    }

    pub fn is_valid_content(&self) -> bool {
        let len = self.content.chars().count();
        len > 0 && len <= MAX_POST_CONTENT_CHARS
    }

    pub fn can_add_comments(&self) -> bool {
        self.comments_enabled
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_title() && self.is_valid_content()
    }
}

/// A comment on a post. `parent_id == None` marks a root comment; otherwise
/// it references an earlier comment on the same post, which keeps the parent
/// chain acyclic by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: Uuid,
    pub post_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Comment {
    /// Build a new comment with a generated id and the current UTC timestamp.
    pub fn new(post_id: Uuid, parent_id: Option<Uuid>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            post_id,
            parent_id,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn is_valid_content(&self) -> bool {
        let len = self.content.chars().count();
        len > 0 && len <= MAX_COMMENT_CONTENT_CHARS
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_content() && !self.post_id.is_nil()
    }
}

/// A comment together with its nested replies, children ordered by creation
/// time ascending at every level. Synthesized on read, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentTree {
    #[serde(flatten)]
    pub comment: Comment,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[serde(default)]
    pub children: Vec<CommentTree>,
}

impl CommentTree {
    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn children_count(&self) -> usize {
        self.children.len()
    }
}

/// A post bundled with its full flat comment list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostWithComments {
    #[serde(flatten)]
    pub post: Post,
    pub comments: Vec<Comment>,
}
