// HTTP + WebSocket surface - thin plumbing over storage and the comment service

use axum::{
    extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Json, Response},
    routing::{delete, get, patch, post, put},
    Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::AppResult;
use crate::models::{Comment, CommentTree, Post, PostWithComments};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePostRequest {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePostRequest {
    pub title: String,
    pub content: String,
    pub comments_enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct ToggleCommentsRequest {
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCommentRequest {
    pub parent_id: Option<Uuid>,
    pub content: String,
}

/// Missing limit/offset arrive as zero and the storage layer applies its
/// defaults.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/posts", post(create_post_handler))
        .route("/posts", get(list_posts_handler))
        .route("/posts/{id}", get(get_post_handler))
        .route("/posts/{id}", put(update_post_handler))
        .route("/posts/{id}", delete(delete_post_handler))
        .route("/posts/{id}/full", get(get_post_with_comments_handler))
        .route("/posts/{id}/comments", post(create_comment_handler))
        .route("/posts/{id}/comments", get(list_comments_handler))
        .route("/posts/{id}/comments", patch(toggle_comments_handler))
        .route("/posts/{id}/comments/roots", get(list_root_comments_handler))
        .route("/posts/{id}/comments/tree", get(comment_tree_handler))
        .route("/posts/{id}/comments/stream", get(comment_stream_handler))
        .route("/comments/{id}", get(get_comment_handler))
        .route("/comments/{id}", delete(delete_comment_handler))
        .route("/comments/{id}/children", get(list_children_handler))
        .with_state(state)
}

async fn health_handler(State(state): State<AppState>) -> AppResult<Json<Value>> {
    state.service.health_check().await?;
    Ok(Json(json!({"status": "ok"})))
}

// Post handlers

async fn create_post_handler(
    State(state): State<AppState>,
    Json(req): Json<CreatePostRequest>,
) -> AppResult<(StatusCode, Json<Post>)> {
    let post = state.storage.create_post(Post::new(req.title, req.content)).await?;
    Ok((StatusCode::CREATED, Json(post)))
}

async fn list_posts_handler(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
) -> AppResult<Json<Vec<Post>>> {
    Ok(Json(state.storage.get_posts(page.limit, page.offset).await?))
}

async fn get_post_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Post>> {
    Ok(Json(state.storage.get_post(id).await?))
}

async fn update_post_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdatePostRequest>,
) -> AppResult<Json<Post>> {
    // created_at here is a placeholder; the backends preserve the stored one.
    let post = Post {
        id,
        title: req.title,
        content: req.content,
        comments_enabled: req.comments_enabled,
        created_at: chrono::Utc::now(),
    };
    Ok(Json(state.storage.update_post(post).await?))
}

async fn delete_post_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.storage.delete_post(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn toggle_comments_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ToggleCommentsRequest>,
) -> AppResult<Json<Value>> {
    state.storage.toggle_post_comments(id, req.enabled).await?;
    Ok(Json(json!({"id": id, "commentsEnabled": req.enabled})))
}

async fn get_post_with_comments_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<PostWithComments>> {
    Ok(Json(state.storage.get_post_with_comments(id).await?))
}

// Comment handlers

async fn create_comment_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<CreateCommentRequest>,
) -> AppResult<(StatusCode, Json<Comment>)> {
    let comment = state
        .service
        .create_comment(id, req.parent_id, req.content)
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

async fn list_comments_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<Comment>>> {
    Ok(Json(state.storage.get_comments_by_post_id(id).await?))
}

async fn list_root_comments_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(page): Query<PageQuery>,
) -> AppResult<Json<Vec<Comment>>> {
    Ok(Json(
        state
            .storage
            .get_root_comments_by_post_id(id, page.limit, page.offset)
            .await?,
    ))
}

async fn comment_tree_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<CommentTree>>> {
    Ok(Json(state.storage.get_comment_tree(id).await?))
}

async fn get_comment_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Comment>> {
    Ok(Json(state.storage.get_comment(id).await?))
}

async fn list_children_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(page): Query<PageQuery>,
) -> AppResult<Json<Vec<Comment>>> {
    Ok(Json(
        state
            .storage
            .get_comments_by_parent_id(id, page.limit, page.offset)
            .await?,
    ))
}

async fn delete_comment_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.storage.delete_comment(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Live comment stream

async fn comment_stream_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    // Reject the upgrade outright when the post does not exist.
    state.storage.get_post(id).await?;
    Ok(ws.on_upgrade(move |socket| stream_comments(state, id, socket)))
}

/// Forward every broadcast comment for the post to the socket. Whatever
/// ends the loop - client close, socket error, broadcaster shutdown - the
/// subscriber is removed, so channels never leak on abnormal disconnects.
async fn stream_comments(state: AppState, post_id: Uuid, socket: WebSocket) {
    let subscriber_id = Uuid::new_v4().to_string();
    let mut subscription = state
        .service
        .subscribe_to_comments(post_id, &subscriber_id)
        .await;

    debug!(post_id = %post_id, subscriber = %subscriber_id, "comment stream opened");

    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            received = subscription.receiver.recv() => {
                match received {
                    Some(message) => {
                        let payload = match serde_json::to_string(&message.payload) {
                            Ok(payload) => payload,
                            Err(err) => {
                                warn!("failed to serialize comment for stream: {}", err);
                                continue;
                            }
                        };
                        if sink.send(WsMessage::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    // Broadcaster closed or this subscriber was replaced.
                    None => break,
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                    // Ignore client chatter; the stream is one-way.
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state
        .service
        .unsubscribe_from_comments(post_id, &subscriber_id)
        .await;
    debug!(post_id = %post_id, subscriber = %subscriber_id, "comment stream closed");
}
