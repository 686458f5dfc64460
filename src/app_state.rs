use std::sync::Arc;

use crate::{
    broadcast::Broadcaster,
    config::Config,
    models::Comment,
    service::CommentService,
    storage::{self, Storage},
};

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub broadcaster: Arc<Broadcaster<Comment>>,
    pub service: CommentService,
    pub config: Config,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        // Backend selection happens once, here; everything downstream sees
        // only the Storage trait.
        let storage = storage::create_storage(&config.storage).await?;
        let broadcaster = Arc::new(Broadcaster::with_capacity(
            config.broadcast.channel_capacity,
        ));
        let service = CommentService::new(storage.clone(), broadcaster.clone());

        Ok(Self {
            storage,
            broadcaster,
            service,
            config,
        })
    }
}
