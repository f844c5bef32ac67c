use std::sync::Arc;
use sqlx::{Pool, Sqlite};
use crate::config::Config;
use crate::feed::ChangeFeed;
use crate::storage::Uploads;

#[derive(Clone)]
pub struct AppState {
    pub db: Pool<Sqlite>,
    pub config: Arc<Config>,
    pub feed: ChangeFeed,
    pub uploads: Uploads,
}
