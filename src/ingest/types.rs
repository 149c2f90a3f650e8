// src/ingest/types.rs
use anyhow::Result;

use crate::model::RawNewsItem;

/// A news source polled once per run (RSS feed, fixture, ...).
#[async_trait::async_trait]
pub trait NewsProvider: Send + Sync {
    async fn fetch_latest(&self) -> Result<Vec<RawNewsItem>>;
    fn name(&self) -> &str;
}
