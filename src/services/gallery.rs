//! Gallery boxlet data
//!
//! The latest image topics, served from the cache and reloaded after the
//! entry expires or is invalidated by a commit.

use crate::cache::{Cache, CacheLayer};
use crate::db::repositories::GalleryRepository;
use crate::db::DynDatabasePool;
use crate::models::GalleryItem;
use std::sync::Arc;
use std::time::Duration;

/// Number of topics shown in the boxlet
pub const GALLERY_ITEMS: i64 = 3;

/// Cache key of the boxlet data
pub const GALLERY_CACHE_KEY: &str = "boxlet:gallery";

#[derive(Debug, thiserror::Error)]
pub enum GalleryError {
    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct GalleryService {
    pool: DynDatabasePool,
    repo: Arc<dyn GalleryRepository>,
    cache: Arc<Cache>,
    ttl: Duration,
}

impl GalleryService {
    pub fn new(
        pool: DynDatabasePool,
        repo: Arc<dyn GalleryRepository>,
        cache: Arc<Cache>,
        ttl: Duration,
    ) -> Self {
        Self {
            pool,
            repo,
            cache,
            ttl,
        }
    }

    /// Items for the boxlet
    pub async fn items(&self) -> Result<Vec<GalleryItem>, GalleryError> {
        let cached: anyhow::Result<Option<Vec<GalleryItem>>> = self.cache.get(GALLERY_CACHE_KEY).await;
        match cached {
            Ok(Some(items)) => return Ok(items),
            Ok(None) => {}
            Err(e) => tracing::warn!("Dropping unreadable gallery cache entry: {:#}", e),
        }

        let mut conn = self.pool.acquire().await?;
        let items = self.repo.latest(&mut conn, GALLERY_ITEMS).await?;
        self.cache.set(GALLERY_CACHE_KEY, &items, self.ttl).await?;
        Ok(items)
    }

    /// Forget the cached items
    pub async fn invalidate(&self) -> Result<(), GalleryError> {
        self.cache.delete(GALLERY_CACHE_KEY).await?;
        Ok(())
    }
}
