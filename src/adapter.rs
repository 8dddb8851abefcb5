//! Row-data adapter for one bound widget instance.
//!
//! The host asks for rows synchronously and may do so from several worker
//! threads. Answers come from a frozen snapshot of the tile list taken at
//! the last reload, never from the live store.

use crate::icon::{Bitmap, IconResolver};
use crate::store::TileStore;
use crate::{Error, Tile};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// Data handed back to the host when a row is clicked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClickPayload {
    pub url: String,
}

/// Description of one rendered row
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowDescriptor {
    pub title: String,
    pub icon: Option<Bitmap>,
    pub click: Option<ClickPayload>,
}

impl RowDescriptor {
    /// Blank row used when the host asks for a position we don't have
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_empty() && self.icon.is_none() && self.click.is_none()
    }
}

/// Synchronous row-data contract consumed by the widget host.
///
/// None of these may fail: the host has no error channel.
pub trait RowDataSource: Send + Sync {
    fn on_create(&self);
    fn on_data_set_changed(&self);
    fn on_destroy(&self);
    fn count(&self) -> usize;
    fn view_at(&self, position: usize) -> RowDescriptor;
    fn item_id(&self, position: usize) -> i64;

    fn view_type_count(&self) -> usize {
        1
    }

    fn has_stable_ids(&self) -> bool {
        true
    }
}

/// Stable row id: the first 8 bytes of SHA-256 over the URL.
pub fn stable_id(url: &str) -> i64 {
    let digest = Sha256::digest(url.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

pub struct TileGridAdapter {
    store: TileStore,
    resolver: IconResolver,
    snapshot: RwLock<Arc<Vec<Tile>>>,
    destroyed: AtomicBool,
}

impl TileGridAdapter {
    pub fn new(store: TileStore, resolver: IconResolver) -> Self {
        Self {
            store,
            resolver,
            snapshot: RwLock::new(Arc::new(Vec::new())),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Current snapshot; cheap to clone and safe to hold across a reload.
    pub fn snapshot(&self) -> Arc<Vec<Tile>> {
        self.snapshot.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn resolver(&self) -> &IconResolver {
        &self.resolver
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn reload(&self) -> Arc<Vec<Tile>> {
        let tiles = Arc::new(self.store.read());
        *self.snapshot.write().unwrap_or_else(|p| p.into_inner()) = tiles.clone();
        tiles
    }

    fn tile_at(&self, position: usize) -> Result<Tile, Error> {
        let snapshot = self.snapshot();
        snapshot.get(position).cloned().ok_or(Error::OutOfRangePosition {
            position,
            count: snapshot.len(),
        })
    }
}

impl RowDataSource for TileGridAdapter {
    fn on_create(&self) {
        if self.is_destroyed() {
            log::debug!("create after destroy ignored");
            return;
        }
        let tiles = self.reload();
        log::debug!("tile adapter created with {} tiles", tiles.len());
    }

    fn on_data_set_changed(&self) {
        if self.is_destroyed() {
            log::debug!("data change after destroy ignored");
            return;
        }
        let tiles = self.reload();
        let urls: HashSet<String> = tiles.iter().map(|t| t.url.clone()).collect();
        let evicted = self.resolver.retain_urls(&urls);
        if evicted > 0 {
            log::debug!("evicted {} stale icon(s)", evicted);
        }
    }

    fn on_destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            log::debug!("{}", Error::ResourceAlreadyDestroyed("tile adapter"));
            return;
        }
        *self.snapshot.write().unwrap_or_else(|p| p.into_inner()) = Arc::new(Vec::new());
        self.resolver.destroy();
    }

    fn count(&self) -> usize {
        self.snapshot().len()
    }

    fn view_at(&self, position: usize) -> RowDescriptor {
        let tile = match self.tile_at(position) {
            Ok(t) => t,
            Err(e) => {
                log::debug!("{}", e);
                return RowDescriptor::empty();
            }
        };
        let icon = self.resolver.resolve(&tile.url);
        RowDescriptor {
            title: tile.title,
            icon,
            click: Some(ClickPayload { url: tile.url }),
        }
    }

    fn item_id(&self, position: usize) -> i64 {
        match self.tile_at(position) {
            Ok(t) => stable_id(&t.url),
            Err(e) => {
                log::debug!("{}", e);
                position as i64
            }
        }
    }
}

impl std::fmt::Debug for TileGridAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileGridAdapter")
            .field("count", &self.count())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
