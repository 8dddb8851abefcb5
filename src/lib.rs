//! QuickTiles
//!
//! Persistence and icon resolution for a home-screen "quick tiles" widget.
//! The widget host renders rows outside of our execution context and asks
//! for them through a strictly synchronous contract; this crate stores the
//! user's tiles, answers those row requests and resolves a small icon per
//! tile from an asynchronous, thread-confined icon service.
//!
//! # Components
//!
//! - [`store::TileStore`]: ordered tile list serialized into a key-value store
//! - [`readiness::EngineReadinessGate`]: defers widget updates until the engine is up
//! - [`icon::IconResolver`]: cache, bounded wait on the icon service, monogram fallback
//! - [`adapter::TileGridAdapter`]: the host's synchronous row-data contract
//! - [`orchestrator::WidgetRenderOrchestrator`]: per-instance show/hide decision
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use quicktiles::{Tile, WidgetConfig};
//! use quicktiles::store::{MemoryStore, TileStore};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = WidgetConfig::default();
//! let store = TileStore::new(Arc::new(MemoryStore::new()), &config.storage_key);
//! store.write(&[Tile::new("Example", "https://example.com")])?;
//! assert_eq!(store.read().len(), 1);
//! # Ok(())
//! # }
//! ```

use std::hash::{Hash, Hasher};
use std::time::Duration;

pub mod error;
pub use error::{Error, Result};

// Execution contexts and the one-shot gate used to bridge them
pub mod context;
pub mod gate;

pub mod store;
pub mod readiness;
pub mod icon;
pub mod adapter;
pub mod orchestrator;

// Async-friendly facade (posts work onto the UI context)
pub mod async_api;

pub use adapter::{ClickPayload, RowDataSource, RowDescriptor, TileGridAdapter};
pub use async_api::WidgetHandle;
pub use context::ContextThread;
pub use icon::{Bitmap, IconBackend, IconReply, IconResolver, IconService};
pub use orchestrator::{render_mode, RenderMode, WidgetHost, WidgetRenderOrchestrator, WidgetView};
pub use readiness::EngineReadinessGate;
pub use store::{FileStore, KeyValueStore, MemoryStore, TileStore};

/// Largest icon edge we will request or synthesize
pub const MAX_ICON_SIZE_PX: u32 = 512;

/// Configuration for the tile widget
///
/// The defaults match the shipped widget:
/// - icon lookups are bounded by a single 2 second timeout
/// - one row of tiles needs at least 130dp of height
///
/// # Examples
///
/// ```
/// let cfg = quicktiles::WidgetConfig::default();
/// assert_eq!(cfg.icon_timeout_ms, 2000);
/// ```
#[derive(Debug, Clone)]
pub struct WidgetConfig {
    /// Upper bound for one icon lookup, applied to every row
    pub icon_timeout_ms: u64,
    /// Requested icon edge in pixels (also the monogram size)
    pub icon_size_px: u32,
    /// Corner radius of synthesized monogram icons
    pub icon_corner_radius_px: u32,
    /// Minimum widget height (dp) that fits one row of tiles
    pub min_tile_row_height_dp: u32,
    /// Background used for monograms when the icon service gave us nothing
    pub fallback_color: Rgba,
    /// Key under which the tile list is persisted
    pub storage_key: String,
    /// Whether a fallback produced by a timeout or failure is cached
    pub cache_timeout_fallback: bool,
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            icon_timeout_ms: 2000,
            icon_size_px: 64,
            icon_corner_radius_px: 8,
            min_tile_row_height_dp: 130,
            fallback_color: Rgba::BRAND_FALLBACK,
            storage_key: "quick_tiles_widget".to_string(),
            cache_timeout_fallback: true,
        }
    }
}

impl WidgetConfig {
    /// Reject values that would make the widget unusable.
    pub fn validate(&self) -> Result<()> {
        if self.icon_timeout_ms == 0 {
            return Err(Error::ConfigError("icon_timeout_ms must be non-zero".to_string()));
        }
        if self.icon_size_px == 0 || self.icon_size_px > MAX_ICON_SIZE_PX {
            return Err(Error::ConfigError(format!(
                "icon_size_px must be in 1..={}, got {}",
                MAX_ICON_SIZE_PX, self.icon_size_px
            )));
        }
        if self.icon_corner_radius_px > self.icon_size_px / 2 {
            return Err(Error::ConfigError(format!(
                "corner radius {} does not fit a {}px icon",
                self.icon_corner_radius_px, self.icon_size_px
            )));
        }
        if self.storage_key.is_empty() {
            return Err(Error::ConfigError("storage_key must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn icon_timeout(&self) -> Duration {
        Duration::from_millis(self.icon_timeout_ms)
    }
}

/// An 8-bit RGBA color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgba(pub u8, pub u8, pub u8, pub u8);

impl Rgba {
    /// Brand orange used when no better color is known
    pub const BRAND_FALLBACK: Rgba = Rgba(0xFB, 0x54, 0x2B, 0xFF);
    pub const WHITE: Rgba = Rgba(0xFF, 0xFF, 0xFF, 0xFF);
    pub const BLACK: Rgba = Rgba(0x00, 0x00, 0x00, 0xFF);
    pub const TRANSPARENT: Rgba = Rgba(0, 0, 0, 0);

    pub fn opaque(r: u8, g: u8, b: u8) -> Self {
        Rgba(r, g, b, 0xFF)
    }

    /// Perceived brightness in 0..=255
    pub fn luminance(&self) -> u8 {
        let l = 0.299 * self.0 as f32 + 0.587 * self.1 as f32 + 0.114 * self.2 as f32;
        l.round().clamp(0.0, 255.0) as u8
    }
}

/// A user-chosen shortcut.
///
/// Identity is the normalized URL: two tiles with different titles but the
/// same URL compare equal.
#[derive(Debug, Clone, Eq)]
pub struct Tile {
    pub title: String,
    pub url: String,
}

impl Tile {
    /// Build a tile, normalizing the URL when it parses.
    ///
    /// Unparsable or empty URLs are kept verbatim; such a tile stays in the
    /// list but never gets an icon.
    pub fn new(title: impl Into<String>, url: impl AsRef<str>) -> Self {
        Self {
            title: title.into(),
            url: normalize_url(url.as_ref()),
        }
    }

    /// Parsed URL if it is usable for icon lookup
    pub fn icon_url(&self) -> Option<url::Url> {
        icon_url(&self.url)
    }
}

impl PartialEq for Tile {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Hash for Tile {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.url.hash(state);
    }
}

/// Canonical form of `raw` if it parses as a URL, else the trimmed input.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    match url::Url::parse(trimmed) {
        Ok(u) => u.to_string(),
        Err(_) => trimmed.to_string(),
    }
}

/// A URL is usable for icons when it parses and names a host.
pub fn icon_url(raw: &str) -> Option<url::Url> {
    let parsed = url::Url::parse(raw.trim()).ok()?;
    match parsed.host_str() {
        Some(h) if !h.is_empty() => Some(parsed),
        _ => None,
    }
}

/// Host-assigned widget instance id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WidgetId(pub i32);

impl std::fmt::Display for WidgetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "widget#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Portrait,
    Landscape,
}

/// Size constraints reported by the host, in dp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WidgetSize {
    pub min_width: u32,
    pub min_height: u32,
    pub max_width: u32,
    pub max_height: u32,
}

impl WidgetSize {
    /// A size whose min and max agree
    pub fn fixed(width: u32, height: u32) -> Self {
        Self {
            min_width: width,
            min_height: height,
            max_width: width,
            max_height: height,
        }
    }

    /// Height actually available: the tall bound in portrait, the short one
    /// in landscape.
    pub fn effective_height(&self, orientation: Orientation) -> u32 {
        match orientation {
            Orientation::Portrait => self.max_height,
            Orientation::Landscape => self.min_height,
        }
    }
}

/// A placed widget and its latest reported geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WidgetInstance {
    pub id: WidgetId,
    pub size: WidgetSize,
    pub orientation: Orientation,
}

impl WidgetInstance {
    pub fn new(id: WidgetId, size: WidgetSize) -> Self {
        Self {
            id,
            size,
            orientation: Orientation::Portrait,
        }
    }

    pub fn effective_height(&self) -> u32 {
        self.size.effective_height(self.orientation)
    }
}
