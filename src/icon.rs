//! Icon resolution for tiles.
//!
//! The icon service is asynchronous and confined to the UI context: it must
//! be created, called and destroyed there, and it replies there. Row
//! requests arrive on host worker threads and must be answered
//! synchronously, so [`IconResolver::resolve`] schedules the lookup on the
//! service context and blocks the worker on a [`OneShot`] for a fixed time.
//! Anything short of a real bitmap turns into a rounded monogram.

use crate::context::ContextThread;
use crate::gate::OneShot;
use crate::{icon_url, Error, Result, Rgba, WidgetConfig, MAX_ICON_SIZE_PX};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use url::Url;

/// Letter and colors drawn over a synthesized icon by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Monogram {
    pub letter: char,
    pub background: Rgba,
    pub text_color: Rgba,
}

/// Square RGBA8 icon. Pixel data is shared between clones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub rgba: Arc<[u8]>,
    /// Set when the icon was synthesized rather than fetched
    pub monogram: Option<Monogram>,
}

impl Bitmap {
    pub fn from_rgba(width: u32, height: u32, rgba: Vec<u8>) -> Self {
        Self {
            width,
            height,
            rgba: rgba.into(),
            monogram: None,
        }
    }

    /// Whether the service handed us something drawable
    pub fn is_usable(&self) -> bool {
        let expected = (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|n| n.checked_mul(4));
        self.width > 0 && self.height > 0 && expected == Some(self.rgba.len())
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        let px = self.rgba.get(i..i + 4)?;
        Some(Rgba(px[0], px[1], px[2], px[3]))
    }
}

/// What the icon service answered
#[derive(Debug, Clone)]
pub enum IconReply {
    /// A real icon
    Bitmap(Bitmap),
    /// No icon, but a dominant color suggested for a monogram
    FallbackColor(Rgba),
    /// The lookup path failed
    Failed(String),
}

/// Reply channel handed to the service; call it once, from its context
pub type IconCallback = Box<dyn FnOnce(IconReply) + Send + 'static>;

/// Asynchronous, context-confined icon lookup.
///
/// Every method is only ever invoked on the context the service was
/// created on.
pub trait IconService: Send {
    /// Look up the icon for `url` at roughly `size_px` and reply later.
    fn lookup(&mut self, url: &Url, size_px: u32, reply: IconCallback);

    /// Release native resources. Called at most once.
    fn destroy(&mut self) {}
}

/// Creates icon services on demand (on the service context)
pub trait IconBackend: Send + Sync {
    fn create_service(&self) -> Result<Box<dyn IconService>>;
}

/// Diagnostic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverStats {
    pub hits: u64,
    pub misses: u64,
    pub timeouts: u64,
    pub failures: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    timeouts: AtomicU64,
    failures: AtomicU64,
}

#[derive(Default)]
struct Cache {
    entries: HashMap<String, Bitmap>,
    // URLs of the latest snapshot; inserts outside it are refused so a
    // lookup finishing after a refresh cannot resurrect a removed tile.
    allowed: Option<HashSet<String>>,
}

#[derive(Default)]
struct ServiceSlot {
    service: Option<Box<dyn IconService>>,
    destroyed: bool,
}

/// Per-adapter icon cache in front of a lazily created icon service.
pub struct IconResolver {
    context: ContextThread,
    backend: Arc<dyn IconBackend>,
    timeout: Duration,
    size_px: u32,
    corner_radius_px: u32,
    fallback_color: Rgba,
    cache_timeout_fallback: bool,
    cache: Mutex<Cache>,
    service: Arc<Mutex<ServiceSlot>>,
    destroyed: AtomicBool,
    counters: Counters,
}

impl IconResolver {
    /// `context` is the context the icon service is confined to.
    pub fn new(config: &WidgetConfig, context: ContextThread, backend: Arc<dyn IconBackend>) -> Self {
        Self {
            context,
            backend,
            timeout: config.icon_timeout(),
            size_px: config.icon_size_px,
            corner_radius_px: config.icon_corner_radius_px,
            fallback_color: config.fallback_color,
            cache_timeout_fallback: config.cache_timeout_fallback,
            cache: Mutex::new(Cache::default()),
            service: Arc::new(Mutex::new(ServiceSlot::default())),
            destroyed: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    fn cache(&self) -> MutexGuard<'_, Cache> {
        self.cache.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Icon for `url`, or `None` when the URL cannot have one.
    ///
    /// Blocks the calling worker for at most the configured timeout. Never
    /// blocks when called on the service context itself.
    pub fn resolve(&self, url: &str) -> Option<Bitmap> {
        let parsed = icon_url(url)?;
        let key = parsed.to_string();

        if let Some(hit) = self.cache().entries.get(&key).cloned() {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Some(hit);
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);

        if self.destroyed.load(Ordering::SeqCst) {
            log::debug!("resolver destroyed, synthesizing icon for {}", key);
            return Some(self.fallback(&parsed));
        }
        if self.context.is_current() {
            // Waiting here would stall the very context that must reply
            log::warn!("icon resolve for {} called on the service context; not waiting", key);
            return Some(self.fallback(&parsed));
        }

        let (icon, cacheable) = match self.lookup_blocking(&parsed) {
            Ok(IconReply::Bitmap(b)) if b.is_usable() => (b, true),
            Ok(IconReply::Bitmap(_)) => {
                log::debug!("unusable bitmap for {}, using monogram", key);
                (self.fallback(&parsed), self.cache_timeout_fallback)
            }
            Ok(IconReply::FallbackColor(color)) => (self.monogram(&parsed, color), true),
            Ok(IconReply::Failed(msg)) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                log::warn!("{}", Error::IconLookupFailure(format!("{}: {}", key, msg)));
                (self.fallback(&parsed), self.cache_timeout_fallback)
            }
            Err(e) => {
                match &e {
                    Error::IconTimeout(_) => self.counters.timeouts.fetch_add(1, Ordering::Relaxed),
                    _ => self.counters.failures.fetch_add(1, Ordering::Relaxed),
                };
                log::warn!("icon for {}: {}", key, e);
                (self.fallback(&parsed), self.cache_timeout_fallback)
            }
        };

        if cacheable {
            let mut cache = self.cache();
            let allowed = cache.allowed.as_ref().map_or(true, |a| a.contains(&key));
            if allowed && !self.destroyed.load(Ordering::SeqCst) {
                cache.entries.insert(key, icon.clone());
            }
        }
        Some(icon)
    }

    // Schedule the lookup on the service context and wait on the gate.
    fn lookup_blocking(&self, url: &Url) -> Result<IconReply> {
        let gate: Arc<OneShot<IconReply>> = Arc::new(OneShot::new());
        let slot = self.service.clone();
        let backend = self.backend.clone();
        let size = self.size_px;
        let target = url.clone();
        let reply_gate = gate.clone();

        self.context.post(move || {
            let mut slot = slot.lock().unwrap_or_else(|p| p.into_inner());
            if slot.destroyed {
                reply_gate.set(IconReply::Failed("icon service destroyed".to_string()));
                return;
            }
            if slot.service.is_none() {
                match backend.create_service() {
                    Ok(service) => {
                        log::debug!("icon service created");
                        slot.service = Some(service);
                    }
                    Err(e) => {
                        reply_gate.set(IconReply::Failed(e.to_string()));
                        return;
                    }
                }
            }
            if let Some(service) = slot.service.as_mut() {
                let late_gate = reply_gate.clone();
                service.lookup(
                    &target,
                    size,
                    Box::new(move |reply| {
                        // After a timeout this is simply dropped
                        if !late_gate.set(reply) {
                            log::debug!("late icon reply discarded");
                        }
                    }),
                );
            }
        })?;

        gate.try_await(self.timeout)
            .ok_or(Error::IconTimeout(self.timeout.as_millis() as u64))
    }

    fn fallback(&self, url: &Url) -> Bitmap {
        self.monogram(url, self.fallback_color)
    }

    fn monogram(&self, url: &Url, color: Rgba) -> Bitmap {
        synthesize_monogram(url, color, self.size_px, self.corner_radius_px)
    }

    /// Shrink the cache to `urls`, keeping valid entries. Returns how many
    /// entries were evicted.
    pub fn retain_urls(&self, urls: &HashSet<String>) -> usize {
        let mut cache = self.cache();
        let before = cache.entries.len();
        cache.entries.retain(|k, _| urls.contains(k));
        cache.allowed = Some(urls.clone());
        before - cache.entries.len()
    }

    pub fn cached_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.cache().entries.keys().cloned().collect();
        urls.sort();
        urls
    }

    pub fn clear_cache(&self) {
        self.cache().entries.clear();
    }

    pub fn stats(&self) -> ResolverStats {
        ResolverStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Clear the cache and release the icon service on its context.
    /// Only the first call does anything.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            log::debug!("{}", Error::ResourceAlreadyDestroyed("icon resolver"));
            return;
        }
        self.clear_cache();

        let slot = self.service.clone();
        let release = move || {
            let mut slot = slot.lock().unwrap_or_else(|p| p.into_inner());
            slot.destroyed = true;
            if let Some(mut service) = slot.service.take() {
                service.destroy();
                log::debug!("icon service destroyed");
            }
        };
        if self.context.is_current() {
            release();
        } else if let Err(e) = self.context.post(release) {
            // Context is gone; nothing can reply any more, drop in place
            log::debug!("releasing icon service inline: {}", e);
            let mut slot = self.service.lock().unwrap_or_else(|p| p.into_inner());
            slot.destroyed = true;
            if let Some(mut service) = slot.service.take() {
                service.destroy();
            }
        }
    }
}

impl Drop for IconResolver {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// First letter to show for `url`: the host without `www.`, upper-cased.
pub fn monogram_letter(url: &Url) -> char {
    let host = url.host_str().unwrap_or_default();
    let host = host.strip_prefix("www.").unwrap_or(host);
    host.chars()
        .find(|c| c.is_alphanumeric())
        .and_then(|c| c.to_uppercase().next())
        .unwrap_or('?')
}

/// Rounded square of `color`, transparent outside the corners, tagged with
/// the monogram letter for the host to draw. `size` is capped at
/// [`MAX_ICON_SIZE_PX`].
pub fn synthesize_monogram(url: &Url, color: Rgba, size: u32, radius: u32) -> Bitmap {
    let size = size.min(MAX_ICON_SIZE_PX);
    let r = radius.min(size / 2) as f32;
    let s = size as f32;
    let mut rgba = Vec::with_capacity(size as usize * size as usize * 4);

    for y in 0..size {
        for x in 0..size {
            let px = x as f32 + 0.5;
            let py = y as f32 + 0.5;
            // Nearest point of the inner rectangle; outside it only corners matter
            let cx = px.clamp(r, s - r);
            let cy = py.clamp(r, s - r);
            let inside = (px - cx).powi(2) + (py - cy).powi(2) <= r * r;
            let c = if inside { color } else { Rgba::TRANSPARENT };
            rgba.extend_from_slice(&[c.0, c.1, c.2, c.3]);
        }
    }

    let text_color = if color.luminance() > 186 { Rgba::BLACK } else { Rgba::WHITE };
    Bitmap {
        width: size,
        height: size,
        rgba: rgba.into(),
        monogram: Some(Monogram {
            letter: monogram_letter(url),
            background: color,
            text_color,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    /// Replies with a solid bitmap, counting lookups.
    struct SolidService {
        lookups: Arc<AtomicUsize>,
        destroyed: Arc<AtomicUsize>,
    }

    impl IconService for SolidService {
        fn lookup(&mut self, _url: &Url, size_px: u32, reply: IconCallback) {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            reply(IconReply::Bitmap(Bitmap::from_rgba(
                size_px,
                size_px,
                vec![7; (size_px * size_px * 4) as usize],
            )));
        }

        fn destroy(&mut self) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct SolidBackend {
        created: AtomicUsize,
        lookups: Arc<AtomicUsize>,
        destroyed: Arc<AtomicUsize>,
    }

    impl SolidBackend {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                created: AtomicUsize::new(0),
                lookups: Arc::new(AtomicUsize::new(0)),
                destroyed: Arc::new(AtomicUsize::new(0)),
            })
        }
    }

    impl IconBackend for SolidBackend {
        fn create_service(&self) -> Result<Box<dyn IconService>> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(SolidService {
                lookups: self.lookups.clone(),
                destroyed: self.destroyed.clone(),
            }))
        }
    }

    struct SilentService;
    impl IconService for SilentService {
        fn lookup(&mut self, _url: &Url, _size_px: u32, _reply: IconCallback) {}
    }
    struct SilentBackend;
    impl IconBackend for SilentBackend {
        fn create_service(&self) -> Result<Box<dyn IconService>> {
            Ok(Box::new(SilentService))
        }
    }

    struct BrokenBackend;
    impl IconBackend for BrokenBackend {
        fn create_service(&self) -> Result<Box<dyn IconService>> {
            Err(Error::Other("no profile".to_string()))
        }
    }

    /// Answers every lookup with a fixed reply.
    struct FixedService(fn() -> IconReply);
    impl IconService for FixedService {
        fn lookup(&mut self, _url: &Url, _size_px: u32, reply: IconCallback) {
            reply((self.0)());
        }
    }
    struct FixedBackend(fn() -> IconReply);
    impl IconBackend for FixedBackend {
        fn create_service(&self) -> Result<Box<dyn IconService>> {
            Ok(Box::new(FixedService(self.0)))
        }
    }

    fn failed_reply() -> IconReply {
        IconReply::Failed("database closed".to_string())
    }

    fn empty_bitmap_reply() -> IconReply {
        IconReply::Bitmap(Bitmap::from_rgba(0, 0, Vec::new()))
    }

    fn config(timeout_ms: u64) -> WidgetConfig {
        WidgetConfig {
            icon_timeout_ms: timeout_ms,
            icon_size_px: 16,
            icon_corner_radius_px: 4,
            ..Default::default()
        }
    }

    #[test]
    fn invalid_url_has_no_icon() {
        let ctx = ContextThread::spawn("icon-ctx").unwrap();
        let r = IconResolver::new(&config(100), ctx, SolidBackend::new());
        assert!(r.resolve("").is_none());
        assert!(r.resolve("not a url").is_none());
    }

    #[test]
    fn hit_after_miss_skips_lookup_and_service_is_created_lazily() {
        let ctx = ContextThread::spawn("icon-ctx").unwrap();
        let backend = SolidBackend::new();
        let r = IconResolver::new(&config(500), ctx, backend.clone());
        assert_eq!(backend.created.load(Ordering::SeqCst), 0);

        let first = r.resolve("https://example.com").unwrap();
        let second = r.resolve("https://example.com/").unwrap();
        assert_eq!(first, second);
        assert!(first.monogram.is_none());
        assert_eq!(backend.created.load(Ordering::SeqCst), 1);
        assert_eq!(backend.lookups.load(Ordering::SeqCst), 1);
        assert_eq!(r.stats().hits, 1);
        assert_eq!(r.stats().misses, 1);
    }

    #[test]
    fn silent_service_times_out_to_cached_fallback() {
        let ctx = ContextThread::spawn("icon-ctx").unwrap();
        let r = IconResolver::new(&config(100), ctx, Arc::new(SilentBackend));
        let start = Instant::now();
        let icon = r.resolve("https://slow.example").unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(100 + 500));
        let m = icon.monogram.as_ref().unwrap();
        assert_eq!(m.background, Rgba::BRAND_FALLBACK);
        assert_eq!(m.letter, 'S');
        assert_eq!(r.stats().timeouts, 1);
        assert_eq!(r.cached_urls(), vec!["https://slow.example/".to_string()]);
    }

    #[test]
    fn timeout_fallback_not_cached_when_disabled() {
        let ctx = ContextThread::spawn("icon-ctx").unwrap();
        let cfg = WidgetConfig {
            cache_timeout_fallback: false,
            ..config(30)
        };
        let r = IconResolver::new(&cfg, ctx, Arc::new(SilentBackend));
        assert!(r.resolve("https://slow.example").is_some());
        assert!(r.cached_urls().is_empty());
    }

    #[test]
    fn backend_failure_yields_fallback() {
        let ctx = ContextThread::spawn("icon-ctx").unwrap();
        let r = IconResolver::new(&config(500), ctx, Arc::new(BrokenBackend));
        let icon = r.resolve("https://www.rust-lang.org").unwrap();
        let m = icon.monogram.unwrap();
        assert_eq!(m.letter, 'R');
        assert_eq!(m.background, Rgba::BRAND_FALLBACK);
        assert_eq!(r.stats().failures, 1);
    }

    #[test]
    fn failed_reply_yields_cached_brand_monogram() {
        let ctx = ContextThread::spawn("icon-ctx").unwrap();
        let r = IconResolver::new(&config(500), ctx, Arc::new(FixedBackend(failed_reply)));
        let icon = r.resolve("https://news.example").unwrap();
        let m = icon.monogram.as_ref().unwrap();
        assert_eq!(m.letter, 'N');
        assert_eq!(m.background, Rgba::BRAND_FALLBACK);
        assert_eq!(r.stats().failures, 1);
        assert_eq!(r.stats().timeouts, 0);
        assert_eq!(r.cached_urls(), vec!["https://news.example/".to_string()]);

        assert_eq!(r.resolve("https://news.example").unwrap(), icon);
        assert_eq!(r.stats().hits, 1);
        assert_eq!(r.stats().failures, 1);
    }

    #[test]
    fn failed_reply_not_cached_when_disabled() {
        let ctx = ContextThread::spawn("icon-ctx").unwrap();
        let cfg = WidgetConfig {
            cache_timeout_fallback: false,
            ..config(500)
        };
        let r = IconResolver::new(&cfg, ctx, Arc::new(FixedBackend(failed_reply)));
        assert!(r.resolve("https://news.example").unwrap().monogram.is_some());
        assert!(r.cached_urls().is_empty());
        r.resolve("https://news.example");
        assert_eq!(r.stats().failures, 2);
    }

    #[test]
    fn unusable_bitmap_falls_back_to_monogram() {
        let ctx = ContextThread::spawn("icon-ctx").unwrap();
        let r = IconResolver::new(&config(500), ctx, Arc::new(FixedBackend(empty_bitmap_reply)));
        let icon = r.resolve("https://blank.example").unwrap();
        assert!(icon.is_usable());
        assert_eq!((icon.width, icon.height), (16, 16));
        assert_eq!(icon.monogram.unwrap().background, Rgba::BRAND_FALLBACK);
        assert_eq!(r.cached_urls(), vec!["https://blank.example/".to_string()]);
    }

    #[test]
    fn unusable_bitmap_fallback_follows_cache_setting() {
        let ctx = ContextThread::spawn("icon-ctx").unwrap();
        let cfg = WidgetConfig {
            cache_timeout_fallback: false,
            ..config(500)
        };
        let r = IconResolver::new(&cfg, ctx, Arc::new(FixedBackend(empty_bitmap_reply)));
        assert!(r.resolve("https://blank.example").unwrap().monogram.is_some());
        assert!(r.cached_urls().is_empty());
    }

    #[test]
    fn bitmap_with_short_buffer_is_not_usable() {
        assert!(!Bitmap::from_rgba(4, 4, vec![0; 4 * 4 * 4 - 1]).is_usable());
        assert!(!Bitmap::from_rgba(u32::MAX, u32::MAX, vec![0; 16]).is_usable());
        let short = Bitmap::from_rgba(4, 4, vec![0; 8]);
        assert_eq!(short.pixel(3, 3), None);
    }

    #[test]
    fn retain_evicts_only_stale_entries() {
        let ctx = ContextThread::spawn("icon-ctx").unwrap();
        let backend = SolidBackend::new();
        let r = IconResolver::new(&config(500), ctx, backend.clone());
        for u in ["https://a.example", "https://b.example", "https://c.example"] {
            r.resolve(u);
        }
        let keep: HashSet<String> = ["https://a.example/", "https://c.example/"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(r.retain_urls(&keep), 1);
        assert_eq!(r.cached_urls().len(), 2);

        // Not in the snapshot any more, so it is served but not cached
        r.resolve("https://b.example");
        assert_eq!(r.cached_urls().len(), 2);
        assert_eq!(backend.lookups.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn destroy_releases_service_once() {
        let ctx = ContextThread::spawn("icon-ctx").unwrap();
        let backend = SolidBackend::new();
        let r = IconResolver::new(&config(500), ctx.clone(), backend.clone());
        r.resolve("https://example.com");
        r.destroy();
        r.destroy();
        drop(r);
        ctx.shutdown();
        assert_eq!(backend.destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn resolve_on_service_context_does_not_wait() {
        let ctx = ContextThread::spawn("icon-ctx").unwrap();
        let r = Arc::new(IconResolver::new(&config(2000), ctx.clone(), Arc::new(SilentBackend)));
        let r2 = r.clone();
        let start = Instant::now();
        let icon = ctx.run_sync(move || r2.resolve("https://example.com")).unwrap();
        assert!(icon.is_some());
        assert!(start.elapsed() < Duration::from_millis(1000));
    }

    #[test]
    fn monogram_has_transparent_corners_and_readable_text() {
        let url = Url::parse("https://www.example.com").unwrap();
        let light = synthesize_monogram(&url, Rgba::opaque(250, 250, 250), 32, 8);
        assert_eq!(light.pixel(0, 0), Some(Rgba::TRANSPARENT));
        assert_eq!(light.pixel(16, 16), Some(Rgba::opaque(250, 250, 250)));
        assert_eq!(light.pixel(16, 0), Some(Rgba::opaque(250, 250, 250)));
        let m = light.monogram.unwrap();
        assert_eq!(m.letter, 'E');
        assert_eq!(m.text_color, Rgba::BLACK);

        let dark = synthesize_monogram(&url, Rgba::opaque(20, 20, 80), 32, 8);
        assert_eq!(dark.monogram.unwrap().text_color, Rgba::WHITE);
    }

    #[test]
    fn monogram_size_is_capped() {
        let url = Url::parse("https://example.com").unwrap();
        let icon = synthesize_monogram(&url, Rgba::BRAND_FALLBACK, u32::MAX, u32::MAX);
        assert_eq!(icon.width, MAX_ICON_SIZE_PX);
        assert_eq!(icon.height, MAX_ICON_SIZE_PX);
        assert!(icon.is_usable());
    }
}
