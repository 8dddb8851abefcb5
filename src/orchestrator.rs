//! Per-instance render decisions.
//!
//! Each placed widget independently shows the tile grid or a compact
//! placeholder, depending on whether there are tiles and whether the
//! reported height fits one row of them.

use crate::adapter::{RowDataSource, TileGridAdapter};
use crate::context::ContextThread;
use crate::icon::{IconBackend, IconResolver};
use crate::readiness::EngineReadinessGate;
use crate::store::TileStore;
use crate::{WidgetConfig, WidgetId, WidgetInstance};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Whether an instance shows its grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    Tiles,
    Placeholder,
}

impl RenderMode {
    pub fn shows_tiles(&self) -> bool {
        matches!(self, RenderMode::Tiles)
    }
}

/// Layout of the container around the grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerLayout {
    /// Top-aligned, expanding to the available height
    TopExpanding,
    /// Centered and wrapped to content
    CenteredCompact,
}

/// `Tiles` only when there is at least one tile and one row fits.
pub fn render_mode(tile_count: usize, height_dp: u32, min_row_height_dp: u32) -> RenderMode {
    if tile_count > 0 && height_dp >= min_row_height_dp {
        RenderMode::Tiles
    } else {
        RenderMode::Placeholder
    }
}

/// What the host should draw for one instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidgetView {
    pub id: WidgetId,
    pub mode: RenderMode,
    pub layout: ContainerLayout,
    pub tile_count: usize,
}

/// Widget surface exposed by the host
pub trait WidgetHost: Send + Sync {
    /// Replace the instance's view
    fn render(&self, view: &WidgetView);
    /// The instance's row data changed; re-query the adapter
    fn notify_data_changed(&self, id: WidgetId);
}

struct InstanceState {
    instance: WidgetInstance,
    adapter: Option<Arc<TileGridAdapter>>,
    view: Option<WidgetView>,
}

struct Inner {
    config: WidgetConfig,
    store: TileStore,
    backend: Arc<dyn IconBackend>,
    ui: ContextThread,
    gate: Arc<EngineReadinessGate>,
    host: Arc<dyn WidgetHost>,
    instances: Mutex<HashMap<WidgetId, InstanceState>>,
    // Held for a whole update pass so passes from different threads
    // cannot interleave their renders.
    pass: Mutex<()>,
}

// Work decided under the lock, performed after releasing it so host
// callbacks can call back into us.
enum AdapterAction {
    Create(Arc<TileGridAdapter>),
    Refresh(Arc<TileGridAdapter>),
    Destroy(Arc<TileGridAdapter>),
}

/// Tracks every placed instance and re-renders them on change.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct WidgetRenderOrchestrator {
    inner: Arc<Inner>,
}

impl WidgetRenderOrchestrator {
    /// Build the orchestrator and hook it to `store` so every write
    /// refreshes all instances.
    pub fn new(
        config: WidgetConfig,
        store: TileStore,
        backend: Arc<dyn IconBackend>,
        ui: ContextThread,
        gate: Arc<EngineReadinessGate>,
        host: Arc<dyn WidgetHost>,
    ) -> Self {
        let inner = Arc::new(Inner {
            config,
            store: store.clone(),
            backend,
            ui,
            gate,
            host,
            instances: Mutex::new(HashMap::new()),
            pass: Mutex::new(()),
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        store.set_on_change(move || {
            if let Some(inner) = weak.upgrade() {
                WidgetRenderOrchestrator { inner }.refresh_all();
            }
        });

        Self { inner }
    }

    fn instances(&self) -> MutexGuard<'_, HashMap<WidgetId, InstanceState>> {
        self.inner.instances.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// A new instance was placed on the home screen.
    pub fn on_instance_placed(&self, instance: WidgetInstance) {
        self.instances().insert(
            instance.id,
            InstanceState {
                instance,
                adapter: None,
                view: None,
            },
        );
        self.request_update(vec![instance.id]);
    }

    /// An instance reported new size constraints or orientation.
    pub fn on_size_changed(&self, instance: WidgetInstance) {
        self.instances()
            .entry(instance.id)
            .and_modify(|s| s.instance = instance)
            .or_insert(InstanceState {
                instance,
                adapter: None,
                view: None,
            });
        self.request_update(vec![instance.id]);
    }

    /// An instance was removed; its adapter is torn down.
    pub fn on_instance_removed(&self, id: WidgetId) {
        let removed = self.instances().remove(&id);
        if let Some(adapter) = removed.and_then(|s| s.adapter) {
            adapter.on_destroy();
        }
    }

    /// Re-evaluate every known instance.
    pub fn refresh_all(&self) {
        let mut ids: Vec<WidgetId> = self.instances().keys().copied().collect();
        if ids.is_empty() {
            return;
        }
        ids.sort();
        self.request_update(ids);
    }

    fn request_update(&self, ids: Vec<WidgetId>) {
        let this = self.clone();
        self.inner
            .gate
            .request_update(ids, Box::new(move |ids: &[WidgetId]| this.update_instances(ids)));
    }

    /// Adapter currently bound to `id`, if its grid is shown
    pub fn adapter(&self, id: WidgetId) -> Option<Arc<TileGridAdapter>> {
        self.instances().get(&id).and_then(|s| s.adapter.clone())
    }

    /// Last view rendered for `id`
    pub fn view(&self, id: WidgetId) -> Option<WidgetView> {
        self.instances().get(&id).and_then(|s| s.view.clone())
    }

    pub fn instance_ids(&self) -> Vec<WidgetId> {
        let mut ids: Vec<WidgetId> = self.instances().keys().copied().collect();
        ids.sort();
        ids
    }

    fn new_adapter(&self) -> Arc<TileGridAdapter> {
        let resolver = IconResolver::new(
            &self.inner.config,
            self.inner.ui.clone(),
            self.inner.backend.clone(),
        );
        Arc::new(TileGridAdapter::new(self.inner.store.clone(), resolver))
    }

    /// One update pass: decide, run adapter lifecycle, render.
    ///
    /// Passes are serialized; host callbacks must not write the tile store
    /// synchronously.
    fn update_instances(&self, ids: &[WidgetId]) {
        let _pass = self.inner.pass.lock().unwrap_or_else(|p| p.into_inner());
        let tile_count = self.inner.store.read().len();
        let min_row = self.inner.config.min_tile_row_height_dp;
        let mut views = Vec::new();
        let mut actions = Vec::new();

        {
            let mut instances = self.instances();
            for id in ids {
                // Removed while the update was queued
                let Some(state) = instances.get_mut(id) else {
                    continue;
                };
                let mode = render_mode(tile_count, state.instance.effective_height(), min_row);
                let layout = match mode {
                    RenderMode::Tiles => ContainerLayout::TopExpanding,
                    RenderMode::Placeholder => ContainerLayout::CenteredCompact,
                };

                match (mode, state.adapter.clone()) {
                    (RenderMode::Tiles, Some(adapter)) => actions.push(AdapterAction::Refresh(adapter)),
                    (RenderMode::Tiles, None) => {
                        let adapter = self.new_adapter();
                        state.adapter = Some(adapter.clone());
                        actions.push(AdapterAction::Create(adapter));
                    }
                    (RenderMode::Placeholder, Some(adapter)) => {
                        state.adapter = None;
                        actions.push(AdapterAction::Destroy(adapter));
                    }
                    (RenderMode::Placeholder, None) => {}
                }

                let view = WidgetView {
                    id: *id,
                    mode,
                    layout,
                    tile_count,
                };
                log::debug!("{}: {:?} ({} tiles)", id, mode, tile_count);
                state.view = Some(view.clone());
                views.push(view);
            }
        }

        for action in actions {
            match action {
                AdapterAction::Create(a) => a.on_create(),
                AdapterAction::Refresh(a) => a.on_data_set_changed(),
                AdapterAction::Destroy(a) => a.on_destroy(),
            }
        }
        for view in &views {
            self.inner.host.render(view);
            if view.mode.shows_tiles() {
                self.inner.host.notify_data_changed(view.id);
            }
        }
    }
}
