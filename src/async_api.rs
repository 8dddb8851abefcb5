use crate::adapter::TileGridAdapter;
use crate::context::ContextThread;
use crate::icon::IconBackend;
use crate::orchestrator::{WidgetHost, WidgetRenderOrchestrator, WidgetView};
use crate::readiness::EngineReadinessGate;
use crate::store::{KeyValueStore, TileStore};
use crate::{Error, Result, Tile, WidgetConfig, WidgetId, WidgetInstance};
use std::sync::Arc;
use tokio::sync::oneshot;

/// An async-friendly handle to the whole widget subsystem.
///
/// Owns the UI context thread. Every call is posted there and answered
/// through a oneshot channel, so async callers never touch widget state
/// from their own threads.
#[derive(Clone)]
pub struct WidgetHandle {
    ui: ContextThread,
    store: TileStore,
    gate: Arc<EngineReadinessGate>,
    orchestrator: WidgetRenderOrchestrator,
}

impl WidgetHandle {
    /// Wire up store, readiness gate and orchestrator around a fresh UI
    /// context thread.
    pub fn start(
        config: WidgetConfig,
        kv: Arc<dyn KeyValueStore>,
        backend: Arc<dyn IconBackend>,
        host: Arc<dyn WidgetHost>,
    ) -> Result<Self> {
        config.validate()?;
        let ui = ContextThread::spawn("quicktiles-ui")?;
        let store = TileStore::new(kv, &config.storage_key);
        let gate = Arc::new(EngineReadinessGate::new(ui.clone()));
        let orchestrator = WidgetRenderOrchestrator::new(
            config,
            store.clone(),
            backend,
            ui.clone(),
            gate.clone(),
            host,
        );
        Ok(Self {
            ui,
            store,
            gate,
            orchestrator,
        })
    }

    pub fn orchestrator(&self) -> &WidgetRenderOrchestrator {
        &self.orchestrator
    }

    pub fn gate(&self) -> &Arc<EngineReadinessGate> {
        &self.gate
    }

    pub fn context(&self) -> &ContextThread {
        &self.ui
    }

    // Post `f` to the UI context and await its result.
    async fn call<T, F>(&self, what: &str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.ui.post(move || {
            let _ = tx.send(f());
        })?;
        rx.await
            .map_err(|e| Error::Other(format!("{} canceled: {}", what, e)))
    }

    /// Replace the stored tiles; every instance refreshes.
    pub async fn set_tiles(&self, tiles: Vec<Tile>) -> Result<()> {
        let store = self.store.clone();
        self.call("SetTiles", move || store.write(&tiles)).await?
    }

    /// Current stored tiles
    pub async fn tiles(&self) -> Result<Vec<Tile>> {
        let store = self.store.clone();
        self.call("Tiles", move || store.read()).await
    }

    /// Report that the browser engine finished starting up.
    pub async fn engine_ready(&self) -> Result<()> {
        let gate = self.gate.clone();
        self.call("EngineReady", move || gate.on_engine_ready()).await
    }

    pub async fn widget_placed(&self, instance: WidgetInstance) -> Result<()> {
        let orch = self.orchestrator.clone();
        self.call("WidgetPlaced", move || orch.on_instance_placed(instance)).await
    }

    pub async fn widget_resized(&self, instance: WidgetInstance) -> Result<()> {
        let orch = self.orchestrator.clone();
        self.call("WidgetResized", move || orch.on_size_changed(instance)).await
    }

    pub async fn widget_removed(&self, id: WidgetId) -> Result<()> {
        let orch = self.orchestrator.clone();
        self.call("WidgetRemoved", move || orch.on_instance_removed(id)).await
    }

    /// Last rendered view of `id`, after any queued UI work has run.
    pub async fn view(&self, id: WidgetId) -> Result<Option<WidgetView>> {
        let orch = self.orchestrator.clone();
        self.call("View", move || orch.view(id)).await
    }

    /// Adapter bound to `id`, after any queued UI work has run.
    pub async fn adapter(&self, id: WidgetId) -> Result<Option<Arc<TileGridAdapter>>> {
        let orch = self.orchestrator.clone();
        self.call("Adapter", move || orch.adapter(id)).await
    }

    /// Tear down every instance and stop the UI context.
    pub async fn close(self) -> Result<()> {
        let orch = self.orchestrator.clone();
        self.call("Close", move || {
            for id in orch.instance_ids() {
                orch.on_instance_removed(id);
            }
        })
        .await?;
        self.store.clear_on_change();
        self.ui.shutdown();
        Ok(())
    }
}
