//! Engine readiness gate.
//!
//! Widget updates touch the browser engine (tile list, icon service), which
//! only becomes callable after its asynchronous startup. Requests made
//! before that are queued and flushed exactly once, on the UI context, when
//! the engine reports ready.

use crate::context::ContextThread;
use crate::WidgetId;
use std::sync::{Mutex, MutexGuard};

/// Deferred widget update
pub type UpdateCallback = Box<dyn FnOnce(&[WidgetId]) + Send + 'static>;

struct GateState {
    ready: bool,
    // Only touched while `ready == false`
    pending: Vec<(Vec<WidgetId>, UpdateCallback)>,
}

/// Process-scoped readiness flag plus the queue of deferred updates.
///
/// Construct once at startup and share by reference (`Arc`).
pub struct EngineReadinessGate {
    ui: ContextThread,
    state: Mutex<GateState>,
}

impl EngineReadinessGate {
    pub fn new(ui: ContextThread) -> Self {
        Self {
            ui,
            state: Mutex::new(GateState {
                ready: false,
                pending: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn is_ready(&self) -> bool {
        self.lock().ready
    }

    /// Number of queued requests
    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Run `cb` now if the engine is ready, otherwise queue it.
    pub fn request_update(&self, ids: Vec<WidgetId>, cb: UpdateCallback) {
        {
            let mut state = self.lock();
            if !state.ready {
                log::debug!("engine not ready, deferring update for {} widget(s)", ids.len());
                state.pending.push((ids, cb));
                return;
            }
        }
        cb(&ids);
    }

    /// Flip to READY and schedule every queued update on the UI context.
    /// Later calls are no-ops.
    pub fn on_engine_ready(&self) {
        let pending = {
            let mut state = self.lock();
            if state.ready {
                return;
            }
            state.ready = true;
            std::mem::take(&mut state.pending)
        };

        log::debug!("engine ready, flushing {} deferred update(s)", pending.len());
        for (ids, cb) in pending {
            if let Err(e) = self.ui.post(move || cb(&ids)) {
                log::warn!("dropping deferred widget update: {}", e);
            }
        }
    }
}
