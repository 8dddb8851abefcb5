//! Dedicated execution contexts.
//!
//! A `ContextThread` owns one OS thread and runs posted jobs on it in FIFO
//! order. The widget uses one as its UI-affine context; the icon service is
//! confined to it as well, so every lookup is scheduled here and every reply
//! is delivered from here.

use crate::{Error, Result};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};

/// A unit of work posted to a context
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Handle to a dedicated worker thread. Clones share the same thread.
#[derive(Clone)]
pub struct ContextThread {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    thread_id: ThreadId,
    tx: Mutex<Option<Sender<Job>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ContextThread {
    /// Spawn a new named context thread.
    pub fn spawn(name: &str) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                // Job loop; ends once every sender is gone and the queue drained
                while let Ok(job) = rx.recv() {
                    job();
                }
            })
            .map_err(|e| Error::ContextClosed(format!("failed to spawn {}: {}", name, e)))?;

        let thread_id = handle.thread().id();
        log::debug!("context thread '{}' started", name);
        Ok(Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                thread_id,
                tx: Mutex::new(Some(tx)),
                handle: Mutex::new(Some(handle)),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether the caller is running on this context
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.inner.thread_id
    }

    /// Queue `job` to run on this context.
    pub fn post<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = self.inner.tx.lock().unwrap_or_else(|p| p.into_inner());
        match guard.as_ref() {
            Some(tx) => tx
                .send(Box::new(job))
                .map_err(|_| Error::ContextClosed(self.inner.name.clone())),
            None => Err(Error::ContextClosed(self.inner.name.clone())),
        }
    }

    /// Run `f` on this context and wait for its result.
    ///
    /// Runs inline when already on the context.
    pub fn run_sync<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if self.is_current() {
            return Ok(f());
        }
        let (tx, rx) = mpsc::channel();
        self.post(move || {
            let _ = tx.send(f());
        })?;
        rx.recv()
            .map_err(|_| Error::ContextClosed(format!("{}: job dropped", self.inner.name)))
    }

    /// Stop accepting work, drain the queue and join the thread.
    /// Safe to call more than once.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

impl Inner {
    fn shutdown(&self) {
        let tx = self.tx.lock().unwrap_or_else(|p| p.into_inner()).take();
        if tx.is_none() {
            return;
        }
        drop(tx);

        let handle = self.handle.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = handle {
            // Joining ourselves would never return
            if thread::current().id() == self.thread_id {
                return;
            }
            if handle.join().is_err() {
                log::error!("context thread '{}' panicked", self.name);
            }
        }
        log::debug!("context thread '{}' stopped", self.name);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ContextThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextThread")
            .field("name", &self.inner.name)
            .finish()
    }
}
