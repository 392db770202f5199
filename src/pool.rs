// 🏊 Engine Pool - N engine handles shared by every request
//
// A handle serves one operation at a time. Operations run on the blocking
// thread pool while the request task awaits them. Configuration refresh is
// the only operation that needs every handle at once: it closes the gate so
// new work waits, then drains all permits before touching the handles.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};
use tracing::{debug, info, warn};

use crate::engine::{EngineHandle, ResolutionEngine};
use crate::error::{GatewayError, GatewayResult};
use crate::timers::Timers;

pub const ENQUEUED_TIMER: &str = "enqueued";
pub const ENGINE_TIMER: &str = "engine";

type HandleStack = Arc<Mutex<Vec<EngineHandle>>>;

fn lock(handles: &Mutex<Vec<EngineHandle>>) -> MutexGuard<'_, Vec<EngineHandle>> {
    // a panicking operation never leaves the stack half-updated
    handles.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A checked-out handle. Dropping it returns the handle, then the permit,
/// whether the operation finished, panicked or was abandoned.
struct Checkout {
    handle: Option<EngineHandle>,
    stack: HandleStack,
    _permit: OwnedSemaphorePermit,
}

impl Drop for Checkout {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            lock(&self.stack).push(handle);
        }
    }
}

/// All handles taken out for a refresh; dropping puts them back
struct Drained {
    handles: Vec<EngineHandle>,
    stack: HandleStack,
}

impl Drop for Drained {
    fn drop(&mut self) {
        lock(&self.stack).append(&mut self.handles);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed { reinitialized: usize },
    /// Another caller refreshed while this one waited
    Collapsed,
}

pub struct EnginePool {
    stack: HandleStack,
    permits: Arc<Semaphore>,
    size: usize,
    gate: RwLock<()>,
    refresh_lock: tokio::sync::Mutex<()>,
    generation: AtomicU64,
}

impl EnginePool {
    pub fn new(handles: Vec<EngineHandle>) -> GatewayResult<Self> {
        if handles.is_empty() {
            return Err(GatewayError::invalid("engine pool needs at least one handle"));
        }
        let size = handles.len();
        info!(size, "engine pool ready");

        Ok(Self {
            stack: Arc::new(Mutex::new(handles)),
            permits: Arc::new(Semaphore::new(size)),
            size,
            gate: RwLock::new(()),
            refresh_lock: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Handles not currently checked out
    pub fn available(&self) -> usize {
        lock(&self.stack).len()
    }

    /// Completed refreshes so far
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Run `op` against one engine handle on the blocking pool.
    ///
    /// Time spent waiting for a handle is recorded as `enqueued`, time in
    /// the engine as `engine`.
    pub async fn execute<T, F>(&self, timers: &mut Timers, op: F) -> GatewayResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn ResolutionEngine) -> GatewayResult<T> + Send + 'static,
    {
        timers.start(ENQUEUED_TIMER);
        let permit = {
            let _gate = self.gate.read().await;
            self.permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| GatewayError::Unavailable("engine pool is closed".into()))?
        };
        timers.stop(ENQUEUED_TIMER);

        let handle = lock(&self.stack)
            .pop()
            .ok_or_else(|| GatewayError::Unavailable("no engine handle available".into()))?;
        let checkout = Checkout {
            handle: Some(handle),
            stack: self.stack.clone(),
            _permit: permit,
        };

        timers.start(ENGINE_TIMER);
        let joined = tokio::task::spawn_blocking(move || {
            let checkout = checkout;
            match checkout.handle.as_deref() {
                Some(engine) => op(engine),
                None => Err(GatewayError::Unavailable("engine handle missing".into())),
            }
        })
        .await;
        timers.stop(ENGINE_TIMER);

        joined.map_err(|e| {
            warn!(error = %e, "engine operation did not complete");
            GatewayError::Unavailable(format!("engine worker failed: {}", e))
        })?
    }

    /// Reinitialize every handle whose active configuration is no longer
    /// the default. Concurrent callers share one refresh.
    pub async fn ensure_config_current(&self) -> GatewayResult<RefreshOutcome> {
        let observed = self.generation();
        self.refresh_from(observed).await
    }

    async fn refresh_from(&self, observed: u64) -> GatewayResult<RefreshOutcome> {
        let _refreshing = self.refresh_lock.lock().await;
        if self.generation() != observed {
            debug!(observed, current = self.generation(), "config refresh already done");
            return Ok(RefreshOutcome::Collapsed);
        }

        let _gate = self.gate.write().await;
        let _all = self
            .permits
            .clone()
            .acquire_many_owned(self.size as u32)
            .await
            .map_err(|_| GatewayError::Unavailable("engine pool is closed".into()))?;

        let drained = Drained {
            handles: std::mem::take(&mut *lock(&self.stack)),
            stack: self.stack.clone(),
        };
        let reinitialized = tokio::task::spawn_blocking(move || -> GatewayResult<usize> {
            let mut drained = drained;
            let mut reinitialized = 0;
            for engine in drained.handles.iter_mut() {
                let active = engine.active_config_id()?;
                let default = engine.default_config_id()?;
                if active != default {
                    engine.reinitialize(default)?;
                    reinitialized += 1;
                }
            }
            Ok(reinitialized)
        })
        .await
        .map_err(|e| GatewayError::Unavailable(format!("config refresh failed: {}", e)))??;

        self.generation.fetch_add(1, Ordering::SeqCst);
        if reinitialized > 0 {
            info!(reinitialized, "engine configuration refreshed");
        }
        Ok(RefreshOutcome::Refreshed { reinitialized })
    }
}

// ============================================================================
// TESTS
// ============================================================================
