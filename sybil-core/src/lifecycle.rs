use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwapOption;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{preferred_device, DeviceKind, DeviceMap, Error, Loader, ModelLike, Result};

/// Exclusive access to the resident model.
///
/// Holding a lease blocks loads, unloads and every other render until it is
/// dropped. The lease can be moved onto a blocking thread.
pub struct ModelLease<M> {
    guard: OwnedMutexGuard<Option<M>>,
}

impl<M: ModelLike> ModelLease<M> {
    pub fn model(&mut self) -> Result<&mut M> {
        self.guard.as_mut().ok_or(Error::ModelNotReady)
    }

    pub fn device_kind(&self) -> Option<DeviceKind> {
        self.guard.as_ref().map(ModelLike::device_kind)
    }
}

/// Owns the single model handle and its UNLOADED/LOADED state.
///
/// Load, render and unload all go through one FIFO mutex. A caller that
/// finds the slot empty loads while holding the lock, so callers queued
/// behind it wake up to a loaded model instead of loading a second copy.
/// When that load fails, the callers that were already queued get its
/// error; only callers arriving after it finished try again.
pub struct ModelManager<L: Loader> {
    loader: L,
    device_map: DeviceMap,
    slot: Arc<Mutex<Option<L::Model>>>,
    // The fields below are only written with the slot lock held.
    // Mirrors the slot for lock-free reads.
    status: ArcSwapOption<DeviceKind>,
    // Finished load attempts, successful or not.
    attempts: AtomicU64,
    // Message of the latest attempt if it failed; cleared by a success.
    last_failure: ArcSwapOption<String>,
}

impl<L: Loader> ModelManager<L> {
    pub fn new(loader: L, device_map: DeviceMap) -> Self {
        Self {
            loader,
            device_map,
            slot: Arc::new(Mutex::new(None)),
            status: ArcSwapOption::empty(),
            attempts: AtomicU64::new(0),
            last_failure: ArcSwapOption::empty(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.status.load().is_some()
    }

    pub fn current_device(&self) -> Option<DeviceKind> {
        self.status.load().as_deref().copied()
    }

    /// The device a load would bind to right now.
    pub fn preferred_device(&self) -> DeviceKind {
        preferred_device(self.device_map)
    }

    /// Loads the model unless it is already resident.
    pub async fn ensure_loaded(&self) -> Result<DeviceKind> {
        let lease = self.acquire().await?;
        lease.device_kind().ok_or(Error::ModelNotReady)
    }

    /// Waits for exclusive access, loading the model first if needed.
    pub async fn acquire(&self) -> Result<ModelLease<L::Model>> {
        let seen = self.attempts.load(Ordering::SeqCst);
        let mut guard = self.slot.clone().lock_owned().await;
        if guard.is_none() {
            // A load finished while we were queued and left the slot empty.
            if self.attempts.load(Ordering::SeqCst) != seen {
                if let Some(failure) = self.last_failure.load_full() {
                    return Err(Error::LoadFailed(anyhow::anyhow!("{failure}")));
                }
            }

            let started = Instant::now();
            let loaded = self.loader.load(self.device_map).await;
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let model = match loaded {
                Ok(model) => model,
                Err(e) => {
                    let message = format!("{e:#}");
                    tracing::error!(error = %message, "model load failed");
                    self.last_failure.store(Some(Arc::new(message)));
                    return Err(Error::LoadFailed(e));
                }
            };
            let device = model.device_kind();
            *guard = Some(model);
            self.status.store(Some(Arc::new(device)));
            self.last_failure.store(None);
            tracing::info!(%device, elapsed = ?started.elapsed(), "model loaded");
        }
        Ok(ModelLease { guard })
    }

    /// Waits for exclusive access without loading.
    pub async fn acquire_loaded(&self) -> Result<ModelLease<L::Model>> {
        let guard = self.slot.clone().lock_owned().await;
        if guard.is_none() {
            return Err(Error::ModelNotReady);
        }
        Ok(ModelLease { guard })
    }

    /// Drops the model and returns its device memory. Waits for any
    /// in-flight render. Returns whether a model was resident; never fails.
    pub async fn unload(&self) -> bool {
        let mut guard = self.slot.lock().await;
        let Some(model) = guard.take() else {
            return false;
        };
        self.status.store(None);
        let device = model.device_kind();
        if let Err(e) = model.release() {
            tracing::warn!(%device, error = %format!("{e:#}"), "device memory release failed");
        }
        tracing::info!(%device, "model unloaded, memory freed");
        true
    }
}
