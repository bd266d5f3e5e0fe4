//! A deterministic stand-in for the real model, for tests that exercise the
//! lifecycle and request flow without weights or a GPU.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use image::{DynamicImage, RgbImage};
use rand::{rngs::StdRng, RngCore, SeedableRng};

use crate::{DeviceKind, DeviceMap, Loader, ModelLike, RenderParams};

#[derive(Debug, Default)]
struct Shared {
    load_attempts: AtomicUsize,
    loads: AtomicUsize,
    releases: AtomicUsize,
    renders: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    fail_loads: AtomicBool,
    fail_renders: AtomicBool,
    fail_releases: AtomicBool,
}

#[derive(Debug, Clone, Default)]
pub struct FakeLoader {
    shared: Arc<Shared>,
    load_delay: Duration,
    render_delay: Duration,
}

impl FakeLoader {
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub fn with_render_delay(mut self, delay: Duration) -> Self {
        self.render_delay = delay;
        self
    }

    pub fn fail_loads(&self, fail: bool) {
        self.shared.fail_loads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_renders(&self, fail: bool) {
        self.shared.fail_renders.store(fail, Ordering::SeqCst);
    }

    pub fn fail_releases(&self, fail: bool) {
        self.shared.fail_releases.store(fail, Ordering::SeqCst);
    }

    /// Loads started so far, including failed ones.
    pub fn load_attempts(&self) -> usize {
        self.shared.load_attempts.load(Ordering::SeqCst)
    }

    /// Successful loads so far.
    pub fn loads(&self) -> usize {
        self.shared.loads.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.shared.releases.load(Ordering::SeqCst)
    }

    pub fn renders(&self) -> usize {
        self.shared.renders.load(Ordering::SeqCst)
    }

    /// Highest number of renders that were ever running at once.
    pub fn max_concurrent_renders(&self) -> usize {
        self.shared.max_active.load(Ordering::SeqCst)
    }
}

impl Loader for FakeLoader {
    type Model = FakeModel;

    async fn load(&self, device_map: DeviceMap) -> Result<FakeModel> {
        self.shared.load_attempts.fetch_add(1, Ordering::SeqCst);
        if !self.load_delay.is_zero() {
            tokio::time::sleep(self.load_delay).await;
        }
        if self.shared.fail_loads.load(Ordering::SeqCst) {
            bail!("weights unavailable");
        }
        self.shared.loads.fetch_add(1, Ordering::SeqCst);
        let device = match device_map {
            DeviceMap::ForceCpu => DeviceKind::Cpu,
            DeviceMap::Ordinal(_) => DeviceKind::Cuda,
        };
        Ok(FakeModel {
            shared: self.shared.clone(),
            device,
            render_delay: self.render_delay,
        })
    }
}

#[derive(Debug)]
pub struct FakeModel {
    shared: Arc<Shared>,
    device: DeviceKind,
    render_delay: Duration,
}

impl ModelLike for FakeModel {
    fn device_kind(&self) -> DeviceKind {
        self.device
    }

    fn run(&mut self, params: &RenderParams) -> Result<DynamicImage> {
        let active = self.shared.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.max_active.fetch_max(active, Ordering::SeqCst);
        if !self.render_delay.is_zero() {
            std::thread::sleep(self.render_delay);
        }
        self.shared.active.fetch_sub(1, Ordering::SeqCst);

        if self.shared.fail_renders.load(Ordering::SeqCst) {
            bail!("sampler diverged");
        }
        self.shared.renders.fetch_add(1, Ordering::SeqCst);

        let prompt_hash = xxhash_rust::xxh32::xxh32(params.prompt.as_bytes(), 0) as u64;
        let mut rng = StdRng::seed_from_u64((prompt_hash << 32) | params.seed as u64);
        let mut pixels = vec![0u8; params.width * params.height * 3];
        rng.fill_bytes(&mut pixels);
        let buffer = RgbImage::from_raw(params.width as u32, params.height as u32, pixels)
            .ok_or_else(|| anyhow::anyhow!("bad dimensions"))?;
        Ok(DynamicImage::ImageRgb8(buffer))
    }

    fn release(self) -> Result<()> {
        self.shared.releases.fetch_add(1, Ordering::SeqCst);
        if self.shared.fail_releases.load(Ordering::SeqCst) {
            bail!("device busy");
        }
        Ok(())
    }
}
