use std::future::Future;

use anyhow::Result;
use image::DynamicImage;

use crate::{DeviceKind, DeviceMap};

/// Sampling steps for every render. The service runs a distilled model, so
/// a handful of steps with guidance disabled is the intended schedule.
pub const INFERENCE_STEPS: usize = 4;
pub const GUIDANCE_SCALE: f64 = 0.0;

/// Everything a single render depends on. Identical params on the same
/// device and weights must produce identical pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderParams {
    pub prompt: String,
    pub seed: u32,
    pub width: usize,
    pub height: usize,
    pub steps: usize,
    pub guidance: f64,
}

impl RenderParams {
    pub fn new(prompt: impl Into<String>, seed: u32, width: usize, height: usize) -> Self {
        Self {
            prompt: prompt.into(),
            seed,
            width,
            height,
            steps: INFERENCE_STEPS,
            guidance: GUIDANCE_SCALE,
        }
    }
}

/// A resident model bound to one device.
pub trait ModelLike: Send + 'static {
    fn device_kind(&self) -> DeviceKind;

    fn run(&mut self, params: &RenderParams) -> Result<DynamicImage>;

    /// Drops the model and hands its memory back to the device.
    fn release(self) -> Result<()>
    where
        Self: Sized;
}

pub trait Loader: Send + Sync + 'static {
    type Model: ModelLike;

    fn load(&self, device_map: DeviceMap) -> impl Future<Output = Result<Self::Model>> + Send;
}
