use std::sync::Arc;
use std::time::Instant;

use image::DynamicImage;

use crate::{Error, Loader, ModelLease, ModelLike, ModelManager, RenderParams, Result};

/// One rendered image, not yet persisted.
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub image: DynamicImage,
    pub width: u32,
    pub height: u32,
    pub seed: u32,
}

/// Runs renders against the model owned by a [`ModelManager`]. Renders are
/// serialized in arrival order and run on the blocking pool.
pub struct GenerationEngine<L: Loader> {
    models: Arc<ModelManager<L>>,
}

impl<L: Loader> Clone for GenerationEngine<L> {
    fn clone(&self) -> Self {
        Self {
            models: self.models.clone(),
        }
    }
}

impl<L: Loader> GenerationEngine<L> {
    pub fn new(models: Arc<ModelManager<L>>) -> Self {
        Self { models }
    }

    pub fn models(&self) -> &Arc<ModelManager<L>> {
        &self.models
    }

    /// Renders with the model that is already resident; fails with
    /// [`Error::ModelNotReady`] otherwise.
    pub async fn generate(
        &self,
        prompt: &str,
        seed: u32,
        width: usize,
        height: usize,
    ) -> Result<GeneratedImage> {
        let lease = self.models.acquire_loaded().await?;
        render(lease, RenderParams::new(prompt, seed, width, height)).await
    }

    /// Loads the model if needed and renders without letting an unload in
    /// between.
    pub async fn generate_on_demand(
        &self,
        prompt: &str,
        seed: u32,
        width: usize,
        height: usize,
    ) -> Result<GeneratedImage> {
        let lease = self.models.acquire().await?;
        render(lease, RenderParams::new(prompt, seed, width, height)).await
    }
}

async fn render<M: ModelLike>(
    mut lease: ModelLease<M>,
    params: RenderParams,
) -> Result<GeneratedImage> {
    let started = Instant::now();
    let seed = params.seed;
    let (width, height) = (params.width as u32, params.height as u32);

    // The lease moves with the closure, so the model stays locked until the
    // render is done even if the awaiting request goes away.
    let image = tokio::task::spawn_blocking(move || {
        let model = lease.model()?;
        model.run(&params).map_err(Error::GenerationFailed)
    })
    .await
    .map_err(|e| Error::GenerationFailed(e.into()))??;

    if (image.width(), image.height()) != (width, height) {
        return Err(Error::GenerationFailed(anyhow::anyhow!(
            "model returned {}x{}, expected {width}x{height}",
            image.width(),
            image.height()
        )));
    }
    tracing::debug!(seed, width, height, elapsed = ?started.elapsed(), "rendered image");
    Ok(GeneratedImage {
        image,
        width,
        height,
        seed,
    })
}
