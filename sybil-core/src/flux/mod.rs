use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Error, Result};
use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::Module;
use candle_transformers::models::{
    clip::text_model::{Activation, ClipTextConfig, ClipTextTransformer},
    flux::{
        autoencoder::{self, AutoEncoder},
        model::{self, Flux},
        sampling,
    },
    t5::{self, T5EncoderModel},
};
use hf_hub::api::tokio::Api;
use image::DynamicImage;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::StandardNormal;
use tokenizers::Tokenizer;

use crate::{
    select_best_device, tensor_to_image, DeviceKind, DeviceMap, Loader, ModelLike, RenderParams,
};

pub const DEFAULT_FLUX_REPO: &str = "black-forest-labs/FLUX.1-schnell";

const T5_MAX_TOKENS: usize = 256;

/// Initial latent noise, shaped like `sampling::get_noise`. The noise is the
/// only source of randomness in a render. It is drawn on the host from the
/// seed because the CPU backend cannot be seeded, which also makes it the
/// same on every device.
fn seeded_noise(seed: u32, height: usize, width: usize, device: &Device) -> Result<Tensor> {
    let height = height.div_ceil(16) * 2;
    let width = width.div_ceil(16) * 2;
    let mut rng = StdRng::seed_from_u64(seed as u64);
    let values: Vec<f32> = (0..16 * height * width)
        .map(|_| rng.sample::<f32, _>(StandardNormal))
        .collect();
    Ok(Tensor::from_vec(values, (1, 16, height, width), device)?)
}

pub struct FluxModel {
    device: Device,
    dtype: DType,
    t5_model: T5EncoderModel,
    t5_tokenizer: Tokenizer,
    clip_model: ClipTextTransformer,
    clip_tokenizer: Tokenizer,
    autoencoder: AutoEncoder,
    flux_model: Flux,
}

impl FluxModel {
    fn encode_prompt(&mut self, prompt: &str) -> Result<(Tensor, Tensor)> {
        let mut t5_tokens = self
            .t5_tokenizer
            .encode(prompt, true)
            .map_err(Error::msg)?
            .get_ids()
            .to_vec();
        t5_tokens.resize(T5_MAX_TOKENS, 0);
        let t5_ids = Tensor::new(&*t5_tokens, &self.device)?.unsqueeze(0)?;
        let t5_emb = self.t5_model.forward(&t5_ids)?;

        let clip_tokens = self
            .clip_tokenizer
            .encode(prompt, true)
            .map_err(Error::msg)?
            .get_ids()
            .to_vec();
        let clip_ids = Tensor::new(&*clip_tokens, &self.device)?.unsqueeze(0)?;
        let clip_emb = self.clip_model.forward(&clip_ids)?;

        Ok((t5_emb, clip_emb))
    }
}

impl ModelLike for FluxModel {
    fn device_kind(&self) -> DeviceKind {
        DeviceKind::of(&self.device)
    }

    fn run(&mut self, params: &RenderParams) -> Result<DynamicImage> {
        let (width, height) = (params.width, params.height);

        let noise_img =
            seeded_noise(params.seed, height, width, &self.device)?.to_dtype(self.dtype)?;

        let (t5_emb, clip_emb) = self.encode_prompt(&params.prompt)?;

        let state = sampling::State::new(&t5_emb, &clip_emb, &noise_img)?;
        let timesteps = sampling::get_schedule(params.steps, None);
        let latent_img = sampling::denoise(
            &self.flux_model,
            &state.img,
            &state.img_ids,
            &state.txt,
            &state.txt_ids,
            &state.vec,
            &timesteps,
            params.guidance,
        )?;
        let unpacked = sampling::unpack(&latent_img, height, width)?;
        tracing::debug!(seed = params.seed, "denoised latent image");

        let decoded = self.autoencoder.decode(&unpacked)?;
        let img = ((decoded.clamp(-1f32, 1f32)? + 1.0)? * 127.5)?.to_dtype(DType::U8)?;
        tensor_to_image(&img.i(0)?)
    }

    fn release(self) -> Result<()> {
        let FluxModel {
            device,
            t5_model,
            clip_model,
            autoencoder,
            flux_model,
            ..
        } = self;
        drop((t5_model, clip_model, autoencoder, flux_model));
        // Pending kernels may still hold buffers; wait for them so the frees
        // above actually land before we report the memory as returned.
        device.synchronize()?;
        Ok(())
    }
}

/// Fetches FLUX.1-schnell and its text encoders from the Hugging Face hub.
pub struct FluxLoader {
    api: Api,
    repo: String,
}

impl FluxLoader {
    pub fn new(api: Api, repo: impl Into<String>) -> Self {
        Self {
            api,
            repo: repo.into(),
        }
    }
}

/// Local paths of everything a load needs, fetched ahead of construction.
struct FluxFiles {
    t5_model: PathBuf,
    t5_config: PathBuf,
    t5_tokenizer: PathBuf,
    clip_model: PathBuf,
    clip_tokenizer: PathBuf,
    autoencoder: PathBuf,
    flux: PathBuf,
}

impl FluxLoader {
    async fn fetch(&self) -> Result<FluxFiles> {
        let t5_repo = self.api.repo(hf_hub::Repo::with_revision(
            "google/t5-v1_1-xxl".to_string(),
            hf_hub::RepoType::Model,
            "refs/pr/2".to_string(),
        ));
        let t5_model = t5_repo
            .get("model.safetensors")
            .await
            .context("failed to get T5 model file")?;
        let t5_config = t5_repo
            .get("config.json")
            .await
            .context("failed to get T5 config")?;
        let t5_tokenizer = self
            .api
            .model("lmz/mt5-tokenizers".to_string())
            .get("t5-v1_1-xxl.tokenizer.json")
            .await
            .context("failed to get T5 tokenizer")?;

        let clip_repo = self.api.repo(hf_hub::Repo::model(
            "openai/clip-vit-large-patch14".to_string(),
        ));
        let clip_model = clip_repo
            .get("model.safetensors")
            .await
            .context("failed to get CLIP model file")?;
        let clip_tokenizer = clip_repo
            .get("tokenizer.json")
            .await
            .context("failed to get CLIP tokenizer")?;

        let bf_repo = self.api.repo(hf_hub::Repo::model(self.repo.clone()));
        let autoencoder = bf_repo
            .get("ae.safetensors")
            .await
            .context("failed to get autoencoder model file")?;
        let flux = bf_repo
            .get("flux1-schnell.safetensors")
            .await
            .context("failed to get flux model file")?;

        Ok(FluxFiles {
            t5_model,
            t5_config,
            t5_tokenizer,
            clip_model,
            clip_tokenizer,
            autoencoder,
            flux,
        })
    }
}

/// Builds the model from local files. Maps weights and allocates device
/// memory, so it runs on the blocking pool.
fn build(files: FluxFiles, device_map: DeviceMap) -> Result<FluxModel> {
    let device = select_best_device(device_map).context("failed to set up device")?;
    let dtype = device.bf16_default_to_f32();
    tracing::info!(device = %DeviceKind::of(&device), ?dtype, "building flux model");

    // --- T5 encoder and tokenizer ---
    let config_str =
        std::fs::read_to_string(&files.t5_config).context("failed to read T5 config")?;
    let t5_config: t5::Config =
        serde_json::from_str(&config_str).context("failed to parse T5 config")?;
    let t5_vb = unsafe {
        candle_nn::VarBuilder::from_mmaped_safetensors(&[files.t5_model], dtype, &device)
            .context("failed to build T5 var builder")?
    };
    let t5_model = T5EncoderModel::load(t5_vb, &t5_config).context("failed to load T5 model")?;
    let t5_tokenizer = Tokenizer::from_file(files.t5_tokenizer)
        .map_err(Error::msg)
        .context("failed to load T5 tokenizer")?;

    // --- CLIP encoder and tokenizer ---
    let clip_config = ClipTextConfig {
        vocab_size: 49408,
        projection_dim: 768,
        activation: Activation::QuickGelu,
        intermediate_size: 3072,
        embed_dim: 768,
        max_position_embeddings: 77,
        pad_with: None,
        num_hidden_layers: 12,
        num_attention_heads: 12,
    };
    let clip_vb = unsafe {
        candle_nn::VarBuilder::from_mmaped_safetensors(&[files.clip_model], dtype, &device)
            .context("failed to build CLIP var builder")?
    };
    let clip_model = ClipTextTransformer::new(clip_vb.pp("text_model"), &clip_config)
        .context("failed to load CLIP model")?;
    let clip_tokenizer = Tokenizer::from_file(files.clip_tokenizer)
        .map_err(Error::msg)
        .context("failed to load CLIP tokenizer")?;

    // --- Autoencoder ---
    let autoencoder_vb = unsafe {
        candle_nn::VarBuilder::from_mmaped_safetensors(&[files.autoencoder], dtype, &device)
            .context("failed to build autoencoder var builder")?
    };
    let autoencoder = AutoEncoder::new(&autoencoder::Config::schnell(), autoencoder_vb)
        .context("failed to load autoencoder")?;

    // --- Flux transformer ---
    let flux_vb = unsafe {
        candle_nn::VarBuilder::from_mmaped_safetensors(&[files.flux], dtype, &device)
            .context("failed to build flux var builder")?
    };
    let flux_model =
        Flux::new(&model::Config::schnell(), flux_vb).context("failed to load flux model")?;

    Ok(FluxModel {
        device,
        dtype,
        t5_model,
        t5_tokenizer,
        clip_model,
        clip_tokenizer,
        autoencoder,
        flux_model,
    })
}

impl Loader for FluxLoader {
    type Model = FluxModel;

    async fn load(&self, device_map: DeviceMap) -> Result<Self::Model> {
        let started = Instant::now();
        tracing::info!(repo = %self.repo, "fetching flux model files");
        let files = self.fetch().await?;
        let model = tokio::task::spawn_blocking(move || build(files, device_map))
            .await
            .context("flux build task failed")??;
        tracing::info!(elapsed = ?started.elapsed(), "flux model loaded");
        Ok(model)
    }
}
