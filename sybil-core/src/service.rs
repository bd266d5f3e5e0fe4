use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::{
    seed_for, Artifact, ArtifactStore, CounterSnapshot, Counters, DeviceKind, DeviceMap,
    GenerationEngine, GenerationRequest, ImageKind, Loader, ModelManager, Result, StyleCatalog,
    StyleCounts, StyleSnapshot,
};

/// A saved generation.
#[derive(Debug, Clone)]
pub struct Generation {
    pub kind: ImageKind,
    pub seed: u32,
    pub prompt: String,
    pub artifact: Artifact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Health {
    pub model_loaded: bool,
    pub device: DeviceKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStats {
    #[serde(flatten)]
    pub counters: CounterSnapshot,
    pub output_dir_size_mb: f64,
    pub model_loaded: bool,
    pub device: DeviceKind,
    pub uptime_seconds: u64,
}

/// All state of one running service: the model, the style catalog, the
/// output directory and the counters. Cheap to share behind an `Arc`.
pub struct ImageService<L: Loader> {
    engine: GenerationEngine<L>,
    styles: StyleCatalog,
    store: ArtifactStore,
    counters: Counters,
    started: Instant,
}

impl<L: Loader> ImageService<L> {
    pub fn new(loader: L, device_map: DeviceMap, store: ArtifactStore) -> Self {
        let models = Arc::new(ModelManager::new(loader, device_map));
        Self {
            engine: GenerationEngine::new(models),
            styles: StyleCatalog::default(),
            store,
            counters: Counters::default(),
            started: Instant::now(),
        }
    }

    pub fn with_styles(mut self, styles: StyleCatalog) -> Self {
        self.styles = styles;
        self
    }

    pub fn models(&self) -> &Arc<ModelManager<L>> {
        self.engine.models()
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// The loaded model's device, or the one a load would pick.
    pub fn device(&self) -> DeviceKind {
        let models = self.models();
        models
            .current_device()
            .unwrap_or_else(|| models.preferred_device())
    }

    /// Renders and saves one image. Counters only move once the file is on
    /// disk; on any failure nothing is written and nothing is counted.
    pub async fn generate(
        &self,
        kind: ImageKind,
        request: &GenerationRequest,
    ) -> Result<Generation> {
        let started = Instant::now();
        let seed = seed_for(request.name.as_deref(), kind);
        let style = match request.style.as_deref() {
            Some(style) if !style.is_empty() => style.to_string(),
            _ => self.styles.pick_random(kind),
        };
        let prompt = kind.prompt(&style);
        let (width, height) = kind.dimensions();

        let image = self
            .engine
            .generate_on_demand(&prompt, seed, width, height)
            .await?;
        let artifact = self.store.save(kind, &image).await?;
        self.counters.record(kind);

        tracing::info!(
            %kind,
            seed,
            file = %artifact.filename,
            elapsed = ?started.elapsed(),
            "generated image"
        );
        Ok(Generation {
            kind,
            seed,
            prompt,
            artifact,
        })
    }

    pub async fn ensure_loaded(&self) -> Result<DeviceKind> {
        self.models().ensure_loaded().await
    }

    /// Frees the model. Never fails; returns whether anything was loaded.
    pub async fn unload(&self) -> bool {
        self.models().unload().await
    }

    pub fn health(&self) -> Health {
        Health {
            model_loaded: self.models().is_loaded(),
            device: self.device(),
        }
    }

    pub fn styles(&self) -> StyleSnapshot {
        self.styles.snapshot()
    }

    pub fn set_styles(
        &self,
        avatar: Option<Vec<String>>,
        banner: Option<Vec<String>>,
    ) -> Result<StyleCounts> {
        self.styles.set_styles(avatar, banner)
    }

    pub async fn stats(&self) -> Result<ServiceStats> {
        Ok(ServiceStats {
            counters: self.counters.snapshot(),
            output_dir_size_mb: self.store.total_size_mb().await?,
            model_loaded: self.models().is_loaded(),
            device: self.device(),
            uptime_seconds: self.started.elapsed().as_secs(),
        })
    }

    pub async fn recent(&self, limit: usize) -> Result<Vec<Artifact>> {
        self.store.list_recent(limit).await
    }

    pub async fn clear_output(&self) -> Result<usize> {
        self.store.clear_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeLoader;
    use crate::{ArtifactKind, Error};
    use tempfile::TempDir;

    async fn service(loader: &FakeLoader) -> (TempDir, ImageService<FakeLoader>) {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::open(dir.path()).await.unwrap();
        (
            dir,
            ImageService::new(loader.clone(), DeviceMap::ForceCpu, store),
        )
    }

    fn named(name: &str) -> GenerationRequest {
        GenerationRequest {
            name: Some(name.to_string()),
            style: None,
        }
    }

    #[tokio::test]
    async fn first_generation_loads_the_model() {
        let loader = FakeLoader::default();
        let (_dir, service) = service(&loader).await;
        assert!(!service.health().model_loaded);

        let generation = service
            .generate(ImageKind::Avatar, &GenerationRequest::default())
            .await
            .unwrap();
        assert!(service.health().model_loaded);
        assert_eq!(loader.loads(), 1);
        assert_eq!(generation.artifact.kind, ArtifactKind::Avatar);
        let img = image::open(&generation.artifact.path).unwrap();
        assert_eq!((img.width(), img.height()), (512, 512));
    }

    #[tokio::test]
    async fn same_name_same_image_new_file() {
        let loader = FakeLoader::default();
        let (_dir, service) = service(&loader).await;
        let request = GenerationRequest {
            name: Some("alice".into()),
            style: Some("studio portrait".into()),
        };
        let a = service.generate(ImageKind::Avatar, &request).await.unwrap();
        let b = service.generate(ImageKind::Avatar, &request).await.unwrap();

        assert_eq!(a.seed, b.seed);
        assert_ne!(a.artifact.filename, b.artifact.filename);
        let pixels_a = image::open(&a.artifact.path).unwrap().into_bytes();
        let pixels_b = image::open(&b.artifact.path).unwrap().into_bytes();
        assert_eq!(pixels_a, pixels_b);
    }

    #[tokio::test]
    async fn banner_seed_differs_from_avatar_seed() {
        let loader = FakeLoader::default();
        let (_dir, service) = service(&loader).await;
        let avatar = service.generate(ImageKind::Avatar, &named("alice")).await.unwrap();
        let banner = service.generate(ImageKind::Banner, &named("alice")).await.unwrap();
        assert_ne!(avatar.seed, banner.seed);
        let img = image::open(&banner.artifact.path).unwrap();
        assert_eq!((img.width(), img.height()), (1024, 256));
    }

    #[tokio::test]
    async fn explicit_style_is_used_otherwise_catalog() {
        let loader = FakeLoader::default();
        let (_dir, service) = service(&loader).await;
        service
            .set_styles(None, Some(vec!["only banner style".into()]))
            .unwrap();

        let explicit = service
            .generate(
                ImageKind::Avatar,
                &GenerationRequest {
                    name: None,
                    style: Some("watercolor".into()),
                },
            )
            .await
            .unwrap();
        assert!(explicit.prompt.starts_with("watercolor, "));

        let empty_style = GenerationRequest {
            name: None,
            style: Some(String::new()),
        };
        let drawn = service
            .generate(ImageKind::Banner, &empty_style)
            .await
            .unwrap();
        assert!(drawn.prompt.starts_with("only banner style, "));
    }

    #[tokio::test]
    async fn stats_count_by_kind() {
        let loader = FakeLoader::default();
        let (_dir, service) = service(&loader).await;
        for kind in [ImageKind::Avatar, ImageKind::Avatar, ImageKind::Banner] {
            service.generate(kind, &GenerationRequest::default()).await.unwrap();
        }
        let stats = service.stats().await.unwrap();
        assert_eq!(stats.counters.total_generated, 3);
        assert_eq!(stats.counters.avatars_generated, 2);
        assert_eq!(stats.counters.banners_generated, 1);
        assert!(stats.model_loaded);
        assert_eq!(stats.device, DeviceKind::Cpu);
    }

    #[tokio::test]
    async fn failed_render_writes_and_counts_nothing() {
        let loader = FakeLoader::default();
        loader.fail_renders(true);
        let (_dir, service) = service(&loader).await;

        let err = service
            .generate(ImageKind::Avatar, &named("bob"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::GenerationFailed(_)));
        assert!(service.recent(20).await.unwrap().is_empty());
        assert_eq!(service.stats().await.unwrap().counters, CounterSnapshot::default());
    }

    #[tokio::test]
    async fn failed_load_writes_and_counts_nothing() {
        let loader = FakeLoader::default();
        loader.fail_loads(true);
        let (_dir, service) = service(&loader).await;

        let err = service
            .generate(ImageKind::Banner, &named("bob"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LoadFailed(_)));
        assert!(!service.health().model_loaded);
        assert_eq!(service.stats().await.unwrap().counters.total_generated, 0);
    }

    #[tokio::test]
    async fn unload_then_generate_reloads() {
        let loader = FakeLoader::default();
        let (_dir, service) = service(&loader).await;
        service.generate(ImageKind::Avatar, &named("a")).await.unwrap();
        assert!(service.unload().await);
        assert!(!service.health().model_loaded);
        assert!(!service.unload().await);

        service.generate(ImageKind::Avatar, &named("a")).await.unwrap();
        assert_eq!(loader.loads(), 2);
        assert_eq!(loader.releases(), 1);
    }

    #[tokio::test]
    async fn clear_output_after_five() {
        let loader = FakeLoader::default();
        let (_dir, service) = service(&loader).await;
        for i in 0..5 {
            service
                .generate(ImageKind::Avatar, &named(&format!("user{i}")))
                .await
                .unwrap();
        }
        assert_eq!(service.recent(20).await.unwrap().len(), 5);
        assert_eq!(service.clear_output().await.unwrap(), 5);
        assert!(service.recent(20).await.unwrap().is_empty());
        // Counters survive a sweep.
        assert_eq!(service.stats().await.unwrap().counters.total_generated, 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_share_one_load() {
        let loader = FakeLoader::default().with_load_delay(std::time::Duration::from_millis(30));
        let (_dir, service) = service(&loader).await;
        let service = Arc::new(service);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let service = service.clone();
                tokio::spawn(async move {
                    let kind = if i % 2 == 0 {
                        ImageKind::Avatar
                    } else {
                        ImageKind::Banner
                    };
                    service.generate(kind, &GenerationRequest::default()).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(loader.loads(), 1);
        assert_eq!(loader.max_concurrent_renders(), 1);
        let stats = service.stats().await.unwrap();
        assert_eq!(stats.counters.total_generated, 8);
        assert_eq!(service.recent(20).await.unwrap().len(), 8);
    }
}
