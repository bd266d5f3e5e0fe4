use std::sync::Arc;

use arc_swap::ArcSwap;
use rand::seq::SliceRandom;
use serde::Serialize;

use crate::{Error, ImageKind, Result};

pub const DEFAULT_AVATAR_STYLES: &[&str] = &[
    "portrait photo of a young person, natural lighting, casual, looking at camera, shallow depth of field",
    "professional headshot, studio lighting, neutral background, confident expression, sharp focus",
    "candid selfie of a person outdoors, golden hour, warm tones, natural smile",
    "portrait of a person in a coffee shop, soft ambient lighting, bokeh background",
    "close-up portrait, dramatic side lighting, moody atmosphere, sharp details",
    "casual portrait photo, urban street background, natural daylight, relaxed pose",
    "portrait of a person at sunset, warm orange light, silhouette edges, peaceful expression",
    "indoor portrait, window light, soft shadows, clean modern room background",
    "portrait photo of a person, overcast day, muted tones, thoughtful expression, natural skin",
    "headshot portrait, ring light, clean background, friendly expression, high detail",
];

pub const DEFAULT_BANNER_STYLES: &[&str] = &[
    "aerial photograph of a city skyline at golden hour, warm light, wide panoramic",
    "landscape photograph of mountains and lake, moody clouds, cinematic wide shot",
    "urban street photography, rain reflections, neon signs, night, wide format",
    "ocean waves crashing on rocky coast, dramatic sky, panoramic photograph",
    "dense forest canopy from above, misty morning, green tones, wide shot",
    "desert highway stretching to horizon, sunset, golden light, panoramic",
    "rooftop view of city at night, bokeh lights, wide angle photograph",
    "autumn forest path, golden leaves, soft light filtering through trees, wide",
    "beach at sunrise, calm water, pastel sky, minimal and serene, panoramic",
    "snow-covered mountain range, blue hour, crisp detail, cinematic wide shot",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StyleSnapshot {
    pub avatar_styles: Arc<Vec<String>>,
    pub banner_styles: Arc<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StyleCounts {
    pub avatar_styles: usize,
    pub banner_styles: usize,
}

/// The two style lists prompts are drawn from. Each list is an immutable
/// snapshot swapped in whole, so readers never see a half-replaced list.
#[derive(Debug)]
pub struct StyleCatalog {
    avatar: ArcSwap<Vec<String>>,
    banner: ArcSwap<Vec<String>>,
}

impl Default for StyleCatalog {
    fn default() -> Self {
        let owned = |styles: &[&str]| styles.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            avatar: ArcSwap::from_pointee(owned(DEFAULT_AVATAR_STYLES)),
            banner: ArcSwap::from_pointee(owned(DEFAULT_BANNER_STYLES)),
        }
    }
}

impl StyleCatalog {
    pub fn new(avatar: Vec<String>, banner: Vec<String>) -> Result<Self> {
        if avatar.is_empty() {
            return Err(Error::EmptyCatalog(ImageKind::Avatar));
        }
        if banner.is_empty() {
            return Err(Error::EmptyCatalog(ImageKind::Banner));
        }
        Ok(Self {
            avatar: ArcSwap::from_pointee(avatar),
            banner: ArcSwap::from_pointee(banner),
        })
    }

    fn list(&self, kind: ImageKind) -> &ArcSwap<Vec<String>> {
        match kind {
            ImageKind::Avatar => &self.avatar,
            ImageKind::Banner => &self.banner,
        }
    }

    pub fn get(&self, kind: ImageKind) -> Arc<Vec<String>> {
        self.list(kind).load_full()
    }

    pub fn snapshot(&self) -> StyleSnapshot {
        StyleSnapshot {
            avatar_styles: self.get(ImageKind::Avatar),
            banner_styles: self.get(ImageKind::Banner),
        }
    }

    pub fn counts(&self) -> StyleCounts {
        StyleCounts {
            avatar_styles: self.list(ImageKind::Avatar).load().len(),
            banner_styles: self.list(ImageKind::Banner).load().len(),
        }
    }

    /// Replaces the supplied lists and leaves omitted ones untouched.
    ///
    /// Each list is validated and applied on its own: an empty avatar list is
    /// rejected without blocking a valid banner list in the same call. The
    /// first rejection is returned after every valid list has been applied.
    pub fn set_styles(
        &self,
        avatar: Option<Vec<String>>,
        banner: Option<Vec<String>>,
    ) -> Result<StyleCounts> {
        let mut rejected = None;
        for (kind, styles) in [(ImageKind::Avatar, avatar), (ImageKind::Banner, banner)] {
            let Some(styles) = styles else { continue };
            if styles.is_empty() {
                rejected = rejected.or(Some(Error::EmptyCatalog(kind)));
                continue;
            }
            tracing::info!(%kind, count = styles.len(), "replaced style catalog");
            self.list(kind).store(Arc::new(styles));
        }
        match rejected {
            Some(err) => Err(err),
            None => Ok(self.counts()),
        }
    }

    /// Uniform choice over the current list for `kind`.
    pub fn pick_random(&self, kind: ImageKind) -> String {
        let styles = self.list(kind).load();
        styles
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_default()
    }
}
