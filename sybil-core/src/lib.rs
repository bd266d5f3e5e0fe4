#[cfg(feature = "accelerate")]
extern crate accelerate_src;

#[cfg(feature = "mkl")]
extern crate intel_mkl_src;

pub mod artifacts;
pub mod device_map;
pub mod engine;
pub mod error;
pub mod kind;
pub mod lifecycle;
pub mod loader;
pub mod seed;
pub mod service;
pub mod stats;
pub mod styles;
mod util;

mod flux;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use artifacts::*;
pub use device_map::*;
pub use engine::*;
pub use error::{Error, Result};
pub use flux::{FluxLoader, FluxModel, DEFAULT_FLUX_REPO};
pub use kind::*;
pub use lifecycle::*;
pub use loader::*;
pub use seed::*;
pub use service::*;
pub use stats::*;
pub use styles::*;
pub use util::*;

use serde::{Deserialize, Serialize};

/// What a caller asks for. An empty `name` or `style` counts as absent.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
}
