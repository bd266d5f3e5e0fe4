use serde::{Deserialize, Serialize};

/// What a generation request produces. Each kind has one fixed output
/// profile; there is no caller-controlled size.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Avatar,
    Banner,
}

serde_plain::derive_display_from_serialize!(ImageKind);
serde_plain::derive_fromstr_from_deserialize!(ImageKind);

impl ImageKind {
    pub const ALL: [ImageKind; 2] = [ImageKind::Avatar, ImageKind::Banner];

    /// Output (width, height) in pixels.
    pub fn dimensions(self) -> (usize, usize) {
        match self {
            Self::Avatar => (512, 512),
            Self::Banner => (1024, 256),
        }
    }

    pub fn size_label(self) -> String {
        let (width, height) = self.dimensions();
        format!("{width}x{height}")
    }

    /// Appended to the caller's name before hashing so that avatar and banner
    /// seeds for the same name are decorrelated.
    pub fn seed_suffix(self) -> &'static str {
        match self {
            Self::Avatar => "",
            Self::Banner => "_banner",
        }
    }

    pub fn prompt(self, style: &str) -> String {
        match self {
            Self::Avatar => {
                format!("{style}, photorealistic, 8k, detailed skin texture, DSLR photograph")
            }
            Self::Banner => format!("{style}, photorealistic, 8k, DSLR photograph, sharp detail"),
        }
    }

    /// Filename prefix, including the separator.
    pub fn file_prefix(self) -> &'static str {
        match self {
            Self::Avatar => "avatar_",
            Self::Banner => "banner_",
        }
    }
}

/// Kind of a file found in the output directory, inferred from its name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Avatar,
    Banner,
    Unknown,
}

serde_plain::derive_display_from_serialize!(ArtifactKind);

impl ArtifactKind {
    pub fn from_filename(filename: &str) -> Self {
        ImageKind::ALL
            .into_iter()
            .find(|kind| filename.starts_with(kind.file_prefix()))
            .map(Self::from)
            .unwrap_or(Self::Unknown)
    }
}

impl From<ImageKind> for ArtifactKind {
    fn from(kind: ImageKind) -> Self {
        match kind {
            ImageKind::Avatar => Self::Avatar,
            ImageKind::Banner => Self::Banner,
        }
    }
}
