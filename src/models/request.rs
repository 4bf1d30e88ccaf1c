use base64::Engine;
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Output texture edge length in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureResolution {
    R1024,
    #[default]
    R2048,
    R4096,
}

impl TextureResolution {
    pub fn pixels(self) -> u32 {
        match self {
            TextureResolution::R1024 => 1024,
            TextureResolution::R2048 => 2048,
            TextureResolution::R4096 => 4096,
        }
    }
}

impl TryFrom<u32> for TextureResolution {
    type Error = RequestError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1024 => Ok(TextureResolution::R1024),
            2048 => Ok(TextureResolution::R2048),
            4096 => Ok(TextureResolution::R4096),
            other => Err(RequestError::TextureResolution(other)),
        }
    }
}

/// Body of `POST /run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub input: GenerationInput,
}

/// Generation parameters as they arrive on the wire.
///
/// `image` is either base64 (optionally a `data:` URL) or an `http(s)` URL.
/// The snake_case aliases match the parameter names used by older clients.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GenerationInput {
    #[garde(skip)]
    #[serde(default)]
    pub image: String,

    /// Absent or negative means "pick a random seed".
    #[garde(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,

    #[garde(range(min = 1.0, max = 15.0))]
    #[serde(default = "default_structural_guidance", alias = "ss_guidance_scale")]
    pub structural_guidance_scale: f32,

    #[garde(range(min = 1, max = 50))]
    #[serde(default = "default_steps", alias = "ss_steps")]
    pub structural_steps: u32,

    #[garde(range(min = 1.0, max = 10.0))]
    #[serde(default = "default_detail_guidance", alias = "slat_guidance_scale")]
    pub detail_guidance_scale: f32,

    #[garde(range(min = 1, max = 50))]
    #[serde(default = "default_steps", alias = "slat_steps")]
    pub detail_steps: u32,

    /// Edge length in pixels; checked against [`TextureResolution`] on submit.
    #[garde(skip)]
    #[serde(default = "default_texture_resolution", alias = "texture_size")]
    pub texture_resolution: u32,
}

fn default_structural_guidance() -> f32 {
    7.5
}

fn default_detail_guidance() -> f32 {
    3.0
}

fn default_steps() -> u32 {
    12
}

fn default_texture_resolution() -> u32 {
    TextureResolution::default().pixels()
}

impl GenerationInput {
    /// Input with default parameters for the given image source.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            seed: None,
            structural_guidance_scale: default_structural_guidance(),
            structural_steps: default_steps(),
            detail_guidance_scale: default_detail_guidance(),
            detail_steps: default_steps(),
            texture_resolution: default_texture_resolution(),
        }
    }

    /// Validate the input and resolve it into an immutable request.
    ///
    /// Inline images are base64-decoded and fully decoded as an image here.
    /// URL images are only checked for scheme; they are fetched by the worker.
    pub fn into_request(self, max_image_bytes: usize) -> Result<GenerationRequest, RequestError> {
        self.validate()
            .map_err(|e| RequestError::Parameters(e.to_string()))?;
        let texture_resolution = TextureResolution::try_from(self.texture_resolution)?;

        let image = parse_image_source(&self.image, max_image_bytes)?;
        let seed = match self.seed {
            Some(seed) if seed >= 0 => u32::try_from(seed).map_err(|_| RequestError::Seed(seed))?,
            _ => random_seed(),
        };

        Ok(GenerationRequest {
            image,
            seed,
            structural_guidance_scale: self.structural_guidance_scale,
            structural_steps: self.structural_steps,
            detail_guidance_scale: self.detail_guidance_scale,
            detail_steps: self.detail_steps,
            texture_resolution,
        })
    }
}

/// Where the input image comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Already-decoded image file bytes (PNG, JPEG, WebP).
    Bytes(Vec<u8>),
    /// Remote image fetched when the job starts running.
    Url(String),
}

/// A validated generation request. Immutable once submitted.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub image: ImageSource,
    pub seed: u32,
    pub structural_guidance_scale: f32,
    pub structural_steps: u32,
    pub detail_guidance_scale: f32,
    pub detail_steps: u32,
    pub texture_resolution: TextureResolution,
}

/// Check that raw bytes are a readable image.
pub fn ensure_decodable(bytes: &[u8]) -> Result<(), RequestError> {
    image::load_from_memory(bytes)
        .map(|_| ())
        .map_err(|e| RequestError::ImageDecode(e.to_string()))
}

fn parse_image_source(raw: &str, max_image_bytes: usize) -> Result<ImageSource, RequestError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(RequestError::MissingImage);
    }

    if raw.starts_with("http://") || raw.starts_with("https://") {
        return Ok(ImageSource::Url(raw.to_string()));
    }

    let encoded = match raw.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => raw,
    };

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| RequestError::Base64(e.to_string()))?;

    if bytes.is_empty() {
        return Err(RequestError::MissingImage);
    }
    if bytes.len() > max_image_bytes {
        return Err(RequestError::ImageTooLarge {
            size: bytes.len(),
            limit: max_image_bytes,
        });
    }

    ensure_decodable(&bytes)?;
    Ok(ImageSource::Bytes(bytes))
}

fn random_seed() -> u32 {
    // v4 UUIDs carry 122 random bits; the low 31 keep the seed positive for
    // pipelines that store it as a signed int.
    (Uuid::new_v4().as_u128() & 0x7fff_ffff) as u32
}

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("No image input provided")]
    MissingImage,

    #[error("Image is not valid base64: {0}")]
    Base64(String),

    #[error("Image could not be decoded: {0}")]
    ImageDecode(String),

    #[error("Image is {size} bytes, limit is {limit}")]
    ImageTooLarge { size: usize, limit: usize },

    #[error("Invalid generation parameters: {0}")]
    Parameters(String),

    #[error("Seed {0} is out of range")]
    Seed(i64),

    #[error("Unsupported texture resolution {0} (expected 1024, 2048 or 4096)")]
    TextureResolution(u32),
}
