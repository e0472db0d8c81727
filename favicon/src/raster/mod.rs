//! Multi-size rasterization of a single source image.
//!
//! The actual decode/resize/encode work is delegated to a [`RasterEncoder`],
//! this module only fans the requested sizes out and collects the results in
//! order.

pub mod encode;
pub mod render;

use crate::ico::{pack_ico, SizedRaster};
use resvg::usvg;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

pub use encode::{CompressionLevel, EncodeOptions, EncodeOverrides};
pub use render::NativeEncoder;

/// The image formats accepted as favicon sources.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum InputFormat {
    Svg,
    Svgz,
    Png,
    Jpeg,
    Webp,
    Gif,
    Avif,
    Tiff,
}

impl InputFormat {
    /// Determines the format from the file extension of `path`.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    /// Determines the format from a file extension, ignoring case.
    pub fn from_extension(extension: &str) -> Option<Self> {
        let format = match extension.to_ascii_lowercase().as_str() {
            "svg" => Self::Svg,
            "svgz" => Self::Svgz,
            "png" => Self::Png,
            "jpg" | "jpeg" => Self::Jpeg,
            "webp" => Self::Webp,
            "gif" => Self::Gif,
            "avif" => Self::Avif,
            "tif" | "tiff" => Self::Tiff,
            _ => return None,
        };

        Some(format)
    }

    /// Guesses the format from the leading bytes of an image.
    pub fn sniff(data: &[u8]) -> Option<Self> {
        // gzip magic, only compressed SVGs are accepted in this form
        if data.starts_with(&[0x1f, 0x8b]) {
            return Some(Self::Svgz);
        }

        let head = &data[..data.len().min(1024)];
        if head.trim_ascii_start().starts_with(b"<")
            && head.windows(4).any(|w| w == b"<svg")
        {
            return Some(Self::Svg);
        }

        match image::guess_format(data).ok()? {
            image::ImageFormat::Png => Some(Self::Png),
            image::ImageFormat::Jpeg => Some(Self::Jpeg),
            image::ImageFormat::WebP => Some(Self::Webp),
            image::ImageFormat::Gif => Some(Self::Gif),
            image::ImageFormat::Avif => Some(Self::Avif),
            image::ImageFormat::Tiff => Some(Self::Tiff),
            _ => None,
        }
    }

    /// Returns true for formats rendered by the vector pipeline.
    pub fn is_vector(self) -> bool {
        matches!(self, Self::Svg | Self::Svgz)
    }

    /// Returns false for formats that are recognized but have no decoder
    /// compiled in. AVIF decoding needs the native dav1d library.
    pub fn is_decodable(self) -> bool {
        !matches!(self, Self::Avif)
    }

    /// The MIME type of the format.
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Svg | Self::Svgz => "image/svg+xml",
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Webp => "image/webp",
            Self::Gif => "image/gif",
            Self::Avif => "image/avif",
            Self::Tiff => "image/tiff",
        }
    }
}

/// How the source is fitted into the square target.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum Fit {
    /// Scale to fit within the bounds and pad the remainder
    #[default]
    Contain,

    /// Scale to cover the bounds and crop the overflow
    Cover,

    /// Stretch to the bounds, ignoring the aspect ratio
    Fill,
}

/// Resampling filter used for raster sources.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum Kernel {
    Nearest,
    Triangle,
    CatmullRom,
    #[default]
    Lanczos3,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ResizeOptions {
    /// The fit policy
    pub fit: Fit,

    /// Non-premultiplied RGBA color used for padding
    pub background: [u8; 4],

    /// The resampling filter for raster sources
    pub kernel: Kernel,
}

impl Default for ResizeOptions {
    fn default() -> Self {
        Self {
            fit: Fit::Contain,
            background: [0, 0, 0, 0],
            kernel: Kernel::Lanczos3,
        }
    }
}

/// The parameters of a single generation run.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct GenerationConfig {
    /// The requested edge lengths, in output order
    pub sizes: Vec<u32>,

    /// Whether to spend more time on smaller PNGs
    pub optimize: bool,

    /// Resize policy
    pub resize: ResizeOptions,

    /// Explicit PNG encoder settings, taking precedence over `optimize`
    pub encode: EncodeOverrides,
}

impl GenerationConfig {
    /// The encoder settings resulting from `optimize` and the overrides.
    pub fn encode_options(&self) -> EncodeOptions {
        EncodeOptions::derive(self.optimize, &self.encode)
    }
}

/// A source image loaded into memory.
#[derive(Debug, Clone)]
pub struct SourceImage {
    format: InputFormat,
    data: Arc<[u8]>,
    resources_dir: Option<PathBuf>,
}

impl SourceImage {
    /// Reads the source image from disk.
    pub async fn load(path: &Path) -> Result<Self, RasterError> {
        let format = InputFormat::from_path(path).ok_or(RasterError::UnsupportedFormat)?;
        let data = tokio::fs::read(path)
            .await
            .map_err(|source| RasterError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(Self {
            format,
            data: data.into(),
            resources_dir: path.parent().map(Path::to_path_buf),
        })
    }

    /// Wraps in-memory image data, guessing the format from its contents.
    pub fn from_bytes(data: impl Into<Arc<[u8]>>) -> Result<Self, RasterError> {
        let data = data.into();
        let format = InputFormat::sniff(&data).ok_or(RasterError::UnsupportedFormat)?;
        Ok(Self::with_format(format, data))
    }

    /// Wraps in-memory image data of a known format.
    pub fn with_format(format: InputFormat, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            format,
            data: data.into(),
            resources_dir: None,
        }
    }

    pub fn format(&self) -> InputFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Directory used to resolve relative references inside SVGs.
    pub fn resources_dir(&self) -> Option<&Path> {
        self.resources_dir.as_deref()
    }
}

/// Decodes, resizes and PNG-encodes a source image at one size.
#[async_trait::async_trait]
pub trait RasterEncoder: Send + Sync + 'static {
    /// Produces a `size`x`size` PNG of the source.
    async fn encode(
        &self,
        source: &SourceImage,
        size: u32,
        resize: &ResizeOptions,
        encode: &EncodeOptions,
    ) -> Result<Vec<u8>, RasterError>;
}

/// Renders one PNG per configured size, in the order of `config.sizes`.
///
/// All sizes are encoded concurrently, the first failure aborts the run.
#[tracing::instrument(level = "debug", skip_all, fields(format = ?source.format(), sizes = ?config.sizes))]
pub async fn generate_sized_rasters<E>(
    encoder: &E,
    source: &SourceImage,
    config: &GenerationConfig,
) -> Result<Vec<SizedRaster>, RasterError>
where
    E: RasterEncoder + ?Sized,
{
    let encode = config.encode_options();

    let rasters = futures::future::try_join_all(config.sizes.iter().map(|&size| {
        let resize = &config.resize;
        let encode = &encode;
        async move {
            let buffer = encoder.encode(source, size, resize, encode).await?;
            tracing::trace!("Encoded {0}x{0} rendition ({1} bytes)", size, buffer.len());
            Ok::<_, RasterError>(SizedRaster::new(size, buffer))
        }
    }))
    .await?;

    tracing::debug!("Generated {} renditions", rasters.len());
    Ok(rasters)
}

/// Renders all configured sizes and packs them into a single ICO.
pub async fn generate_ico<E>(
    encoder: &E,
    source: &SourceImage,
    config: &GenerationConfig,
) -> Result<Vec<u8>, RasterError>
where
    E: RasterEncoder + ?Sized,
{
    let rasters = generate_sized_rasters(encoder, source, config).await?;
    Ok(pack_ico(&rasters))
}

#[derive(Debug, Error)]
pub enum RasterError {
    #[error("failed to read the source image {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("the source image is not in a supported format")]
    UnsupportedFormat,

    #[error("failed to parse SVG: {0}")]
    SvgParse(#[from] usvg::Error),

    #[error("failed to decode the source image: {0}")]
    ImageDecode(#[from] image::ImageError),

    #[error("the pixmap dimensions are invalid: {width}x{height}")]
    InvalidPixmapDimensions { width: u32, height: u32 },

    #[error("an error occurred while encoding the PNG: {0}")]
    PngEncoding(#[from] png::EncodingError),

    #[error("the encoder task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl RasterError {
    /// Returns true if the source could not be read or understood, as opposed
    /// to a failure while producing the output.
    pub fn is_decode(&self) -> bool {
        matches!(
            self,
            Self::Read { .. } | Self::UnsupportedFormat | Self::SvgParse(_) | Self::ImageDecode(_)
        )
    }
}
