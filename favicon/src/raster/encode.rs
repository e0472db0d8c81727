use crate::raster::RasterError;

/// zlib effort used for the IDAT stream.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CompressionLevel {
    Fast,
    Default,
    Best,
}

impl CompressionLevel {
    /// Maps a zlib style level (0-9) to the closest encoder preset.
    pub fn from_level(level: u8) -> Self {
        match level {
            0..=3 => Self::Fast,
            4..=6 => Self::Default,
            _ => Self::Best,
        }
    }
}

impl From<CompressionLevel> for png::Compression {
    fn from(value: CompressionLevel) -> Self {
        match value {
            CompressionLevel::Fast => png::Compression::Fast,
            CompressionLevel::Default => png::Compression::Default,
            CompressionLevel::Best => png::Compression::Best,
        }
    }
}

/// Explicit encoder settings, unset fields fall back to the `optimize` preset.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct EncodeOverrides {
    /// zlib level between 0 and 9
    pub compression_level: Option<u8>,

    /// Whether to pick the PNG filter per scanline
    pub adaptive_filtering: Option<bool>,
}

/// Fully resolved PNG encoder settings.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct EncodeOptions {
    pub compression: CompressionLevel,
    pub adaptive_filtering: bool,
}

impl EncodeOptions {
    /// Derives the settings for the `optimize` preset, then applies the overrides.
    pub fn derive(optimize: bool, overrides: &EncodeOverrides) -> Self {
        let mut options = if optimize {
            Self {
                compression: CompressionLevel::Best,
                adaptive_filtering: true,
            }
        } else {
            Self {
                compression: CompressionLevel::Default,
                adaptive_filtering: false,
            }
        };

        if let Some(level) = overrides.compression_level {
            options.compression = CompressionLevel::from_level(level);
        }
        if let Some(adaptive) = overrides.adaptive_filtering {
            options.adaptive_filtering = adaptive;
        }

        options
    }
}

/// Encodes non-premultiplied 8-bit RGBA pixels as a PNG.
pub fn encode_rgba(
    width: u32,
    height: u32,
    pixels: &[u8],
    options: &EncodeOptions,
) -> Result<Vec<u8>, RasterError> {
    let mut output = Vec::new();

    {
        let mut encoder = png::Encoder::new(&mut output, width, height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        encoder.set_compression(options.compression.into());

        if options.adaptive_filtering {
            encoder.set_adaptive_filter(png::AdaptiveFilterType::Adaptive);
        } else {
            encoder.set_filter(png::FilterType::NoFilter);
            encoder.set_adaptive_filter(png::AdaptiveFilterType::NonAdaptive);
        }

        let mut writer = encoder.write_header()?;
        writer.write_image_data(pixels)?;
        writer.finish()?;
    }

    Ok(output)
}
