//! Plugin options as written by the user, and their normalized form.
//!
//! The raw options accept the loose shapes users expect (a flag, a name or a
//! detailed object). [`RawOptions::resolve`] validates them once and produces
//! a [`ResolvedConfig`], nothing downstream looks at the raw shapes again.

use crate::raster::{EncodeOverrides, Fit, GenerationConfig, InputFormat, Kernel, ResizeOptions};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_SIZES: [u32; 3] = [16, 32, 48];
const DEFAULT_OUTPUT_NAME: &str = "favicon.ico";
const DEFAULT_SIZE_PREFIX: &str = "favicon";
const MAX_SIZE: f64 = 256.0;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOptions {
    /// The source image, relative paths are resolved against the project root
    pub input: Option<PathBuf>,

    /// The edge lengths to render
    pub sizes: Option<Vec<f64>>,

    /// File name of the combined icon
    pub output_name: Option<String>,

    /// Public base path prepended to every href
    pub base: Option<String>,

    /// Whether to spend more time on smaller PNGs
    pub optimize: Option<bool>,

    /// Resize policy overrides
    pub resize: Option<RawResizeOptions>,

    /// PNG encoder overrides
    pub png: Option<RawPngOptions>,

    /// Emit the source image next to the icon
    pub emit_source: Option<RawSourceEmission>,

    /// Emit one file per size
    pub emit_sizes: Option<RawSizeEmission>,

    /// Inject link tags into HTML documents
    pub inject: Option<RawInject>,

    /// Development server behavior
    pub dev: Option<RawDev>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawResizeOptions {
    pub fit: Option<String>,
    pub background: Option<[u8; 4]>,
    pub kernel: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPngOptions {
    pub compression_level: Option<u8>,
    pub adaptive_filtering: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawSourceEmission {
    Toggle(bool),
    FileName(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawSizeEmission {
    Toggle(bool),
    Format(String),
    Detailed {
        formats: Vec<String>,
        #[serde(default)]
        prefix: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawInject {
    Toggle(bool),
    Mode(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawDev {
    Toggle(bool),
    Detailed {
        #[serde(default)]
        serve: Option<bool>,
        #[serde(default, rename = "hotUpdate")]
        hot_update: Option<bool>,
    },
}

/// Whether and under which name the source image is emitted.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum SourceEmission {
    Disabled,
    Enabled { file_name: String },
}

/// The container format of a per-size file.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum SizeFormat {
    Png,
    Ico,
}

impl SizeFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Ico => "ico",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Ico => "image/x-icon",
        }
    }
}

/// Which per-size files are produced. No formats means none are.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SizeEmission {
    pub formats: Vec<SizeFormat>,
    pub prefix: String,
}

impl SizeEmission {
    pub fn disabled() -> Self {
        Self {
            formats: Vec::new(),
            prefix: DEFAULT_SIZE_PREFIX.to_owned(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.formats.is_empty()
    }

    /// The file name of the rendition at `size` in `format`.
    pub fn file_name(&self, size: u32, format: SizeFormat) -> String {
        format!("{}-{1}x{1}.{2}", self.prefix, size, format.extension())
    }
}

/// How link tags are injected into HTML documents.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum InjectMode {
    /// Existing tags are only cache-busted
    Off,

    /// The combined icon and, for vector sources, the source image
    Minimal,

    /// Minimal plus one tag per emitted per-size file
    Full,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct DevBehavior {
    /// Serve generated artifacts from memory
    pub serve: bool,

    /// Push a live update to clients when the source changes
    pub hot_update: bool,
}

/// Fully validated plugin configuration.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute, canonical path of the source image
    pub input: PathBuf,

    /// Format of the source image
    pub format: InputFormat,

    /// Parameters for every generation run
    pub generation: GenerationConfig,

    /// File name of the combined icon
    pub output_name: String,

    /// Public base path, always ending in `/`
    pub base: String,

    pub source: SourceEmission,

    pub sizes_emission: SizeEmission,

    pub inject: InjectMode,

    pub dev: DevBehavior,
}

impl RawOptions {
    /// Reads options from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        serde_json::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Validates the options and normalizes them, resolving relative paths
    /// against `root`.
    pub fn resolve(self, root: &Path) -> Result<ResolvedConfig, ConfigError> {
        let input = self.input.ok_or(ConfigError::MissingInput)?;
        let input = if input.is_absolute() {
            input
        } else {
            root.join(input)
        };

        let format =
            InputFormat::from_path(&input).ok_or_else(|| ConfigError::UnsupportedInput(input.clone()))?;
        if !format.is_decodable() {
            return Err(ConfigError::UndecodableInput {
                path: input,
                mime_type: format.mime_type(),
            });
        }
        let input = std::fs::canonicalize(&input)
            .map_err(|_| ConfigError::InputNotFound(input.clone()))?;
        if !input.is_file() {
            return Err(ConfigError::InputNotFound(input));
        }

        let sizes = resolve_sizes(self.sizes)?;
        let resize = resolve_resize(self.resize.unwrap_or_default())?;
        let encode = resolve_png(self.png.unwrap_or_default())?;

        let output_name = self
            .output_name
            .unwrap_or_else(|| DEFAULT_OUTPUT_NAME.to_owned());
        if output_name.is_empty() {
            return Err(ConfigError::InvalidOption {
                option: "outputName",
                value: output_name,
            });
        }

        let mut base = self.base.unwrap_or_else(|| "/".to_owned());
        if !base.ends_with('/') {
            base.push('/');
        }

        let source = match self.emit_source {
            None | Some(RawSourceEmission::Toggle(false)) => SourceEmission::Disabled,
            Some(RawSourceEmission::Toggle(true)) => SourceEmission::Enabled {
                file_name: input
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .ok_or_else(|| ConfigError::UnsupportedInput(input.clone()))?,
            },
            Some(RawSourceEmission::FileName(file_name)) if !file_name.is_empty() => {
                SourceEmission::Enabled { file_name }
            }
            Some(RawSourceEmission::FileName(file_name)) => {
                return Err(ConfigError::InvalidOption {
                    option: "emitSource",
                    value: file_name,
                })
            }
        };

        let sizes_emission = resolve_size_emission(self.emit_sizes)?;
        check_file_names(&output_name, &source, &sizes, &sizes_emission)?;

        let inject = match self.inject {
            None | Some(RawInject::Toggle(false)) => InjectMode::Off,
            Some(RawInject::Toggle(true)) => InjectMode::Minimal,
            Some(RawInject::Mode(mode)) => match mode.as_str() {
                "minimal" => InjectMode::Minimal,
                "full" => InjectMode::Full,
                _ => {
                    return Err(ConfigError::InvalidOption {
                        option: "inject",
                        value: mode,
                    })
                }
            },
        };

        let dev = match self.dev {
            None | Some(RawDev::Toggle(true)) => DevBehavior {
                serve: true,
                hot_update: true,
            },
            Some(RawDev::Toggle(false)) => DevBehavior {
                serve: false,
                hot_update: false,
            },
            Some(RawDev::Detailed { serve, hot_update }) => DevBehavior {
                serve: serve.unwrap_or(true),
                hot_update: hot_update.unwrap_or(true),
            },
        };

        Ok(ResolvedConfig {
            input,
            format,
            generation: GenerationConfig {
                sizes,
                optimize: self.optimize.unwrap_or(true),
                resize,
                encode,
            },
            output_name,
            base,
            source,
            sizes_emission,
            inject,
            dev,
        })
    }
}

fn resolve_sizes(sizes: Option<Vec<f64>>) -> Result<Vec<u32>, ConfigError> {
    let Some(sizes) = sizes else {
        return Ok(DEFAULT_SIZES.to_vec());
    };

    if sizes.is_empty() {
        return Err(ConfigError::EmptySizes);
    }

    sizes
        .into_iter()
        .map(|size| {
            if size.fract() != 0.0 || !(1.0..=MAX_SIZE).contains(&size) {
                Err(ConfigError::InvalidSize(size))
            } else {
                Ok(size as u32)
            }
        })
        .collect()
}

fn resolve_resize(raw: RawResizeOptions) -> Result<ResizeOptions, ConfigError> {
    let defaults = ResizeOptions::default();

    let fit = match raw.fit.as_deref() {
        None => defaults.fit,
        Some("contain") => Fit::Contain,
        Some("cover") => Fit::Cover,
        Some("fill") => Fit::Fill,
        Some(other) => {
            return Err(ConfigError::InvalidOption {
                option: "resize.fit",
                value: other.to_owned(),
            })
        }
    };

    let kernel = match raw.kernel.as_deref() {
        None => defaults.kernel,
        Some("nearest") => Kernel::Nearest,
        Some("triangle") => Kernel::Triangle,
        Some("catmullRom") => Kernel::CatmullRom,
        Some("lanczos3") => Kernel::Lanczos3,
        Some(other) => {
            return Err(ConfigError::InvalidOption {
                option: "resize.kernel",
                value: other.to_owned(),
            })
        }
    };

    Ok(ResizeOptions {
        fit,
        background: raw.background.unwrap_or(defaults.background),
        kernel,
    })
}

fn resolve_png(raw: RawPngOptions) -> Result<EncodeOverrides, ConfigError> {
    if let Some(level) = raw.compression_level {
        if level > 9 {
            return Err(ConfigError::InvalidOption {
                option: "png.compressionLevel",
                value: level.to_string(),
            });
        }
    }

    Ok(EncodeOverrides {
        compression_level: raw.compression_level,
        adaptive_filtering: raw.adaptive_filtering,
    })
}

fn resolve_size_emission(raw: Option<RawSizeEmission>) -> Result<SizeEmission, ConfigError> {
    let parse_format = |value: String| match value.as_str() {
        "png" => Ok(vec![SizeFormat::Png]),
        "ico" => Ok(vec![SizeFormat::Ico]),
        "both" => Ok(vec![SizeFormat::Png, SizeFormat::Ico]),
        _ => Err(ConfigError::InvalidOption {
            option: "emitSizes",
            value,
        }),
    };

    let mut emission = SizeEmission::disabled();
    match raw {
        None | Some(RawSizeEmission::Toggle(false)) => {}
        Some(RawSizeEmission::Toggle(true)) => emission.formats = vec![SizeFormat::Png],
        Some(RawSizeEmission::Format(format)) => emission.formats = parse_format(format)?,
        Some(RawSizeEmission::Detailed { formats, prefix }) => {
            for format in formats {
                for format in parse_format(format)? {
                    if !emission.formats.contains(&format) {
                        emission.formats.push(format);
                    }
                }
            }

            if let Some(prefix) = prefix {
                if prefix.is_empty() || prefix.contains('/') {
                    return Err(ConfigError::InvalidOption {
                        option: "emitSizes.prefix",
                        value: prefix,
                    });
                }
                emission.prefix = prefix;
            }
        }
    }

    Ok(emission)
}

/// Rejects configurations under which two emitted files share a name.
fn check_file_names(
    output_name: &str,
    source: &SourceEmission,
    sizes: &[u32],
    emission: &SizeEmission,
) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    names.insert(output_name.to_owned());

    if let SourceEmission::Enabled { file_name } = source {
        if !names.insert(file_name.clone()) {
            return Err(ConfigError::InvalidOption {
                option: "emitSource",
                value: file_name.clone(),
            });
        }
    }

    for &size in sizes {
        for &format in &emission.formats {
            let file_name = emission.file_name(size, format);
            if !names.insert(file_name.clone()) {
                return Err(ConfigError::InvalidOption {
                    option: "emitSizes",
                    value: file_name,
                });
            }
        }
    }

    Ok(())
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read the configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse the configuration: {0}")]
    Parse(serde_json::Error),

    #[error("no input image was specified")]
    MissingInput,

    #[error("the input image {} does not exist", .0.display())]
    InputNotFound(PathBuf),

    #[error("the input image {} is not in a supported format", .0.display())]
    UnsupportedInput(PathBuf),

    #[error("the input image {} is {mime_type}, which this build cannot decode", .path.display())]
    UndecodableInput {
        path: PathBuf,
        mime_type: &'static str,
    },

    #[error("at least one size must be specified")]
    EmptySizes,

    #[error("size {0} is not an integer between 1 and 256")]
    InvalidSize(f64),

    #[error("invalid value {value:?} for option {option}")]
    InvalidOption { option: &'static str, value: String },
}
