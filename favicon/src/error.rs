use crate::config::ConfigError;
use crate::raster::RasterError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FaviconError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Raster(#[from] RasterError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no rendition of size {0} is cached")]
    MissingRendition(u32),

    #[error("the asset {0} has already been emitted")]
    DuplicatedAsset(String),
}

impl FaviconError {
    /// Returns true if the error originates from reading or decoding the source image.
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Raster(err) if err.is_decode())
    }
}
