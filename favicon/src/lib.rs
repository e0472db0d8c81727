//! Rasterizes a single source image into PNG renditions, packs them into a
//! Windows ICO container and keeps a served favicon in sync with its source.

pub mod artifacts;
pub mod config;
pub mod emit;
pub mod error;
pub mod html;
pub mod ico;
pub mod raster;
pub mod serve;

pub use artifacts::Artifacts;
pub use config::{RawOptions, ResolvedConfig};
pub use error::FaviconError;
pub use ico::{pack_ico, SizedRaster};
pub use raster::{generate_ico, generate_sized_rasters, NativeEncoder, RasterEncoder};
pub use serve::FaviconServer;
