use crate::config::{ResolvedConfig, SizeFormat};
use crate::ico::{pack_ico, SizedRaster};
use crate::raster::{generate_sized_rasters, RasterEncoder, RasterError, SourceImage};

/// Everything produced by one generation run.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Artifacts {
    /// The combined icon containing every configured size
    pub ico: Vec<u8>,

    /// The individual renditions, only kept if per-size files are emitted
    pub per_size: Option<Vec<SizedRaster>>,
}

impl Artifacts {
    /// Renders the source at every configured size and packs the result.
    pub async fn generate<E>(
        config: &ResolvedConfig,
        encoder: &E,
        source: &SourceImage,
    ) -> Result<Self, RasterError>
    where
        E: RasterEncoder + ?Sized,
    {
        let rasters = generate_sized_rasters(encoder, source, &config.generation).await?;
        let ico = pack_ico(&rasters);

        let per_size = config.sizes_emission.is_enabled().then_some(rasters);
        Ok(Self { ico, per_size })
    }

    /// Returns the rendition at `size`, if per-size renditions are kept.
    pub fn raster(&self, size: u32) -> Option<&SizedRaster> {
        self.per_size.as_ref()?.iter().find(|raster| raster.size == size)
    }

    /// Encodes the rendition at `size` as a standalone file.
    pub fn per_size_file(&self, size: u32, format: SizeFormat) -> Option<Vec<u8>> {
        let raster = self.raster(size)?;
        Some(match format {
            SizeFormat::Png => raster.buffer.clone(),
            SizeFormat::Ico => pack_ico(std::slice::from_ref(raster)),
        })
    }
}
