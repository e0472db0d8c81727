//! Build-time emission of the favicon bundle.

use crate::artifacts::Artifacts;
use crate::config::{ResolvedConfig, SourceEmission};
use crate::error::FaviconError;
use crate::html::EmittedBundle;
use crate::raster::{RasterEncoder, SourceImage};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Receives the files of a build. Every name is emitted at most once.
pub trait AssetSink {
    fn emit(&mut self, file_name: &str, data: Vec<u8>) -> Result<(), FaviconError>;
}

/// Writes emitted assets into a directory.
#[derive(Debug)]
pub struct DirectorySink {
    output_dir: PathBuf,
    emitted: HashSet<String>,
}

impl DirectorySink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            emitted: HashSet::new(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

impl AssetSink for DirectorySink {
    fn emit(&mut self, file_name: &str, data: Vec<u8>) -> Result<(), FaviconError> {
        if !self.emitted.insert(file_name.to_owned()) {
            return Err(FaviconError::DuplicatedAsset(file_name.to_owned()));
        }

        std::fs::create_dir_all(&self.output_dir)?;
        let path = self.output_dir.join(file_name);
        std::fs::write(&path, data)?;

        tracing::debug!("Wrote {}", path.display());
        Ok(())
    }
}

/// Collects emitted assets in memory, in emission order.
#[derive(Debug, Default)]
pub struct MemorySink {
    assets: Vec<(String, Vec<u8>)>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assets(&self) -> &[(String, Vec<u8>)] {
        &self.assets
    }

    pub fn get(&self, file_name: &str) -> Option<&[u8]> {
        self.assets
            .iter()
            .find(|(name, _)| name == file_name)
            .map(|(_, data)| data.as_slice())
    }
}

impl AssetSink for MemorySink {
    fn emit(&mut self, file_name: &str, data: Vec<u8>) -> Result<(), FaviconError> {
        if self.get(file_name).is_some() {
            return Err(FaviconError::DuplicatedAsset(file_name.to_owned()));
        }

        self.assets.push((file_name.to_owned(), data));
        Ok(())
    }
}

/// Generates the favicon bundle and hands every file to `sink`.
///
/// Any failure aborts the emission, no partial icon is produced.
#[tracing::instrument(level = "debug", skip_all, fields(input = %config.input.display()))]
pub async fn emit_bundle<E, S>(
    config: &ResolvedConfig,
    encoder: &E,
    sink: &mut S,
) -> Result<EmittedBundle, FaviconError>
where
    E: RasterEncoder + ?Sized,
    S: AssetSink + ?Sized,
{
    let source = SourceImage::load(&config.input).await?;
    let artifacts = Artifacts::generate(config, encoder, &source).await?;
    let bundle = EmittedBundle::planned(config);

    sink.emit(&bundle.ico_file, artifacts.ico.clone())?;

    if let SourceEmission::Enabled { file_name } = &config.source {
        sink.emit(file_name, source.data().to_vec())?;
    }

    for file in &bundle.per_size {
        if let Some(data) = artifacts.per_size_file(file.size, file.format) {
            sink.emit(&file.file_name, data)?;
        }
    }

    tracing::info!(
        "Emitted {} with {} sizes and {} additional files",
        bundle.ico_file,
        bundle.sizes.len(),
        bundle.per_size.len() + usize::from(bundle.source.is_some())
    );

    Ok(bundle)
}
