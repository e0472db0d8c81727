//! Development server state.
//!
//! A [`FaviconServer`] owns the generated artifacts of one plugin instance.
//! The cache is either empty or populated. Each invalidation starts a new
//! epoch with its own [`OnceCell`], so concurrent requests against an empty
//! cache share a single generation and a slow generation of an older epoch
//! can never overwrite a newer one.

use crate::artifacts::Artifacts;
use crate::config::ResolvedConfig;
use crate::error::FaviconError;
use crate::html::{EmittedBundle, HtmlTransform};
use crate::raster::{RasterEncoder, SourceImage};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::OnceCell;

/// Name of the custom event pushed to clients after the source changed.
pub const UPDATE_EVENT: &str = "favicon:update";

/// Generated artifacts must never be cached by the client.
pub const CACHE_CONTROL: &str = "no-cache";

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePayload {
    pub cache_token: String,
}

/// A live update signal for connected clients.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct FaviconUpdate {
    pub event: &'static str,
    pub payload: UpdatePayload,
}

/// Pushes custom events to the clients connected to the host server.
#[async_trait::async_trait]
pub trait UpdateChannel: Send + Sync + 'static {
    /// Sends an update to every connected client.
    async fn send(&self, update: FaviconUpdate);
}

/// A generated asset ready to be written to the client.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AssetResponse {
    pub body: Vec<u8>,
    pub content_type: &'static str,
    pub cache_control: &'static str,
}

#[derive(Debug)]
struct CacheEpoch {
    number: u64,
    token: String,
    artifacts: Arc<OnceCell<Arc<Artifacts>>>,
}

impl CacheEpoch {
    fn new(number: u64) -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();

        Self {
            number,
            token: format!("{:x}-{}", millis, number),
            artifacts: Arc::new(OnceCell::new()),
        }
    }
}

pub struct FaviconServer {
    config: Arc<ResolvedConfig>,
    bundle: EmittedBundle,
    encoder: Arc<dyn RasterEncoder>,
    updates: Option<Arc<dyn UpdateChannel>>,
    epoch: Mutex<CacheEpoch>,
}

impl FaviconServer {
    /// Creates a server with an empty cache.
    pub fn new(config: Arc<ResolvedConfig>, encoder: Arc<dyn RasterEncoder>) -> Self {
        let bundle = EmittedBundle::planned(&config);
        Self {
            config,
            bundle,
            encoder,
            updates: None,
            epoch: Mutex::new(CacheEpoch::new(0)),
        }
    }

    /// Sets the channel used to push live updates.
    pub fn with_update_channel(mut self, updates: Arc<dyn UpdateChannel>) -> Self {
        self.updates = Some(updates);
        self
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// The current cache-busting token.
    pub fn cache_token(&self) -> String {
        self.lock_epoch().token.clone()
    }

    /// Returns true if the current epoch has finished generating.
    pub fn is_populated(&self) -> bool {
        self.lock_epoch().artifacts.initialized()
    }

    /// Populates the cache eagerly when the host server starts.
    pub async fn start(&self) -> Result<(), FaviconError> {
        tracing::info!("Generating favicon from {}", self.config.input.display());

        match self.artifacts().await {
            Ok(_) => Ok(()),
            Err(err) => {
                tracing::error!("Failed to generate favicon: {}", err);
                Err(err)
            }
        }
    }

    /// Returns the artifacts of the current epoch, generating them if needed.
    ///
    /// Concurrent callers share a single generation. A failed generation
    /// leaves the cache empty so the next caller retries.
    pub async fn artifacts(&self) -> Result<Arc<Artifacts>, FaviconError> {
        let cell = self.lock_epoch().artifacts.clone();
        cell.get_or_try_init(|| self.generate())
            .await
            .map(Arc::clone)
    }

    /// Handles a file change reported by the host.
    ///
    /// Returns `Ok(false)` if the file is not the source image. Otherwise the
    /// cache is regenerated, a new token is minted and clients are notified.
    pub async fn on_file_changed(&self, path: &Path) -> Result<bool, FaviconError> {
        let changed = tokio::fs::canonicalize(path)
            .await
            .unwrap_or_else(|_| path.to_path_buf());
        if changed != self.config.input {
            return Ok(false);
        }

        let (token, cell) = {
            let mut epoch = self.lock_epoch();
            *epoch = CacheEpoch::new(epoch.number + 1);
            tracing::debug!("Source changed, starting cache epoch {}", epoch.number);
            (epoch.token.clone(), epoch.artifacts.clone())
        };

        if let Err(err) = cell.get_or_try_init(|| self.generate()).await {
            tracing::error!("Failed to regenerate favicon: {}", err);
            return Err(err);
        }

        if self.config.dev.hot_update {
            if let Some(updates) = &self.updates {
                updates
                    .send(FaviconUpdate {
                        event: UPDATE_EVENT,
                        payload: UpdatePayload { cache_token: token },
                    })
                    .await;
            }
        }

        Ok(true)
    }

    /// Serves a generated asset.
    ///
    /// Returns `None` if `url` does not name one of the favicon assets, in
    /// which case the host should handle the request itself.
    pub async fn handle_request(&self, url: &str) -> Option<Result<AssetResponse, FaviconError>> {
        if !self.config.dev.serve {
            return None;
        }

        let path = url.split(['?', '#']).next().unwrap_or_default();
        let base = if self.config.base.starts_with('/') {
            self.config.base.as_str()
        } else {
            "/"
        };
        let name = path.strip_prefix(base)?;

        let route = if name == self.bundle.ico_file {
            Route::Combined
        } else if let Some(source) = self.bundle.source.as_ref().filter(|s| s.file_name == name) {
            Route::Source(source.format.mime_type())
        } else {
            let file = self.bundle.per_size.iter().find(|f| f.file_name == name)?;
            Route::PerSize(file.size, file.format)
        };

        tracing::trace!("Serving {} as {:?}", url, route);
        Some(self.respond(route).await)
    }

    async fn respond(&self, route: Route) -> Result<AssetResponse, FaviconError> {
        let (body, content_type) = match route {
            Route::Combined => {
                let artifacts = self.artifacts().await?;
                (artifacts.ico.clone(), "image/x-icon")
            }
            Route::Source(content_type) => {
                let source = SourceImage::load(&self.config.input).await?;
                (source.data().to_vec(), content_type)
            }
            Route::PerSize(size, format) => {
                let artifacts = self.artifacts().await?;
                let body = artifacts
                    .per_size_file(size, format)
                    .ok_or(FaviconError::MissingRendition(size))?;
                (body, format.mime_type())
            }
        };

        Ok(AssetResponse {
            body,
            content_type,
            cache_control: CACHE_CONTROL,
        })
    }

    /// Rewrites an HTML document served during development.
    pub fn transform_html(&self, html: &str) -> HtmlTransform {
        let token = self.cache_token();
        HtmlTransform::new(
            html,
            self.config.inject,
            &self.bundle,
            &self.config.base,
            Some(&token),
        )
    }

    async fn generate(&self) -> Result<Arc<Artifacts>, FaviconError> {
        let started = Instant::now();

        let source = SourceImage::load(&self.config.input).await?;
        let artifacts = Artifacts::generate(&self.config, self.encoder.as_ref(), &source).await?;

        tracing::debug!(
            "Generated favicon ({} bytes) in {:?}",
            artifacts.ico.len(),
            started.elapsed()
        );
        Ok(Arc::new(artifacts))
    }

    fn lock_epoch(&self) -> std::sync::MutexGuard<'_, CacheEpoch> {
        self.epoch.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Copy, Clone)]
enum Route {
    Combined,
    Source(&'static str),
    PerSize(u32, crate::config::SizeFormat),
}

#[cfg(test)]
mod tests;
