//! Ordered generator pipeline.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use vaultfs_core::config::ThumbnailConfig;
use vaultfs_core::error::{AppError, ErrorKind};
use vaultfs_core::result::AppResult;
use vaultfs_core::settings::Settings;

use super::generator::{
    BuiltinGenerator, FfmpegGenerator, GenerateRequest, Generator, LibRawGenerator,
    MusicCoverGenerator, VipsGenerator,
};
use crate::provider::ByteStream;

/// Seconds an external tool may run before it is killed.
const TOOL_TIMEOUT_KEY: &str = "thumb_tool_timeout_seconds";
const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 60;

/// A rendered thumbnail.
#[derive(Debug, Clone)]
pub struct GeneratedThumbnail {
    /// Name of the generator that produced it.
    pub generator: &'static str,
    /// JPEG bytes.
    pub data: Bytes,
}

/// Effective settings for one generator at one point in time.
#[derive(Debug, Clone)]
struct Resolved {
    generator: Arc<dyn Generator>,
    tool_path: String,
}

/// Runs generators in priority order until one succeeds.
#[derive(Debug, Clone)]
pub struct ThumbnailPipeline {
    generators: Vec<Arc<dyn Generator>>,
    settings: Arc<Settings>,
    config: ThumbnailConfig,
}

impl ThumbnailPipeline {
    /// Pipeline with the standard generators: libvips, ffmpeg, libraw,
    /// audio cover, then the builtin decoder.
    pub fn new(settings: Arc<Settings>, config: ThumbnailConfig) -> Self {
        Self::with_generators(
            vec![
                Arc::new(VipsGenerator),
                Arc::new(FfmpegGenerator),
                Arc::new(LibRawGenerator),
                Arc::new(MusicCoverGenerator),
                Arc::new(BuiltinGenerator),
            ],
            settings,
            config,
        )
    }

    /// Pipeline with an explicit generator order.
    pub fn with_generators(
        generators: Vec<Arc<dyn Generator>>,
        settings: Arc<Settings>,
        config: ThumbnailConfig,
    ) -> Self {
        Self {
            generators,
            settings,
            config,
        }
    }

    /// Output settings.
    pub fn config(&self) -> &ThumbnailConfig {
        &self.config
    }

    fn eligible(&self, name: &str, size: u64) -> Vec<Resolved> {
        let ext = extension(name);
        self.generators
            .iter()
            .filter_map(|generator| {
                let key = generator.name();
                let defaults = generator.defaults();
                if !self
                    .settings
                    .get_bool(&format!("thumb_{key}_enabled"), defaults.enabled)
                {
                    return None;
                }
                let max_size = self
                    .settings
                    .get_u64(&format!("thumb_{key}_max_size"), defaults.max_size);
                if max_size > 0 && size > max_size {
                    debug!(generator = key, size, max_size, "File too large for generator");
                    return None;
                }
                let exts = self
                    .settings
                    .get_list(&format!("thumb_{key}_exts"), defaults.extensions);
                if !exts.iter().any(|e| Some(e.as_str()) == ext.as_deref()) {
                    return None;
                }
                Some(Resolved {
                    generator: generator.clone(),
                    tool_path: self
                        .settings
                        .get_or(&format!("thumb_{key}_path"), defaults.tool_path),
                })
            })
            .collect()
    }

    /// Whether any enabled generator accepts a file of this name and size.
    pub fn supports(&self, name: &str, size: u64) -> bool {
        !self.eligible(name, size).is_empty()
    }

    /// Names of the generators that would be tried, in order.
    pub fn candidates(&self, name: &str, size: u64) -> Vec<&'static str> {
        self.eligible(name, size)
            .iter()
            .map(|r| r.generator.name())
            .collect()
    }

    fn work_dir(&self) -> AppResult<tempfile::TempDir> {
        let dir = if self.config.temp_dir.is_empty() {
            tempfile::Builder::new().prefix("vaultfs-thumb-").tempdir()
        } else {
            std::fs::create_dir_all(&self.config.temp_dir)?;
            tempfile::Builder::new()
                .prefix("vaultfs-thumb-")
                .tempdir_in(&self.config.temp_dir)
        };
        dir.map_err(|e| {
            AppError::with_source(ErrorKind::Internal, "Failed to create thumbnail workdir", e)
        })
    }

    /// Render a thumbnail for `name` from `body`.
    ///
    /// Returns `FeatureNotSupported` when no generator is eligible or all
    /// eligible generators failed.
    pub async fn generate(
        &self,
        name: &str,
        size: u64,
        mut body: ByteStream,
    ) -> AppResult<GeneratedThumbnail> {
        let eligible = self.eligible(name, size);
        if eligible.is_empty() {
            return Err(AppError::feature_not_supported(format!(
                "No thumbnail generator accepts '{name}'"
            )));
        }

        let work = self.work_dir()?;
        let ext = extension(name).unwrap_or_default();
        let input = work.path().join(format!("source.{ext}"));
        {
            let mut file = tokio::fs::File::create(&input).await?;
            while let Some(chunk) = body.next().await {
                file.write_all(&chunk?).await?;
            }
            file.flush().await?;
        }

        let timeout = Duration::from_secs(
            self.settings
                .get_u64(TOOL_TIMEOUT_KEY, DEFAULT_TOOL_TIMEOUT_SECS),
        );

        for (attempt, resolved) in eligible.iter().enumerate() {
            let key = resolved.generator.name();
            let scratch = work.path().join(format!("{attempt}-{key}"));
            tokio::fs::create_dir_all(&scratch).await?;
            let request = GenerateRequest {
                input: input.clone(),
                output: scratch.join("thumb.jpg"),
                work_dir: scratch,
                width: self.config.max_width,
                height: self.config.max_height,
                quality: self.config.quality,
                tool_path: resolved.tool_path.clone(),
                timeout,
            };

            match resolved.generator.generate(&request).await {
                Ok(()) => match read_output(&request.output).await {
                    Ok(data) => {
                        info!(generator = key, file = name, bytes = data.len(), "Thumbnail generated");
                        return Ok(GeneratedThumbnail {
                            generator: key,
                            data,
                        });
                    }
                    Err(e) => warn!(generator = key, file = name, error = %e, "Generator produced no output"),
                },
                Err(e) => {
                    warn!(generator = key, file = name, error = %e, "Thumbnail generator failed, trying next")
                }
            }
        }

        Err(AppError::feature_not_supported(format!(
            "All thumbnail generators failed for '{name}'"
        )))
    }
}

async fn read_output(path: &std::path::Path) -> AppResult<Bytes> {
    let data = tokio::fs::read(path).await?;
    if data.is_empty() {
        return Err(AppError::internal("Empty thumbnail output"));
    }
    Ok(Bytes::from(data))
}

fn extension(name: &str) -> Option<String> {
    std::path::Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
}
