//! Thumbnail generators.
//!
//! Each generator turns a local input file into a JPEG at `output`. The
//! external-tool generators shell out to a binary whose path comes from
//! the settings service; the builtin one decodes with the `image` crate.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use vaultfs_core::error::{AppError, ErrorKind};
use vaultfs_core::result::AppResult;

/// Settings a generator falls back to when the settings service has no value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratorDefaults {
    /// Enabled out of the box.
    pub enabled: bool,
    /// Comma-separated extensions.
    pub extensions: &'static str,
    /// Largest input in bytes.
    pub max_size: u64,
    /// Binary path; empty for in-process generators.
    pub tool_path: &'static str,
}

/// One generator invocation.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// Source file on local disk.
    pub input: PathBuf,
    /// Where the JPEG must be written.
    pub output: PathBuf,
    /// Scratch directory private to this invocation.
    pub work_dir: PathBuf,
    /// Bounding box width.
    pub width: u32,
    /// Bounding box height.
    pub height: u32,
    /// JPEG quality.
    pub quality: u8,
    /// Binary to run, from settings.
    pub tool_path: String,
    /// Kill the tool after this long.
    pub timeout: Duration,
}

/// A thumbnail generator.
#[async_trait]
pub trait Generator: Send + Sync + std::fmt::Debug + 'static {
    /// Stable name, used in setting keys (`thumb_{name}_enabled`, ...).
    fn name(&self) -> &'static str;

    /// Settings used when the settings service has none.
    fn defaults(&self) -> GeneratorDefaults;

    /// Render `request.input` into `request.output`.
    async fn generate(&self, request: &GenerateRequest) -> AppResult<()>;
}

/// Run an external tool, returning its stdout.
///
/// A missing binary is `FeatureNotSupported` so the pipeline moves on.
async fn run_tool(tool: &str, args: &[String], timeout: Duration) -> AppResult<Vec<u8>> {
    if tool.is_empty() {
        return Err(AppError::feature_not_supported("Tool path is not configured"));
    }
    debug!(tool, ?args, "Running thumbnail tool");
    let child = Command::new(tool)
        .args(args)
        .stdin(std::process::Stdio::null())
        .kill_on_drop(true)
        .output();
    let output = tokio::time::timeout(timeout, child)
        .await
        .map_err(|_| AppError::internal(format!("{tool} timed out after {timeout:?}")))?
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::feature_not_supported(format!("{tool} is not installed"))
            } else {
                AppError::with_source(ErrorKind::Internal, format!("Failed to run {tool}"), e)
            }
        })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: String = stderr.chars().rev().take(300).collect::<Vec<_>>().into_iter().rev().collect();
        return Err(AppError::internal(format!(
            "{tool} exited with {}: {}",
            output.status,
            tail.trim()
        )));
    }
    Ok(output.stdout)
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Decode `input`, fit it into the box and write a JPEG to `output`.
pub(crate) async fn resize_to_jpeg(
    input: PathBuf,
    output: PathBuf,
    width: u32,
    height: u32,
    quality: u8,
) -> AppResult<()> {
    tokio::task::spawn_blocking(move || {
        let image = image::open(&input).map_err(|e| {
            AppError::with_source(ErrorKind::Validation, "Unsupported or corrupt image", e)
        })?;
        let thumb = image.thumbnail(width, height).to_rgb8();
        let file = std::fs::File::create(&output)?;
        let mut writer = std::io::BufWriter::new(file);
        let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut writer, quality);
        thumb.write_with_encoder(encoder).map_err(|e| {
            AppError::with_source(ErrorKind::Internal, "Failed to encode thumbnail", e)
        })?;
        Ok(())
    })
    .await
    .map_err(|e| AppError::with_source(ErrorKind::Internal, "Thumbnail task panicked", e))?
}

/// libvips `vipsthumbnail`.
#[derive(Debug, Default, Clone, Copy)]
pub struct VipsGenerator;

#[async_trait]
impl Generator for VipsGenerator {
    fn name(&self) -> &'static str {
        "vips"
    }

    fn defaults(&self) -> GeneratorDefaults {
        GeneratorDefaults {
            enabled: false,
            extensions: "jpg,jpeg,png,gif,webp,bmp,tif,tiff,heic,heif,avif,jxl,svg,dng,raw",
            max_size: 75 * 1024 * 1024,
            tool_path: "vipsthumbnail",
        }
    }

    async fn generate(&self, request: &GenerateRequest) -> AppResult<()> {
        let args = vec![
            path_arg(&request.input),
            "--size".to_string(),
            format!("{}x{}", request.width, request.height),
            "-o".to_string(),
            format!("{}[Q={}]", path_arg(&request.output), request.quality),
        ];
        run_tool(&request.tool_path, &args, request.timeout).await?;
        Ok(())
    }
}

/// Video frame extraction with `ffmpeg`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegGenerator;

#[async_trait]
impl Generator for FfmpegGenerator {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn defaults(&self) -> GeneratorDefaults {
        GeneratorDefaults {
            enabled: false,
            extensions: "3g2,3gp,asf,asx,avi,divx,flv,m2ts,m2v,m4v,mkv,mov,mp4,mpeg,mpg,mts,mxf,ogv,rm,swf,webm,wmv",
            max_size: 10 * 1024 * 1024 * 1024,
            tool_path: "ffmpeg",
        }
    }

    async fn generate(&self, request: &GenerateRequest) -> AppResult<()> {
        let args = vec![
            "-nostdin".to_string(),
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-ss".to_string(),
            "00:00:01.00".to_string(),
            "-i".to_string(),
            path_arg(&request.input),
            "-vf".to_string(),
            format!(
                "thumbnail,scale={}:{}:force_original_aspect_ratio=decrease",
                request.width, request.height
            ),
            "-frames:v".to_string(),
            "1".to_string(),
            "-q:v".to_string(),
            jpeg_qscale(request.quality).to_string(),
            "-y".to_string(),
            path_arg(&request.output),
        ];
        run_tool(&request.tool_path, &args, request.timeout).await?;
        Ok(())
    }
}

/// Map JPEG quality 1-100 to ffmpeg's 2-31 qscale (lower is better).
fn jpeg_qscale(quality: u8) -> u8 {
    let quality = quality.clamp(1, 100) as u32;
    (31 - (quality * 29) / 100) as u8
}

/// Embedded preview extraction from camera RAW files with `simple_dcraw`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LibRawGenerator;

#[async_trait]
impl Generator for LibRawGenerator {
    fn name(&self) -> &'static str {
        "libraw"
    }

    fn defaults(&self) -> GeneratorDefaults {
        GeneratorDefaults {
            enabled: false,
            extensions: "3fr,ari,arw,bay,braw,crw,cr2,cr3,cap,dcs,dcr,dng,drf,eip,erf,fff,gpr,iiq,k25,kdc,mdc,mef,mos,mrw,nef,nrw,obm,orf,pef,ptx,pxn,r3d,raf,raw,rwl,rw2,rwz,sr2,srf,srw,x3f",
            max_size: 256 * 1024 * 1024,
            tool_path: "simple_dcraw",
        }
    }

    async fn generate(&self, request: &GenerateRequest) -> AppResult<()> {
        let args = vec!["-e".to_string(), "-c".to_string(), path_arg(&request.input)];
        let preview = run_tool(&request.tool_path, &args, request.timeout).await?;
        if preview.is_empty() {
            return Err(AppError::validation("RAW file has no embedded preview"));
        }
        let preview_path = request.work_dir.join("raw-preview");
        tokio::fs::write(&preview_path, &preview).await?;
        resize_to_jpeg(
            preview_path,
            request.output.clone(),
            request.width,
            request.height,
            request.quality,
        )
        .await
    }
}

/// Embedded album art extraction from audio files with `ffmpeg`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MusicCoverGenerator;

#[async_trait]
impl Generator for MusicCoverGenerator {
    fn name(&self) -> &'static str {
        "music_cover"
    }

    fn defaults(&self) -> GeneratorDefaults {
        GeneratorDefaults {
            enabled: false,
            extensions: "mp3,m4a,flac,ogg,oga,opus,wma,aac,ape,wav,aiff",
            max_size: 1024 * 1024 * 1024,
            tool_path: "ffmpeg",
        }
    }

    async fn generate(&self, request: &GenerateRequest) -> AppResult<()> {
        let cover = request.work_dir.join("cover.png");
        let args = vec![
            "-nostdin".to_string(),
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            path_arg(&request.input),
            "-an".to_string(),
            "-map".to_string(),
            "0:v:0".to_string(),
            "-frames:v".to_string(),
            "1".to_string(),
            "-y".to_string(),
            path_arg(&cover),
        ];
        run_tool(&request.tool_path, &args, request.timeout).await?;
        resize_to_jpeg(
            cover,
            request.output.clone(),
            request.width,
            request.height,
            request.quality,
        )
        .await
    }
}

/// In-process decoding with the `image` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinGenerator;

#[async_trait]
impl Generator for BuiltinGenerator {
    fn name(&self) -> &'static str {
        "builtin"
    }

    fn defaults(&self) -> GeneratorDefaults {
        GeneratorDefaults {
            enabled: true,
            extensions: "jpg,jpeg,png,gif,bmp,webp,tif,tiff,ico,tga,pnm,ppm",
            max_size: 50 * 1024 * 1024,
            tool_path: "",
        }
    }

    async fn generate(&self, request: &GenerateRequest) -> AppResult<()> {
        resize_to_jpeg(
            request.input.clone(),
            request.output.clone(),
            request.width,
            request.height,
            request.quality,
        )
        .await
    }
}
