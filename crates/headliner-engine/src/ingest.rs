use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use headliner_contracts::config::OutputFormat;
use headliner_contracts::content::ContentId;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{DynamicImage, ExtendedColorType, ImageEncoder, Rgba, RgbImage, RgbaImage};
use tracing::{debug, warn};

use crate::client::ImageReference;
use crate::error::IngestionError;
use crate::host::{AssetStore, StoredAsset};
use crate::transport::HttpTransport;

/// Anything shorter cannot be a usable generated image.
pub const MIN_IMAGE_BYTES: usize = 100;
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

const FILENAME_PREFIX: &str = "headliner-post";

/// Optional encoders available on this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecSupport {
    pub webp: bool,
    pub avif: bool,
}

impl CodecSupport {
    /// What this build was compiled with.
    pub fn compiled() -> Self {
        Self {
            webp: cfg!(feature = "webp"),
            avif: cfg!(feature = "avif"),
        }
    }

    pub fn none() -> Self {
        Self {
            webp: false,
            avif: false,
        }
    }

    pub fn supports(&self, format: OutputFormat) -> bool {
        match format {
            OutputFormat::Webp => self.webp,
            OutputFormat::Avif => self.avif,
            OutputFormat::Original | OutputFormat::Jpg | OutputFormat::Png => true,
        }
    }
}

impl Default for CodecSupport {
    fn default() -> Self {
        Self::compiled()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedImage {
    pub mime_type: String,
    pub extension: String,
}

/// Image bytes ready to hand to the asset store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedAsset {
    pub owner: ContentId,
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub extension: String,
    pub filename: String,
    /// Type sniffed from the downloaded bytes.
    pub source_mime_type: String,
    /// Set when the requested format could not be produced and the original
    /// bytes were kept instead.
    pub transcode_error: Option<IngestionError>,
}

#[derive(Clone)]
pub struct ImageIngestor {
    transport: Arc<dyn HttpTransport>,
    codecs: CodecSupport,
}

impl ImageIngestor {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            codecs: CodecSupport::default(),
        }
    }

    pub fn with_codecs(mut self, codecs: CodecSupport) -> Self {
        self.codecs = codecs;
        self
    }

    pub fn codecs(&self) -> CodecSupport {
        self.codecs
    }

    pub fn ingest(
        &self,
        reference: &ImageReference,
        owner: ContentId,
        output_format: OutputFormat,
        output_quality: u32,
    ) -> Result<GeneratedAsset, IngestionError> {
        let bytes = self.fetch(reference)?;
        if bytes.len() < MIN_IMAGE_BYTES {
            return Err(IngestionError::InvalidImage(format!(
                "only {} bytes received",
                bytes.len()
            )));
        }
        let detected = detect_image(&bytes)?;
        debug!(
            owner,
            mime = %detected.mime_type,
            size = bytes.len(),
            "image fetched"
        );

        let (bytes, mime_type, extension, transcode_error) =
            match transcode(&bytes, output_format, output_quality, self.codecs) {
                Ok(Some((encoded, format))) => (
                    encoded,
                    format.mime_type().unwrap_or(detected.mime_type.as_str()).to_string(),
                    format.as_str().to_string(),
                    None,
                ),
                Ok(None) => (
                    bytes,
                    detected.mime_type.clone(),
                    detected.extension.clone(),
                    None,
                ),
                Err(err) => {
                    warn!(owner, format = %output_format, error = %err, "keeping original image bytes");
                    (
                        bytes,
                        detected.mime_type.clone(),
                        detected.extension.clone(),
                        Some(err),
                    )
                }
            };

        Ok(GeneratedAsset {
            owner,
            filename: asset_filename(owner, &extension),
            bytes,
            mime_type,
            extension,
            source_mime_type: detected.mime_type,
            transcode_error,
        })
    }

    fn fetch(&self, reference: &ImageReference) -> Result<Vec<u8>, IngestionError> {
        match reference {
            ImageReference::Url(url) => {
                let reply = self
                    .transport
                    .get(url, &[], DOWNLOAD_TIMEOUT)
                    .map_err(|err| IngestionError::DownloadFailed(err.message))?;
                if !reply.is_success() {
                    return Err(IngestionError::DownloadFailed(format!(
                        "image host returned status {}",
                        reply.status
                    )));
                }
                Ok(reply.body)
            }
            ImageReference::Inline(payload) => decode_inline(payload),
        }
    }
}

pub fn decode_inline(payload: &str) -> Result<Vec<u8>, IngestionError> {
    let data = match payload.trim().strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map(|(_, data)| data).unwrap_or(""),
        None => payload,
    };
    let compact: String = data.chars().filter(|ch| !ch.is_whitespace()).collect();
    BASE64
        .decode(compact.as_bytes())
        .map_err(|err| IngestionError::InvalidImage(format!("inline data is not base64: {err}")))
}

/// Formats a generated image may arrive in.
pub const ACCEPTED_MIME_TYPES: &[&str] = &["image/jpeg", "image/png", "image/webp", "image/avif"];

/// Sniffs the type from magic bytes only.
pub fn detect_image(bytes: &[u8]) -> Result<DetectedImage, IngestionError> {
    match infer::get(bytes) {
        Some(kind) if ACCEPTED_MIME_TYPES.contains(&kind.mime_type()) => Ok(DetectedImage {
            mime_type: kind.mime_type().to_string(),
            extension: kind.extension().to_string(),
        }),
        Some(kind) if kind.matcher_type() == infer::MatcherType::Image => {
            Err(IngestionError::InvalidImage(format!(
                "unsupported image type {}",
                kind.mime_type()
            )))
        }
        Some(kind) => Err(IngestionError::InvalidImage(format!(
            "expected an image, got {}",
            kind.mime_type()
        ))),
        None => Err(IngestionError::InvalidImage(
            "unrecognized image data".to_string(),
        )),
    }
}

/// Re-encodes `bytes` into `format`. `Ok(None)` means keep the original.
pub fn transcode(
    bytes: &[u8],
    format: OutputFormat,
    quality: u32,
    codecs: CodecSupport,
) -> Result<Option<(Vec<u8>, OutputFormat)>, IngestionError> {
    if format == OutputFormat::Original {
        return Ok(None);
    }
    if !codecs.supports(format) {
        return Err(IngestionError::FormatUnsupported { format });
    }
    let decoded = image::load_from_memory(bytes)
        .map_err(|err| IngestionError::TranscodeFailed(format!("decode failed: {err}")))?;
    let quality = quality.min(100);

    let encoded = match format {
        OutputFormat::Jpg => encode_jpeg(&decoded, quality),
        OutputFormat::Png => encode_png(&decoded, quality),
        OutputFormat::Webp => encode_webp(&decoded, quality),
        OutputFormat::Avif => encode_avif(&decoded, quality),
        OutputFormat::Original => return Ok(None),
    }
    .map_err(|err| IngestionError::TranscodeFailed(format!("{format} encode failed: {err}")))?;

    if encoded.is_empty() {
        return Err(IngestionError::TranscodeFailed(format!(
            "{format} encoder produced no data"
        )));
    }
    Ok(Some((encoded, format)))
}

/// Maps quality 0..=100 onto zlib levels 9..=0.
pub fn png_compression_level(quality: u32) -> u8 {
    let level = (100 - quality.min(100)) as f64 / 11.111;
    (level as u8).min(9)
}

pub fn asset_filename(owner: ContentId, extension: &str) -> String {
    format!(
        "{FILENAME_PREFIX}-{owner}-{}.{extension}",
        Utc::now().timestamp_millis()
    )
}

pub fn persist_asset(
    store: &dyn AssetStore,
    asset: &GeneratedAsset,
) -> Result<StoredAsset, IngestionError> {
    store
        .store(asset.owner, &asset.filename, &asset.mime_type, &asset.bytes)
        .map_err(|err| IngestionError::PersistFailed(err.to_string()))
}

fn flatten_onto_white(image: &DynamicImage) -> RgbImage {
    let rgba = image.to_rgba8();
    let mut flattened = RgbaImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = u16::from(pixel[3]);
        let blend =
            |channel: u8| -> u8 { (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8 };
        flattened.put_pixel(
            x,
            y,
            Rgba([blend(pixel[0]), blend(pixel[1]), blend(pixel[2]), 255]),
        );
    }
    DynamicImage::ImageRgba8(flattened).to_rgb8()
}

fn encode_jpeg(image: &DynamicImage, quality: u32) -> image::ImageResult<Vec<u8>> {
    let rgb = flatten_onto_white(image);
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100) as u8).write_image(
        rgb.as_raw(),
        rgb.width(),
        rgb.height(),
        ExtendedColorType::Rgb8,
    )?;
    Ok(bytes)
}

fn encode_png(image: &DynamicImage, quality: u32) -> image::ImageResult<Vec<u8>> {
    let compression = match png_compression_level(quality) {
        0..=2 => CompressionType::Fast,
        3..=6 => CompressionType::Default,
        _ => CompressionType::Best,
    };
    let rgba = image.to_rgba8();
    let mut bytes = Vec::new();
    PngEncoder::new_with_quality(&mut bytes, compression, FilterType::Adaptive)
        .write_image(
            rgba.as_raw(),
            rgba.width(),
            rgba.height(),
            ExtendedColorType::Rgba8,
        )?;
    Ok(bytes)
}

/// Lossy libwebp encode; alpha is kept.
#[cfg(feature = "webp")]
fn encode_webp(image: &DynamicImage, quality: u32) -> image::ImageResult<Vec<u8>> {
    let rgba = image.to_rgba8();
    let encoded = webp::Encoder::from_rgba(rgba.as_raw(), rgba.width(), rgba.height())
        .encode_simple(false, quality as f32)
        .map_err(|err| {
            image::ImageError::Encoding(image::error::EncodingError::new(
                image::error::ImageFormatHint::Exact(image::ImageFormat::WebP),
                format!("libwebp: {err:?}"),
            ))
        })?;
    Ok(encoded.to_vec())
}

#[cfg(not(feature = "webp"))]
fn encode_webp(_image: &DynamicImage, _quality: u32) -> image::ImageResult<Vec<u8>> {
    Err(unsupported_encoder(image::ImageFormat::WebP))
}

#[cfg(feature = "avif")]
fn encode_avif(image: &DynamicImage, quality: u32) -> image::ImageResult<Vec<u8>> {
    use image::codecs::avif::AvifEncoder;

    let rgba = image.to_rgba8();
    let mut bytes = Vec::new();
    AvifEncoder::new_with_speed_quality(&mut bytes, 8, quality.clamp(1, 100) as u8).write_image(
        rgba.as_raw(),
        rgba.width(),
        rgba.height(),
        ExtendedColorType::Rgba8,
    )?;
    Ok(bytes)
}

#[cfg(not(feature = "avif"))]
fn encode_avif(_image: &DynamicImage, _quality: u32) -> image::ImageResult<Vec<u8>> {
    Err(unsupported_encoder(image::ImageFormat::Avif))
}

#[cfg(not(all(feature = "webp", feature = "avif")))]
fn unsupported_encoder(format: image::ImageFormat) -> image::ImageError {
    image::ImageError::Unsupported(image::error::UnsupportedError::from_format_and_kind(
        image::error::ImageFormatHint::Exact(format),
        image::error::UnsupportedErrorKind::Format(image::error::ImageFormatHint::Exact(format)),
    ))
}
