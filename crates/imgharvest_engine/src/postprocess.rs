use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use engine_logging::{engine_debug, engine_info, engine_warn};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader, Rgb, RgbImage, Rgba};
use imgharvest_core::ScrapeOptions;
use thiserror::Error;

use crate::extension::has_extension;
use crate::persist::{split_extension, AtomicFileWriter, PersistError, StagedFile};
use crate::ScrapeError;

/// Quality used when a WebP is converted to JPEG.
pub const CONVERTED_JPEG_QUALITY: u8 = 95;
/// Quality used when resizing a JPEG with no explicit quality.
pub const DEFAULT_RESIZE_QUALITY: u8 = 85;

#[derive(Debug, Error)]
pub enum PostProcessError {
    #[error("{0}")]
    Image(#[from] image::ImageError),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Persist(#[from] PersistError),
}

/// What the linked image codec can do. Probed once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageCodec {
    pub webp_decode: bool,
    pub jpeg_encode: bool,
}

impl ImageCodec {
    pub fn detect() -> Self {
        Self {
            webp_decode: ImageFormat::WebP.reading_enabled(),
            jpeg_encode: ImageFormat::Jpeg.writing_enabled(),
        }
    }

    pub fn can_convert_webp(&self) -> bool {
        self.webp_decode && self.jpeg_encode
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PostProcessSettings {
    pub convert_webp: bool,
    /// 0 keeps the encoder default.
    pub quality: u8,
    pub max_width: u32,
    pub max_height: u32,
}

impl PostProcessSettings {
    fn wants_compression(&self) -> bool {
        self.quality > 0 || self.max_width > 0 || self.max_height > 0
    }
}

impl From<&ScrapeOptions> for PostProcessSettings {
    fn from(options: &ScrapeOptions) -> Self {
        Self {
            convert_webp: options.convert_webp,
            quality: options.compression_quality,
            max_width: options.resize_width,
            max_height: options.resize_height,
        }
    }
}

/// Result of post-processing one saved file.
#[derive(Debug)]
pub struct ProcessedImage {
    /// Where the image lives now; differs from the input after a conversion.
    pub path: PathBuf,
    /// Set when WebP conversion was attempted and failed.
    pub conversion_error: Option<PostProcessError>,
}

#[derive(Debug, Clone)]
pub struct PostProcessor {
    settings: PostProcessSettings,
}

impl PostProcessor {
    /// Fails when conversion is requested but the codec cannot do it.
    pub fn new(settings: PostProcessSettings, codec: ImageCodec) -> Result<Self, ScrapeError> {
        if settings.convert_webp && !codec.can_convert_webp() {
            return Err(ScrapeError::Setup(
                "WebP conversion requested but the image codec cannot decode WebP or encode JPEG"
                    .to_string(),
            ));
        }
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &PostProcessSettings {
        &self.settings
    }

    /// Conversion first, then compression on whatever file results.
    /// Compression failures are logged and otherwise ignored.
    pub fn process(&self, path: &Path) -> ProcessedImage {
        let mut current = path.to_path_buf();
        let mut conversion_error = None;

        if self.settings.convert_webp && has_extension(&current, ".webp") {
            match convert_webp_to_jpeg(&current) {
                Ok(converted) => {
                    engine_info!("Converted {} -> {}", current.display(), converted.display());
                    current = converted;
                }
                Err(err) => {
                    engine_warn!("WebP conversion failed for {}: {}", current.display(), err);
                    conversion_error = Some(err);
                }
            }
        }

        if self.settings.wants_compression() {
            if let Err(err) = compress_in_place(&current, &self.settings) {
                engine_warn!("Compression failed for {}: {}", current.display(), err);
            }
        }

        ProcessedImage {
            path: current,
            conversion_error,
        }
    }
}

/// Writes `{stem}.jpg` (collision-suffixed) next to `path` and removes the
/// source. Transparency is flattened onto white.
pub fn convert_webp_to_jpeg(path: &Path) -> Result<PathBuf, PostProcessError> {
    let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    let rgb = flatten_onto_white(&image);
    let bytes = encode_jpeg(&rgb, CONVERTED_JPEG_QUALITY)?;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("image.webp");
    let stem = split_extension(filename).0;

    let mut staged = StagedFile::new_in(dir)?;
    staged.write_chunk(&bytes)?;
    let target = staged.commit(&format!("{stem}.jpg"))?;

    if let Err(err) = fs::remove_file(path) {
        engine_warn!("Could not remove {} after conversion: {}", path.display(), err);
    }
    Ok(target)
}

/// Resizes to fit the configured bounds and re-encodes in place. JPEGs take
/// the configured quality; other formats keep their encoder defaults.
pub fn compress_in_place(
    path: &Path,
    settings: &PostProcessSettings,
) -> Result<(), PostProcessError> {
    let reader = ImageReader::open(path)?.with_guessed_format()?;
    let format = reader
        .format()
        .or_else(|| ImageFormat::from_path(path).ok())
        .unwrap_or(ImageFormat::Jpeg);
    let image = reader.decode()?;

    let (width, height) = (image.width(), image.height());
    let (new_width, new_height) =
        bounded_dimensions(width, height, settings.max_width, settings.max_height);
    let resized = (new_width, new_height) != (width, height);
    let image = if resized {
        engine_debug!(
            "Resizing {} from {}x{} to {}x{}",
            path.display(),
            width,
            height,
            new_width,
            new_height
        );
        image.resize_exact(new_width, new_height, FilterType::Lanczos3)
    } else {
        image
    };

    let is_jpeg = has_extension(path, ".jpg") || has_extension(path, ".jpeg");
    let bytes = if is_jpeg {
        let quality = if settings.quality > 0 {
            settings.quality.clamp(1, 100)
        } else {
            DEFAULT_RESIZE_QUALITY
        };
        encode_jpeg(&image.to_rgb8(), quality)?
    } else if resized {
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, format)?;
        buffer.into_inner()
    } else {
        return Ok(());
    };

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("image.jpg");
    AtomicFileWriter::new(dir.to_path_buf()).write(filename, &bytes)?;
    Ok(())
}

/// Scales `(width, height)` to fit `max_width` first, then `max_height`,
/// keeping the aspect ratio with integer arithmetic. A zero bound is ignored
/// and neither side drops below 1.
pub fn bounded_dimensions(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    let (mut w, mut h) = (u64::from(width), u64::from(height));
    if w == 0 || h == 0 {
        return (width, height);
    }
    if max_width > 0 && w > u64::from(max_width) {
        h = (h * u64::from(max_width) / w).max(1);
        w = u64::from(max_width);
    }
    if max_height > 0 && h > u64::from(max_height) {
        w = (w * u64::from(max_height) / h).max(1);
        h = u64::from(max_height);
    }
    (w as u32, h as u32)
}

fn flatten_onto_white(image: &DynamicImage) -> RgbImage {
    let rgba = image.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let Rgba([r, g, b, a]) = *rgba.get_pixel(x, y);
        let alpha = u32::from(a);
        let blend = |c: u8| ((u32::from(c) * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}

fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let mut buffer = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
        encoder.encode_image(image)?;
    }
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn width_bound_applies_before_height_bound() {
        assert_eq!(bounded_dimensions(4000, 3000, 2000, 800), (1066, 800));
        assert_eq!(bounded_dimensions(4000, 1000, 2000, 800), (2000, 500));
    }

    #[test]
    fn zero_bounds_leave_size_alone() {
        assert_eq!(bounded_dimensions(640, 480, 0, 0), (640, 480));
        assert_eq!(bounded_dimensions(640, 480, 1280, 0), (640, 480));
    }

    #[test]
    fn extreme_ratios_keep_one_pixel() {
        assert_eq!(bounded_dimensions(10_000, 1, 100, 0), (100, 1));
        assert_eq!(bounded_dimensions(1, 10_000, 0, 100), (1, 100));
    }

    #[test]
    fn transparent_pixels_become_white() {
        let mut image = image::RgbaImage::new(2, 1);
        image.put_pixel(0, 0, Rgba([0, 0, 0, 0]));
        image.put_pixel(1, 0, Rgba([10, 20, 30, 255]));
        let flat = flatten_onto_white(&DynamicImage::ImageRgba8(image));
        assert_eq!(flat.get_pixel(0, 0), &Rgb([255, 255, 255]));
        assert_eq!(flat.get_pixel(1, 0), &Rgb([10, 20, 30]));
    }
}
