use std::fs;
use std::path::{Path, PathBuf};

use fast_image_resize::images::Image;
use fast_image_resize::{FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageReader, RgbImage};
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::progress::ProgressSink;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Extensions and MIME types of HEIC/HEIF files. No decoder for them is
/// linked, so such uploads are refused up front.
const HEIF_EXTENSIONS: [&str; 2] = ["heic", "heif"];
const HEIF_MIME_TYPES: [&str; 4] = ["image/heic", "image/heif", "image/heic-sequence", "image/heif-sequence"];
/// ISO-BMFF major brands of HEIC/HEIF files, read from bytes 8..12.
const HEIF_BRANDS: [&[u8; 4]; 8] = [b"heic", b"heix", b"hevc", b"hevx", b"heim", b"heis", b"mif1", b"msf1"];

#[derive(Debug, Clone)]
pub struct CompressConfig {
    /// Size budget of the first pass, in MB.
    pub max_size_mb: f64,
    /// Retry budget used after the detector refused the first upload.
    pub retry_size_mb: f64,
    pub quality: u8,
    pub quality_floor: u8,
    pub quality_step: u8,
    pub max_attempts: u32,
    /// Images above this many pixels are scaled down once before encoding.
    pub pixel_budget: u64,
}

impl Default for CompressConfig {
    fn default() -> Self {
        Self {
            max_size_mb: 5.0,
            retry_size_mb: 2.0,
            quality: 85,
            quality_floor: 20,
            quality_step: 20,
            max_attempts: 3,
            pixel_budget: 1920 * 1920,
        }
    }
}

/// What a compression pass produced.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressOutcome {
    /// Where the image lives after the pass. A re-encoded image is stored
    /// with a `.jpg` extension.
    pub path: PathBuf,
    /// Size of the file on disk after the pass.
    pub bytes: u64,
    pub original_bytes: u64,
    pub attempts: u32,
    /// Quality of the last encode.
    pub quality: u8,
    pub resized: bool,
    /// False when the original file was smaller than every re-encoding and
    /// was left untouched.
    pub rewritten: bool,
    pub width: u32,
    pub height: u32,
}

impl CompressOutcome {
    pub fn size_mb(&self) -> f64 {
        self.bytes as f64 / BYTES_PER_MB
    }
}

#[derive(Debug, Default)]
pub struct Compressor {
    pub config: CompressConfig,
}

impl Compressor {
    pub fn new(config: CompressConfig) -> Self {
        Self { config }
    }

    /// Re-encode the image at `path` as JPEG until it fits `max_size_mb`.
    /// The result replaces `path` under a `.jpg` extension.
    ///
    /// Runs at most `max_attempts` encodes, lowering the JPEG quality by
    /// `quality_step` down to `quality_floor`. Missing the budget is not an
    /// error: the smallest result is kept and its size returned. The file
    /// never grows.
    pub fn compress(
        &self,
        path: &Path,
        max_size_mb: f64,
        sink: &dyn ProgressSink,
    ) -> PipelineResult<CompressOutcome> {
        let cfg = &self.config;
        let original_bytes = fs::metadata(path)?.len();
        let budget = (max_size_mb.max(0.0) * BYTES_PER_MB) as u64;

        let mut rgb = ImageReader::open(path)?
            .with_guessed_format()?
            .decode()?
            .to_rgb8();
        sink.report(0.1);

        let pixels = rgb.width() as u64 * rgb.height() as u64;
        let resized = pixels > cfg.pixel_budget;
        if resized {
            rgb = self.downscale(rgb)?;
        }
        sink.report(0.25);

        let mut quality = cfg.quality.max(cfg.quality_floor);
        let mut attempts = 0;
        let mut last_quality = quality;
        let mut best: Option<Vec<u8>> = None;
        while attempts < cfg.max_attempts {
            attempts += 1;
            last_quality = quality;
            let encoded = encode_jpeg(&rgb, quality)?;
            let size = encoded.len() as u64;
            debug!(attempt = attempts, quality, size_mb = size as f64 / BYTES_PER_MB, "encoded candidate");

            if best.as_ref().is_none_or(|b| encoded.len() < b.len()) {
                best = Some(encoded);
            }
            sink.report(0.25 + 0.75 * attempts as f32 / cfg.max_attempts as f32);

            if size <= budget || quality <= cfg.quality_floor {
                break;
            }
            quality = quality.saturating_sub(cfg.quality_step).max(cfg.quality_floor);
        }

        let (path, bytes, rewritten) = match best {
            Some(encoded) if (encoded.len() as u64) < original_bytes => {
                let target = path.with_extension("jpg");
                fs::write(&target, &encoded)?;
                if target != path {
                    fs::remove_file(path)?;
                }
                (target, encoded.len() as u64, true)
            }
            _ => (path.to_path_buf(), original_bytes, false),
        };
        sink.report(1.0);

        Ok(CompressOutcome {
            path,
            bytes,
            original_bytes,
            attempts,
            quality: last_quality,
            resized,
            rewritten,
            width: rgb.width(),
            height: rgb.height(),
        })
    }

    /// Scale down uniformly so the pixel count fits the budget.
    fn downscale(&self, src: RgbImage) -> PipelineResult<RgbImage> {
        let (width, height) = src.dimensions();
        let ratio = (self.config.pixel_budget as f64 / (width as f64 * height as f64)).sqrt();
        let new_width = ((width as f64 * ratio) as u32).max(1);
        let new_height = ((height as f64 * ratio) as u32).max(1);

        let src = DynamicImage::ImageRgb8(src);
        let mut dst_image = Image::new(new_width, new_height, PixelType::U8x3);
        let resize_options =
            ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Lanczos3));
        Resizer::new()
            .resize(&src, &mut dst_image, &resize_options)
            .map_err(|e| PipelineError::Resize(e.to_string()))?;

        RgbImage::from_raw(new_width, new_height, dst_image.buffer().to_vec())
            .ok_or_else(|| PipelineError::Resize("resized buffer has unexpected length".into()))
    }
}

fn encode_jpeg(img: &RgbImage, quality: u8) -> PipelineResult<Vec<u8>> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality).encode_image(img)?;
    Ok(buf)
}

/// Refuse uploads no linked decoder can read, judged by name, declared type
/// and content.
pub fn check_supported_format(filename: &str, content_type: Option<&str>, data: &[u8]) -> PipelineResult<()> {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    let heif_ext = ext.as_deref().is_some_and(|e| HEIF_EXTENSIONS.contains(&e));
    let heif_mime = content_type
        .map(|m| m.to_ascii_lowercase())
        .is_some_and(|m| HEIF_MIME_TYPES.contains(&m.as_str()));
    if heif_ext || heif_mime || is_heif_content(data) {
        return Err(PipelineError::UnsupportedFormat(
            "HEIC/HEIF images are not supported; please upload JPEG or PNG".into(),
        ));
    }
    Ok(())
}

/// ISO-BMFF files open with a box size followed by `ftyp` and the major brand.
fn is_heif_content(data: &[u8]) -> bool {
    match data.get(4..12) {
        Some(head) => &head[..4] == b"ftyp" && HEIF_BRANDS.iter().any(|b| &head[4..] == b.as_slice()),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use std::cell::RefCell;

    /// Deterministic noise, which JPEG cannot squeeze much.
    fn noise_image(width: u32, height: u32) -> RgbImage {
        let mut state = 0x2545_f491_u32;
        RgbImage::from_fn(width, height, |_, _| {
            let mut next = || {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                (state >> 24) as u8
            };
            image::Rgb([next(), next(), next()])
        })
    }

    fn write_png(dir: &Path, img: &RgbImage) -> std::path::PathBuf {
        let path = dir.join("sample.png");
        img.save(&path).unwrap();
        path
    }

    #[test]
    fn fits_on_first_attempt_and_never_grows() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), &noise_image(96, 64));
        let compressor = Compressor::default();

        let out = compressor.compress(&path, 5.0, &NoProgress).unwrap();
        assert_eq!(out.attempts, 1);
        assert_eq!(out.quality, 85);
        assert!(!out.resized);
        assert!(out.bytes <= out.original_bytes);
        assert_eq!(fs::metadata(&out.path).unwrap().len(), out.bytes);
    }

    #[test]
    fn rewritten_uploads_carry_a_jpeg_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), &noise_image(128, 128));

        let out = Compressor::default().compress(&path, 5.0, &NoProgress).unwrap();
        assert!(out.rewritten);
        assert_eq!(out.path, dir.path().join("sample.jpg"));
        assert!(!path.exists());
        assert_eq!(image::ImageFormat::from_path(&out.path).unwrap(), image::ImageFormat::Jpeg);
        assert_eq!(image::image_dimensions(&out.path).unwrap(), (128, 128));
    }

    #[test]
    fn untouched_uploads_keep_their_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), &RgbImage::new(16, 16));

        let out = Compressor::default().compress(&path, 5.0, &NoProgress).unwrap();
        assert!(!out.rewritten);
        assert_eq!(out.path, path);
        assert!(path.exists());
    }

    #[test]
    fn missing_the_budget_stops_after_bounded_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), &noise_image(128, 128));
        let compressor = Compressor::default();

        let out = compressor.compress(&path, 0.0001, &NoProgress).unwrap();
        assert_eq!(out.attempts, 3);
        assert_eq!(out.quality, 45);
        assert!(out.bytes <= out.original_bytes);
    }

    #[test]
    fn quality_floor_ends_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), &noise_image(64, 64));
        let compressor = Compressor::new(CompressConfig {
            quality: 30,
            ..CompressConfig::default()
        });

        let out = compressor.compress(&path, 0.0001, &NoProgress).unwrap();
        assert_eq!(out.attempts, 2);
        assert_eq!(out.quality, 20);
    }

    #[test]
    fn oversized_images_are_scaled_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), &noise_image(200, 100));
        let compressor = Compressor::new(CompressConfig {
            pixel_budget: 100 * 100,
            ..CompressConfig::default()
        });

        let out = compressor.compress(&path, 5.0, &NoProgress).unwrap();
        assert!(out.resized);
        assert_eq!((out.width, out.height), (141, 70));
        assert!(out.width as u64 * out.height as u64 <= 100 * 100);
    }

    #[test]
    fn progress_is_monotonic_and_ends_at_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), &noise_image(64, 64));
        let seen = RefCell::new(Vec::new());
        let sink = |f: f32| seen.borrow_mut().push(f);

        Compressor::default().compress(&path, 0.0001, &sink).unwrap();
        let seen = seen.into_inner();
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(seen.last().copied(), Some(1.0));
    }

    #[test]
    fn undecodable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        fs::write(&path, b"definitely not an image").unwrap();
        assert!(Compressor::default().compress(&path, 5.0, &NoProgress).is_err());
    }

    #[test]
    fn heif_uploads_are_refused() {
        let jpeg = [0xff, 0xd8, 0xff, 0xe0, 0, 0x10, b'J', b'F', b'I', b'F', 0, 1];
        assert!(check_supported_format("kernels.HEIC", None, &jpeg).is_err());
        assert!(check_supported_format("kernels.bin", Some("image/heif"), &jpeg).is_err());
        assert!(check_supported_format("kernels.jpg", Some("image/jpeg"), &jpeg).is_ok());
        assert!(check_supported_format("kernels", None, &[]).is_ok());
    }

    #[test]
    fn heif_content_is_refused_whatever_the_name() {
        let mut heic = vec![0, 0, 0, 0x18];
        heic.extend_from_slice(b"ftypheic");
        heic.extend_from_slice(&[0; 8]);
        assert!(check_supported_format("kernels.jpg", Some("image/jpeg"), &heic).is_err());

        let mut mif1 = vec![0, 0, 0, 0x1c];
        mif1.extend_from_slice(b"ftypmif1");
        assert!(check_supported_format("kernels.png", None, &mif1).is_err());

        // Other ISO-BMFF brands are not HEIF.
        let mut mp4 = vec![0, 0, 0, 0x18];
        mp4.extend_from_slice(b"ftypisom");
        assert!(check_supported_format("clip.jpg", None, &mp4).is_ok());
        assert!(check_supported_format("short.jpg", None, b"ftyp").is_ok());
    }
}
