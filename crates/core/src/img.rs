//! Image decoding, filtering and re-encoding.
//!
//! An [`Image`] is loaded from raw bytes, transformed by an ordered list of
//! [`Filter`]s and encoded back. The [`Transcoder`] runs that work on the
//! blocking pool under a small concurrency cap; clones share that cap, so
//! one transcoder handed to every extraction bounds image work process-wide.
//!
//! ```rust,no_run
//! use scrapbook_core::img::{Filter, Image};
//!
//! # fn run(bytes: &[u8]) -> scrapbook_core::Result<()> {
//! let mut image = Image::load(bytes)?;
//! image.pipeline(&[Filter::Fit(800, 800), Filter::Format("png".into())])?;
//! let encoded = image.encode()?;
//! assert_eq!(encoded.format, "png");
//! # Ok(())
//! # }
//! ```

use std::io::Cursor;
use std::sync::Arc;

use image::codecs::gif::GifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::{ColorMap, FilterType};
use image::{DynamicImage, Frame, ImageFormat, ImageReader, Luma};
use tokio::sync::Semaphore;
use tracing::debug;

use crate::{Result, ScrapbookError};

/// Images above this many pixels are refused before their data is decoded.
pub const MAX_PIXELS: u64 = 30_000_000;

/// Default JPEG quality.
pub const DEFAULT_QUALITY: u8 = 80;

/// Default number of concurrent transcodings.
pub const DEFAULT_TRANSCODE_PERMITS: usize = 2;

/// PNG compression level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Compression {
    #[default]
    Fast,
    Best,
}

/// One transformation step.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// JPEG quality (1-100).
    Quality(u8),
    /// PNG compression level.
    Compression(Compression),
    /// Output format: `gif`, `png` or `jpeg`. Anything else encodes as
    /// JPEG and an empty value keeps the source format.
    Format(String),
    /// Scale down to fit in the given box, keeping the aspect ratio.
    Fit(u32, u32),
    Grayscale,
    /// Reduce to 16 gray levels with error diffusion.
    Gray16,
}

/// An encoded image and the format it was encoded to.
#[derive(Debug, Clone)]
pub struct Encoded {
    pub bytes: Vec<u8>,
    pub format: String,
    pub width: u32,
    pub height: u32,
}

/// A decoded image with its encoding options.
#[derive(Debug, Clone)]
pub struct Image {
    image: DynamicImage,
    format: String,
    enc_format: String,
    quality: u8,
    compression: Compression,
}

impl Image {
    /// Decode an image.
    ///
    /// # Errors
    ///
    /// Returns [`ScrapbookError::ImageError`] when the format is unknown, the
    /// data is invalid, or the image is larger than [`MAX_PIXELS`].
    pub fn load(bytes: &[u8]) -> Result<Self> {
        let (w, h) = reader(bytes)?.into_dimensions()?;
        if u64::from(w) * u64::from(h) > MAX_PIXELS {
            return Err(ScrapbookError::ImageError(format!("image is too big ({w}x{h})")));
        }

        let reader = reader(bytes)?;
        let format = reader.format().map(format_name).unwrap_or_default().to_string();
        let image = reader.decode()?;

        Ok(Self { image, format, enc_format: String::new(), quality: DEFAULT_QUALITY, compression: Compression::Fast })
    }

    /// The source format name (`jpeg`, `png`, ...).
    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Apply filters in order, stopping at the first failure.
    pub fn pipeline(&mut self, filters: &[Filter]) -> Result<()> {
        for filter in filters {
            self.apply(filter)?;
        }
        Ok(())
    }

    fn apply(&mut self, filter: &Filter) -> Result<()> {
        match filter {
            Filter::Quality(q) => {
                if *q == 0 || *q > 100 {
                    return Err(ScrapbookError::ImageError(format!("invalid quality {q}")));
                }
                self.quality = *q;
            }
            Filter::Compression(c) => self.compression = *c,
            Filter::Format(f) => self.enc_format = f.to_lowercase(),
            Filter::Fit(w, h) => self.fit(*w, *h),
            Filter::Grayscale => self.image = self.image.grayscale(),
            Filter::Gray16 => {
                let mut gray = self.image.to_luma8();
                image::imageops::dither(&mut gray, &Gray16);
                self.image = DynamicImage::ImageLuma8(gray);
            }
        }
        Ok(())
    }

    /// Resize to fit in `w` x `h`. Never enlarges an image that is already
    /// smaller than the box on both sides.
    pub fn fit(&mut self, w: u32, h: u32) {
        let (ow, oh) = (self.width(), self.height());
        if (w > ow && h > oh) || w == 0 || h == 0 || ow == 0 || oh == 0 {
            return;
        }

        let src_ratio = f64::from(ow) / f64::from(oh);
        let max_ratio = f64::from(w) / f64::from(h);
        let (nw, nh) = if src_ratio > max_ratio {
            (w, (f64::from(w) / src_ratio) as u32)
        } else {
            ((f64::from(h) * src_ratio) as u32, h)
        };
        let (nw, nh) = (nw.clamp(1, ow), nh.clamp(1, oh));
        if (nw, nh) != (ow, oh) {
            self.image = self.image.resize_exact(nw, nh, FilterType::Lanczos3);
        }
    }

    /// Encode with the current options.
    pub fn encode(&self) -> Result<Encoded> {
        let target = if self.enc_format.is_empty() { self.format.as_str() } else { self.enc_format.as_str() };
        let mut bytes = Vec::new();

        let format = match target {
            "gif" => {
                let mut encoder = GifEncoder::new(&mut bytes);
                encoder.encode_frame(Frame::new(self.image.to_rgba8()))?;
                "gif"
            }
            "png" => {
                let level = match self.compression {
                    Compression::Fast => CompressionType::Fast,
                    Compression::Best => CompressionType::Best,
                };
                let encoder = PngEncoder::new_with_quality(&mut bytes, level, PngFilter::Adaptive);
                self.image.write_with_encoder(encoder)?;
                "png"
            }
            _ => {
                let encoder = JpegEncoder::new_with_quality(&mut bytes, self.quality);
                match &self.image {
                    DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => self.image.write_with_encoder(encoder)?,
                    other => DynamicImage::ImageRgb8(other.to_rgb8()).write_with_encoder(encoder)?,
                }
                "jpeg"
            }
        };

        Ok(Encoded { bytes, format: format.to_string(), width: self.width(), height: self.height() })
    }
}

/// Runs image work on the blocking pool, a few images at a time.
///
/// Clones share the same permits.
#[derive(Debug, Clone)]
pub struct Transcoder {
    permits: Arc<Semaphore>,
}

impl Transcoder {
    pub fn new(permits: usize) -> Self {
        Self { permits: Arc::new(Semaphore::new(permits.max(1))) }
    }

    /// Whether `other` draws from the same permits.
    pub fn shares_permits(&self, other: &Transcoder) -> bool {
        Arc::ptr_eq(&self.permits, &other.permits)
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Decode `bytes`, apply `filters` and encode the result.
    pub async fn transcode(&self, bytes: Vec<u8>, filters: Vec<Filter>) -> Result<Encoded> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| ScrapbookError::ImageError(e.to_string()))?;

        let len = bytes.len();
        let encoded = tokio::task::spawn_blocking(move || {
            let mut image = Image::load(&bytes)?;
            image.pipeline(&filters)?;
            image.encode()
        })
        .await
        .map_err(|e| ScrapbookError::ImageError(e.to_string()))??;

        debug!(input = len, output = encoded.bytes.len(), format = %encoded.format, "image transcoded");
        Ok(encoded)
    }
}

impl Default for Transcoder {
    fn default() -> Self {
        Self::new(DEFAULT_TRANSCODE_PERMITS)
    }
}

/// Sniff the format of image bytes, returning its short name.
pub fn sniff_format(bytes: &[u8]) -> Option<&'static str> {
    image::guess_format(bytes).ok().map(format_name)
}

fn reader(bytes: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    if reader.format().is_none() {
        return Err(ScrapbookError::ImageError("unknown image format".to_string()));
    }
    Ok(reader)
}

fn format_name(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => "jpeg",
        ImageFormat::Png => "png",
        ImageFormat::Gif => "gif",
        ImageFormat::WebP => "webp",
        ImageFormat::Bmp => "bmp",
        ImageFormat::Ico => "ico",
        ImageFormat::Tiff => "tiff",
        _ => "",
    }
}

/// Sixteen evenly spaced gray levels.
struct Gray16;

impl ColorMap for Gray16 {
    type Color = Luma<u8>;

    fn index_of(&self, color: &Luma<u8>) -> usize {
        ((u16::from(color.0[0]) + 8) / 17) as usize
    }

    fn map_color(&self, color: &mut Luma<u8>) {
        color.0[0] = (self.index_of(color) * 17) as u8;
    }
}
