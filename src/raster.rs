//! Still-image decoding and letterboxing.
//!
//! [`RasterFitter`] scales a source image uniformly into a fixed canvas and
//! centres it on an opaque black background. [`canvas_dimensions`] derives
//! that canvas from the first image of a job.

use std::path::Path;

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageReader, Limits, Rgba, RgbaImage, RgbImage};

use crate::configuration::CanvasPolicy;
use crate::error::ReelError;

/// Read an image's dimensions from its header without decoding pixel data.
///
/// # Errors
///
/// [`ReelError::DecodeError`] if the file cannot be opened or its format is
/// not recognised.
pub fn probe_dimensions<P: AsRef<Path>>(path: P) -> Result<(u32, u32), ReelError> {
    let path = path.as_ref();
    image::image_dimensions(path)
        .map_err(|error| ReelError::DecodeError(format!("{}: {error}", path.display())))
}

/// Compute the video canvas for a source of `width × height` pixels.
///
/// The long edge is fixed to [`CanvasPolicy::long_edge`] and the short edge
/// keeps the aspect ratio (rounded to nearest). A square source is treated as
/// landscape. Both edges are then rounded down to even values and floored at
/// [`CanvasPolicy::min_edge`].
///
/// # Errors
///
/// [`ReelError::DecodeError`] if either dimension is zero.
pub fn canvas_dimensions(
    policy: &CanvasPolicy,
    width: u32,
    height: u32,
) -> Result<(u32, u32), ReelError> {
    if width == 0 || height == 0 {
        return Err(ReelError::DecodeError("invalid image dimensions".to_string()));
    }

    let aspect = width as f64 / height as f64;
    let long_edge = policy.long_edge;
    let (canvas_width, canvas_height) = if height > width {
        ((long_edge as f64 * aspect).round() as u32, long_edge)
    } else {
        (long_edge, (long_edge as f64 / aspect).round() as u32)
    };

    let canvas = (
        even_floor(even_floor(canvas_width).max(policy.min_edge)),
        even_floor(even_floor(canvas_height).max(policy.min_edge)),
    );
    log::debug!(
        "Canvas for {width}x{height} source: {}x{}",
        canvas.0,
        canvas.1
    );
    Ok(canvas)
}

fn even_floor(value: u32) -> u32 {
    value & !1
}

/// Largest power-of-two reduction that keeps a `source` raster at least as
/// large as `required` on both axes after halving.
///
/// Returns `1` when the source is already no larger than the requirement.
pub fn sample_size(source: (u32, u32), required: (u32, u32)) -> u32 {
    let (source_width, source_height) = source;
    let (required_width, required_height) = required;
    let mut factor = 1;

    if source_height > required_height || source_width > required_width {
        let half_height = source_height / 2;
        let half_width = source_width / 2;
        while half_height / factor >= required_height && half_width / factor >= required_width {
            factor *= 2;
        }
    }
    factor
}

/// Largest decoded raster [`RasterFitter::fit_path`] accepts by default, in
/// bytes (512 MiB).
pub const DEFAULT_MAX_DECODE_BYTES: u64 = 512 * 1024 * 1024;

/// Scales images uniformly into a fixed canvas.
///
/// # Example
///
/// ```
/// use image::{DynamicImage, RgbImage};
/// use reelmaker::RasterFitter;
///
/// let source = DynamicImage::ImageRgb8(RgbImage::new(1920, 1080));
/// let fitted = RasterFitter::new(1280, 720)?.fit_image(&source)?;
/// assert_eq!(fitted.dimensions(), (1280, 720));
/// # Ok::<(), reelmaker::ReelError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterFitter {
    width: u32,
    height: u32,
    max_decode_bytes: u64,
}

impl RasterFitter {
    /// A fitter producing `width × height` rasters.
    ///
    /// # Errors
    ///
    /// [`ReelError::InvalidInput`] if either dimension is zero.
    pub fn new(width: u32, height: u32) -> Result<Self, ReelError> {
        if width == 0 || height == 0 {
            return Err(ReelError::InvalidInput(format!(
                "canvas must be non-empty, got {width}x{height}"
            )));
        }
        Ok(Self {
            width,
            height,
            max_decode_bytes: DEFAULT_MAX_DECODE_BYTES,
        })
    }

    /// Refuse sources whose fully decoded RGBA raster would exceed `bytes`.
    #[must_use]
    pub fn with_max_decode_bytes(mut self, bytes: u64) -> Self {
        self.max_decode_bytes = bytes;
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Decode the image at `path` and fit it into the canvas.
    ///
    /// The header is checked first: a source whose decoded raster would
    /// exceed the decode limit is refused before any pixel data is read.
    /// The power-of-two pre-reduction in [`fit_image`](Self::fit_image) only
    /// runs after a full decode, so this limit is what bounds peak memory.
    ///
    /// # Errors
    ///
    /// [`ReelError::DecodeError`] if the file cannot be read or decoded,
    /// decodes to an empty raster, or exceeds the decode limit.
    pub fn fit_path<P: AsRef<Path>>(&self, path: P) -> Result<RgbImage, ReelError> {
        let path = path.as_ref();
        log::debug!("Fitting {} into {}x{}", path.display(), self.width, self.height);

        let decode_error =
            |error: &dyn std::fmt::Display| ReelError::DecodeError(format!("{}: {error}", path.display()));

        let (source_width, source_height) = probe_dimensions(path)?;
        let decoded_bytes = u64::from(source_width) * u64::from(source_height) * 4;
        if decoded_bytes > self.max_decode_bytes {
            return Err(decode_error(&format_args!(
                "{source_width}x{source_height} needs {decoded_bytes} bytes to decode, limit is {}",
                self.max_decode_bytes
            )));
        }

        let mut limits = Limits::default();
        limits.max_alloc = Some(self.max_decode_bytes);
        let mut reader = ImageReader::open(path)
            .map_err(|error| decode_error(&error))?
            .with_guessed_format()
            .map_err(|error| decode_error(&error))?;
        reader.limits(limits);
        let image = reader.decode().map_err(|error| decode_error(&error))?;

        self.fit_image(&image)
    }

    /// Fit an already decoded image into the canvas.
    ///
    /// Large sources are first reduced by a power-of-two factor with a
    /// box filter, then resampled to the exact fitted size with a triangle
    /// filter.
    ///
    /// # Errors
    ///
    /// [`ReelError::DecodeError`] if `image` has a zero dimension.
    pub fn fit_image(&self, image: &DynamicImage) -> Result<RgbImage, ReelError> {
        let (source_width, source_height) = (image.width(), image.height());
        if source_width == 0 || source_height == 0 {
            return Err(ReelError::DecodeError("invalid image dimensions".to_string()));
        }

        let (scaled_width, scaled_height) = self.scaled_size(source_width, source_height);

        let factor = sample_size(
            (source_width, source_height),
            (scaled_width, scaled_height),
        );
        let reduced;
        let working = if factor > 1 {
            log::trace!("Pre-reducing {source_width}x{source_height} by {factor}");
            reduced = image.thumbnail_exact(
                (source_width / factor).max(1),
                (source_height / factor).max(1),
            );
            &reduced
        } else {
            image
        };

        let scaled = if working.width() != scaled_width || working.height() != scaled_height {
            working
                .resize_exact(scaled_width, scaled_height, FilterType::Triangle)
                .to_rgba8()
        } else {
            working.to_rgba8()
        };

        let mut canvas = RgbaImage::from_pixel(self.width, self.height, Rgba([0, 0, 0, 255]));
        let left = (self.width - scaled_width) / 2;
        let top = (self.height - scaled_height) / 2;
        imageops::overlay(&mut canvas, &scaled, left as i64, top as i64);

        Ok(DynamicImage::ImageRgba8(canvas).to_rgb8())
    }

    /// Size of the source after uniform scaling to fit the canvas.
    fn scaled_size(&self, source_width: u32, source_height: u32) -> (u32, u32) {
        let scale = (self.width as f64 / source_width as f64)
            .min(self.height as f64 / source_height as f64);
        let width = ((source_width as f64 * scale).round() as u32).clamp(1, self.width);
        let height = ((source_height as f64 * scale).round() as u32).clamp(1, self.height);
        (width, height)
    }
}
