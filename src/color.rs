//! Packed RGB to planar 4:2:0 conversion.
//!
//! Video encoders consume a full-resolution luma plane followed by two
//! quarter-resolution chroma planes (I420 layout: Y, then U, then V). The
//! transform uses BT.601 studio-swing integer coefficients:
//!
//! ```text
//! Y = ((  66 R + 129 G +  25 B + 128) >> 8) +  16
//! U = (( -38 R -  74 G + 112 B + 128) >> 8) + 128
//! V = (( 112 R -  94 G -  18 B + 128) >> 8) + 128
//! ```
//!
//! every result clamped to `[0, 255]`. Chroma is taken from the top-left
//! pixel of each 2×2 block.

use image::RgbImage;

/// A planar 4:2:0 raster in I420 layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanarFrame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PlanarFrame {
    /// Byte length of a planar 4:2:0 frame of the given size.
    pub fn byte_len(width: u32, height: u32) -> usize {
        let luma = width as usize * height as usize;
        let (chroma_width, chroma_height) = chroma_dimensions(width, height);
        luma + 2 * chroma_width * chroma_height
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// The whole frame: Y plane, then U plane, then V plane.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn luma(&self) -> &[u8] {
        &self.data[..self.luma_len()]
    }

    pub fn chroma_u(&self) -> &[u8] {
        let start = self.luma_len();
        &self.data[start..start + self.chroma_len()]
    }

    pub fn chroma_v(&self) -> &[u8] {
        let start = self.luma_len() + self.chroma_len();
        &self.data[start..]
    }

    fn luma_len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    fn chroma_len(&self) -> usize {
        let (chroma_width, chroma_height) = chroma_dimensions(self.width, self.height);
        chroma_width * chroma_height
    }
}

fn chroma_dimensions(width: u32, height: u32) -> (usize, usize) {
    (width.div_ceil(2) as usize, height.div_ceil(2) as usize)
}

#[inline]
fn clamp_channel(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

#[inline]
fn luma(r: i32, g: i32, b: i32) -> u8 {
    clamp_channel(((66 * r + 129 * g + 25 * b + 128) >> 8) + 16)
}

#[inline]
fn chroma(r: i32, g: i32, b: i32) -> (u8, u8) {
    let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
    let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
    (clamp_channel(u), clamp_channel(v))
}

/// Convert a tightly packed RGB24 buffer into a planar 4:2:0 frame.
///
/// # Panics
///
/// Panics if `rgb.len() != width * height * 3`. A mismatch is a caller bug,
/// not a recoverable condition.
pub fn rgb_to_planar(rgb: &[u8], width: u32, height: u32) -> PlanarFrame {
    let w = width as usize;
    let h = height as usize;
    assert_eq!(
        rgb.len(),
        w * h * 3,
        "packed RGB buffer does not match {width}x{height}"
    );

    let (chroma_width, chroma_height) = chroma_dimensions(width, height);
    let mut data = vec![0u8; PlanarFrame::byte_len(width, height)];
    let (y_plane, chroma_planes) = data.split_at_mut(w * h);
    let (u_plane, v_plane) = chroma_planes.split_at_mut(chroma_width * chroma_height);

    for (pixel, y) in rgb.chunks_exact(3).zip(y_plane.iter_mut()) {
        *y = luma(pixel[0] as i32, pixel[1] as i32, pixel[2] as i32);
    }

    for row in 0..chroma_height {
        for column in 0..chroma_width {
            let source = ((row * 2) * w + column * 2) * 3;
            let (u, v) = chroma(
                rgb[source] as i32,
                rgb[source + 1] as i32,
                rgb[source + 2] as i32,
            );
            let target = row * chroma_width + column;
            u_plane[target] = u;
            v_plane[target] = v;
        }
    }

    PlanarFrame {
        width,
        height,
        data,
    }
}

/// Convert an [`RgbImage`] into a planar 4:2:0 frame of the same size.
pub fn image_to_planar(image: &RgbImage) -> PlanarFrame {
    rgb_to_planar(image.as_raw(), image.width(), image.height())
}
