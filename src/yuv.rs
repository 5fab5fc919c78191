// yuv.rs — YUV420 camera frames and the fixed-point colour transform.
//
// PLANE ADDRESSING
// ────────────────
// A YUV420 frame is three byte planes. Luma is full resolution; both chroma
// planes are subsampled 2:1 on each axis:
//
//   Y  index = y · y_row_stride + x
//   UV index = uv_pixel_stride · (x / 2) + uv_row_stride · (y / 2)
//
// U and V share one chroma index. With `uv_pixel_stride == 2` the planes
// are interleaved views into one buffer (NV12: U first, NV21: V first);
// with `uv_pixel_stride == 1` they are separate planes (I420). Strides may
// exceed the logical width and are always honoured.
//
// COLOUR TRANSFORM
// ────────────────
// BT.601 full-range, in fixed point. Every coefficient is applied as
// `(c · k) / 2^n` with truncating integer division BEFORE the additions,
// which is what makes the output bit-exact with the camera preview path:
//
//   R = Y + V·1436/1024 − 179
//   G = Y − U·46549/131072 + 44 − V·93604/131072 + 91
//   B = Y + U·1814/1024 − 227
//
// Largest intermediate: 255 · 93604 ≈ 2.4e7, comfortably inside i32.

use crate::config::PlaneLayout;
use crate::error::{PipelineError, Result};
use crate::image::Rgba;
use crate::mapping::GridMap;

/// A borrowed YUV420 frame as delivered by the camera.
#[derive(Debug, Clone, Copy)]
pub struct YuvFrame<'a> {
    pub y: &'a [u8],
    pub u: &'a [u8],
    pub v: &'a [u8],
    pub layout: PlaneLayout,
    /// Sensor timestamp. Frames with a repeated timestamp are skipped by
    /// `FrameProcessor`.
    pub timestamp: i64,
}

impl<'a> YuvFrame<'a> {
    /// Frame from three explicit planes.
    pub fn new(y: &'a [u8], u: &'a [u8], v: &'a [u8], layout: PlaneLayout, timestamp: i64) -> Self {
        YuvFrame { y, u, v, layout, timestamp }
    }

    /// NV12: interleaved chroma, U first.
    ///
    /// `uv` must hold at least one byte; an empty chroma plane is a
    /// validation error, not a panic, so it is handled in `validate`.
    pub fn nv12(y: &'a [u8], uv: &'a [u8], layout: PlaneLayout, timestamp: i64) -> Self {
        let v = uv.get(1..).unwrap_or(&[]);
        YuvFrame { y, u: uv, v, layout, timestamp }
    }

    /// NV21: interleaved chroma, V first (Android camera default).
    pub fn nv21(y: &'a [u8], vu: &'a [u8], layout: PlaneLayout, timestamp: i64) -> Self {
        let u = vu.get(1..).unwrap_or(&[]);
        YuvFrame { y, u, v: vu, layout, timestamp }
    }

    /// Flat luma index for source pixel `(x, y)`.
    #[inline(always)]
    pub fn luma_index(&self, x: usize, y: usize) -> usize {
        y * self.layout.y_row_stride + x
    }

    /// Flat chroma index (shared by U and V) for source pixel `(x, y)`.
    #[inline(always)]
    pub fn chroma_index(&self, x: usize, y: usize) -> usize {
        self.layout.uv_pixel_stride * (x / 2) + self.layout.uv_row_stride * (y / 2)
    }

    /// Read the (Y, U, V) triple for source pixel `(x, y)`.
    ///
    /// # Panics
    /// Panics if the plane strides place the sample outside a plane; call
    /// [`YuvFrame::validate`] once per batch to rule that out.
    #[inline(always)]
    pub fn sample(&self, x: usize, y: usize) -> (u8, u8, u8) {
        let uv = self.chroma_index(x, y);
        (self.y[self.luma_index(x, y)], self.u[uv], self.v[uv])
    }

    /// Check that every read the conversion kernel will make for a
    /// `grid.preview_width × grid.preview_height` batch stays inside the
    /// planes.
    pub fn validate(&self, grid: &GridMap) -> Result<()> {
        let (w, h) = (grid.preview_width, grid.preview_height);
        if w == 0 || h == 0 {
            return Err(PipelineError::ZeroDimension { what: "preview" });
        }
        if self.layout.y_row_stride < w {
            return Err(PipelineError::StrideTooSmall {
                plane: "Y",
                stride: self.layout.y_row_stride,
                min: w,
            });
        }
        // Both indices are monotonic in x and y, so the far corner is the
        // largest read. Strides come from the camera; overflow means no
        // plane can be large enough.
        let l = &self.layout;
        let y_max = (h - 1)
            .checked_mul(l.y_row_stride)
            .and_then(|v| v.checked_add(w - 1))
            .unwrap_or(usize::MAX);
        if y_max >= self.y.len() {
            return Err(PipelineError::PlaneTooSmall {
                plane: "Y",
                required: y_max,
                actual: self.y.len(),
            });
        }
        let uv_max = l
            .uv_pixel_stride
            .checked_mul((w - 1) / 2)
            .zip(l.uv_row_stride.checked_mul((h - 1) / 2))
            .and_then(|(a, b)| a.checked_add(b))
            .unwrap_or(usize::MAX);
        for (plane, data) in [("U", self.u), ("V", self.v)] {
            if uv_max >= data.len() {
                return Err(PipelineError::PlaneTooSmall {
                    plane,
                    required: uv_max,
                    actual: data.len(),
                });
            }
        }
        Ok(())
    }
}

/// Convert one YUV triple to an opaque RGBA pixel.
#[inline(always)]
pub fn yuv_to_rgba(y: u8, u: u8, v: u8) -> Rgba {
    let (y, u, v) = (y as i32, u as i32, v as i32);
    let r = y + v * 1436 / 1024 - 179;
    let g = y - u * 46549 / 131072 + 44 - v * 93604 / 131072 + 91;
    let b = y + u * 1814 / 1024 - 227;
    Rgba::opaque(saturate(r), saturate(g), saturate(b))
}

#[inline(always)]
fn saturate(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}
