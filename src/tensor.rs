// tensor.rs — Flat float buffers at tensor resolution.
//
//   TensorBuffer   Tw × Th × 3, channel-minor, row-major, R G B order.
//                  Written by the conversion kernel, read by inference.
//   InferenceMask  Tw × Th, one confidence per cell.
//                  Written by inference, read by the compositing kernel.
//
// Neither type is strided: both are handed verbatim to a model runtime,
// which expects dense NHWC data.

use crate::error::{check_len, Result};

/// Number of interleaved channels per tensor cell.
pub const TENSOR_CHANNELS: usize = 3;

/// Normalised RGB model input.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorBuffer {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl TensorBuffer {
    /// Zero-filled tensor.
    pub fn new(width: usize, height: usize) -> Self {
        TensorBuffer { width, height, data: vec![0.0; width * height * TENSOR_CHANNELS] }
    }

    /// Wrap an existing buffer; its length must be `width * height * 3`.
    pub fn from_vec(width: usize, height: usize, data: Vec<f32>) -> Result<Self> {
        check_len("tensor", width * height * TENSOR_CHANNELS, data.len())?;
        Ok(TensorBuffer { width, height, data })
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// The three channel values of cell `(x, y)`.
    #[inline]
    pub fn rgb(&self, x: usize, y: usize) -> [f32; 3] {
        let base = (x + y * self.width) * TENSOR_CHANNELS;
        [self.data[base], self.data[base + 1], self.data[base + 2]]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }
}

/// Per-cell foreground confidence produced by the segmentation model.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceMask {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl InferenceMask {
    /// All-zero mask (everything background).
    pub fn new(width: usize, height: usize) -> Self {
        InferenceMask { width, height, data: vec![0.0; width * height] }
    }

    /// Wrap an existing buffer; its length must be `width * height`.
    pub fn from_vec(width: usize, height: usize, data: Vec<f32>) -> Result<Self> {
        check_len("mask", width * height, data.len())?;
        Ok(InferenceMask { width, height, data })
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn confidence(&self, x: usize, y: usize) -> f32 {
        self.data[x + y * self.width]
    }

    /// Replace the whole mask from a model output slice.
    pub fn copy_from(&mut self, src: &[f32]) -> Result<()> {
        check_len("mask", self.data.len(), src.len())?;
        self.data.copy_from_slice(src);
        Ok(())
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;

    #[test]
    fn test_tensor_layout_channel_minor() {
        let data: Vec<f32> = (0..12).map(|v| v as f32).collect();
        let t = TensorBuffer::from_vec(2, 2, data).unwrap();
        assert_eq!(t.rgb(0, 0), [0.0, 1.0, 2.0]);
        assert_eq!(t.rgb(1, 0), [3.0, 4.0, 5.0]);
        assert_eq!(t.rgb(0, 1), [6.0, 7.0, 8.0]);
    }

    #[test]
    fn test_tensor_wrong_len() {
        let err = TensorBuffer::from_vec(2, 2, vec![0.0; 11]).unwrap_err();
        assert!(matches!(err, PipelineError::BufferSize { buffer: "tensor", expected: 12, actual: 11 }));
    }

    #[test]
    fn test_mask_copy_from() {
        let mut m = InferenceMask::new(2, 1);
        m.copy_from(&[0.25, 0.75]).unwrap();
        assert_eq!(m.confidence(1, 0), 0.75);
        assert!(m.copy_from(&[1.0]).is_err());
    }
}
