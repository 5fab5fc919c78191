// config.rs — Pipeline configuration.
//
// Two kinds of configuration exist:
//
//   PipelineConfig — fixed for a session: preview and tensor resolution,
//                    execution mode. Loaded once, validated once.
//   PlaneLayout    — per frame: the camera HAL may hand out planes with
//                    different strides from one frame to the next, so the
//                    layout travels with the frame (see yuv::YuvFrame).
//
// The kernels never see either type directly. Each batch builds an
// immutable `ConvertParams` / `CompositeParams` value from them and passes
// it by reference to every per-pixel invocation.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// How the CPU frame drivers iterate the pixel grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Execution {
    /// Row-major, single thread.
    #[default]
    Sequential,
    /// Rows split across the rayon thread pool.
    Parallel,
}

/// Session-wide dimensions shared read-only by every kernel invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Preview (camera) width in pixels.
    pub preview_width: usize,
    /// Preview (camera) height in pixels.
    pub preview_height: usize,
    /// Model input width in tensor cells.
    pub tensor_width: usize,
    /// Model input height in tensor cells.
    pub tensor_height: usize,
    /// Picture width reported by the camera. Carried through to the
    /// conversion parameters but not used by the arithmetic.
    pub pic_width: usize,
    /// CPU iteration strategy.
    pub execution: Execution,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            preview_width: 1280,
            preview_height: 720,
            tensor_width: 256,
            tensor_height: 144,
            pic_width: 1280,
            execution: Execution::Sequential,
        }
    }
}

impl PipelineConfig {
    /// Config with the given preview and tensor sizes; `pic_width` follows
    /// the preview width.
    pub fn new(
        preview_width: usize,
        preview_height: usize,
        tensor_width: usize,
        tensor_height: usize,
    ) -> Self {
        PipelineConfig {
            preview_width,
            preview_height,
            tensor_width,
            tensor_height,
            pic_width: preview_width,
            execution: Execution::Sequential,
        }
    }

    /// Builder-style execution override.
    pub fn with_execution(mut self, execution: Execution) -> Self {
        self.execution = execution;
        self
    }

    /// Parse a JSON document. Missing fields take their default values.
    pub fn from_json_str(src: &str) -> Result<Self> {
        let cfg: PipelineConfig =
            serde_json::from_str(src).map_err(|e| PipelineError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read and parse a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let src = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&src)
    }

    /// Reject zero dimensions.
    pub fn validate(&self) -> Result<()> {
        let dims = [
            ("preview_width", self.preview_width),
            ("preview_height", self.preview_height),
            ("tensor_width", self.tensor_width),
            ("tensor_height", self.tensor_height),
        ];
        for (what, v) in dims {
            if v == 0 {
                return Err(PipelineError::ZeroDimension { what });
            }
        }
        Ok(())
    }

    /// Number of tensor cells (one mask value each, three tensor floats each).
    #[inline]
    pub fn tensor_cells(&self) -> usize {
        self.tensor_width * self.tensor_height
    }
}

/// Per-frame plane strides as reported by the camera.
///
/// `uv_pixel_stride` is 2 for interleaved (NV12/NV21-style) chroma and 1
/// for fully planar (I420-style) chroma.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaneLayout {
    /// Bytes between consecutive rows of the Y plane.
    pub y_row_stride: usize,
    /// Bytes between consecutive chroma rows.
    pub uv_row_stride: usize,
    /// Bytes between consecutive chroma samples within a row.
    pub uv_pixel_stride: usize,
}

impl PlaneLayout {
    /// Tightly packed semi-planar layout (interleaved chroma) for a frame of
    /// the given width.
    pub fn semi_planar(width: usize) -> Self {
        let chroma_w = width.div_ceil(2);
        PlaneLayout {
            y_row_stride: width,
            uv_row_stride: chroma_w * 2,
            uv_pixel_stride: 2,
        }
    }

    /// Tightly packed planar layout (separate U and V planes).
    pub fn planar(width: usize) -> Self {
        PlaneLayout {
            y_row_stride: width,
            uv_row_stride: width.div_ceil(2),
            uv_pixel_stride: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let cfg = PipelineConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.pic_width, cfg.preview_width);
        assert_eq!(cfg.tensor_cells(), 256 * 144);
    }

    #[test]
    fn test_zero_dimension_rejected() {
        let cfg = PipelineConfig::new(640, 480, 0, 10);
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, PipelineError::ZeroDimension { what: "tensor_width" }));
    }

    #[test]
    fn test_json_partial_document() {
        let cfg = PipelineConfig::from_json_str(
            r#"{ "preview_width": 640, "preview_height": 480, "execution": "parallel" }"#,
        )
        .unwrap();
        assert_eq!(cfg.preview_width, 640);
        assert_eq!(cfg.preview_height, 480);
        // Unspecified fields fall back to defaults.
        assert_eq!(cfg.tensor_width, 256);
        assert_eq!(cfg.execution, Execution::Parallel);
    }

    #[test]
    fn test_json_rejects_garbage() {
        let err = PipelineConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_json_rejects_zero() {
        let err = PipelineConfig::from_json_str(r#"{ "tensor_height": 0 }"#).unwrap_err();
        assert!(matches!(err, PipelineError::ZeroDimension { what: "tensor_height" }));
    }

    #[test]
    fn test_layouts() {
        let sp = PlaneLayout::semi_planar(7);
        assert_eq!(sp.uv_row_stride, 8);
        assert_eq!(sp.uv_pixel_stride, 2);
        let p = PlaneLayout::planar(7);
        assert_eq!(p.uv_row_stride, 4);
        assert_eq!(p.uv_pixel_stride, 1);
    }
}
