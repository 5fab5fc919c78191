// preprocess.rs — Colour conversion + tensor resample kernel.
//
// One invocation per preview pixel (x, y):
//
//   1. mirror      (xf, yf) = (W-1-x, H-1-y)      front camera orientation
//   2. sample      Y at (xf, yf), U/V at the 2:1 subsampled chroma index
//   3. convert     fixed-point BT.601 → opaque RGBA (yuv::yuv_to_rgba)
//   4. resample    (xt, yt) = (x·Tw/W, y·Th/H) on the UNMIRRORED coordinate,
//                  store rgb/255 at tensor[(xt + yt·Tw)·3 ..]
//   5. return      the RGBA pixel as preview(x, y)
//
// One pass over the grid produces both outputs; nothing is buffered beyond
// the two destination arrays.
//
// DRIVERS AND DETERMINISM
// ───────────────────────
// Step 4 is many-to-one whenever Tw < W or Th < H. `preprocess_frame` walks
// the grid row-major, so each tensor cell ends up holding the pixel with the
// largest flattened index that maps onto it.
//
// `preprocess_frame_par` cannot order its writes, so it splits the kernel:
// preview rows are converted in parallel (one writer per pixel), then each
// tensor cell is filled from the preview pixel that would have been the
// last sequential writer (mapping::GridMap::last_sources). The result is
// bit-identical to the sequential driver, and the GPU path does the same.

use rayon::prelude::*;

use crate::config::PipelineConfig;
use crate::error::{check_len, PipelineError, Result};
use crate::image::{Image, Rgba};
use crate::mapping::GridMap;
use crate::tensor::{TensorBuffer, TENSOR_CHANNELS};
use crate::yuv::{yuv_to_rgba, YuvFrame};

/// Immutable per-batch parameters of the conversion kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvertParams {
    pub grid: GridMap,
    /// Camera picture width. Reserved for plane addressing; the arithmetic
    /// below does not read it.
    pub pic_width: usize,
}

impl ConvertParams {
    pub fn new(cfg: &PipelineConfig) -> Self {
        ConvertParams {
            grid: GridMap::new(
                cfg.preview_width,
                cfg.preview_height,
                cfg.tensor_width,
                cfg.tensor_height,
            ),
            pic_width: cfg.pic_width,
        }
    }
}

// ---------------------------------------------------------------------------
// Per-pixel kernel
// ---------------------------------------------------------------------------

/// Convert preview pixel `(x, y)` and store its tensor cell.
///
/// Requires `x < preview_width`, `y < preview_height`, a frame that passed
/// [`YuvFrame::validate`] and a tensor slice of `Tw·Th·3` floats. Violations
/// panic on slice indexing; they are never reported as errors here.
#[inline]
pub fn convert_pixel(
    params: &ConvertParams,
    frame: &YuvFrame<'_>,
    x: usize,
    y: usize,
    tensor: &mut [f32],
) -> Rgba {
    let px = convert_mirrored(&params.grid, frame, x, y);
    let cell = params.grid.cell_index(x, y) * TENSOR_CHANNELS;
    tensor[cell..cell + TENSOR_CHANNELS].copy_from_slice(&normalize(px));
    px
}

/// Steps 1–3: the preview pixel at `(x, y)` without the tensor store.
#[inline(always)]
fn convert_mirrored(grid: &GridMap, frame: &YuvFrame<'_>, x: usize, y: usize) -> Rgba {
    let (xf, yf) = grid.mirror(x, y);
    let (luma, u, v) = frame.sample(xf, yf);
    yuv_to_rgba(luma, u, v)
}

/// RGB channels scaled to [0, 1]. Alpha is not part of the model input.
#[inline(always)]
pub fn normalize(px: Rgba) -> [f32; 3] {
    [
        px.r as f32 / 255.0,
        px.g as f32 / 255.0,
        px.b as f32 / 255.0,
    ]
}

// ---------------------------------------------------------------------------
// Frame drivers
// ---------------------------------------------------------------------------

/// Run the kernel over the whole preview grid in row-major order.
pub fn preprocess_frame(
    params: &ConvertParams,
    frame: &YuvFrame<'_>,
    preview: &mut Image<Rgba>,
    tensor: &mut TensorBuffer,
) -> Result<()> {
    check_batch(params, frame, preview, tensor)?;

    let tensor = tensor.as_mut_slice();
    for y in 0..params.grid.preview_height {
        let row = preview.row_mut(y);
        for (x, out) in row.iter_mut().enumerate() {
            *out = convert_pixel(params, frame, x, y, tensor);
        }
    }
    Ok(())
}

/// Parallel driver; output identical to [`preprocess_frame`].
pub fn preprocess_frame_par(
    params: &ConvertParams,
    frame: &YuvFrame<'_>,
    preview: &mut Image<Rgba>,
    tensor: &mut TensorBuffer,
) -> Result<()> {
    check_batch(params, frame, preview, tensor)?;

    let grid = params.grid;
    let width = grid.preview_width;
    let stride = preview.stride();
    preview
        .as_mut_slice()
        .par_chunks_mut(stride)
        .take(grid.preview_height)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, out) in row[..width].iter_mut().enumerate() {
                *out = convert_mirrored(&grid, frame, x, y);
            }
        });

    resample_tensor(&grid, preview, tensor);
    Ok(())
}

/// Fill every reachable tensor cell from its last-writer preview pixel.
///
/// Cells that no preview pixel maps onto (only possible when the tensor is
/// larger than the preview on some axis) are left untouched, exactly as the
/// per-pixel kernel leaves them.
pub(crate) fn resample_tensor(grid: &GridMap, preview: &Image<Rgba>, tensor: &mut TensorBuffer) {
    let (cols, rows) = grid.last_sources();
    let row_len = grid.tensor_width * TENSOR_CHANNELS;
    tensor
        .as_mut_slice()
        .par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(yt, trow)| {
            let Some(sy) = rows[yt] else { return };
            let prow = preview.row(sy);
            for (cell, src) in trow.chunks_exact_mut(TENSOR_CHANNELS).zip(&cols) {
                if let Some(sx) = *src {
                    cell.copy_from_slice(&normalize(prow[sx]));
                }
            }
        });
}

/// Validate everything the hot loop relies on, once per batch.
pub(crate) fn check_batch(
    params: &ConvertParams,
    frame: &YuvFrame<'_>,
    preview: &Image<Rgba>,
    tensor: &TensorBuffer,
) -> Result<()> {
    let g = &params.grid;
    if g.tensor_width == 0 || g.tensor_height == 0 {
        return Err(PipelineError::ZeroDimension { what: "tensor" });
    }
    frame.validate(g)?;
    if preview.width() != g.preview_width || preview.height() != g.preview_height {
        return Err(PipelineError::BufferSize {
            buffer: "preview",
            expected: g.preview_width * g.preview_height,
            actual: preview.width() * preview.height(),
        });
    }
    if tensor.width() != g.tensor_width || tensor.height() != g.tensor_height {
        return Err(PipelineError::BufferSize {
            buffer: "tensor",
            expected: g.tensor_width * g.tensor_height * TENSOR_CHANNELS,
            actual: tensor.width() * tensor.height() * TENSOR_CHANNELS,
        });
    }
    check_len("tensor", g.tensor_width * g.tensor_height * TENSOR_CHANNELS, tensor.as_slice().len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlaneLayout;

    /// 4×4 frame with a distinct luma value per pixel and neutral chroma.
    fn ramp_frame_planes() -> (Vec<u8>, Vec<u8>) {
        let y: Vec<u8> = (0..16).map(|i| 10 + i * 10).collect();
        let uv = vec![128u8; 8];
        (y, uv)
    }

    #[test]
    fn test_mirror_reads_opposite_corner() {
        let (y, uv) = ramp_frame_planes();
        let frame = YuvFrame::nv12(&y, &uv, PlaneLayout::semi_planar(4), 0);
        let params = ConvertParams::new(&PipelineConfig::new(4, 4, 2, 2));
        let mut tensor = vec![0.0; 2 * 2 * 3];

        // Pixel (0,0) must read source (3,3), whose luma is y[15].
        let px = convert_pixel(&params, &frame, 0, 0, &mut tensor);
        assert_eq!(px, yuv_to_rgba(y[15], 128, 128));
        // Pixel (3,3) reads source (0,0).
        let px = convert_pixel(&params, &frame, 3, 3, &mut tensor);
        assert_eq!(px, yuv_to_rgba(y[0], 128, 128));
    }

    #[test]
    fn test_tensor_cell_uses_unmirrored_coordinate() {
        let (y, uv) = ramp_frame_planes();
        let frame = YuvFrame::nv12(&y, &uv, PlaneLayout::semi_planar(4), 0);
        let params = ConvertParams::new(&PipelineConfig::new(4, 4, 2, 2));
        let mut tensor = vec![-1.0; 2 * 2 * 3];

        // (3, 0) → tensor cell (1, 0), flat offset 3.
        let px = convert_pixel(&params, &frame, 3, 0, &mut tensor);
        assert_eq!(&tensor[3..6], &normalize(px));
        // Other cells untouched.
        assert_eq!(&tensor[0..3], &[-1.0, -1.0, -1.0]);
        assert_eq!(&tensor[6..12], &[-1.0; 6]);
    }

    #[test]
    fn test_planar_chroma_layout() {
        // I420-style 2×2 frame: one chroma sample shared by all pixels.
        let y = [100u8; 4];
        let u = [90u8];
        let v = [200u8];
        let frame = YuvFrame::new(&y, &u, &v, PlaneLayout::planar(2), 0);
        let params = ConvertParams::new(&PipelineConfig::new(2, 2, 1, 1));
        let mut preview = Image::new(2, 2);
        let mut tensor = TensorBuffer::new(1, 1);
        preprocess_frame(&params, &frame, &mut preview, &mut tensor).unwrap();
        for (_, _, px) in preview.pixels() {
            assert_eq!(px, yuv_to_rgba(100, 90, 200));
        }
    }

    #[test]
    fn test_padded_y_rows_are_skipped() {
        // 2×2 preview, Y row stride 4 (two padding bytes per row set to 255).
        let y = [10u8, 20, 255, 255, 30, 40, 255, 255];
        let uv = [128u8, 128];
        let layout = PlaneLayout { y_row_stride: 4, uv_row_stride: 2, uv_pixel_stride: 2 };
        let frame = YuvFrame::nv12(&y, &uv, layout, 0);
        let params = ConvertParams::new(&PipelineConfig::new(2, 2, 1, 1));
        let mut preview = Image::new(2, 2);
        let mut tensor = TensorBuffer::new(1, 1);
        preprocess_frame(&params, &frame, &mut preview, &mut tensor).unwrap();
        // Mirrored: preview (0,0) ← source (1,1) = 40.
        assert_eq!(preview.get(0, 0).r, 40);
        assert_eq!(preview.get(1, 0).r, 30);
        assert_eq!(preview.get(0, 1).r, 20);
        assert_eq!(preview.get(1, 1).r, 10);
    }

    #[test]
    fn test_rejects_wrong_preview_size() {
        let (y, uv) = ramp_frame_planes();
        let frame = YuvFrame::nv12(&y, &uv, PlaneLayout::semi_planar(4), 0);
        let params = ConvertParams::new(&PipelineConfig::new(4, 4, 2, 2));
        let mut preview = Image::new(4, 3);
        let mut tensor = TensorBuffer::new(2, 2);
        let err = preprocess_frame(&params, &frame, &mut preview, &mut tensor).unwrap_err();
        assert!(matches!(err, PipelineError::BufferSize { buffer: "preview", .. }));
    }

    #[test]
    fn test_parallel_matches_sequential_on_odd_sizes() {
        // 7×5 preview → 3×2 tensor: uneven fan-in on both axes.
        let w = 7;
        let h = 5;
        let layout = PlaneLayout { y_row_stride: 9, uv_row_stride: 10, uv_pixel_stride: 2 };
        let y: Vec<u8> = (0..9 * h).map(|i| (i * 37 % 251) as u8).collect();
        let uv: Vec<u8> = (0..10 * 3).map(|i| (i * 53 % 241) as u8).collect();
        let frame = YuvFrame::nv21(&y, &uv, layout, 0);
        let params = ConvertParams::new(&PipelineConfig::new(w, h, 3, 2));

        let mut p_seq = Image::new(w, h);
        let mut t_seq = TensorBuffer::new(3, 2);
        preprocess_frame(&params, &frame, &mut p_seq, &mut t_seq).unwrap();

        let mut p_par = Image::new(w, h);
        let mut t_par = TensorBuffer::new(3, 2);
        preprocess_frame_par(&params, &frame, &mut p_par, &mut t_par).unwrap();

        assert_eq!(p_seq.as_slice(), p_par.as_slice());
        assert_eq!(t_seq.as_slice(), t_par.as_slice());
    }

    #[test]
    fn test_parallel_with_padded_preview_image() {
        let y = vec![77u8; 16];
        let uv = vec![128u8; 8];
        let frame = YuvFrame::nv12(&y, &uv, PlaneLayout::semi_planar(4), 0);
        let params = ConvertParams::new(&PipelineConfig::new(4, 4, 2, 2));
        let mut preview = Image::new_with_stride(4, 4, 6);
        let mut tensor = TensorBuffer::new(2, 2);
        preprocess_frame_par(&params, &frame, &mut preview, &mut tensor).unwrap();
        for (_, _, px) in preview.pixels() {
            assert_eq!(px, yuv_to_rgba(77, 128, 128));
        }
        // Padding untouched.
        assert_eq!(preview.as_slice()[4], Rgba::default());
    }
}
