// composite.rs — Mask-driven compositing kernel.
//
// One invocation per preview pixel (x, y):
//
//   1. (xm, ym) = (x·Tw/W, y·Th/H)            same downscale as preprocess
//   2. c        = mask[xm + ym·Tw]
//   3. out      = c > 0.5 ? sharp(x, y) : blurred(x, y)
//
// A hard binary selection. The comparison is strict, so a confidence of
// exactly 0.5 keeps the blurred pixel. NaN compares false and therefore
// also selects blur.
//
// Every output pixel has exactly one writer, so both drivers are race-free
// and produce identical output.

use rayon::prelude::*;

use crate::config::PipelineConfig;
use crate::error::{check_len, PipelineError, Result};
use crate::image::{Image, Rgba};
use crate::mapping::GridMap;
use crate::tensor::InferenceMask;

/// Confidence above which a pixel is treated as subject (kept sharp).
pub const MASK_THRESHOLD: f32 = 0.5;

/// Immutable per-batch parameters of the compositing kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositeParams {
    pub grid: GridMap,
}

impl CompositeParams {
    pub fn new(cfg: &PipelineConfig) -> Self {
        CompositeParams {
            grid: GridMap::new(
                cfg.preview_width,
                cfg.preview_height,
                cfg.tensor_width,
                cfg.tensor_height,
            ),
        }
    }
}

/// Whether a mask confidence selects the sharp pixel.
#[inline(always)]
pub fn is_subject(confidence: f32) -> bool {
    confidence > MASK_THRESHOLD
}

/// Composite one pixel.
///
/// `sharp` is the preview pixel at `(x, y)`; `mask` is the flat `Tw·Th`
/// confidence buffer. Out-of-range coordinates panic on indexing.
#[inline]
pub fn composite_pixel(
    params: &CompositeParams,
    x: usize,
    y: usize,
    sharp: Rgba,
    mask: &[f32],
    blurred: &Image<Rgba>,
) -> Rgba {
    if is_subject(mask[params.grid.cell_index(x, y)]) {
        sharp
    } else {
        blurred.get(x, y)
    }
}

/// Row-major driver.
pub fn composite_frame(
    params: &CompositeParams,
    preview: &Image<Rgba>,
    mask: &InferenceMask,
    blurred: &Image<Rgba>,
    output: &mut Image<Rgba>,
) -> Result<()> {
    check_batch(params, preview, mask, blurred, output)?;

    let mask = mask.as_slice();
    for y in 0..params.grid.preview_height {
        let sharp_row = preview.row(y);
        let out_row = output.row_mut(y);
        for (x, (out, &sharp)) in out_row.iter_mut().zip(sharp_row).enumerate() {
            *out = composite_pixel(params, x, y, sharp, mask, blurred);
        }
    }
    Ok(())
}

/// Parallel driver; rows are distributed over the rayon pool.
pub fn composite_frame_par(
    params: &CompositeParams,
    preview: &Image<Rgba>,
    mask: &InferenceMask,
    blurred: &Image<Rgba>,
    output: &mut Image<Rgba>,
) -> Result<()> {
    check_batch(params, preview, mask, blurred, output)?;

    let mask = mask.as_slice();
    let width = params.grid.preview_width;
    let stride = output.stride();
    output
        .as_mut_slice()
        .par_chunks_mut(stride)
        .take(params.grid.preview_height)
        .enumerate()
        .for_each(|(y, out_row)| {
            let sharp_row = preview.row(y);
            for (x, (out, &sharp)) in out_row[..width].iter_mut().zip(sharp_row).enumerate() {
                *out = composite_pixel(params, x, y, sharp, mask, blurred);
            }
        });
    Ok(())
}

pub(crate) fn check_batch(
    params: &CompositeParams,
    preview: &Image<Rgba>,
    mask: &InferenceMask,
    blurred: &Image<Rgba>,
    output: &Image<Rgba>,
) -> Result<()> {
    let g = &params.grid;
    for (what, v) in [
        ("preview_width", g.preview_width),
        ("preview_height", g.preview_height),
        ("tensor_width", g.tensor_width),
        ("tensor_height", g.tensor_height),
    ] {
        if v == 0 {
            return Err(PipelineError::ZeroDimension { what });
        }
    }
    let expected = g.preview_width * g.preview_height;
    for (buffer, img) in [("preview", preview), ("blurred", blurred), ("output", output)] {
        if img.width() != g.preview_width || img.height() != g.preview_height {
            return Err(PipelineError::BufferSize {
                buffer,
                expected,
                actual: img.width() * img.height(),
            });
        }
    }
    if mask.width() != g.tensor_width || mask.height() != g.tensor_height {
        return Err(PipelineError::BufferSize {
            buffer: "mask",
            expected: g.tensor_width * g.tensor_height,
            actual: mask.width() * mask.height(),
        });
    }
    check_len("mask", g.tensor_width * g.tensor_height, mask.as_slice().len())
}
