// mapping.rs — Coordinate mapping between the preview grid and the tensor grid.
//
// Both kernels need the same two transforms:
//
//   mirror     (x, y) → (W-1-x, H-1-y)            front camera orientation
//   downscale  (x, y) → (x·Tw / W, y·Th / H)      preview → tensor/mask cell
//
// The downscale is plain integer (truncating) division, computed in u64 so
// that `x * tensor_width` cannot overflow for any realistic resolution. For
// 0 ≤ x < W the result is always < Tw:
//
//   x ≤ W-1  ⇒  x·Tw ≤ W·Tw − Tw  <  W·Tw  ⇒  ⌊x·Tw / W⌋ < Tw
//
// MANY-TO-ONE WRITES
// ──────────────────
// When Tw < W several preview columns land on the same tensor column. The
// conversion kernel has no combine function for those collisions; under
// row-major traversal the last writer wins, which is always the source
// pixel with the largest flattened index. `last_sources` precomputes, per
// axis, the largest preview coordinate that maps onto each tensor
// coordinate, so parallel drivers can reproduce the sequential result
// without ordering the writes.

/// Grid sizes for one batch. Copy-cheap; embedded in the kernel params.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridMap {
    pub preview_width: usize,
    pub preview_height: usize,
    pub tensor_width: usize,
    pub tensor_height: usize,
}

impl GridMap {
    pub fn new(
        preview_width: usize,
        preview_height: usize,
        tensor_width: usize,
        tensor_height: usize,
    ) -> Self {
        GridMap { preview_width, preview_height, tensor_width, tensor_height }
    }

    /// Mirror a preview coordinate through the frame centre.
    #[inline(always)]
    pub fn mirror(&self, x: usize, y: usize) -> (usize, usize) {
        (self.preview_width - 1 - x, self.preview_height - 1 - y)
    }

    /// Preview coordinate → tensor (and mask) cell coordinate.
    #[inline(always)]
    pub fn to_tensor(&self, x: usize, y: usize) -> (usize, usize) {
        (
            downscale(x, self.tensor_width, self.preview_width),
            downscale(y, self.tensor_height, self.preview_height),
        )
    }

    /// Flat mask index of the cell covering preview pixel `(x, y)`.
    #[inline(always)]
    pub fn cell_index(&self, x: usize, y: usize) -> usize {
        let (xt, yt) = self.to_tensor(x, y);
        xt + yt * self.tensor_width
    }

    /// For every tensor column (resp. row), the largest preview column
    /// (resp. row) mapping onto it, or `None` if no preview pixel reaches
    /// it (tensor larger than preview on that axis).
    pub fn last_sources(&self) -> (Vec<Option<usize>>, Vec<Option<usize>>) {
        (
            last_source_table(self.preview_width, self.tensor_width),
            last_source_table(self.preview_height, self.tensor_height),
        )
    }
}

/// `v * dst / src` with truncation.
#[inline(always)]
pub fn downscale(v: usize, dst: usize, src: usize) -> usize {
    ((v as u64 * dst as u64) / src as u64) as usize
}

fn last_source_table(src: usize, dst: usize) -> Vec<Option<usize>> {
    let mut table = vec![None; dst];
    // Ascending scan: later (larger) coordinates overwrite earlier ones.
    for v in 0..src {
        table[downscale(v, dst, src)] = Some(v);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mirror_4x4() {
        let m = GridMap::new(4, 4, 2, 2);
        assert_eq!(m.mirror(0, 0), (3, 3));
        assert_eq!(m.mirror(3, 3), (0, 0));
        assert_eq!(m.mirror(1, 2), (2, 1));
    }

    #[test]
    fn test_downscale_monotonic_and_bounded() {
        for &(src, dst) in &[(1280usize, 256usize), (720, 144), (7, 3), (3, 7), (5, 5), (1, 1)] {
            let mut prev = 0;
            for v in 0..src {
                let m = downscale(v, dst, src);
                assert!(m >= prev, "not monotonic at {v} for {src}→{dst}");
                assert!(m < dst, "{v} mapped to {m} ≥ {dst}");
                prev = m;
            }
            assert_eq!(downscale(0, dst, src), 0);
        }
    }

    #[test]
    fn test_cell_index() {
        let m = GridMap::new(8, 4, 4, 2);
        assert_eq!(m.cell_index(0, 0), 0);
        assert_eq!(m.cell_index(7, 0), 3);
        assert_eq!(m.cell_index(0, 3), 4);
        assert_eq!(m.cell_index(7, 3), 7);
    }

    #[test]
    fn test_last_sources_downsample() {
        // 5 → 2: columns 0,1,2 → 0 (2*v/5 = 0,0,0), 3,4 → 1.
        let m = GridMap::new(5, 1, 2, 1);
        let (cols, rows) = m.last_sources();
        assert_eq!(cols, vec![Some(2), Some(4)]);
        assert_eq!(rows, vec![Some(0)]);
    }

    #[test]
    fn test_last_sources_upsample_leaves_gaps() {
        // 2 → 5: column 0 → 0, column 1 → 2. Cells 1, 3, 4 never written.
        let m = GridMap::new(2, 1, 5, 1);
        let (cols, _) = m.last_sources();
        assert_eq!(cols, vec![Some(0), None, Some(1), None, None]);
    }

    #[test]
    fn test_large_resolution_does_not_overflow() {
        let m = GridMap::new(1 << 20, 1, 1 << 20, 1);
        assert_eq!(m.to_tensor((1 << 20) - 1, 0).0, (1 << 20) - 1);
    }
}
