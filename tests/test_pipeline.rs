// tests/test_pipeline.rs — FrameProcessor driven like a camera session.
//
// A synthetic frame has a bright square in the middle on a dark background.
// The test segmenter marks bright tensor cells as subject, the test blur
// paints a flat colour, so the expected output is known pixel by pixel.

use camblur::config::{Execution, PipelineConfig, PlaneLayout};
use camblur::error::{PipelineError, Result};
use camblur::image::{Image, Rgba};
use camblur::pipeline::{Blur, FrameProcessor, Segmenter};
use camblur::tensor::{InferenceMask, TensorBuffer};
use camblur::yuv::{yuv_to_rgba, YuvFrame};

const W: usize = 32;
const H: usize = 24;
const TW: usize = 8;
const TH: usize = 6;
const BLUR: Rgba = Rgba::opaque(7, 7, 7);

/// Luma 220 inside [8, 24) × [8, 16), luma 20 elsewhere, neutral chroma.
fn square_frame(y: &mut Vec<u8>, uv: &mut Vec<u8>) -> PlaneLayout {
    y.clear();
    for row in 0..H {
        for col in 0..W {
            let inside = (8..24).contains(&col) && (8..16).contains(&row);
            y.push(if inside { 220 } else { 20 });
        }
    }
    let layout = PlaneLayout::semi_planar(W);
    uv.clear();
    uv.resize(layout.uv_row_stride * H / 2, 128);
    layout
}

/// Subject wherever the red channel of the tensor cell is bright.
struct Brightness {
    calls: usize,
}

impl Segmenter for Brightness {
    fn segment(&mut self, tensor: &TensorBuffer, mask: &mut InferenceMask) -> Result<()> {
        self.calls += 1;
        let (tw, th) = (tensor.width(), tensor.height());
        for y in 0..th {
            for x in 0..tw {
                let [r, _, _] = tensor.rgb(x, y);
                mask.as_mut_slice()[y * tw + x] = if r > 0.5 { 0.95 } else { 0.05 };
            }
        }
        Ok(())
    }
}

struct Flat;

impl Blur for Flat {
    fn blur(&self, _src: &Image<Rgba>, dst: &mut Image<Rgba>) {
        dst.fill(BLUR);
    }
}

fn run(execution: Execution) -> Image<Rgba> {
    let (mut y, mut uv) = (Vec::new(), Vec::new());
    let layout = square_frame(&mut y, &mut uv);
    let frame = YuvFrame::nv21(&y, &uv, layout, 1);
    let cfg = PipelineConfig::new(W, H, TW, TH).with_execution(execution);
    let mut fp = FrameProcessor::new(cfg).unwrap();
    let mut seg = Brightness { calls: 0 };
    let out = fp.process(&frame, &mut seg, &Flat).unwrap().unwrap().clone();
    assert_eq!(seg.calls, 1);
    out
}

#[test]
fn subject_square_sharp_background_blurred() {
    let out = run(Execution::Sequential);
    let bright = yuv_to_rgba(220, 128, 128);
    // The square is symmetric under the mirror and aligned to 4×4 cells.
    for (x, y, px) in out.pixels() {
        let inside = (8..24).contains(&x) && (8..16).contains(&y);
        let expected = if inside { bright } else { BLUR };
        assert_eq!(px, expected, "pixel ({x}, {y})");
    }
}

#[test]
fn sequential_and_parallel_sessions_agree() {
    let seq = run(Execution::Sequential);
    let par = run(Execution::Parallel);
    assert_eq!(seq.as_slice(), par.as_slice());
}

#[test]
fn duplicate_timestamps_do_not_reach_the_segmenter() {
    let (mut y, mut uv) = (Vec::new(), Vec::new());
    let layout = square_frame(&mut y, &mut uv);
    let mut fp = FrameProcessor::new(PipelineConfig::new(W, H, TW, TH)).unwrap();
    let mut seg = Brightness { calls: 0 };

    for ts in [5, 5, 6, 6, 6, 7] {
        let frame = YuvFrame::nv21(&y, &uv, layout, ts);
        fp.process(&frame, &mut seg, &Flat).unwrap();
    }
    assert_eq!(seg.calls, 3);
}

#[test]
fn external_inference_through_mask_mut() {
    let (mut y, mut uv) = (Vec::new(), Vec::new());
    let layout = square_frame(&mut y, &mut uv);
    let frame = YuvFrame::nv21(&y, &uv, layout, 1);
    let mut fp = FrameProcessor::new(PipelineConfig::new(W, H, TW, TH)).unwrap();

    assert!(fp.preprocess(&frame).unwrap());
    let all_subject = vec![1.0f32; TW * TH];
    fp.mask_mut().copy_from(&all_subject).unwrap();
    fp.postprocess(&Flat).unwrap();

    assert_eq!(fp.output().as_slice(), fp.preview().as_slice());
    assert!(fp.blurred().as_slice().iter().all(|p| *p == BLUR));
}

#[test]
fn wrong_mask_length_rejected() {
    let mut fp = FrameProcessor::new(PipelineConfig::new(W, H, TW, TH)).unwrap();
    let err = fp.mask_mut().copy_from(&[0.0; 3]).unwrap_err();
    assert!(matches!(err, PipelineError::BufferSize { buffer: "mask", .. }));
}

#[test]
fn config_file_drives_the_processor() {
    let path = std::env::temp_dir().join(format!("camblur-test-{}.json", std::process::id()));
    std::fs::write(
        &path,
        r#"{ "preview_width": 32, "preview_height": 24,
             "tensor_width": 8, "tensor_height": 6, "execution": "parallel" }"#,
    )
    .unwrap();
    let cfg = PipelineConfig::load(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(cfg.execution, Execution::Parallel);
    let fp = FrameProcessor::new(cfg).unwrap();
    assert_eq!(fp.tensor().as_slice().len(), TW * TH * 3);
    assert_eq!(fp.mask().as_slice().len(), TW * TH);
}

#[test]
fn missing_config_file_is_a_config_error() {
    let err = PipelineConfig::load("/nonexistent/camblur.json").unwrap_err();
    assert!(matches!(err, PipelineError::Config(_)));
}
