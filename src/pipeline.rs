// pipeline.rs — Per-frame processor tying the two kernels together.
//
// Frame loop, as a camera callback would drive it:
//
//   1. preprocess     YUV frame → mirrored RGBA preview + normalised tensor
//                     (skipped when the timestamp repeats the previous frame)
//   2. inference      tensor → mask, via the `Segmenter` collaborator
//   3. blur           preview → blurred, via the `Blur` collaborator
//   4. composite      preview / blurred / mask → output
//
// Every buffer is allocated once in `FrameProcessor::new` and reused for
// the lifetime of the session. Stages borrow the processor mutably, so a
// frame can never be composited while the next one is being converted.

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::composite::{composite_frame, composite_frame_par, CompositeParams};
use crate::config::{Execution, PipelineConfig};
use crate::error::Result;
use crate::image::{Image, Rgba};
use crate::preprocess::{preprocess_frame, preprocess_frame_par, ConvertParams};
use crate::tensor::{InferenceMask, TensorBuffer};
use crate::yuv::YuvFrame;

/// Frames between two throughput reports.
pub const FPS_REPORT_INTERVAL: u32 = 90;

/// Segmentation model: reads the normalised tensor, writes one confidence
/// per tensor cell.
pub trait Segmenter {
    fn segment(&mut self, tensor: &TensorBuffer, mask: &mut InferenceMask) -> Result<()>;
}

/// Background blur. `dst` has the same dimensions as `src`.
pub trait Blur {
    fn blur(&self, src: &Image<Rgba>, dst: &mut Image<Rgba>);
}

/// Counts frames and logs frames-per-second every `interval` frames.
#[derive(Debug)]
pub struct FpsCounter {
    label: &'static str,
    interval: u32,
    count: u32,
    window_start: Option<Instant>,
}

impl FpsCounter {
    pub fn new(label: &'static str, interval: u32) -> Self {
        FpsCounter { label, interval: interval.max(1), count: 0, window_start: None }
    }

    /// Record one frame. Returns the measured rate when a report is due.
    pub fn tick(&mut self) -> Option<f64> {
        self.tick_at(Instant::now())
    }

    fn tick_at(&mut self, now: Instant) -> Option<f64> {
        // The first frame only opens the window: a window of `interval`
        // frames then always spans `interval` frame gaps.
        let Some(start) = self.window_start else {
            self.window_start = Some(now);
            return None;
        };
        self.count += 1;
        if self.count < self.interval {
            return None;
        }
        let elapsed = now.duration_since(start).as_secs_f64();
        let fps = if elapsed > 0.0 { self.count as f64 / elapsed } else { f64::INFINITY };
        info!(stage = self.label, frames = self.count, fps, "throughput");
        self.count = 0;
        self.window_start = Some(now);
        Some(fps)
    }
}

/// Owns every intermediate buffer of the blur pipeline.
pub struct FrameProcessor {
    config: PipelineConfig,
    convert: ConvertParams,
    composite: CompositeParams,
    preview: Image<Rgba>,
    tensor: TensorBuffer,
    mask: InferenceMask,
    blurred: Image<Rgba>,
    output: Image<Rgba>,
    last_timestamp: Option<i64>,
    preprocess_fps: FpsCounter,
    composite_fps: FpsCounter,
}

impl FrameProcessor {
    /// Validate `config` and allocate all buffers.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let (pw, ph) = (config.preview_width, config.preview_height);
        let (tw, th) = (config.tensor_width, config.tensor_height);
        debug!(pw, ph, tw, th, execution = ?config.execution, "allocating frame processor");
        Ok(FrameProcessor {
            convert: ConvertParams::new(&config),
            composite: CompositeParams::new(&config),
            preview: Image::new(pw, ph),
            tensor: TensorBuffer::new(tw, th),
            mask: InferenceMask::new(tw, th),
            blurred: Image::new(pw, ph),
            output: Image::new(pw, ph),
            last_timestamp: None,
            preprocess_fps: FpsCounter::new("preprocess", FPS_REPORT_INTERVAL),
            composite_fps: FpsCounter::new("composite", FPS_REPORT_INTERVAL),
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Convert one camera frame into the preview and tensor buffers.
    ///
    /// Returns `Ok(false)` without touching any buffer when `frame` carries
    /// the same timestamp as the previously converted frame.
    pub fn preprocess(&mut self, frame: &YuvFrame<'_>) -> Result<bool> {
        if self.last_timestamp == Some(frame.timestamp) {
            warn!(timestamp = frame.timestamp, "duplicate frame timestamp, skipping");
            return Ok(false);
        }
        match self.config.execution {
            Execution::Sequential => {
                preprocess_frame(&self.convert, frame, &mut self.preview, &mut self.tensor)?
            }
            Execution::Parallel => {
                preprocess_frame_par(&self.convert, frame, &mut self.preview, &mut self.tensor)?
            }
        }
        self.last_timestamp = Some(frame.timestamp);
        debug!(timestamp = frame.timestamp, "frame converted");
        self.preprocess_fps.tick();
        Ok(true)
    }

    /// Run the segmentation model on the current tensor.
    pub fn run_inference(&mut self, segmenter: &mut dyn Segmenter) -> Result<()> {
        segmenter.segment(&self.tensor, &mut self.mask)
    }

    /// Blur the current preview and composite it against the mask.
    pub fn postprocess(&mut self, blur: &dyn Blur) -> Result<()> {
        blur.blur(&self.preview, &mut self.blurred);
        match self.config.execution {
            Execution::Sequential => composite_frame(
                &self.composite,
                &self.preview,
                &self.mask,
                &self.blurred,
                &mut self.output,
            )?,
            Execution::Parallel => composite_frame_par(
                &self.composite,
                &self.preview,
                &self.mask,
                &self.blurred,
                &mut self.output,
            )?,
        }
        self.composite_fps.tick();
        Ok(())
    }

    /// All stages for one frame. `None` when the frame was a duplicate.
    pub fn process(
        &mut self,
        frame: &YuvFrame<'_>,
        segmenter: &mut dyn Segmenter,
        blur: &dyn Blur,
    ) -> Result<Option<&Image<Rgba>>> {
        if !self.preprocess(frame)? {
            return Ok(None);
        }
        self.run_inference(segmenter)?;
        self.postprocess(blur)?;
        Ok(Some(&self.output))
    }

    pub fn preview(&self) -> &Image<Rgba> {
        &self.preview
    }

    pub fn tensor(&self) -> &TensorBuffer {
        &self.tensor
    }

    pub fn mask(&self) -> &InferenceMask {
        &self.mask
    }

    /// Mask access for callers that run inference outside the processor.
    pub fn mask_mut(&mut self) -> &mut InferenceMask {
        &mut self.mask
    }

    pub fn blurred(&self) -> &Image<Rgba> {
        &self.blurred
    }

    pub fn output(&self) -> &Image<Rgba> {
        &self.output
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::PlaneLayout;
    use crate::error::PipelineError;

    struct Constant(f32);

    impl Segmenter for Constant {
        fn segment(&mut self, _tensor: &TensorBuffer, mask: &mut InferenceMask) -> Result<()> {
            mask.as_mut_slice().fill(self.0);
            Ok(())
        }
    }

    struct Failing;

    impl Segmenter for Failing {
        fn segment(&mut self, _: &TensorBuffer, _: &mut InferenceMask) -> Result<()> {
            Err(PipelineError::Segmenter("model not loaded".into()))
        }
    }

    struct Fill(Rgba);

    impl Blur for Fill {
        fn blur(&self, _src: &Image<Rgba>, dst: &mut Image<Rgba>) {
            dst.fill(self.0);
        }
    }

    const BLUR: Rgba = Rgba::opaque(1, 2, 3);

    fn grey_planes() -> (Vec<u8>, Vec<u8>) {
        (vec![128u8; 16], vec![128u8; 8])
    }

    #[test]
    fn test_fps_counter_reports_on_interval() {
        let mut c = FpsCounter::new("test", 3);
        let t0 = Instant::now();
        let at = |ms: u64| t0 + Duration::from_millis(ms);
        // Steady 20 fps stream: one frame every 50 ms.
        assert_eq!(c.tick_at(at(0)), None);
        assert_eq!(c.tick_at(at(50)), None);
        assert_eq!(c.tick_at(at(100)), None);
        let first = c.tick_at(at(150)).unwrap();
        assert!((first - 20.0).abs() < 1e-6, "first window reported {first}");
        // Window restarts after a report and measures the same rate.
        assert_eq!(c.tick_at(at(200)), None);
        assert_eq!(c.tick_at(at(250)), None);
        let second = c.tick_at(at(300)).unwrap();
        assert!((second - 20.0).abs() < 1e-6, "second window reported {second}");
    }

    #[test]
    fn test_subject_frame_stays_sharp() {
        let (y, uv) = grey_planes();
        let frame = YuvFrame::nv21(&y, &uv, PlaneLayout::semi_planar(4), 1);
        let mut fp = FrameProcessor::new(PipelineConfig::new(4, 4, 2, 2)).unwrap();
        let out = fp.process(&frame, &mut Constant(1.0), &Fill(BLUR)).unwrap().unwrap();
        for (_, _, px) in out.pixels() {
            assert_eq!(px, Rgba::opaque(128, 127, 127));
        }
    }

    #[test]
    fn test_background_frame_is_blurred() {
        let (y, uv) = grey_planes();
        let frame = YuvFrame::nv21(&y, &uv, PlaneLayout::semi_planar(4), 1);
        let cfg = PipelineConfig::new(4, 4, 2, 2).with_execution(Execution::Parallel);
        let mut fp = FrameProcessor::new(cfg).unwrap();
        let out = fp.process(&frame, &mut Constant(0.5), &Fill(BLUR)).unwrap().unwrap();
        for (_, _, px) in out.pixels() {
            assert_eq!(px, BLUR);
        }
    }

    #[test]
    fn test_duplicate_timestamp_skipped() {
        let (y, uv) = grey_planes();
        let mut fp = FrameProcessor::new(PipelineConfig::new(4, 4, 2, 2)).unwrap();
        let frame = YuvFrame::nv21(&y, &uv, PlaneLayout::semi_planar(4), 42);
        assert!(fp.preprocess(&frame).unwrap());
        assert!(!fp.preprocess(&frame).unwrap());
        assert!(fp.process(&frame, &mut Constant(1.0), &Fill(BLUR)).unwrap().is_none());
        let next = YuvFrame::nv21(&y, &uv, PlaneLayout::semi_planar(4), 43);
        assert!(fp.process(&next, &mut Constant(1.0), &Fill(BLUR)).unwrap().is_some());
    }

    #[test]
    fn test_invalid_frame_does_not_advance_timestamp() {
        let mut fp = FrameProcessor::new(PipelineConfig::new(4, 4, 2, 2)).unwrap();
        let short = [0u8; 3];
        let uv = [128u8; 8];
        let bad = YuvFrame::nv21(&short, &uv, PlaneLayout::semi_planar(4), 7);
        assert!(fp.preprocess(&bad).is_err());
        let (y, uv) = grey_planes();
        let good = YuvFrame::nv21(&y, &uv, PlaneLayout::semi_planar(4), 7);
        assert!(fp.preprocess(&good).unwrap());
    }

    #[test]
    fn test_segmenter_error_propagates() {
        let (y, uv) = grey_planes();
        let frame = YuvFrame::nv21(&y, &uv, PlaneLayout::semi_planar(4), 1);
        let mut fp = FrameProcessor::new(PipelineConfig::new(4, 4, 2, 2)).unwrap();
        let err = fp.process(&frame, &mut Failing, &Fill(BLUR)).unwrap_err();
        assert!(matches!(err, PipelineError::Segmenter(_)));
    }

    #[test]
    fn test_zero_config_rejected() {
        assert!(FrameProcessor::new(PipelineConfig::new(0, 4, 2, 2)).is_err());
    }
}
