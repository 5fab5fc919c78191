// camblur: camera background-blur pipeline
//
// Two per-pixel kernels and the plumbing around them:
//
//   preprocess — YUV420 camera frame → mirrored RGBA preview + normalised
//                RGB tensor for a segmentation model
//   composite  — sharp preview / blurred preview / model mask → output
//
// Every kernel has a sequential CPU driver (the reference), a rayon driver
// and a wgpu compute path, all bit-identical on the RGBA outputs.

pub mod image;
pub mod error;
pub mod config;
pub mod mapping;
pub mod yuv;
pub mod tensor;
pub mod preprocess;
pub mod composite;
pub mod pipeline;
pub mod logging;
pub mod gpu;

pub use composite::{composite_frame, composite_frame_par, composite_pixel, CompositeParams, MASK_THRESHOLD};
pub use config::{Execution, PipelineConfig, PlaneLayout};
pub use error::{PipelineError, Result};
pub use image::{Image, Rgba};
pub use pipeline::{Blur, FrameProcessor, Segmenter};
pub use preprocess::{convert_pixel, preprocess_frame, preprocess_frame_par, ConvertParams};
pub use tensor::{InferenceMask, TensorBuffer};
pub use yuv::YuvFrame;
