// demos/composite_preview.rs — Live background-blur preview.
//
// Feeds a sequence of NV21 frames through FrameProcessor and shows three
// panels in a minifb window:
//
//   ┌─────────────────┬─────────────────┬─────────────────┐
//   │  mirrored       │  model mask     │  composited     │
//   │  preview        │  (upscaled)     │  output         │
//   └─────────────────┴─────────────────┴─────────────────┘
//
// The "camera" is an RGB image (or a generated scene) encoded to NV21 and
// panned a few pixels per frame. The "model" marks pixels close to the
// scene centre colour as subject; the blur is a separable box filter.
//
// USAGE
// ─────
//   cargo run --example composite_preview                    # generated scene
//   cargo run --example composite_preview -- path/to/img.png # any image file
//   cargo run --example composite_preview -- path/to/img.png config.json
//
// Controls: Space=pause, P=toggle sequential/parallel, Q/Esc=quit.
// RUST_LOG=debug shows per-frame pipeline events.

use std::time::{Duration, Instant};

use minifb::{Key, KeyRepeat, Window, WindowOptions};
use tracing::info;

use camblur::config::{Execution, PipelineConfig, PlaneLayout};
use camblur::image::{Image, Rgba};
use camblur::logging::init_tracing;
use camblur::pipeline::{Blur, FrameProcessor, Segmenter};
use camblur::tensor::{InferenceMask, TensorBuffer};
use camblur::yuv::YuvFrame;

const BLUR_RADIUS: usize = 6;
const PAN_STEP: usize = 3;

fn main() {
    init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let scene: Image<Rgba> = match args.get(1) {
        Some(path) => load_rgb(path),
        None => {
            eprintln!("[composite_preview] no image path given — using generated scene");
            generated_scene(960, 540)
        }
    };

    // Frames are cropped from the scene while panning, so the preview is
    // a bit smaller than the source.
    let base = PipelineConfig {
        preview_width: (scene.width() * 3 / 4) & !1,
        preview_height: (scene.height() * 3 / 4) & !1,
        tensor_width: 256,
        tensor_height: 144,
        ..PipelineConfig::default()
    };
    let mut config = match args.get(2) {
        Some(path) => PipelineConfig::load(path).unwrap_or_else(|e| panic!("{path}: {e}")),
        None => PipelineConfig { pic_width: base.preview_width, ..base },
    };
    config.preview_width = config.preview_width.min(scene.width());
    config.preview_height = config.preview_height.min(scene.height());
    let (pw, ph) = (config.preview_width, config.preview_height);
    info!(pw, ph, tw = config.tensor_width, th = config.tensor_height, "starting preview");

    let mut processor = FrameProcessor::new(config.clone()).expect("invalid pipeline config");
    let target = scene_centre_colour(&scene);
    let mut segmenter = ColourKey { target, tolerance: 60.0 };
    let blur = BoxBlur { radius: BLUR_RADIUS };

    let (win_w, win_h) = (pw * 3, ph);
    let mut window = Window::new(
        "camblur — preview | mask | output",
        win_w,
        win_h,
        WindowOptions { resize: false, ..Default::default() },
    )
    .expect("failed to open window");
    window.limit_update_rate(Some(Duration::from_millis(16)));

    let mut fb = vec![0u32; win_w * win_h];
    let layout = PlaneLayout::semi_planar(pw);
    let mut y_plane = vec![0u8; layout.y_row_stride * ph];
    let mut vu_plane = vec![0u8; layout.uv_row_stride * ph.div_ceil(2)];

    let max_dx = scene.width() - pw;
    let mut offset = 0usize;
    let mut forward = true;
    let mut paused = false;
    let mut timestamp = 0i64;

    println!("\nControls: Space=pause, P=toggle execution, Q/Esc=quit\n");

    while window.is_open() && !window.is_key_down(Key::Escape) && !window.is_key_down(Key::Q) {
        if window.is_key_pressed(Key::Space, KeyRepeat::No) {
            paused = !paused;
        }
        if window.is_key_pressed(Key::P, KeyRepeat::No) {
            config.execution = match config.execution {
                Execution::Sequential => Execution::Parallel,
                Execution::Parallel => Execution::Sequential,
            };
            println!("Execution: {:?}", config.execution);
            processor = FrameProcessor::new(config.clone()).expect("invalid pipeline config");
        }

        if !paused {
            encode_nv21(&scene, offset, pw, ph, layout, &mut y_plane, &mut vu_plane);
            timestamp += 33_333_333;
            let frame = YuvFrame::nv21(&y_plane, &vu_plane, layout, timestamp);

            let t0 = Instant::now();
            match processor.process(&frame, &mut segmenter, &blur) {
                Ok(Some(_)) => {}
                Ok(None) => continue,
                Err(e) => {
                    eprintln!("frame {timestamp}: {e}");
                    break;
                }
            }
            let dt = t0.elapsed();
            window.set_title(&format!(
                "camblur — {:?} — {:.1} ms/frame",
                config.execution,
                dt.as_secs_f64() * 1e3
            ));

            render_panels(&processor, &mut fb, win_w);

            if max_dx > 0 {
                if forward {
                    offset = (offset + PAN_STEP).min(max_dx);
                    forward = offset < max_dx;
                } else {
                    offset = offset.saturating_sub(PAN_STEP);
                    forward = offset == 0;
                }
            }
        }

        window.update_with_buffer(&fb, win_w, win_h).expect("window update failed");
    }
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Confidence falls off with RGB distance from a key colour.
struct ColourKey {
    target: [f32; 3],
    tolerance: f32,
}

impl Segmenter for ColourKey {
    fn segment(&mut self, tensor: &TensorBuffer, mask: &mut InferenceMask) -> camblur::Result<()> {
        let tw = tensor.width();
        for (i, m) in mask.as_mut_slice().iter_mut().enumerate() {
            let [r, g, b] = tensor.rgb(i % tw, i / tw);
            let d = ((r * 255.0 - self.target[0]).powi(2)
                + (g * 255.0 - self.target[1]).powi(2)
                + (b * 255.0 - self.target[2]).powi(2))
            .sqrt();
            *m = (1.0 - d / (2.0 * self.tolerance)).clamp(0.0, 1.0);
        }
        Ok(())
    }
}

/// Separable box blur with edge clamping.
struct BoxBlur {
    radius: usize,
}

impl Blur for BoxBlur {
    fn blur(&self, src: &Image<Rgba>, dst: &mut Image<Rgba>) {
        let (w, h) = (src.width(), src.height());
        let mut tmp = vec![[0u32; 3]; w * h];
        let n = (2 * self.radius + 1) as u32;
        for y in 0..h {
            let row = src.row(y);
            for x in 0..w {
                let mut acc = [0u32; 3];
                for k in 0..n as usize {
                    let sx = (x + k).saturating_sub(self.radius).min(w - 1);
                    acc[0] += row[sx].r as u32;
                    acc[1] += row[sx].g as u32;
                    acc[2] += row[sx].b as u32;
                }
                tmp[y * w + x] = acc;
            }
        }
        for y in 0..h {
            for x in 0..w {
                let mut acc = [0u32; 3];
                for k in 0..n as usize {
                    let sy = (y + k).saturating_sub(self.radius).min(h - 1);
                    let t = tmp[sy * w + x];
                    acc[0] += t[0];
                    acc[1] += t[1];
                    acc[2] += t[2];
                }
                let d = n * n;
                dst.set(x, y, Rgba::opaque((acc[0] / d) as u8, (acc[1] / d) as u8, (acc[2] / d) as u8));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn render_panels(fp: &FrameProcessor, fb: &mut [u32], win_w: usize) {
    let cfg = fp.config();
    let (pw, ph) = (cfg.preview_width, cfg.preview_height);
    let (tw, th) = (cfg.tensor_width, cfg.tensor_height);
    let mask = mask_to_grey(fp.mask());
    for y in 0..ph {
        let row = &mut fb[y * win_w..(y + 1) * win_w];
        for x in 0..pw {
            row[x] = rgba_to_u32(fp.preview().get(x, y));
            row[pw + x] = grey_to_u32(mask.get(x * tw / pw, y * th / ph));
            row[2 * pw + x] = rgba_to_u32(fp.output().get(x, y));
        }
    }
}

/// Mask confidences as an 8-bit greyscale image at tensor resolution.
fn mask_to_grey(mask: &InferenceMask) -> Image<u8> {
    let pixels = mask.as_slice().iter().map(|c| (c.clamp(0.0, 1.0) * 255.0) as u8).collect();
    Image::from_vec(mask.width(), mask.height(), pixels)
}

/// Pack a greyscale u8 value into an ARGB u32 for minifb.
#[inline]
fn grey_to_u32(v: u8) -> u32 {
    let c = v as u32;
    0xFF00_0000 | (c << 16) | (c << 8) | c
}

/// Pack an RGBA pixel into an ARGB u32 for minifb.
#[inline]
fn rgba_to_u32(p: Rgba) -> u32 {
    0xFF00_0000 | ((p.r as u32) << 16) | ((p.g as u32) << 8) | p.b as u32
}

// ---------------------------------------------------------------------------
// Frame source
// ---------------------------------------------------------------------------

/// Encode a `w`×`h` window of `scene` starting at column `dx` into NV21.
///
/// Chroma is taken from the top-left pixel of each 2×2 block.
fn encode_nv21(
    scene: &Image<Rgba>,
    dx: usize,
    w: usize,
    h: usize,
    layout: PlaneLayout,
    y_plane: &mut [u8],
    vu_plane: &mut [u8],
) {
    for y in 0..h {
        for x in 0..w {
            let p = scene.get(x + dx, y);
            let (r, g, b) = (p.r as f32, p.g as f32, p.b as f32);
            y_plane[y * layout.y_row_stride + x] = (0.299 * r + 0.587 * g + 0.114 * b).round() as u8;
            if x % 2 == 0 && y % 2 == 0 {
                let u = -0.169 * r - 0.331 * g + 0.5 * b + 128.0;
                let v = 0.5 * r - 0.419 * g - 0.081 * b + 128.0;
                let i = (y / 2) * layout.uv_row_stride + (x / 2) * layout.uv_pixel_stride;
                vu_plane[i] = v.round().clamp(0.0, 255.0) as u8;
                vu_plane[i + 1] = u.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

fn scene_centre_colour(scene: &Image<Rgba>) -> [f32; 3] {
    let p = scene.get(scene.width() / 2, scene.height() / 2);
    [p.r as f32, p.g as f32, p.b as f32]
}

/// Load any image format supported by the `image` crate as opaque RGBA.
fn load_rgb(path: &str) -> Image<Rgba> {
    let img = image::open(path)
        .unwrap_or_else(|e| panic!("failed to open {path}: {e}"))
        .to_rgb8();
    let (w, h) = img.dimensions();
    let pixels = img.pixels().map(|p| Rgba::opaque(p[0], p[1], p[2])).collect();
    Image::from_vec(w as usize, h as usize, pixels)
}

/// Warm disc ("subject") on a cool striped background.
fn generated_scene(width: usize, height: usize) -> Image<Rgba> {
    let (cx, cy) = (width as f32 / 2.0, height as f32 / 2.0);
    let radius = height as f32 / 3.0;
    let pixels = (0..width * height)
        .map(|i| {
            let (x, y) = ((i % width) as f32, (i / width) as f32);
            if (x - cx).powi(2) + (y - cy).powi(2) < radius * radius {
                Rgba::opaque(220, 170, 130)
            } else if ((i % width) / 24 + (i / width) / 24) % 2 == 0 {
                Rgba::opaque(30, 90, 160)
            } else {
                Rgba::opaque(200, 220, 240)
            }
        })
        .collect();
    Image::from_vec(width, height, pixels)
}
