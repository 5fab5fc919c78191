// demos/gpu_composite.rs — CPU vs GPU pipeline comparison.
//
// Runs both kernels on one NV21 frame with the CPU drivers and the wgpu
// pipelines, prints the per-stage discrepancy and timing, then shows the
// composited results side by side:
//
//   ┌──────────────────────────┬──────────────────────────┐
//   │  CPU composite           │  GPU composite           │
//   └──────────────────────────┴──────────────────────────┘
//
// USAGE
// ─────
//   cargo run --example gpu_composite                    # generated scene
//   cargo run --example gpu_composite -- path/to/img.png # any image file
//   cargo run --example gpu_composite -- path/to/img.png 192 108
//                                                        # tensor size

use std::time::Instant;

use camblur::composite::{composite_frame, CompositeParams};
use camblur::config::{PipelineConfig, PlaneLayout};
use camblur::gpu::device::GpuDevice;
use camblur::gpu::{GpuCompositePipeline, GpuPreprocessPipeline};
use camblur::image::{Image, Rgba};
use camblur::logging::init_tracing;
use camblur::preprocess::{preprocess_frame, ConvertParams};
use camblur::tensor::{InferenceMask, TensorBuffer};
use camblur::yuv::YuvFrame;

fn main() {
    init_tracing();

    // --- Parse arguments ---
    let args: Vec<String> = std::env::args().collect();
    let tw: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(256);
    let th: usize = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(144);

    // --- Load or generate source ---
    let (w, h, y_plane, vu_plane) = match args.get(1) {
        Some(path) => load_nv21(path),
        None => {
            eprintln!("[gpu_composite] no image path given — using generated gradient");
            gradient_nv21(1280, 720)
        }
    };
    let layout = PlaneLayout::semi_planar(w);
    let frame = YuvFrame::nv21(&y_plane, &vu_plane, layout, 0);
    let cfg = PipelineConfig::new(w, h, tw, th);
    eprintln!("[gpu_composite] frame {w}×{h}, tensor {tw}×{th}");

    // --- CPU reference ---
    let convert = ConvertParams::new(&cfg);
    let composite = CompositeParams::new(&cfg);
    let mut cpu_preview = Image::new(w, h);
    let mut cpu_tensor = TensorBuffer::new(tw, th);
    let t0 = Instant::now();
    preprocess_frame(&convert, &frame, &mut cpu_preview, &mut cpu_tensor).expect("cpu preprocess");
    let cpu_pre_ms = t0.elapsed().as_secs_f64() * 1e3;

    let mask = luma_mask(&cpu_tensor);
    let blurred = darken(&cpu_preview);
    let mut cpu_out = Image::new(w, h);
    let t0 = Instant::now();
    composite_frame(&composite, &cpu_preview, &mask, &blurred, &mut cpu_out).expect("cpu composite");
    let cpu_comp_ms = t0.elapsed().as_secs_f64() * 1e3;

    // --- GPU ---
    eprintln!("[gpu_composite] initialising GPU...");
    let gpu = GpuDevice::new().expect("failed to initialise a Vulkan GPU");
    eprintln!("[gpu_composite] GPU: {}", gpu.adapter_info);
    let gpu_pre = GpuPreprocessPipeline::new(&gpu);
    let gpu_comp = GpuCompositePipeline::new(&gpu);

    let mut gpu_preview = Image::new(w, h);
    let mut gpu_tensor = TensorBuffer::new(tw, th);
    let t0 = Instant::now();
    gpu_pre
        .run(&gpu, &convert, &frame, &mut gpu_preview, &mut gpu_tensor)
        .expect("gpu preprocess");
    let gpu_pre_ms = t0.elapsed().as_secs_f64() * 1e3;

    let mut gpu_out = Image::new(w, h);
    let t0 = Instant::now();
    gpu_comp
        .run(&gpu, &composite, &cpu_preview, &mask, &blurred, &mut gpu_out)
        .expect("gpu composite");
    let gpu_comp_ms = t0.elapsed().as_secs_f64() * 1e3;

    // --- Report ---
    let preview_diff = pixel_mismatches(&cpu_preview, &gpu_preview);
    let tensor_err = cpu_tensor
        .as_slice()
        .iter()
        .zip(gpu_tensor.as_slice())
        .map(|(a, b)| (a - b).abs())
        .fold(0.0f32, f32::max);
    let out_diff = pixel_mismatches(&cpu_out, &gpu_out);

    println!("stage        cpu ms    gpu ms    discrepancy");
    println!("preprocess   {cpu_pre_ms:>7.2}   {gpu_pre_ms:>7.2}   {preview_diff} px, tensor max |Δ| {tensor_err:.2e}");
    println!("composite    {cpu_comp_ms:>7.2}   {gpu_comp_ms:>7.2}   {out_diff} px");

    // --- Display ---
    let (win_w, win_h) = (w * 2, h);
    let mut fb = vec![0u32; win_w * win_h];
    for y in 0..h {
        for x in 0..w {
            fb[y * win_w + x] = rgba_to_u32(cpu_out.get(x, y));
            fb[y * win_w + w + x] = rgba_to_u32(gpu_out.get(x, y));
        }
    }

    let mut window = minifb::Window::new(
        &format!("camblur — CPU (left) vs GPU (right) — {w}×{h}"),
        win_w,
        win_h,
        minifb::WindowOptions { resize: false, ..Default::default() },
    )
    .expect("failed to open window");
    window.limit_update_rate(Some(std::time::Duration::from_millis(16)));

    eprintln!("[gpu_composite] window open — press Escape or close to exit");
    while window.is_open() && !window.is_key_down(minifb::Key::Escape) {
        window.update_with_buffer(&fb, win_w, win_h).expect("window update failed");
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn pixel_mismatches(a: &Image<Rgba>, b: &Image<Rgba>) -> usize {
    a.pixels().filter(|&(x, y, p)| b.get(x, y) != p).count()
}

/// Subject where the normalised luma of the tensor cell exceeds one half.
fn luma_mask(tensor: &TensorBuffer) -> InferenceMask {
    let (tw, th) = (tensor.width(), tensor.height());
    let mut mask = InferenceMask::new(tw, th);
    for (i, m) in mask.as_mut_slice().iter_mut().enumerate() {
        let [r, g, b] = tensor.rgb(i % tw, i / tw);
        *m = 0.299 * r + 0.587 * g + 0.114 * b;
    }
    mask
}

/// Stand-in for a blur: halve every channel.
fn darken(src: &Image<Rgba>) -> Image<Rgba> {
    let pixels = src.to_compact_vec().into_iter().map(|p| Rgba::opaque(p.r / 2, p.g / 2, p.b / 2)).collect();
    Image::from_vec(src.width(), src.height(), pixels)
}

#[inline]
fn rgba_to_u32(p: Rgba) -> u32 {
    0xFF00_0000 | ((p.r as u32) << 16) | ((p.g as u32) << 8) | p.b as u32
}

/// Load any image format supported by the `image` crate and encode it as
/// tightly packed NV21, cropped to even dimensions.
fn load_nv21(path: &str) -> (usize, usize, Vec<u8>, Vec<u8>) {
    let img = image::open(path)
        .unwrap_or_else(|e| panic!("failed to open {path}: {e}"))
        .to_rgb8();
    let (w, h) = (img.width() as usize & !1, img.height() as usize & !1);
    let mut y_plane = vec![0u8; w * h];
    let mut vu_plane = vec![0u8; w * h / 2];
    for y in 0..h {
        for x in 0..w {
            let p = img.get_pixel(x as u32, y as u32);
            let (r, g, b) = (p[0] as f32, p[1] as f32, p[2] as f32);
            y_plane[y * w + x] = (0.299 * r + 0.587 * g + 0.114 * b).round() as u8;
            if x % 2 == 0 && y % 2 == 0 {
                let i = (y / 2) * w + x;
                vu_plane[i] = (0.5 * r - 0.419 * g - 0.081 * b + 128.0).round().clamp(0.0, 255.0) as u8;
                vu_plane[i + 1] = (-0.169 * r - 0.331 * g + 0.5 * b + 128.0).round().clamp(0.0, 255.0) as u8;
            }
        }
    }
    (w, h, y_plane, vu_plane)
}

/// Horizontal luma ramp with chroma varying across the frame.
fn gradient_nv21(w: usize, h: usize) -> (usize, usize, Vec<u8>, Vec<u8>) {
    let y_plane = (0..w * h).map(|i| ((i % w) * 255 / w) as u8).collect();
    let vu_plane = (0..w * h / 2)
        .map(|i| if i % 2 == 0 { ((i / w) * 255 / (h / 2)) as u8 } else { 128 })
        .collect();
    (w, h, y_plane, vu_plane)
}
