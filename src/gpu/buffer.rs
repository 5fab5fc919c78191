// gpu/buffer.rs — Storage-buffer helpers shared by the compute pipelines.
//
// WHY STORAGE BUFFERS AND NOT TEXTURES?
// ─────────────────────────────────────
// The camera planes are addressed with arbitrary row and pixel strides, and
// NV12/NV21 chroma views start one byte into the interleaved plane. None of
// that maps onto a texture, so every input is a flat storage buffer and the
// shaders compute indices exactly like the CPU kernels.
//
// BYTE PLANES
// ───────────
// WGSL has no 8-bit storage type. Byte planes are packed little-endian into
// `array<u32>`; the shaders extract byte `i` as
//
//   (words[i >> 2] >> ((i & 3) * 8)) & 0xff
//
// RGBA pixels use the same little-endian packing (`Rgba::to_packed`), so an
// `Image<Rgba>` row is uploaded as-is through bytemuck.
//
// READBACK
// ────────
// `read_buffer` copies into a MAP_READ staging buffer, blocks on
// `device.poll(Wait)` and returns an owned Vec. Expensive and synchronous;
// one call per output per frame.

use wgpu::util::DeviceExt;

use crate::gpu::device::{GpuDevice, GpuError};
use crate::image::{Image, Pixel};

/// Usage flags for every storage buffer created here.
const STORAGE_USAGE: wgpu::BufferUsages = wgpu::BufferUsages::STORAGE
    .union(wgpu::BufferUsages::COPY_SRC)
    .union(wgpu::BufferUsages::COPY_DST);

/// Round `value` up to the next multiple of `alignment`.
#[inline]
pub(crate) fn align_to(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

/// Pack bytes little-endian into u32 words, zero-padding the last word.
/// An empty input yields one zero word (bindings must be non-empty).
pub fn pack_bytes(data: &[u8]) -> Vec<u32> {
    let mut words: Vec<u32> = data
        .chunks(4)
        .map(|c| {
            let mut w = [0u8; 4];
            w[..c.len()].copy_from_slice(c);
            u32::from_le_bytes(w)
        })
        .collect();
    if words.is_empty() {
        words.push(0);
    }
    words
}

/// Upload a byte plane as a word-packed storage buffer.
pub fn upload_bytes(gpu: &GpuDevice, label: &str, data: &[u8]) -> wgpu::Buffer {
    upload_slice(gpu, label, &pack_bytes(data))
}

/// Upload any Pod slice as a storage buffer.
pub fn upload_slice<T: bytemuck::Pod>(gpu: &GpuDevice, label: &str, data: &[T]) -> wgpu::Buffer {
    let bytes: &[u8] = bytemuck::cast_slice(data);
    if bytes.is_empty() {
        return zeroed(gpu, label, 4);
    }
    gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: bytes,
        usage: STORAGE_USAGE,
    })
}

/// Upload an image, stripping row padding (GPU side is always compact).
pub fn upload_image<T: Pixel + bytemuck::Pod>(gpu: &GpuDevice, label: &str, img: &Image<T>) -> wgpu::Buffer {
    if img.stride() == img.width() {
        upload_slice(gpu, label, &img.as_slice()[..img.width() * img.height()])
    } else {
        upload_slice(gpu, label, &img.to_compact_vec())
    }
}

/// Zero-initialised storage buffer of at least `size` bytes.
pub fn zeroed(gpu: &GpuDevice, label: &str, size: u64) -> wgpu::Buffer {
    gpu.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: align_to(size.max(4), wgpu::COPY_BUFFER_ALIGNMENT),
        usage: STORAGE_USAGE,
        mapped_at_creation: false,
    })
}

/// Uniform buffer holding one `#[repr(C)]` params struct.
pub fn uniform<T: bytemuck::Pod>(gpu: &GpuDevice, label: &str, value: &T) -> wgpu::Buffer {
    gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: bytemuck::bytes_of(value),
        usage: wgpu::BufferUsages::UNIFORM,
    })
}

/// Read the first `len` elements of `src` back to the CPU.
///
/// Submits its own copy command; every dispatch writing `src` must have
/// been submitted before.
pub fn read_buffer<T: bytemuck::Pod>(
    gpu: &GpuDevice,
    src: &wgpu::Buffer,
    len: usize,
) -> Result<Vec<T>, GpuError> {
    let byte_len = (len * std::mem::size_of::<T>()) as u64;
    let size = align_to(byte_len.max(4), wgpu::COPY_BUFFER_ALIGNMENT);
    let staging = gpu.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("camblur readback"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = gpu.device.create_command_encoder(
        &wgpu::CommandEncoderDescriptor { label: Some("camblur readback") },
    );
    encoder.copy_buffer_to_buffer(src, 0, &staging, 0, size);
    gpu.queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |r| {
        // Receiver outlives the poll below; a send failure is unobservable.
        let _ = tx.send(r);
    });
    gpu.device.poll(wgpu::Maintain::Wait);
    rx.recv()
        .map_err(|e| GpuError::BufferMap(e.to_string()))?
        .map_err(|e| GpuError::BufferMap(e.to_string()))?;

    let out = {
        let mapped = slice.get_mapped_range();
        let mut v: Vec<T> = bytemuck::pod_collect_to_vec(&mapped[..byte_len as usize]);
        v.truncate(len);
        v
    };
    staging.unmap();
    Ok(out)
}

/// BGL entry for a compute-stage storage buffer.
pub(crate) fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// BGL entry for a compute-stage uniform buffer.
pub(crate) fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Copy a compact `width × height` readback into an image that may be
/// padded.
pub fn copy_into_image<T: Pixel>(compact: &[T], dst: &mut Image<T>) {
    let w = dst.width();
    for (row, src) in dst.rows_mut().zip(compact.chunks_exact(w)) {
        row.copy_from_slice(src);
    }
}
