// gpu/composite.rs — GPU mask compositing.
//
// One dispatch over the preview grid; each invocation owns one output
// pixel, so the result is bit-identical to `composite::composite_frame`.

use crate::composite::{check_batch, CompositeParams};
use crate::gpu::buffer::{
    copy_into_image, read_buffer, storage_entry, uniform, uniform_entry, upload_image,
    upload_slice, zeroed,
};
use crate::gpu::check_shader_grid;
use crate::gpu::device::{GpuDevice, GpuError};
use crate::image::{Image, Rgba};
use crate::tensor::InferenceMask;

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct CompositeUniform {
    preview_width:  u32,
    preview_height: u32,
    tensor_width:   u32,
    tensor_height:  u32,
}

/// Compiled `composite` compute pipeline.
pub struct GpuCompositePipeline {
    pipeline: wgpu::ComputePipeline,
    bgl:      wgpu::BindGroupLayout,
}

impl GpuCompositePipeline {
    pub fn new(gpu: &GpuDevice) -> Self {
        let shader = gpu.shader_module("composite.wgsl", include_str!("../shaders/composite.wgsl"));

        let bgl = gpu.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("GpuComposite BGL"),
            entries: &[
                storage_entry(0, true),  // sharp preview
                storage_entry(1, true),  // blurred preview
                storage_entry(2, true),  // mask
                storage_entry(3, false), // output
                uniform_entry(4),        // params
            ],
        });

        let layout = gpu.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("GpuComposite pipeline layout"),
            bind_group_layouts: &[&bgl],
            push_constant_ranges: &[],
        });

        let pipeline = gpu.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label:               Some("composite"),
            layout:              Some(&layout),
            module:              &shader,
            entry_point:         "composite",
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache:               None,
        });

        GpuCompositePipeline { pipeline, bgl }
    }

    /// Compose `output` from `preview`, `blurred` and `mask`.
    pub fn run(
        &self,
        gpu: &GpuDevice,
        params: &CompositeParams,
        preview: &Image<Rgba>,
        mask: &InferenceMask,
        blurred: &Image<Rgba>,
        output: &mut Image<Rgba>,
    ) -> Result<(), GpuError> {
        check_batch(params, preview, mask, blurred, output)?;
        let g = params.grid;
        check_shader_grid(&g)?;

        let n_pixels = g.preview_width * g.preview_height;
        let uniform_buf = uniform(gpu, "GpuComposite params", &CompositeUniform {
            preview_width:  g.preview_width as u32,
            preview_height: g.preview_height as u32,
            tensor_width:   g.tensor_width as u32,
            tensor_height:  g.tensor_height as u32,
        });
        let sharp_buf = upload_image(gpu, "GpuComposite sharp", preview);
        let blurred_buf = upload_image(gpu, "GpuComposite blurred", blurred);
        let mask_buf = upload_slice(gpu, "GpuComposite mask", mask.as_slice());
        let output_buf = zeroed(gpu, "GpuComposite output", (n_pixels * std::mem::size_of::<Rgba>()) as u64);

        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("GpuComposite BG"),
            layout: &self.bgl,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: sharp_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: blurred_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: mask_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: output_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 4, resource: uniform_buf.as_entire_binding() },
            ],
        });

        let mut encoder = gpu.device.create_command_encoder(
            &wgpu::CommandEncoderDescriptor { label: Some("GpuComposite dispatch") },
        );
        {
            let mut pass = encoder.begin_compute_pass(
                &wgpu::ComputePassDescriptor { label: Some("composite"), timestamp_writes: None },
            );
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            let (dx, dy) = gpu.dispatch_size(g.preview_width as u32, g.preview_height as u32);
            pass.dispatch_workgroups(dx, dy, 1);
        }
        gpu.queue.submit(std::iter::once(encoder.finish()));

        let pixels: Vec<Rgba> = read_buffer(gpu, &output_buf, n_pixels)?;
        copy_into_image(&pixels, output);
        Ok(())
    }
}
