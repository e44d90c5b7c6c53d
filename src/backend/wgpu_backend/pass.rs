//! Pass recording
//!
//! wgpu passes borrow everything they touch for their whole lifetime, so the
//! trait calls are buffered while a pass is open and replayed in one go when
//! it ends.

use super::{convert, Resources, WgpuBackend};
use crate::backend::traits::*;
use crate::backend::types::*;
use std::ops::Range;

#[derive(Debug, Clone)]
pub(super) enum RenderCommand {
    SetPipeline(RenderPipelineHandle),
    SetBindGroup(u32, BindGroupHandle),
    SetVertexBuffer { slot: u32, buffer: BufferHandle, offset: u64 },
    SetIndexBuffer { buffer: BufferHandle, offset: u64, format: IndexFormat },
    SetViewport(Viewport),
    Draw { vertices: Range<u32>, instances: Range<u32> },
    DrawIndexed { indices: Range<u32>, base_vertex: i32, instances: Range<u32> },
}

#[derive(Debug, Clone)]
pub(super) enum ComputeCommand {
    SetPipeline(ComputePipelineHandle),
    SetBindGroup(u32, BindGroupHandle),
    Dispatch([u32; 3]),
}

/// The pass currently being recorded
#[derive(Debug)]
pub(super) enum OpenPass {
    Render {
        descriptor: RenderPassDescriptor,
        commands: Vec<RenderCommand>,
    },
    Compute {
        label: Option<String>,
        commands: Vec<ComputeCommand>,
    },
}

impl OpenPass {
    pub(super) fn push_render(&mut self, command: RenderCommand) {
        match self {
            OpenPass::Render { commands, .. } => commands.push(command),
            OpenPass::Compute { .. } => log::warn!("{:?} recorded outside a render pass", command),
        }
    }

    pub(super) fn push_compute(&mut self, command: ComputeCommand) {
        match self {
            OpenPass::Compute { commands, .. } => commands.push(command),
            OpenPass::Render { .. } => log::warn!("{:?} recorded outside a compute pass", command),
        }
    }
}

impl WgpuBackend {
    pub(super) fn record_render(&mut self, command: RenderCommand) {
        match self.open_pass.as_mut() {
            Some(pass) => pass.push_render(command),
            None => log::warn!("{:?} recorded with no open pass", command),
        }
    }

    pub(super) fn record_compute(&mut self, command: ComputeCommand) {
        match self.open_pass.as_mut() {
            Some(pass) => pass.push_compute(command),
            None => log::warn!("{:?} recorded with no open pass", command),
        }
    }

    /// Encode the open pass into the frame's command encoder
    pub(super) fn finish_pass(&mut self) {
        let Some(pass) = self.open_pass.take() else {
            log::warn!("end of pass with no open pass");
            return;
        };
        let Some(frame) = self.frame.as_mut() else {
            log::warn!("pass ended outside of a frame, dropped");
            return;
        };
        let swapchain = (frame.view_id, &frame.view);
        match pass {
            OpenPass::Render {
                descriptor,
                commands,
            } => encode_render_pass(
                &mut frame.encoder,
                &self.resources,
                swapchain,
                &descriptor,
                &commands,
            ),
            OpenPass::Compute { label, commands } => {
                encode_compute_pass(&mut frame.encoder, &self.resources, label.as_deref(), &commands)
            }
        }
    }
}

fn encode_render_pass(
    encoder: &mut wgpu::CommandEncoder,
    resources: &Resources,
    swapchain: (u64, &wgpu::TextureView),
    descriptor: &RenderPassDescriptor,
    commands: &[RenderCommand],
) {
    let view = |handle: TextureViewHandle| {
        if handle.0 == swapchain.0 {
            Some(swapchain.1)
        } else {
            resources.views.get(&handle.0)
        }
    };

    let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = descriptor
        .color_attachments
        .iter()
        .map(|attachment| {
            Some(wgpu::RenderPassColorAttachment {
                view: view(attachment.view)?,
                resolve_target: attachment.resolve_target.and_then(view),
                ops: wgpu::Operations {
                    load: convert::load_op(&attachment.load_op, |c| wgpu::Color {
                        r: c[0] as f64,
                        g: c[1] as f64,
                        b: c[2] as f64,
                        a: c[3] as f64,
                    }),
                    store: convert::store_op(attachment.store_op),
                },
            })
        })
        .collect();

    let depth_stencil_attachment = descriptor.depth_stencil_attachment.as_ref().and_then(|depth| {
        Some(wgpu::RenderPassDepthStencilAttachment {
            view: view(depth.view)?,
            depth_ops: Some(wgpu::Operations {
                load: convert::load_op(&depth.depth_load_op, |_| depth.depth_clear_value),
                store: convert::store_op(depth.depth_store_op),
            }),
            stencil_ops: None,
        })
    });

    let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: descriptor.label.as_deref(),
        color_attachments: &color_attachments,
        depth_stencil_attachment,
        timestamp_writes: None,
        occlusion_query_set: None,
    });

    for command in commands {
        match command {
            RenderCommand::SetPipeline(handle) => {
                if let Some(pipeline) = resources.render_pipelines.get(&handle.0) {
                    pass.set_pipeline(pipeline);
                }
            }
            RenderCommand::SetBindGroup(index, handle) => {
                if let Some(group) = resources.bind_groups.get(&handle.0) {
                    pass.set_bind_group(*index, group, &[]);
                }
            }
            RenderCommand::SetVertexBuffer { slot, buffer, offset } => {
                if let Some(buffer) = resources.buffers.get(&buffer.0) {
                    pass.set_vertex_buffer(*slot, buffer.slice(*offset..));
                }
            }
            RenderCommand::SetIndexBuffer { buffer, offset, format } => {
                if let Some(buffer) = resources.buffers.get(&buffer.0) {
                    pass.set_index_buffer(buffer.slice(*offset..), convert::index_format(*format));
                }
            }
            RenderCommand::SetViewport(v) => {
                pass.set_viewport(v.x, v.y, v.width, v.height, v.min_depth, v.max_depth);
            }
            RenderCommand::Draw { vertices, instances } => {
                pass.draw(vertices.clone(), instances.clone());
            }
            RenderCommand::DrawIndexed {
                indices,
                base_vertex,
                instances,
            } => {
                pass.draw_indexed(indices.clone(), *base_vertex, instances.clone());
            }
        }
    }
}

fn encode_compute_pass(
    encoder: &mut wgpu::CommandEncoder,
    resources: &Resources,
    label: Option<&str>,
    commands: &[ComputeCommand],
) {
    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
        label,
        timestamp_writes: None,
    });

    for command in commands {
        match command {
            ComputeCommand::SetPipeline(handle) => {
                if let Some(pipeline) = resources.compute_pipelines.get(&handle.0) {
                    pass.set_pipeline(pipeline);
                }
            }
            ComputeCommand::SetBindGroup(index, handle) => {
                if let Some(group) = resources.bind_groups.get(&handle.0) {
                    pass.set_bind_group(*index, group, &[]);
                }
            }
            ComputeCommand::Dispatch([x, y, z]) => pass.dispatch_workgroups(*x, *y, *z),
        }
    }
}
