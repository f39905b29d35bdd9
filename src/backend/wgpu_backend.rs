//! [`GpuBackend`] on top of wgpu.
//!
//! Programs are render pipelines built from WGSL with `vs_main`/`fs_main`
//! entry points. Every program shares one bind-group scheme so that any
//! program can draw any mesh with any coat:
//!
//! - vertex buffers: location 0 position (`vec3<f32>`), 1 uv (`vec2<f32>`),
//!   2 normal (`vec3<f32>`), each in its own buffer;
//! - group 0: the per-draw uniform, see [`WGSL_PRELUDE`];
//! - group 1: the coat uniform.
//!
//! Colour targets are `Rgba8Unorm` so pick ids and depths survive the round
//! trip through the framebuffer byte for byte.

use std::{
    collections::HashMap,
    iter,
};

use anyhow::{Context as _, bail, ensure};
use cgmath::{Matrix4, SquareMatrix};
use wgpu::util::DeviceExt;

use crate::{
    backend::{
        CompiledProgram, DrawCall, GpuBackend, IdentityDrawCall, MeshBuffers, PixelRect,
        RenderTarget, TargetOf,
    },
    config::WgpuConfig,
    context::Context,
    data_structures::{
        material::{CLIP_UNIFORM, Coat, CoatUniform, IDENTITY_UNIFORM, WORLD_UNIFORM},
        mesh::MeshData,
    },
};

pub const COLOUR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Declarations every program source has to agree with.
pub const WGSL_PRELUDE: &str = r#"
struct DrawUniform {
    clip: mat4x4<f32>,
    world: mat4x4<f32>,
    identity: vec4<u32>,
};
@group(0) @binding(0) var<uniform> draw_uniform: DrawUniform;
@group(1) @binding(0) var<uniform> coat_colour: vec4<f32>;
"#;

const ATTRIBUTE_LOCATIONS: [(&str, u32); 3] = [("position", 0), ("uv", 1), ("normal", 2)];
const UNIFORM_LOCATIONS: [(&str, u32); 3] =
    [(CLIP_UNIFORM, 0), (WORLD_UNIFORM, 1), (IDENTITY_UNIFORM, 2)];

const POSITION_ATTRIBUTES: [wgpu::VertexAttribute; 1] = [wgpu::VertexAttribute {
    format: wgpu::VertexFormat::Float32x3,
    offset: 0,
    shader_location: 0,
}];
const UV_ATTRIBUTES: [wgpu::VertexAttribute; 1] = [wgpu::VertexAttribute {
    format: wgpu::VertexFormat::Float32x2,
    offset: 0,
    shader_location: 1,
}];
const NORMAL_ATTRIBUTES: [wgpu::VertexAttribute; 1] = [wgpu::VertexAttribute {
    format: wgpu::VertexFormat::Float32x3,
    offset: 0,
    shader_location: 2,
}];

fn vertex_layouts() -> [wgpu::VertexBufferLayout<'static>; 3] {
    use std::mem;
    [
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &POSITION_ATTRIBUTES,
        },
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<[f32; 2]>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &UV_ATTRIBUTES,
        },
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &NORMAL_ATTRIBUTES,
        },
    ]
}

/// The per-draw uniform as stored on the GPU.
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct DrawUniform {
    clip: [[f32; 4]; 4],
    world: [[f32; 4]; 4],
    // Only x is used; the rest pads the struct to 16 bytes.
    identity: [u32; 4],
}

impl DrawUniform {
    fn new(clip: Matrix4<f32>, world: Matrix4<f32>, id: u32) -> Self {
        Self {
            clip: clip.into(),
            world: world.into(),
            identity: [id, 0, 0, 0],
        }
    }
}

/// A coat uploaded to a uniform buffer.
#[derive(Debug, Clone)]
pub struct WgpuParameters {
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

/// Colour and depth attachments of one render target.
#[derive(Debug, Clone)]
pub struct WgpuFramebuffer {
    colour: wgpu::Texture,
    colour_view: wgpu::TextureView,
    depth: wgpu::Texture,
    depth_view: wgpu::TextureView,
    width: u32,
    height: u32,
}

impl WgpuFramebuffer {
    fn new(device: &wgpu::Device, width: u32, height: u32, label: &str) -> Self {
        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let colour = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&format!("{label} colour")),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: COLOUR_FORMAT,
            usage: wgpu::TextureUsages::COPY_SRC | wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let depth = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&format!("{label} depth")),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let colour_view = colour.create_view(&wgpu::TextureViewDescriptor::default());
        let depth_view = depth.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            colour,
            colour_view,
            depth,
            depth_view,
            width,
            height,
        }
    }
}

pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    // Buffer mapping is async; readback blocks on it here.
    runtime: tokio::runtime::Runtime,
    uniform_layout: wgpu::BindGroupLayout,
    coat_layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
    uniform_group: wgpu::BindGroup,
    // Bound for identity draws, which ignore the coat.
    blank_coat: WgpuParameters,
    display: WgpuFramebuffer,
    bound: Option<WgpuFramebuffer>,
    clear_colour: wgpu::Color,
}

impl WgpuBackend {
    pub fn new(ctx: &Context, config: &WgpuConfig) -> anyhow::Result<Self> {
        ensure!(
            config.width > 0 && config.height > 0,
            "display target must not be empty, got {}x{}",
            config.width,
            config.height
        );
        let device = ctx.device.clone();
        let queue = ctx.queue.clone();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .context("failed to start the readback runtime")?;

        let uniform_layout = uniform_bind_group_layout(&device, "draw_uniform_layout");
        let coat_layout = uniform_bind_group_layout(&device, "coat_layout");

        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Draw Uniform Buffer"),
            contents: bytemuck::cast_slice(&[DrawUniform::new(
                Matrix4::identity(),
                Matrix4::identity(),
                0,
            )]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let uniform_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
            label: Some("draw_uniform_bind_group"),
        });
        let blank_coat = coat_parameters(&device, &coat_layout, "blank coat", CoatUniform {
            colour: [0.0; 4],
        });
        let display = WgpuFramebuffer::new(&device, config.width, config.height, "display");

        Ok(Self {
            device,
            queue,
            runtime,
            uniform_layout,
            coat_layout,
            uniform_buffer,
            uniform_group,
            blank_coat,
            display,
            bound: None,
            clear_colour: config.clear_colour,
        })
    }

    pub fn display_framebuffer(&self) -> &WgpuFramebuffer {
        &self.display
    }

    /// Read the whole display target.
    pub fn read_display(&mut self) -> anyhow::Result<Vec<u8>> {
        let display = self.display.clone();
        self.read_pixels(&display, PixelRect::new(0, 0, display.width, display.height))
    }

    fn submit_draw(
        &self,
        pipeline: &wgpu::RenderPipeline,
        buffers: &MeshBuffers<wgpu::Buffer>,
        coat: &wgpu::BindGroup,
        uniform: DrawUniform,
    ) {
        self.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::cast_slice(&[uniform]));
        let framebuffer = self.bound.as_ref().unwrap_or(&self.display);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Draw Encoder"),
            });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Draw Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &framebuffer.colour_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &framebuffer.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
                multiview_mask: None,
            });
            render_pass.set_pipeline(pipeline);
            render_pass.set_bind_group(0, &self.uniform_group, &[]);
            render_pass.set_bind_group(1, coat, &[]);
            render_pass.set_vertex_buffer(0, buffers.vertex.slice(..));
            render_pass.set_vertex_buffer(1, buffers.uv.slice(..));
            render_pass.set_vertex_buffer(2, buffers.normal.slice(..));
            render_pass.set_index_buffer(buffers.index.slice(..), wgpu::IndexFormat::Uint32);
            render_pass.draw_indexed(0..buffers.index_count, 0, 0..1);
        }
        self.queue.submit(iter::once(encoder.finish()));
    }
}

impl GpuBackend for WgpuBackend {
    type Program = wgpu::RenderPipeline;
    type Buffer = wgpu::Buffer;
    type Parameters = WgpuParameters;
    type Texture = wgpu::Texture;
    type Framebuffer = WgpuFramebuffer;

    fn create_program(
        &mut self,
        label: &str,
        vertex_source: &str,
        fragment_source: &str,
        uniforms: &[String],
    ) -> anyhow::Result<CompiledProgram<Self::Program>> {
        ensure!(
            vertex_source.contains("vs_main"),
            "vertex source of {label:?} has no vs_main entry point"
        );
        ensure!(
            fragment_source.contains("fs_main"),
            "fragment source of {label:?} has no fs_main entry point"
        );
        let mut uniform_locations = HashMap::new();
        for uniform in uniforms {
            let Some(&(_, location)) = UNIFORM_LOCATIONS.iter().find(|(name, _)| *name == uniform.as_str())
            else {
                bail!("program {label:?} declares unsupported uniform {uniform:?}");
            };
            uniform_locations.insert(uniform.clone(), location);
        }

        // Compile and validation errors are captured here instead of reaching
        // the device's uncaptured error handler, which panics.
        let scope = self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let vertex_module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&format!("{label} vertex")),
            source: wgpu::ShaderSource::Wgsl(vertex_source.into()),
        });
        let fragment_module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&format!("{label} fragment")),
            source: wgpu::ShaderSource::Wgsl(fragment_source.into()),
        });
        let layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(&format!("{label} layout")),
                bind_group_layouts: &[Some(&self.uniform_layout), Some(&self.coat_layout)],
                immediate_size: 0,
            });
        let vertex_layouts = vertex_layouts();

        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                cache: None,
                label: Some(label),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &vertex_module,
                    entry_point: Some("vs_main"),
                    buffers: &vertex_layouts,
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &fragment_module,
                    entry_point: Some("fs_main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: COLOUR_FORMAT,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    // Silhouettes must be pickable from both sides.
                    cull_mode: None,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: Some(true),
                    depth_compare: Some(wgpu::CompareFunction::Less),
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState {
                    count: 1,
                    mask: !0,
                    alpha_to_coverage_enabled: false,
                },
                multiview_mask: None,
            });
        if let Some(error) = self.runtime.block_on(scope.pop()) {
            bail!("program {label:?} failed to compile: {error}");
        }

        Ok(CompiledProgram {
            handle: pipeline,
            attribute_locations: ATTRIBUTE_LOCATIONS
                .iter()
                .map(|&(name, location)| (name.to_string(), location))
                .collect(),
            uniform_locations,
        })
    }

    fn delete_program(&mut self, program: CompiledProgram<Self::Program>) {
        drop(program);
    }

    fn create_buffers(&mut self, mesh: &MeshData) -> anyhow::Result<MeshBuffers<Self::Buffer>> {
        let label = &mesh.label;
        let vertex = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{label:?} Vertex Buffer")),
            contents: bytemuck::cast_slice(mesh.positions()),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{label:?} Index Buffer")),
            contents: bytemuck::cast_slice(mesh.indices()),
            usage: wgpu::BufferUsages::INDEX,
        });
        let uv = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{label:?} UV Buffer")),
            contents: bytemuck::cast_slice(mesh.uvs()),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let normal = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{label:?} Normal Buffer")),
            contents: bytemuck::cast_slice(mesh.normals()),
            usage: wgpu::BufferUsages::VERTEX,
        });
        Ok(MeshBuffers {
            vertex,
            index,
            uv,
            normal,
            index_count: mesh.index_count(),
        })
    }

    fn delete_buffers(&mut self, buffers: MeshBuffers<Self::Buffer>) {
        buffers.vertex.destroy();
        buffers.index.destroy();
        buffers.uv.destroy();
        buffers.normal.destroy();
    }

    fn create_parameter_object(&mut self, coat: &Coat) -> anyhow::Result<Self::Parameters> {
        Ok(coat_parameters(
            &self.device,
            &self.coat_layout,
            &coat.label,
            coat.to_uniform(),
        ))
    }

    fn delete_parameter_object(&mut self, parameters: Self::Parameters) {
        parameters.buffer.destroy();
    }

    fn create_render_target(&mut self, width: u32, height: u32) -> anyhow::Result<TargetOf<Self>> {
        ensure!(
            width > 0 && height > 0,
            "render target must not be empty, got {width}x{height}"
        );
        let framebuffer = WgpuFramebuffer::new(&self.device, width, height, "Pick target");
        Ok(RenderTarget {
            texture: framebuffer.colour.clone(),
            framebuffer,
            width,
            height,
        })
    }

    fn delete_render_target(&mut self, target: TargetOf<Self>) {
        target.framebuffer.colour.destroy();
        target.framebuffer.depth.destroy();
    }

    fn bind_render_target(&mut self, target: Option<&TargetOf<Self>>) {
        self.bound = target.map(|t| t.framebuffer.clone());
    }

    fn clear(&mut self, target: Option<&TargetOf<Self>>) -> anyhow::Result<()> {
        let (framebuffer, colour) = match target {
            Some(target) => (&target.framebuffer, wgpu::Color::TRANSPARENT),
            None => (&self.display, self.clear_colour),
        };
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Clear Encoder"),
            });
        {
            let _render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Clear Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &framebuffer.colour_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(colour),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &framebuffer.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
                multiview_mask: None,
            });
        }
        self.queue.submit(iter::once(encoder.finish()));
        Ok(())
    }

    fn draw(&mut self, call: DrawCall<'_, Self>) -> anyhow::Result<()> {
        let uniform = DrawUniform::new(
            call.clip,
            call.world.unwrap_or_else(Matrix4::identity),
            0,
        );
        self.submit_draw(
            &call.program.handle,
            call.buffers,
            &call.parameters.bind_group,
            uniform,
        );
        Ok(())
    }

    fn draw_with_identity(&mut self, call: IdentityDrawCall<'_, Self>) -> anyhow::Result<()> {
        let uniform = DrawUniform::new(call.clip, call.world, call.id);
        self.submit_draw(
            &call.program.handle,
            call.buffers,
            &self.blank_coat.bind_group,
            uniform,
        );
        Ok(())
    }

    fn read_pixels(
        &mut self,
        framebuffer: &Self::Framebuffer,
        rect: PixelRect,
    ) -> anyhow::Result<Vec<u8>> {
        ensure!(
            rect.width > 0
                && rect.height > 0
                && rect.x + rect.width <= framebuffer.width
                && rect.y + rect.height <= framebuffer.height,
            "{rect:?} is outside the {}x{} framebuffer",
            framebuffer.width,
            framebuffer.height
        );
        let bytes_per_pixel = 4;
        let unpadded_bytes_per_row = rect.width * bytes_per_pixel;
        // Texture to buffer copies need 256 byte aligned rows.
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(align) * align;

        let output_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            size: (padded_bytes_per_row * rect.height) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST
                    // this tells wpgu that we want to read this buffer from the cpu
                    | wgpu::BufferUsages::MAP_READ,
            label: Some("Readback Buffer"),
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                aspect: wgpu::TextureAspect::All,
                texture: &framebuffer.colour,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: rect.x,
                    y: rect.y,
                    z: 0,
                },
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &output_buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(rect.height),
                },
            },
            wgpu::Extent3d {
                width: rect.width,
                height: rect.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(iter::once(encoder.finish()));

        let buffer_slice = output_buffer.slice(..);
        self.runtime
            .block_on(map_for_reading(buffer_slice, &self.device))?;

        let pixels = {
            let data = buffer_slice.get_mapped_range();
            data.chunks(padded_bytes_per_row as usize)
                .take(rect.height as usize)
                .flat_map(|row| row[..unpadded_bytes_per_row as usize].iter().copied())
                .collect::<Vec<u8>>()
        };
        output_buffer.unmap();
        Ok(pixels)
    }
}

async fn map_for_reading(
    buffer_slice: wgpu::BufferSlice<'_>,
    device: &wgpu::Device,
) -> anyhow::Result<()> {
    // NOTE: We have to create the mapping THEN device.poll() before await
    // the future. Otherwise the application will freeze.
    let (tx, rx) = futures_intrusive::channel::shared::oneshot_channel();
    buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
        if tx.send(result).is_err() {
            log::warn!("readback mapping finished after its receiver was dropped");
        }
    });
    device.poll(wgpu::PollType::Wait {
        submission_index: None,
        timeout: None,
    })?;
    rx.receive()
        .await
        .context("readback buffer mapping was dropped")??;
    Ok(())
}

fn uniform_bind_group_layout(device: &wgpu::Device, label: &str) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }],
        label: Some(label),
    })
}

fn coat_parameters(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    label: &str,
    uniform: CoatUniform,
) -> WgpuParameters {
    let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(&format!("{label:?} Coat Buffer")),
        contents: bytemuck::cast_slice(&[uniform]),
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
    });
    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: buffer.as_entire_binding(),
        }],
        label: Some(&format!("{label:?} Coat Bind Group")),
    });
    WgpuParameters { buffer, bind_group }
}
