//! The GPU capability surface.
//!
//! Everything this crate does to the GPU goes through [`GpuBackend`]: creating
//! and deleting programs, buffers, parameter objects and render targets,
//! issuing draws, and reading pixels back. Handles are associated types, so the
//! caches stay generic and a test backend can stand in for the real one.

use std::collections::HashMap;

use cgmath::Matrix4;

use crate::data_structures::{material::Coat, mesh::MeshData};

pub mod wgpu_backend;

/// A compiled program together with where its inputs live.
#[derive(Clone, Debug)]
pub struct CompiledProgram<P> {
    pub handle: P,
    pub attribute_locations: HashMap<String, u32>,
    pub uniform_locations: HashMap<String, u32>,
}

impl<P> CompiledProgram<P> {
    pub fn declares_uniform(&self, name: &str) -> bool {
        self.uniform_locations.contains_key(name)
    }
}

/// The GPU buffers created from one mesh.
#[derive(Clone, Debug)]
pub struct MeshBuffers<B> {
    pub vertex: B,
    pub index: B,
    pub uv: B,
    pub normal: B,
    pub index_count: u32,
}

/// An offscreen colour target and the framebuffer it is attached to.
#[derive(Clone, Debug)]
pub struct RenderTarget<T, F> {
    pub texture: T,
    pub framebuffer: F,
    pub width: u32,
    pub height: u32,
}

/// A rectangle of pixels, origin top-left.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn pixel(x: u32, y: u32) -> Self {
        Self::new(x, y, 1, 1)
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && y >= self.y && x - self.x < self.width && y - self.y < self.height
    }
}

pub type TargetOf<B> = RenderTarget<<B as GpuBackend>::Texture, <B as GpuBackend>::Framebuffer>;

/// A regular draw of one node.
pub struct DrawCall<'a, B: GpuBackend + ?Sized> {
    pub program: &'a CompiledProgram<B::Program>,
    pub buffers: &'a MeshBuffers<B::Buffer>,
    pub parameters: &'a B::Parameters,
    /// Only present when the program declares the world uniform.
    pub world: Option<Matrix4<f32>>,
    pub clip: Matrix4<f32>,
}

/// A draw of one node with the identity-encoding program.
pub struct IdentityDrawCall<'a, B: GpuBackend + ?Sized> {
    pub program: &'a CompiledProgram<B::Program>,
    pub buffers: &'a MeshBuffers<B::Buffer>,
    /// 1-based index of the node within the pick pass.
    pub id: u32,
    pub world: Matrix4<f32>,
    pub clip: Matrix4<f32>,
}

pub trait GpuBackend: Sized {
    type Program;
    type Buffer;
    type Parameters;
    type Texture;
    type Framebuffer;

    fn create_program(
        &mut self,
        label: &str,
        vertex_source: &str,
        fragment_source: &str,
        uniforms: &[String],
    ) -> anyhow::Result<CompiledProgram<Self::Program>>;

    fn delete_program(&mut self, program: CompiledProgram<Self::Program>);

    fn create_buffers(&mut self, mesh: &MeshData) -> anyhow::Result<MeshBuffers<Self::Buffer>>;

    fn delete_buffers(&mut self, buffers: MeshBuffers<Self::Buffer>);

    fn create_parameter_object(&mut self, coat: &Coat) -> anyhow::Result<Self::Parameters>;

    fn delete_parameter_object(&mut self, parameters: Self::Parameters);

    fn create_render_target(&mut self, width: u32, height: u32) -> anyhow::Result<TargetOf<Self>>;

    fn delete_render_target(&mut self, target: TargetOf<Self>);

    /// Direct subsequent draws to `target`, or to the display target for `None`.
    fn bind_render_target(&mut self, target: Option<&TargetOf<Self>>);

    /// Clear colour and depth of `target`, or of the display target for `None`.
    /// Offscreen targets clear to all-zero colour.
    fn clear(&mut self, target: Option<&TargetOf<Self>>) -> anyhow::Result<()>;

    fn draw(&mut self, call: DrawCall<'_, Self>) -> anyhow::Result<()>;

    fn draw_with_identity(&mut self, call: IdentityDrawCall<'_, Self>) -> anyhow::Result<()>;

    /// Tightly packed RGBA8 rows of `rect`.
    fn read_pixels(&mut self, framebuffer: &Self::Framebuffer, rect: PixelRect) -> anyhow::Result<Vec<u8>>;
}
