//! A `GpuBackend` that records every call instead of talking to a GPU.
//!
//! Identity draws are rasterized into in-memory framebuffers: each mesh can
//! be given a footprint (a pixel rectangle at a fixed depth) which the draw
//! fills with the encoded id and depth, exactly as the identity program would.

use std::collections::{HashMap, HashSet};

use flow_scene::{
    Matrix4,
    backend::{
        CompiledProgram, DrawCall, GpuBackend, IdentityDrawCall, MeshBuffers, PixelRect,
        RenderTarget, TargetOf,
    },
    data_structures::{
        keys::{CoatKey, MeshKey},
        material::Coat,
        mesh::MeshData,
    },
    pick::encode_pixel,
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub programs_created: usize,
    pub programs_deleted: usize,
    pub buffers_created: usize,
    pub buffers_deleted: usize,
    pub parameters_created: usize,
    pub parameters_deleted: usize,
    pub targets_created: usize,
    pub targets_deleted: usize,
    pub clears: usize,
    pub reads: usize,
}

#[derive(Clone, Debug)]
pub struct MockBuffer {
    pub mesh: MeshKey,
}

#[derive(Clone, Debug)]
pub struct MockParameters {
    pub coat: CoatKey,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MockFramebuffer {
    pub id: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug)]
pub struct RecordedDraw {
    pub program: String,
    pub mesh: MeshKey,
    pub coat: CoatKey,
    pub world: Option<Matrix4<f32>>,
    pub clip: Matrix4<f32>,
    /// Target id, `None` for the display target.
    pub target: Option<u32>,
}

#[derive(Clone, Debug)]
pub struct RecordedIdentityDraw {
    pub mesh: MeshKey,
    pub id: u32,
    pub target: Option<u32>,
}

/// Where a mesh lands in every target it is drawn into.
#[derive(Copy, Clone, Debug)]
pub struct Footprint {
    pub rect: PixelRect,
    pub depth: f32,
}

#[derive(Default)]
pub struct RecordingBackend {
    pub counts: CallCounts,
    pub draws: Vec<RecordedDraw>,
    pub identity_draws: Vec<RecordedIdentityDraw>,
    pub read_rects: Vec<PixelRect>,
    pub fail_program_labels: HashSet<String>,
    pub fail_meshes: HashSet<MeshKey>,
    footprints: HashMap<MeshKey, Footprint>,
    framebuffers: HashMap<u32, Vec<u8>>,
    bound: Option<MockFramebuffer>,
    next_target: u32,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_footprint(&mut self, mesh: MeshKey, rect: PixelRect, depth: f32) {
        self.footprints.insert(mesh, Footprint { rect, depth });
    }

    /// Render targets that were created and not deleted yet.
    pub fn live_targets(&self) -> usize {
        self.framebuffers.len()
    }
}

impl GpuBackend for RecordingBackend {
    type Program = String;
    type Buffer = MockBuffer;
    type Parameters = MockParameters;
    type Texture = u32;
    type Framebuffer = MockFramebuffer;

    fn create_program(
        &mut self,
        label: &str,
        _vertex_source: &str,
        _fragment_source: &str,
        uniforms: &[String],
    ) -> anyhow::Result<CompiledProgram<Self::Program>> {
        if self.fail_program_labels.contains(label) {
            anyhow::bail!("program {label:?} does not compile");
        }
        self.counts.programs_created += 1;
        Ok(CompiledProgram {
            handle: label.to_string(),
            attribute_locations: [("position", 0), ("uv", 1), ("normal", 2)]
                .into_iter()
                .map(|(name, location)| (name.to_string(), location))
                .collect(),
            uniform_locations: uniforms
                .iter()
                .enumerate()
                .map(|(location, name)| (name.clone(), location as u32))
                .collect(),
        })
    }

    fn delete_program(&mut self, _program: CompiledProgram<Self::Program>) {
        self.counts.programs_deleted += 1;
    }

    fn create_buffers(&mut self, mesh: &MeshData) -> anyhow::Result<MeshBuffers<Self::Buffer>> {
        if self.fail_meshes.contains(&mesh.key()) {
            anyhow::bail!("out of memory uploading {:?}", mesh.label);
        }
        self.counts.buffers_created += 1;
        let buffer = MockBuffer { mesh: mesh.key() };
        Ok(MeshBuffers {
            vertex: buffer.clone(),
            index: buffer.clone(),
            uv: buffer.clone(),
            normal: buffer,
            index_count: mesh.index_count(),
        })
    }

    fn delete_buffers(&mut self, _buffers: MeshBuffers<Self::Buffer>) {
        self.counts.buffers_deleted += 1;
    }

    fn create_parameter_object(&mut self, coat: &Coat) -> anyhow::Result<Self::Parameters> {
        self.counts.parameters_created += 1;
        Ok(MockParameters { coat: coat.key() })
    }

    fn delete_parameter_object(&mut self, _parameters: Self::Parameters) {
        self.counts.parameters_deleted += 1;
    }

    fn create_render_target(&mut self, width: u32, height: u32) -> anyhow::Result<TargetOf<Self>> {
        self.counts.targets_created += 1;
        self.next_target += 1;
        let id = self.next_target;
        self.framebuffers
            .insert(id, vec![0xAA; (width * height * 4) as usize]);
        Ok(RenderTarget {
            texture: id,
            framebuffer: MockFramebuffer { id, width, height },
            width,
            height,
        })
    }

    fn delete_render_target(&mut self, target: TargetOf<Self>) {
        self.counts.targets_deleted += 1;
        self.framebuffers.remove(&target.framebuffer.id);
    }

    fn bind_render_target(&mut self, target: Option<&TargetOf<Self>>) {
        self.bound = target.map(|t| t.framebuffer);
    }

    fn clear(&mut self, target: Option<&TargetOf<Self>>) -> anyhow::Result<()> {
        self.counts.clears += 1;
        if let Some(target) = target {
            if let Some(pixels) = self.framebuffers.get_mut(&target.framebuffer.id) {
                pixels.fill(0);
            }
        }
        Ok(())
    }

    fn draw(&mut self, call: DrawCall<'_, Self>) -> anyhow::Result<()> {
        self.draws.push(RecordedDraw {
            program: call.program.handle.clone(),
            mesh: call.buffers.vertex.mesh,
            coat: call.parameters.coat,
            world: call.world,
            clip: call.clip,
            target: self.bound.map(|fb| fb.id),
        });
        Ok(())
    }

    fn draw_with_identity(&mut self, call: IdentityDrawCall<'_, Self>) -> anyhow::Result<()> {
        let mesh = call.buffers.vertex.mesh;
        self.identity_draws.push(RecordedIdentityDraw {
            mesh,
            id: call.id,
            target: self.bound.map(|fb| fb.id),
        });
        let (Some(bound), Some(footprint)) = (self.bound, self.footprints.get(&mesh)) else {
            return Ok(());
        };
        let Some(pixels) = self.framebuffers.get_mut(&bound.id) else {
            anyhow::bail!("bound target {} was deleted", bound.id);
        };
        let encoded = encode_pixel(call.id, footprint.depth);
        for y in footprint.rect.y..(footprint.rect.y + footprint.rect.height).min(bound.height) {
            for x in footprint.rect.x..(footprint.rect.x + footprint.rect.width).min(bound.width) {
                let offset = ((y * bound.width + x) * 4) as usize;
                pixels[offset..offset + 4].copy_from_slice(&encoded);
            }
        }
        Ok(())
    }

    fn read_pixels(
        &mut self,
        framebuffer: &Self::Framebuffer,
        rect: PixelRect,
    ) -> anyhow::Result<Vec<u8>> {
        self.counts.reads += 1;
        self.read_rects.push(rect);
        let Some(pixels) = self.framebuffers.get(&framebuffer.id) else {
            anyhow::bail!("target {} was deleted", framebuffer.id);
        };
        let mut out = Vec::with_capacity((rect.width * rect.height * 4) as usize);
        for y in rect.y..rect.y + rect.height {
            let start = ((y * framebuffer.width + rect.x) * 4) as usize;
            out.extend_from_slice(&pixels[start..start + (rect.width * 4) as usize]);
        }
        Ok(out)
    }
}
