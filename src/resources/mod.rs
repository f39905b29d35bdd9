//! GPU resources shared between scene nodes.
//!
//! [`RenderResources`] owns the backend and one [`ResourceCache`] per kind of
//! shareable input: compiled programs per shader class, parameter objects per
//! coat, and buffers per mesh. It is passed around explicitly; there is no
//! global registry.

pub mod cache;
pub mod registry;

use anyhow::Context as _;

use crate::{
    backend::{CompiledProgram, GpuBackend, MeshBuffers},
    data_structures::{
        keys::{CoatKey, MeshKey, ShaderKey},
        material::{Coat, ShaderClass},
        mesh::MeshData,
    },
    resources::cache::ResourceCache,
};

pub type ProgramCache<B> = ResourceCache<ShaderKey, CompiledProgram<<B as GpuBackend>::Program>>;
pub type CoatCache<B> = ResourceCache<CoatKey, <B as GpuBackend>::Parameters>;
pub type MeshCache<B> = ResourceCache<MeshKey, MeshBuffers<<B as GpuBackend>::Buffer>>;

pub struct RenderResources<B: GpuBackend> {
    pub backend: B,
    shaders: ProgramCache<B>,
    coats: CoatCache<B>,
    meshes: MeshCache<B>,
}

impl<B: GpuBackend> RenderResources<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            shaders: ResourceCache::new(),
            coats: ResourceCache::new(),
            meshes: ResourceCache::new(),
        }
    }

    pub fn ensure_program(&mut self, shader: &ShaderClass) -> anyhow::Result<&CompiledProgram<B::Program>> {
        let backend = &mut self.backend;
        self.shaders.ensure(shader.key(), |key| {
            backend
                .create_program(
                    &shader.label,
                    &shader.vertex_source,
                    &shader.fragment_source,
                    shader.uniforms(),
                )
                .with_context(|| format!("failed to compile {key} ({:?})", shader.label))
        })
    }

    pub fn release_program(&mut self, key: ShaderKey) {
        let backend = &mut self.backend;
        self.shaders.release(&key, |program| backend.delete_program(program));
    }

    pub fn ensure_parameters(&mut self, coat: &Coat) -> anyhow::Result<&B::Parameters> {
        let backend = &mut self.backend;
        self.coats.ensure(coat.key(), |key| {
            backend
                .create_parameter_object(coat)
                .with_context(|| format!("failed to create parameters for {key} ({:?})", coat.label))
        })
    }

    pub fn release_parameters(&mut self, key: CoatKey) {
        let backend = &mut self.backend;
        self.coats
            .release(&key, |parameters| backend.delete_parameter_object(parameters));
    }

    pub fn ensure_buffers(&mut self, mesh: &MeshData) -> anyhow::Result<&MeshBuffers<B::Buffer>> {
        let backend = &mut self.backend;
        self.meshes.ensure(mesh.key(), |key| {
            backend
                .create_buffers(mesh)
                .with_context(|| format!("failed to upload {key} ({:?})", mesh.label))
        })
    }

    pub fn release_buffers(&mut self, key: MeshKey) {
        let backend = &mut self.backend;
        self.meshes.release(&key, |buffers| backend.delete_buffers(buffers));
    }

    pub fn program(&self, key: ShaderKey) -> Option<&CompiledProgram<B::Program>> {
        self.shaders.get(&key)
    }

    pub fn parameters(&self, key: CoatKey) -> Option<&B::Parameters> {
        self.coats.get(&key)
    }

    pub fn buffers(&self, key: MeshKey) -> Option<&MeshBuffers<B::Buffer>> {
        self.meshes.get(&key)
    }

    pub fn shaders(&self) -> &ProgramCache<B> {
        &self.shaders
    }

    pub fn coats(&self) -> &CoatCache<B> {
        &self.coats
    }

    pub fn meshes(&self) -> &MeshCache<B> {
        &self.meshes
    }

    /// The backend together with read access to all three caches, for issuing
    /// draws that reference cached handles.
    pub fn split_mut(&mut self) -> (&mut B, &ProgramCache<B>, &CoatCache<B>, &MeshCache<B>) {
        (&mut self.backend, &self.shaders, &self.coats, &self.meshes)
    }

    /// Destroy every cached object and give the backend back. Entries that are
    /// still referenced are destroyed too, with a warning.
    pub fn shutdown(mut self) -> B {
        let backend = &mut self.backend;
        for (key, entry) in self.shaders.drain() {
            if key != ShaderKey::IDENTITY_ENCODING {
                log::warn!("{key} still has {} users at shutdown", entry.count);
            }
            backend.delete_program(entry.handle);
        }
        for (key, entry) in self.coats.drain() {
            log::warn!("{key} still has {} users at shutdown", entry.count);
            backend.delete_parameter_object(entry.handle);
        }
        for (key, entry) in self.meshes.drain() {
            log::warn!("{key} still has {} users at shutdown", entry.count);
            backend.delete_buffers(entry.handle);
        }
        self.backend
    }
}
