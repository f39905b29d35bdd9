//! Materials: a shader class paired with a coat.
//!
//! The shader class carries the program sources (opaque to this crate) and the
//! coat carries the parameter block the program consumes. Both are shared
//! through `Arc` so many nodes can point at the same identity.

use std::sync::Arc;

use crate::data_structures::keys::{CoatKey, ShaderKey};

/// Uniform receiving `view_projection * world * pivot`.
pub const CLIP_UNIFORM: &str = "clip";
/// Uniform receiving `world * pivot`, for programs that light in world space.
pub const WORLD_UNIFORM: &str = "world";
/// Uniform receiving the 1-based pick id of the node being drawn.
pub const IDENTITY_UNIFORM: &str = "identity";

/// A program description: vertex and fragment sources plus the uniforms the
/// program declares.
#[derive(Clone, Debug)]
pub struct ShaderClass {
    key: ShaderKey,
    pub label: String,
    pub vertex_source: String,
    pub fragment_source: String,
    uniforms: Vec<String>,
}

impl ShaderClass {
    /// Create a shader class declaring only the clip uniform.
    pub fn new(
        label: impl Into<String>,
        vertex_source: impl Into<String>,
        fragment_source: impl Into<String>,
    ) -> Self {
        Self::with_key(
            ShaderKey::next(),
            label,
            vertex_source,
            fragment_source,
            &[CLIP_UNIFORM],
        )
    }

    pub(crate) fn with_key(
        key: ShaderKey,
        label: impl Into<String>,
        vertex_source: impl Into<String>,
        fragment_source: impl Into<String>,
        uniforms: &[&str],
    ) -> Self {
        Self {
            key,
            label: label.into(),
            vertex_source: vertex_source.into(),
            fragment_source: fragment_source.into(),
            uniforms: uniforms.iter().map(|u| u.to_string()).collect(),
        }
    }

    /// Declare an additional uniform, e.g. [`WORLD_UNIFORM`] for lit programs.
    pub fn with_uniform(mut self, name: &str) -> Self {
        if !self.declares(name) {
            self.uniforms.push(name.to_string());
        }
        self
    }

    pub fn key(&self) -> ShaderKey {
        self.key
    }

    pub fn uniforms(&self) -> &[String] {
        &self.uniforms
    }

    pub fn declares(&self, uniform: &str) -> bool {
        self.uniforms.iter().any(|u| u == uniform)
    }
}

/// A parameter block independent of the program that consumes it.
#[derive(Clone, Debug)]
pub struct Coat {
    key: CoatKey,
    pub label: String,
    pub colour: [f32; 4],
}

impl Coat {
    pub fn new(label: impl Into<String>, colour: [f32; 4]) -> Self {
        Self {
            key: CoatKey::next(),
            label: label.into(),
            colour,
        }
    }

    pub fn key(&self) -> CoatKey {
        self.key
    }

    pub fn to_uniform(&self) -> CoatUniform {
        CoatUniform {
            colour: self.colour,
        }
    }
}

/// The coat as it is laid out in GPU memory.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CoatUniform {
    pub colour: [f32; 4],
}

/// What a node is drawn with.
#[derive(Clone, Debug)]
pub struct Material {
    pub shader: Arc<ShaderClass>,
    pub coat: Arc<Coat>,
}

impl Material {
    pub fn new(shader: Arc<ShaderClass>, coat: Arc<Coat>) -> Self {
        Self { shader, coat }
    }

    pub fn shader_key(&self) -> ShaderKey {
        self.shader.key()
    }

    pub fn coat_key(&self) -> CoatKey {
        self.coat.key()
    }
}
