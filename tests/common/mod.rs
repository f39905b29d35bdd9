#![allow(dead_code)]

pub mod recording_backend;

use std::sync::Arc;

use flow_scene::{
    Camera, Coat, Deg, Material, Matrix4, MeshData, NodeId, Projection, Scene, ShaderClass,
    data_structures::material::WORLD_UNIFORM,
};

pub const WIDTH: u32 = 64;
pub const HEIGHT: u32 = 48;

pub fn camera() -> Camera {
    Camera::new(
        (0.0, 0.0, 5.0),
        Deg(-90.0),
        Deg(0.0),
        Projection::new(WIDTH, HEIGHT, Deg(45.0), 0.1, 100.0),
    )
}

pub fn unlit_shader(label: &str) -> Arc<ShaderClass> {
    Arc::new(ShaderClass::new(label, "fn vs_main() {}", "fn fs_main() {}"))
}

pub fn lit_shader(label: &str) -> Arc<ShaderClass> {
    Arc::new(
        ShaderClass::new(label, "fn vs_main() {}", "fn fs_main() {}").with_uniform(WORLD_UNIFORM),
    )
}

pub fn material(shader: &Arc<ShaderClass>, colour: [f32; 4]) -> Material {
    Material::new(shader.clone(), Arc::new(Coat::new("coat", colour)))
}

pub fn quad(label: &str) -> Arc<MeshData> {
    Arc::new(MeshData::quad(label, 0.5, 0.0))
}

/// Spawn a drawable node, as a root if `parent` is `None`.
pub fn spawn_drawable(
    scene: &mut Scene,
    parent: Option<NodeId>,
    name: &str,
    material: Material,
    mesh: Arc<MeshData>,
) -> NodeId {
    let id = match parent {
        Some(parent) => scene.spawn_child(parent, name).unwrap(),
        None => scene.spawn(name),
    };
    scene.set_material(id, Some(material)).unwrap();
    scene.set_mesh(id, Some(mesh)).unwrap();
    id
}

pub fn assert_matrix_eq(actual: Matrix4<f32>, expected: Matrix4<f32>) {
    let actual: [[f32; 4]; 4] = actual.into();
    let expected: [[f32; 4]; 4] = expected.into();
    for (a, e) in actual.iter().flatten().zip(expected.iter().flatten()) {
        assert!(
            (a - e).abs() < 1e-4,
            "matrices differ:\n{actual:?}\n{expected:?}"
        );
    }
}
