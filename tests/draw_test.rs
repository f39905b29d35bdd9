mod common;

use flow_scene::{Engine, EngineConfig, Matrix4, Scene, Vector3, render::final_transform};

use crate::common::{
    assert_matrix_eq, camera, lit_shader, material, quad, recording_backend::RecordingBackend,
    spawn_drawable, unlit_shader,
};

#[test]
fn draws_every_registered_node_depth_first() {
    let mut engine = Engine::new(RecordingBackend::new(), EngineConfig::default());
    let mut scene = Scene::new();
    let shader = unlit_shader("unlit");
    let root = spawn_drawable(&mut scene, None, "root", material(&shader, [1.0; 4]), quad("root"));
    let group = scene.spawn_child(root, "group").unwrap();
    let leaf_mesh = quad("leaf");
    spawn_drawable(&mut scene, Some(group), "leaf", material(&shader, [1.0; 4]), leaf_mesh.clone());
    let sibling_mesh = quad("sibling");
    spawn_drawable(&mut scene, Some(root), "sibling", material(&shader, [1.0; 4]), sibling_mesh.clone());

    engine.register_branch(&mut scene, root);
    assert_eq!(engine.draw_branch(&scene, root, &camera()), 3);

    let meshes: Vec<_> = engine.backend().draws.iter().map(|draw| draw.mesh).collect();
    let root_mesh = engine.registry().record(root).unwrap().mesh;
    assert_eq!(meshes, vec![root_mesh, leaf_mesh.key(), sibling_mesh.key()]);
    assert!(engine.backend().draws.iter().all(|draw| draw.target.is_none()));
}

#[test]
fn clip_includes_world_and_pivot() {
    let mut engine = Engine::new(RecordingBackend::new(), EngineConfig::default());
    let mut scene = Scene::new();
    let camera = camera();
    let lit = lit_shader("lit");
    let node = spawn_drawable(&mut scene, None, "node", material(&lit, [1.0; 4]), quad("q"));
    let local = Matrix4::from_translation(Vector3::new(0.0, 2.0, 0.0));
    let pivot = Matrix4::from_scale(3.0);
    scene.set_local_transform(node, Some(local)).unwrap();
    scene.set_mesh_pivot(node, Some(pivot)).unwrap();

    engine.register_branch(&mut scene, node);
    engine.draw_branch(&scene, node, &camera);

    let draw = &engine.backend().draws[0];
    let expected = local * pivot;
    assert_matrix_eq(final_transform(scene.get(node).unwrap()), expected);
    assert_matrix_eq(draw.world.unwrap(), expected);
    assert_matrix_eq(draw.clip, camera.view_projection() * expected);
}

#[test]
fn world_is_only_passed_to_programs_declaring_it() {
    let mut engine = Engine::new(RecordingBackend::new(), EngineConfig::default());
    let mut scene = Scene::new();
    let root = scene.spawn("root");
    spawn_drawable(&mut scene, Some(root), "unlit", material(&unlit_shader("unlit"), [1.0; 4]), quad("a"));
    spawn_drawable(&mut scene, Some(root), "lit", material(&lit_shader("lit"), [1.0; 4]), quad("b"));

    engine.register_branch(&mut scene, root);
    engine.draw_branch(&scene, root, &camera());

    let draws = &engine.backend().draws;
    assert_eq!(draws[0].program, "unlit");
    assert!(draws[0].world.is_none());
    assert_eq!(draws[1].program, "lit");
    assert!(draws[1].world.is_some());
}

#[test]
fn unregistered_nodes_are_not_drawn() {
    let mut engine = Engine::new(RecordingBackend::new(), EngineConfig::default());
    let mut scene = Scene::new();
    let shader = unlit_shader("unlit");
    let root = spawn_drawable(&mut scene, None, "root", material(&shader, [1.0; 4]), quad("r"));
    let child = spawn_drawable(&mut scene, Some(root), "child", material(&shader, [1.0; 4]), quad("c"));

    engine.register_branch(&mut scene, root);
    engine.unregister(child);
    assert_eq!(engine.draw_branch(&scene, root, &camera()), 1);
    assert_eq!(engine.stats().registered_nodes, 1);
}

#[test]
fn advance_frame_clears_the_display() {
    let mut engine = Engine::new(RecordingBackend::new(), EngineConfig::default());
    let mut scene = Scene::new();
    engine.advance_frame(&mut scene);
    engine.advance_frame(&mut scene);
    assert_eq!(engine.backend().counts.clears, 2);
}
