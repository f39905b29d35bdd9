mod common;

use flow_scene::{
    Engine, EngineConfig, NodeId, PickReadback, Scene, Viewport,
    backend::PixelRect,
    pick::{Hit, nearest_hit},
};

use crate::common::{
    HEIGHT, WIDTH, camera, material, quad, recording_backend::RecordingBackend, spawn_drawable,
    unlit_shader,
};

struct Fixture {
    engine: Engine<RecordingBackend>,
    scene: Scene,
    root: NodeId,
    far: NodeId,
    near: NodeId,
    middle: NodeId,
}

/// Three overlapping quads under (10, 10), inserted far, near, middle.
fn fixture(config: EngineConfig) -> Fixture {
    let mut engine = Engine::new(RecordingBackend::new(), config);
    let mut scene = Scene::new();
    let shader = unlit_shader("unlit");
    let root = scene.spawn("root");
    let mut spawn = |name: &str, rect: PixelRect, depth: f32| {
        let mesh = quad(name);
        engine.backend_mut().set_footprint(mesh.key(), rect, depth);
        spawn_drawable(&mut scene, Some(root), name, material(&shader, [1.0; 4]), mesh)
    };
    let far = spawn("far", PixelRect::new(0, 0, 32, 32), 0.8);
    let near = spawn("near", PixelRect::new(5, 5, 10, 10), 0.2);
    let middle = spawn("middle", PixelRect::new(8, 8, 20, 4), 0.5);
    engine.register_branch(&mut scene, root);
    Fixture {
        engine,
        scene,
        root,
        far,
        near,
        middle,
    }
}

fn depths(hits: &[Hit]) -> Vec<Option<f32>> {
    hits.iter().map(|hit| hit.depth).collect()
}

fn assert_close(actual: Option<f32>, expected: f32) {
    let actual = actual.expect("expected a hit");
    assert!(
        (actual - expected).abs() < 1e-4,
        "depth {actual} is not close to {expected}"
    );
}

#[test]
fn hits_are_sorted_nearest_first() {
    let Fixture {
        mut engine,
        scene,
        root,
        far,
        near,
        middle,
    } = fixture(EngineConfig::default());
    let camera = camera();

    let targets = engine.draw_branch_for_picking(&scene, root, &camera).unwrap();
    assert_eq!(targets.len(), 3);
    assert_eq!(
        targets.iter().map(|t| t.id).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert!(targets.iter().all(|t| t.target.width == WIDTH && t.target.height == HEIGHT));

    let hits = engine
        .resolve((10.5, 10.5), &targets, &camera.viewport())
        .unwrap();
    assert_eq!(
        hits.iter().map(|hit| hit.node).collect::<Vec<_>>(),
        vec![near, middle, far]
    );
    assert_close(hits[0].depth, 0.2);
    assert_close(hits[1].depth, 0.5);
    assert_close(hits[2].depth, 0.8);
    assert!(hits.iter().all(|hit| hit.face_index == 0));
    assert_eq!(nearest_hit(&hits).map(|hit| hit.node), Some(near));

    engine.release_pick_targets(targets);
    assert_eq!(engine.backend().live_targets(), 0);
}

#[test]
fn misses_sort_after_hits() {
    let Fixture {
        mut engine,
        scene,
        root,
        far,
        near,
        middle,
    } = fixture(EngineConfig::default());
    // Only the far quad covers (20, 20).
    let hits = engine.pick(&scene, root, &camera(), (20.0, 20.0)).unwrap();
    assert_eq!(hits[0].node, far);
    assert_close(hits[0].depth, 0.8);
    assert_eq!(
        hits[1..].iter().map(|hit| hit.node).collect::<Vec<_>>(),
        vec![near, middle]
    );
    assert_eq!(depths(&hits[1..]), vec![None, None]);
}

#[test]
fn empty_pixel_misses_everything() {
    let Fixture {
        mut engine,
        scene,
        root,
        ..
    } = fixture(EngineConfig::default());
    let hits = engine.pick(&scene, root, &camera(), (60.0, 40.0)).unwrap();
    assert_eq!(hits.len(), 3);
    assert_eq!(depths(&hits), vec![None, None, None]);
    assert!(nearest_hit(&hits).is_none());
    assert!(hits.iter().all(|hit| !hit.is_hit()));
}

#[test]
fn query_outside_the_viewport_misses_everything() {
    let Fixture {
        mut engine,
        scene,
        root,
        ..
    } = fixture(EngineConfig::default());
    let camera = camera();
    let targets = engine.draw_branch_for_picking(&scene, root, &camera).unwrap();
    let reads_before = engine.backend().counts.reads;

    let hits = engine
        .resolve((WIDTH as f32 + 3.0, 1.0), &targets, &camera.viewport())
        .unwrap();
    assert_eq!(depths(&hits), vec![None, None, None]);
    assert_eq!(engine.backend().counts.reads, reads_before);

    let hits = engine
        .resolve((10.0, 10.0), &targets, &Viewport::new(30, 30, 10, 10))
        .unwrap();
    assert_eq!(depths(&hits), vec![None, None, None]);
    engine.release_pick_targets(targets);
}

#[test]
fn query_is_resolved_relative_to_an_offset_viewport() {
    let Fixture {
        mut engine,
        scene,
        root,
        far,
        near,
        middle,
    } = fixture(EngineConfig::default());
    let camera = camera();
    let targets = engine.draw_branch_for_picking(&scene, root, &camera).unwrap();

    let viewport = Viewport::new(30, 30, WIDTH, HEIGHT);
    let hits = engine.resolve((40.0, 40.0), &targets, &viewport).unwrap();
    assert_eq!(
        hits.iter().map(|hit| hit.node).collect::<Vec<_>>(),
        vec![near, middle, far]
    );
    assert_close(hits[0].depth, 0.2);
    assert_close(hits[1].depth, 0.5);
    assert_close(hits[2].depth, 0.8);
    engine.release_pick_targets(targets);
}

#[test]
fn query_pixel_readback_reads_one_pixel() {
    let Fixture {
        mut engine,
        scene,
        root,
        near,
        ..
    } = fixture(EngineConfig::default().with_pick_readback(PickReadback::QueryPixel));
    let hits = engine.pick(&scene, root, &camera(), (10.5, 10.5)).unwrap();
    assert_eq!(hits[0].node, near);
    assert_close(hits[0].depth, 0.2);
    assert_eq!(engine.backend().read_rects.len(), 3);
    assert!(engine.backend().read_rects.iter().all(|rect| *rect == PixelRect::pixel(10, 10)));
}

#[test]
fn full_buffer_readback_reads_whole_targets() {
    let Fixture {
        mut engine,
        scene,
        root,
        ..
    } = fixture(EngineConfig::default());
    engine.pick(&scene, root, &camera(), (10.5, 10.5)).unwrap();
    assert!(engine
        .backend()
        .read_rects
        .iter()
        .all(|rect| *rect == PixelRect::new(0, 0, WIDTH, HEIGHT)));
}

#[test]
fn unpickable_and_unregistered_nodes_get_no_target() {
    let Fixture {
        mut engine,
        mut scene,
        root,
        far,
        near,
        middle,
    } = fixture(EngineConfig::default());
    scene.set_pickable(near, false).unwrap();
    engine.unregister(middle);

    let targets = engine
        .draw_branch_for_picking(&scene, root, &camera())
        .unwrap();
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0].node, far);
    assert_eq!(targets[0].id, 1);
    engine.release_pick_targets(targets);
}

#[test]
fn identity_program_is_created_once_and_released_at_shutdown() {
    let Fixture {
        mut engine,
        scene,
        root,
        ..
    } = fixture(EngineConfig::default());
    let programs_before = engine.backend().counts.programs_created;

    engine.pick(&scene, root, &camera(), (1.0, 1.0)).unwrap();
    engine.pick(&scene, root, &camera(), (1.0, 1.0)).unwrap();
    assert_eq!(engine.backend().counts.programs_created, programs_before + 1);
    assert_eq!(engine.stats().programs, 2);

    engine.unregister_branch(&scene, root);
    let backend = engine.shutdown();
    assert_eq!(backend.counts.programs_deleted, programs_before + 1);
    assert_eq!(backend.counts.targets_created, backend.counts.targets_deleted);
}

#[test]
fn each_target_is_cleared_before_drawing() {
    let Fixture {
        mut engine,
        scene,
        root,
        ..
    } = fixture(EngineConfig::default());
    let clears_before = engine.backend().counts.clears;
    let targets = engine.draw_branch_for_picking(&scene, root, &camera()).unwrap();
    assert_eq!(engine.backend().counts.clears, clears_before + targets.len());
    for (draw, target) in engine.backend().identity_draws.iter().zip(&targets) {
        assert_eq!(draw.id, target.id);
        assert_eq!(draw.target, Some(target.target.framebuffer.id));
    }
    engine.release_pick_targets(targets);
}
