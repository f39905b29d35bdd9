//! Object picking.
//!
//! Picking turns the rasterizer into a hit test:
//! 1. Every renderable, pickable node of a branch is drawn alone into its own
//!    offscreen target with the identity-encoding program, which writes the
//!    node's pick id and the fragment depth into the colour channels.
//! 2. Resolving a query point reads each target back at that point, decodes id
//!    and depth, and returns one [`Hit`] per target, nearest first.
//!
//! A pixel is `(id_hi, id_lo, depth_hi, depth_lo)`. Depth is quantized to 16
//! bits and offset by one, so a cleared pixel (all zero) is always a miss.

use std::cmp::Ordering;

use crate::{
    backend::{GpuBackend, IdentityDrawCall, PixelRect, TargetOf},
    camera::{Camera, Viewport},
    config::PickReadback,
    data_structures::{
        keys::ShaderKey,
        material::{CLIP_UNIFORM, IDENTITY_UNIFORM, ShaderClass, WORLD_UNIFORM},
        scene_graph::{NodeId, Scene},
    },
    render::final_transform,
    resources::{RenderResources, registry::NodeResourceRegistry},
};

/// WGSL source of the identity-encoding program.
pub const PICK_SHADER: &str = include_str!("pick.wgsl");

/// Largest pick id that fits the two id channels.
pub const MAX_PICK_ID: u32 = u16::MAX as u32;

const DEPTH_STEPS: f32 = 65534.0;

/// The identity-encoding program, cached under
/// [`ShaderKey::IDENTITY_ENCODING`].
pub fn identity_shader() -> ShaderClass {
    ShaderClass::with_key(
        ShaderKey::IDENTITY_ENCODING,
        "identity encoding",
        PICK_SHADER,
        PICK_SHADER,
        &[CLIP_UNIFORM, WORLD_UNIFORM, IDENTITY_UNIFORM],
    )
}

/// Encode a pick id and a normalized device depth the way the identity
/// program writes them.
pub fn encode_pixel(id: u32, depth: f32) -> [u8; 4] {
    let depth = (depth.clamp(0.0, 1.0) * DEPTH_STEPS).round() as u32 + 1;
    [
        ((id >> 8) & 0xff) as u8,
        (id & 0xff) as u8,
        ((depth >> 8) & 0xff) as u8,
        (depth & 0xff) as u8,
    ]
}

/// Decode `(id, depth)`. Depth is `None` for a pixel nothing was drawn to.
pub fn decode_pixel(pixel: [u8; 4]) -> (u32, Option<f32>) {
    let id = u32::from(pixel[0]) << 8 | u32::from(pixel[1]);
    let depth = u32::from(pixel[2]) << 8 | u32::from(pixel[3]);
    let depth = (depth != 0).then(|| (depth - 1) as f32 / DEPTH_STEPS);
    (id, depth)
}

/// One node drawn for picking. The target belongs to the caller; give it
/// back with [`release_targets`].
pub struct PickTarget<B: GpuBackend> {
    pub node: NodeId,
    /// 1-based position of the node within its pick pass.
    pub id: u32,
    pub target: TargetOf<B>,
}

impl<B: GpuBackend> std::fmt::Debug for PickTarget<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PickTarget")
            .field("node", &self.node)
            .field("id", &self.id)
            .field("width", &self.target.width)
            .field("height", &self.target.height)
            .finish()
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Hit {
    pub node: NodeId,
    /// Always 0: picking resolves nodes, not faces.
    pub face_index: u32,
    /// Normalized device depth under the query point, `None` for a miss.
    pub depth: Option<f32>,
}

impl Hit {
    pub fn is_hit(&self) -> bool {
        self.depth.is_some()
    }
}

/// The nearest actual hit of a resolved, sorted hit list.
pub fn nearest_hit(hits: &[Hit]) -> Option<&Hit> {
    hits.first().filter(|hit| hit.is_hit())
}

/// Draw every renderable, pickable node of the branch into a fresh target of
/// the camera's viewport size. Targets come back in depth-first node order.
///
/// Nodes whose draw fails are logged and get no target. A failure to create
/// a target releases the targets created so far and is returned.
pub fn draw_branch_for_picking<B: GpuBackend>(
    resources: &mut RenderResources<B>,
    registry: &NodeResourceRegistry,
    scene: &Scene,
    root: NodeId,
    camera: &Camera,
) -> anyhow::Result<Vec<PickTarget<B>>> {
    if !resources.shaders().contains(&ShaderKey::IDENTITY_ENCODING) {
        resources.ensure_program(&identity_shader())?;
    }
    let view_projection = camera.view_projection();
    let (width, height) = (camera.projection.width, camera.projection.height);
    let (backend, shaders, _, meshes) = resources.split_mut();
    let Some(program) = shaders.get(&ShaderKey::IDENTITY_ENCODING) else {
        anyhow::bail!("identity encoding program is missing from the shader cache");
    };

    let mut targets: Vec<PickTarget<B>> = Vec::new();
    for id in scene.depth_first(root) {
        let (Some(record), Some(node)) = (registry.record(id), scene.get(id)) else {
            continue;
        };
        if !node.is_pickable() {
            continue;
        }
        let Some(buffers) = meshes.get(&record.mesh) else {
            log::warn!("{:?} ({id:?}) is registered but its buffers are gone", node.name);
            continue;
        };
        let pick_id = targets.len() as u32 + 1;
        if pick_id > MAX_PICK_ID {
            log::warn!("pick pass is limited to {MAX_PICK_ID} nodes, ignoring the rest");
            break;
        }

        let target = match backend.create_render_target(width, height) {
            Ok(target) => target,
            Err(e) => {
                backend.bind_render_target(None);
                release_targets(backend, targets);
                return Err(e.context(format!("failed to create a pick target for {id:?}")));
            }
        };
        let world = final_transform(node);
        let drawn = backend.clear(Some(&target)).and_then(|()| {
            backend.bind_render_target(Some(&target));
            backend.draw_with_identity(IdentityDrawCall {
                program,
                buffers,
                id: pick_id,
                world,
                clip: view_projection * world,
            })
        });
        match drawn {
            Ok(()) => targets.push(PickTarget {
                node: id,
                id: pick_id,
                target,
            }),
            Err(e) => {
                log::error!("failed to draw {:?} ({id:?}) for picking: {e:#}", node.name);
                backend.bind_render_target(None);
                backend.delete_render_target(target);
            }
        }
    }
    backend.bind_render_target(None);
    log::debug!("pick pass drew {} nodes", targets.len());
    Ok(targets)
}

/// Resolve `query`, a screen point, against the targets of a pick pass drawn
/// for `viewport`. Returns one hit per target sorted by ascending depth,
/// misses last.
pub fn resolve<B: GpuBackend>(
    backend: &mut B,
    readback: PickReadback,
    query: (f32, f32),
    targets: &[PickTarget<B>],
    viewport: &Viewport,
) -> anyhow::Result<Vec<Hit>> {
    let miss = |target: &PickTarget<B>| Hit {
        node: target.node,
        face_index: 0,
        depth: None,
    };
    let Some((x, y)) = viewport.pixel_at(query.0, query.1) else {
        log::debug!("pick query {query:?} is outside {viewport:?}");
        return Ok(targets.iter().map(miss).collect());
    };

    let mut hits = Vec::with_capacity(targets.len());
    for target in targets {
        let (width, height) = (target.target.width, target.target.height);
        if x >= width || y >= height {
            hits.push(miss(target));
            continue;
        }
        let pixel = match readback {
            PickReadback::FullBuffer => {
                let data = backend.read_pixels(
                    &target.target.framebuffer,
                    PixelRect::new(0, 0, width, height),
                )?;
                let offset = ((y * width + x) * 4) as usize;
                pixel_at(&data, offset)?
            }
            PickReadback::QueryPixel => {
                let data = backend.read_pixels(&target.target.framebuffer, PixelRect::pixel(x, y))?;
                pixel_at(&data, 0)?
            }
        };
        let (id, depth) = decode_pixel(pixel);
        hits.push(Hit {
            node: target.node,
            face_index: 0,
            depth: depth.filter(|_| id == target.id),
        });
    }

    hits.sort_by(|a, b| match (a.depth, b.depth) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    match nearest_hit(&hits) {
        Some(hit) => log::info!("picked {:?} at depth {:?}", hit.node, hit.depth),
        None => log::info!("pick at {query:?} hit nothing"),
    }
    Ok(hits)
}

/// Delete the render targets of a pick pass.
pub fn release_targets<B: GpuBackend>(backend: &mut B, targets: Vec<PickTarget<B>>) {
    for target in targets {
        backend.delete_render_target(target.target);
    }
}

fn pixel_at(data: &[u8], offset: usize) -> anyhow::Result<[u8; 4]> {
    data.get(offset..offset + 4)
        .and_then(|bytes| <[u8; 4]>::try_from(bytes).ok())
        .ok_or_else(|| anyhow::anyhow!("readback of {} bytes has no pixel at byte {offset}", data.len()))
}
