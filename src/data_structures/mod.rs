//! Scene data independent of the GPU.
//!
//! - `keys` holds the process-unique identities of shareable render inputs
//! - `material` contains shader classes, coats and the materials pairing them
//! - `mesh` holds validated geometry
//! - `scene_graph` enables hierarchical scene organization

pub mod keys;
pub mod material;
pub mod mesh;
pub mod scene_graph;
