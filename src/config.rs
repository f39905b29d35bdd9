//! Engine and backend configuration.

/// How pick resolution reads back each pick target.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum PickReadback {
    /// Read the whole target and index the query pixel on the CPU.
    #[default]
    FullBuffer,
    /// Read only the 1x1 region under the query point.
    QueryPixel,
}

/// Settings of the backend-independent engine.
#[derive(Clone, Debug, Default)]
pub struct EngineConfig {
    pub pick_readback: PickReadback,
}

impl EngineConfig {
    pub fn with_pick_readback(mut self, pick_readback: PickReadback) -> Self {
        self.pick_readback = pick_readback;
        self
    }
}

/// Settings of the wgpu backend.
#[derive(Clone, Debug)]
pub struct WgpuConfig {
    /// Size of the display target, in pixels.
    pub width: u32,
    pub height: u32,
    pub clear_colour: wgpu::Color,
    pub power_preference: wgpu::PowerPreference,
}

impl Default for WgpuConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            clear_colour: wgpu::Color::BLACK,
            power_preference: wgpu::PowerPreference::default(),
        }
    }
}
