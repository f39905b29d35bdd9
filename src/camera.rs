//! A yaw/pitch camera with a perspective projection, and the viewport that
//! maps query points onto render-target pixels.

use cgmath::{InnerSpace, Matrix4, Point3, Rad, Vector3, perspective};

use crate::backend::PixelRect;

#[rustfmt::skip]
pub const OPENGL_TO_WGPU_MATRIX: Matrix4<f32> = Matrix4::from_cols(
    cgmath::Vector4::new(1.0, 0.0, 0.0, 0.0),
    cgmath::Vector4::new(0.0, 1.0, 0.0, 0.0),
    cgmath::Vector4::new(0.0, 0.0, 0.5, 0.0),
    cgmath::Vector4::new(0.0, 0.0, 0.5, 1.0),
);

#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Point3<f32>,
    pub yaw: Rad<f32>,
    pub pitch: Rad<f32>,
    pub projection: Projection,
}

impl Camera {
    pub fn new<V: Into<Point3<f32>>, Y: Into<Rad<f32>>, P: Into<Rad<f32>>>(
        position: V,
        yaw: Y,
        pitch: P,
        projection: Projection,
    ) -> Self {
        Self {
            position: position.into(),
            yaw: yaw.into(),
            pitch: pitch.into(),
            projection,
        }
    }

    pub fn calc_matrix(&self) -> Matrix4<f32> {
        let (sin_pitch, cos_pitch) = self.pitch.0.sin_cos();
        let (sin_yaw, cos_yaw) = self.yaw.0.sin_cos();

        Matrix4::look_to_rh(
            self.position,
            Vector3::new(cos_pitch * cos_yaw, sin_pitch, cos_pitch * sin_yaw).normalize(),
            Vector3::unit_y(),
        )
    }

    /// Projection times view, mapping world space to clip space.
    pub fn view_projection(&self) -> Matrix4<f32> {
        self.projection.calc_matrix() * self.calc_matrix()
    }

    pub fn projection_rect(&self) -> ProjectionRect {
        self.projection.rect()
    }

    /// The full pixel area pick targets are sized to.
    pub fn viewport(&self) -> Viewport {
        Viewport::new(0, 0, self.projection.width, self.projection.height)
    }
}

#[derive(Debug, Clone)]
pub struct Projection {
    pub width: u32,
    pub height: u32,
    pub fovy: Rad<f32>,
    pub znear: f32,
    pub zfar: f32,
}

impl Projection {
    pub fn new<F: Into<Rad<f32>>>(width: u32, height: u32, fovy: F, znear: f32, zfar: f32) -> Self {
        Self {
            width,
            height,
            fovy: fovy.into(),
            znear,
            zfar,
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }

    pub fn calc_matrix(&self) -> Matrix4<f32> {
        OPENGL_TO_WGPU_MATRIX * perspective(self.fovy, self.aspect(), self.znear, self.zfar)
    }

    pub fn rect(&self) -> ProjectionRect {
        let half_height = self.znear * (self.fovy.0 / 2.0).tan();
        ProjectionRect {
            half_width: half_height * self.aspect(),
            half_height,
            near: self.znear,
        }
    }
}

/// Half extents of the near plane, in view space.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ProjectionRect {
    pub half_width: f32,
    pub half_height: f32,
    pub near: f32,
}

/// A pixel area of a render target, origin top-left.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn rect(&self) -> PixelRect {
        PixelRect::new(self.x, self.y, self.width, self.height)
    }

    /// Target pixel under a screen point, or `None` outside the viewport.
    ///
    /// Targets are sized to the viewport, so the pixel is relative to the
    /// viewport origin rather than to the screen.
    pub fn pixel_at(&self, screen_x: f32, screen_y: f32) -> Option<(u32, u32)> {
        if !screen_x.is_finite() || !screen_y.is_finite() || screen_x < 0.0 || screen_y < 0.0 {
            return None;
        }
        let (x, y) = (screen_x.floor() as u32, screen_y.floor() as u32);
        self.rect()
            .contains(x, y)
            .then(|| (x - self.x, y - self.y))
    }

    /// Target pixel under a point on the near plane, given in the coordinates
    /// of `rect` (x right, y up, centred on the view axis). Relative to the
    /// viewport origin like [`Viewport::pixel_at`].
    pub fn pixel_at_near_plane(&self, rect: &ProjectionRect, u: f32, v: f32) -> Option<(u32, u32)> {
        let ndc_x = u / rect.half_width;
        let ndc_y = v / rect.half_height;
        let screen_x = self.x as f32 + (ndc_x + 1.0) / 2.0 * self.width as f32;
        let screen_y = self.y as f32 + (1.0 - ndc_y) / 2.0 * self.height as f32;
        self.pixel_at(screen_x, screen_y)
    }
}
