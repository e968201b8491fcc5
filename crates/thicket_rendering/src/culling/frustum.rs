//! Frustum culling for view-dependent rendering.
//!
//! Extracts frustum planes from the view-projection matrix and tests
//! bounding spheres against them.

use glam::{Mat4, Vec3, Vec4};

/// A plane in 3D space (`normal · p + d = 0`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    /// Plane normal, pointing into the frustum.
    pub normal: Vec3,
    /// Distance from origin.
    pub d: f32,
}

impl Default for Plane {
    fn default() -> Self {
        Self {
            normal: Vec3::Z,
            d: 0.0,
        }
    }
}

impl Plane {
    /// Creates a plane from `(a, b, c, d)` coefficients.
    #[must_use]
    pub fn from_coefficients(v: Vec4) -> Self {
        Self {
            normal: v.truncate(),
            d: v.w,
        }
    }

    /// Normalizes the plane.
    #[must_use]
    pub fn normalized(self) -> Self {
        let len = self.normal.length();
        if len > 0.0 {
            Self {
                normal: self.normal / len,
                d: self.d / len,
            }
        } else {
            self
        }
    }

    /// Returns the signed distance from a point to the plane.
    #[inline]
    #[must_use]
    pub fn distance_to_point(&self, p: Vec3) -> f32 {
        self.normal.dot(p) + self.d
    }
}

/// View frustum for culling.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Frustum {
    /// Left, right, bottom, top, near, far planes.
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Left plane index.
    pub const LEFT: usize = 0;
    /// Right plane index.
    pub const RIGHT: usize = 1;
    /// Bottom plane index.
    pub const BOTTOM: usize = 2;
    /// Top plane index.
    pub const TOP: usize = 3;
    /// Near plane index.
    pub const NEAR: usize = 4;
    /// Far plane index.
    pub const FAR: usize = 5;

    /// Extracts frustum planes from a view-projection matrix.
    ///
    /// Assumes the wgpu clip space: depth in `0..=1`.
    #[must_use]
    pub fn from_view_projection(m: &Mat4) -> Self {
        let (r0, r1, r2, r3) = (m.row(0), m.row(1), m.row(2), m.row(3));
        let mut planes = [Plane::default(); 6];
        planes[Self::LEFT] = Plane::from_coefficients(r3 + r0).normalized();
        planes[Self::RIGHT] = Plane::from_coefficients(r3 - r0).normalized();
        planes[Self::BOTTOM] = Plane::from_coefficients(r3 + r1).normalized();
        planes[Self::TOP] = Plane::from_coefficients(r3 - r1).normalized();
        planes[Self::NEAR] = Plane::from_coefficients(r2).normalized();
        planes[Self::FAR] = Plane::from_coefficients(r3 - r2).normalized();
        Self { planes }
    }

    /// Tests if a sphere intersects the frustum.
    #[inline]
    #[must_use]
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.distance_to_point(center) >= -radius)
    }
}

/// Frustum culler for efficient visibility testing.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrustumCuller {
    frustum: Frustum,
}

impl FrustumCuller {
    /// Creates a culler for a view-projection matrix.
    #[must_use]
    pub fn new(view_projection: &Mat4) -> Self {
        Self {
            frustum: Frustum::from_view_projection(view_projection),
        }
    }

    /// Updates the frustum from a view-projection matrix.
    pub fn update(&mut self, view_projection: &Mat4) {
        self.frustum = Frustum::from_view_projection(view_projection);
    }

    /// Current frustum.
    #[must_use]
    pub const fn frustum(&self) -> &Frustum {
        &self.frustum
    }

    /// Tests an object-space bounding sphere placed by a world matrix.
    ///
    /// The radius is scaled by the matrix's largest axis scale.
    #[must_use]
    pub fn test_instance(&self, world: &Mat4, center: Vec3, radius: f32) -> bool {
        let world_center = world.transform_point3(center);
        let world_radius = radius * thicket_core::max_axis_scale(world);
        self.frustum.intersects_sphere(world_center, world_radius)
    }
}
