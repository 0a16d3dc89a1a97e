//! Frustum planes and bounding volumes.
//!
//! A plane keeps the inside on the side its normal points to: a point is
//! inside when `dot(normal, p) + distance >= 0`.

use bytemuck::{Pod, Zeroable};
use horde_shared::{Mat4, Vec3, FRUSTUM_PLANE_COUNT};

/// A plane in 3D space (`dot(normal, p) + distance = 0`).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Plane {
    /// Unit normal pointing into the kept half-space.
    pub normal: Vec3,
    /// Signed offset from the origin.
    pub distance: f32,
}

impl Plane {
    /// Creates a plane from its equation coefficients.
    #[must_use]
    pub const fn new(a: f32, b: f32, c: f32, d: f32) -> Self {
        Self {
            normal: Vec3::new(a, b, c),
            distance: d,
        }
    }

    /// Plane through `point` with the given inward normal.
    #[must_use]
    pub fn from_point_normal(point: Vec3, normal: Vec3) -> Self {
        let normal = normal.normalized();
        Self {
            normal,
            distance: -normal.dot(point),
        }
    }

    /// Normalizes the plane.
    #[must_use]
    pub fn normalized(self) -> Self {
        let len = self.normal.length();
        if len > 0.0 {
            Self {
                normal: self.normal * (1.0 / len),
                distance: self.distance / len,
            }
        } else {
            self
        }
    }

    /// Returns the signed distance from a point to the plane.
    #[inline]
    #[must_use]
    pub fn distance_to_point(&self, p: Vec3) -> f32 {
        self.normal.dot(p) + self.distance
    }

    /// Converts to `[a, b, c, d]` for GPU upload.
    #[must_use]
    pub const fn as_array(&self) -> [f32; 4] {
        [self.normal.x, self.normal.y, self.normal.z, self.distance]
    }
}

/// Sphere-versus-half-spaces test shared by every culling path.
///
/// Mirrors the WGSL kernel operation for operation so host and device agree.
#[inline]
#[must_use]
pub fn sphere_in_planes(planes: &[[f32; 4]; FRUSTUM_PLANE_COUNT], center: [f32; 3], radius: f32) -> bool {
    planes.iter().all(|p| {
        p[0] * center[0] + p[1] * center[1] + p[2] * center[2] + p[3] >= -radius
    })
}

/// View frustum for culling.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Frustum {
    /// Left, right, bottom, top, near, far planes.
    pub planes: [Plane; FRUSTUM_PLANE_COUNT],
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

    /// Wraps six planes supplied by a camera system.
    #[must_use]
    pub const fn new(planes: [Plane; FRUSTUM_PLANE_COUNT]) -> Self {
        Self { planes }
    }

    /// Extracts frustum planes from a view-projection matrix.
    ///
    /// The matrix is column-major with a `[0, 1]` clip depth range (WGPU
    /// convention), so the near plane is row 2 on its own.
    #[must_use]
    pub fn from_view_projection(vp: &Mat4) -> Self {
        let m = &vp.cols;
        let row = |r: usize| [m[0][r], m[1][r], m[2][r], m[3][r]];
        let (r0, r1, r2, r3) = (row(0), row(1), row(2), row(3));
        let add = |a: [f32; 4], b: [f32; 4]| Plane::new(a[0] + b[0], a[1] + b[1], a[2] + b[2], a[3] + b[3]);
        let sub = |a: [f32; 4], b: [f32; 4]| Plane::new(a[0] - b[0], a[1] - b[1], a[2] - b[2], a[3] - b[3]);

        let mut planes = [Plane::default(); FRUSTUM_PLANE_COUNT];
        planes[Self::LEFT] = add(r3, r0).normalized();
        planes[Self::RIGHT] = sub(r3, r0).normalized();
        planes[Self::BOTTOM] = add(r3, r1).normalized();
        planes[Self::TOP] = sub(r3, r1).normalized();
        planes[Self::NEAR] = Plane::new(r2[0], r2[1], r2[2], r2[3]).normalized();
        planes[Self::FAR] = sub(r3, r2).normalized();

        Self { planes }
    }

    /// Box-shaped view volume, as produced by an orthographic camera.
    #[must_use]
    pub fn from_box(min: Vec3, max: Vec3) -> Self {
        let mut planes = [Plane::default(); FRUSTUM_PLANE_COUNT];
        planes[Self::LEFT] = Plane::from_point_normal(min, Vec3::X);
        planes[Self::RIGHT] = Plane::from_point_normal(max, -Vec3::X);
        planes[Self::BOTTOM] = Plane::from_point_normal(min, Vec3::Y);
        planes[Self::TOP] = Plane::from_point_normal(max, -Vec3::Y);
        planes[Self::NEAR] = Plane::from_point_normal(min, Vec3::Z);
        planes[Self::FAR] = Plane::from_point_normal(max, -Vec3::Z);
        Self { planes }
    }

    /// Converts planes to array format for GPU upload.
    #[must_use]
    pub fn as_arrays(&self) -> [[f32; 4]; FRUSTUM_PLANE_COUNT] {
        self.planes.map(|p| p.as_array())
    }

    /// True unless the plane normals are zero or any value is non-finite.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.planes
            .iter()
            .all(|p| p.normal.is_finite() && p.distance.is_finite() && p.normal.length_squared() > 0.0)
    }

    /// Tests if a sphere is visible (intersects the frustum).
    #[must_use]
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        sphere_in_planes(&self.as_arrays(), center.to_array(), radius)
    }

    /// Tests if an AABB is visible (intersects the frustum).
    #[must_use]
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        let center = aabb.center();
        let half = aabb.half_extents();

        self.planes.iter().all(|plane| {
            // Projection interval radius of the box onto the plane normal
            let r = half.x * plane.normal.x.abs()
                + half.y * plane.normal.y.abs()
                + half.z * plane.normal.z.abs();
            plane.distance_to_point(center) >= -r
        })
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    /// Minimum corner.
    pub min: Vec3,
    /// Maximum corner.
    pub max: Vec3,
}

impl Aabb {
    /// An inverted box that any `expand` call replaces.
    pub const EMPTY: Self = Self {
        min: Vec3::new(f32::MAX, f32::MAX, f32::MAX),
        max: Vec3::new(f32::MIN, f32::MIN, f32::MIN),
    };

    /// Creates a new AABB.
    #[must_use]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Tight box around a sphere.
    #[must_use]
    pub fn from_sphere(center: Vec3, radius: f32) -> Self {
        let r = Vec3::new(radius, radius, radius);
        Self::new(center - r, center + r)
    }

    /// Grows the box to enclose `other`.
    pub fn expand(&mut self, other: &Self) {
        self.min = Vec3::new(
            self.min.x.min(other.min.x),
            self.min.y.min(other.min.y),
            self.min.z.min(other.min.z),
        );
        self.max = Vec3::new(
            self.max.x.max(other.max.x),
            self.max.y.max(other.max.y),
            self.max.z.max(other.max.z),
        );
    }

    /// True when nothing has been added to an `EMPTY` box.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Returns the center of the AABB.
    #[must_use]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Returns the half-extents of the AABB.
    #[must_use]
    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::EMPTY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_normalization() {
        let plane = Plane::new(3.0, 4.0, 0.0, 10.0);
        let normalized = plane.normalized();

        // 3-4-5 triangle, so length is 5
        assert!((normalized.normal.x - 0.6).abs() < 0.001);
        assert!((normalized.normal.y - 0.8).abs() < 0.001);
        assert!((normalized.distance - 2.0).abs() < 0.001);
    }

    #[test]
    fn test_aabb_center() {
        let aabb = Aabb::new(Vec3::ZERO, Vec3::new(32.0, 32.0, 32.0));
        assert_eq!(aabb.center(), Vec3::new(16.0, 16.0, 16.0));
    }

    #[test]
    fn test_box_frustum_sphere_classification() {
        let frustum = Frustum::from_box(Vec3::new(-10.0, -10.0, -10.0), Vec3::new(10.0, 10.0, 10.0));

        assert!(frustum.intersects_sphere(Vec3::ZERO, 1.0));
        // Straddling the right plane still counts
        assert!(frustum.intersects_sphere(Vec3::new(10.5, 0.0, 0.0), 1.0));
        // Entirely outside one half-space
        assert!(!frustum.intersects_sphere(Vec3::new(11.5, 0.0, 0.0), 1.0));
        assert!(!frustum.intersects_sphere(Vec3::new(0.0, 0.0, -30.0), 5.0));
    }

    #[test]
    fn test_view_projection_extraction() {
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, Vec3::Y);
        let proj = Mat4::perspective_rh(60f32.to_radians(), 1.0, 0.1, 100.0);
        let frustum = Frustum::from_view_projection(&(proj * view));

        assert!(frustum.is_valid());
        assert!(frustum.intersects_sphere(Vec3::ZERO, 0.5));
        // Behind the camera
        assert!(!frustum.intersects_sphere(Vec3::new(0.0, 0.0, 20.0), 0.5));
        // Beyond the far plane
        assert!(!frustum.intersects_sphere(Vec3::new(0.0, 0.0, -200.0), 0.5));
        // Far off to the side
        assert!(!frustum.intersects_sphere(Vec3::new(100.0, 0.0, 0.0), 0.5));
    }

    #[test]
    fn test_aabb_classification() {
        let frustum = Frustum::from_box(Vec3::ZERO, Vec3::new(50.0, 50.0, 50.0));
        let mut bounds = Aabb::EMPTY;
        assert!(bounds.is_empty());

        bounds.expand(&Aabb::from_sphere(Vec3::new(-2.0, 25.0, 25.0), 3.0));
        assert!(!bounds.is_empty());
        assert!(frustum.intersects_aabb(&bounds));

        let outside = Aabb::new(Vec3::new(60.0, 0.0, 0.0), Vec3::new(70.0, 10.0, 10.0));
        assert!(!frustum.intersects_aabb(&outside));
    }
}
