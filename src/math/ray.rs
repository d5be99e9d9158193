//! Ray type and operations

use crate::core::types::Vec3;
use super::aabb::Aabb;

/// Components of the ray direction with |d| below this are clamped before
/// inversion so slab tests never produce inf/NaN t values.
pub const DIR_EPSILON: f32 = 1e-8;

/// A ray defined by origin and direction
#[derive(Clone, Copy, Debug)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
    /// Precomputed 1/direction for fast AABB intersection (epsilon-clamped)
    pub inv_direction: Vec3,
}

fn safe_invert(d: f32) -> f32 {
    let sign = if d >= 0.0 { 1.0 } else { -1.0 };
    sign / d.abs().max(DIR_EPSILON)
}

impl Ray {
    /// Create a new ray (direction should be normalized)
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction,
            inv_direction: Vec3::new(
                safe_invert(direction.x),
                safe_invert(direction.y),
                safe_invert(direction.z),
            ),
        }
    }

    /// Get point along ray at parameter t
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }

    /// Sign bits of the direction: bit 0 = x, bit 1 = y, bit 2 = z.
    /// A set bit means the ray travels toward +axis. XORing an octant index
    /// with these bits yields front-to-back traversal order.
    pub fn sign_bits(&self) -> u8 {
        (if self.direction.x >= 0.0 { 1 } else { 0 })
            | (if self.direction.y >= 0.0 { 2 } else { 0 })
            | (if self.direction.z >= 0.0 { 4 } else { 0 })
    }

    /// Ray-AABB slab test. Returns (t_near, t_far) without clamping t_near
    /// to zero; callers decide how to treat boxes behind the origin.
    pub fn intersect_aabb(&self, aabb: &Aabb) -> Option<(f32, f32)> {
        let t1 = (aabb.min - self.origin) * self.inv_direction;
        let t2 = (aabb.max - self.origin) * self.inv_direction;

        let t_min = t1.min(t2);
        let t_max = t1.max(t2);

        let t_near = t_min.x.max(t_min.y).max(t_min.z);
        let t_far = t_max.x.min(t_max.y).min(t_max.z);

        if t_near <= t_far && t_far >= 0.0 {
            Some((t_near, t_far))
        } else {
            None
        }
    }

    /// Axis (0/1/2) whose slab produced the entry point, for face normals.
    pub fn entry_axis(&self, aabb: &Aabb) -> u32 {
        let t1 = (aabb.min - self.origin) * self.inv_direction;
        let t2 = (aabb.max - self.origin) * self.inv_direction;
        let t_min = t1.min(t2);

        if t_min.x >= t_min.y && t_min.x >= t_min.z {
            0
        } else if t_min.y >= t_min.z {
            1
        } else {
            2
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at() {
        let ray = Ray::new(Vec3::ZERO, Vec3::X);
        assert_eq!(ray.at(5.0), Vec3::new(5.0, 0.0, 0.0));
    }

    #[test]
    fn test_intersect_aabb_hit() {
        let ray = Ray::new(Vec3::new(-2.0, 16.0, 16.0), Vec3::X);
        let aabb = Aabb::new(Vec3::ZERO, Vec3::splat(32.0));
        let (t_near, t_far) = ray.intersect_aabb(&aabb).unwrap();
        assert!((t_near - 2.0).abs() < 1e-4);
        assert!((t_far - 34.0).abs() < 1e-4);
    }

    #[test]
    fn test_intersect_aabb_miss() {
        let ray = Ray::new(Vec3::new(-2.0, 40.0, 16.0), Vec3::X);
        let aabb = Aabb::new(Vec3::ZERO, Vec3::splat(32.0));
        assert!(ray.intersect_aabb(&aabb).is_none());
    }

    #[test]
    fn test_axis_aligned_direction_is_finite() {
        // A ray exactly along +X must still produce finite slab values on Y/Z
        let ray = Ray::new(Vec3::new(-1.0, 16.0, 16.0), Vec3::new(1.0, 0.0, 0.0));
        assert!(ray.inv_direction.y.is_finite());
        assert!(ray.inv_direction.z.is_finite());
        assert!(ray.intersect_aabb(&Aabb::new(Vec3::ZERO, Vec3::splat(32.0))).is_some());
    }

    #[test]
    fn test_sign_bits() {
        let ray = Ray::new(Vec3::ZERO, Vec3::new(1.0, -1.0, 1.0).normalize());
        assert_eq!(ray.sign_bits(), 0b101);
    }

    #[test]
    fn test_entry_axis() {
        let ray = Ray::new(Vec3::new(-10.0, 16.0, 16.0), Vec3::X);
        let aabb = Aabb::new(Vec3::ZERO, Vec3::splat(32.0));
        assert_eq!(ray.entry_axis(&aabb), 0);
    }
}
