//! Axis-aligned bounding box

use crate::core::types::Vec3;

/// Axis-aligned bounding box defined by min and max corners
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Create AABB from min and max corners
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Create AABB from center and uniform half-extent (octree cells are cubes)
    pub fn cube(center: Vec3, half: f32) -> Self {
        Self {
            min: center - Vec3::splat(half),
            max: center + Vec3::splat(half),
        }
    }

    /// Get center point
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get size (max - min)
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Check if point is inside AABB
    pub fn contains_point(&self, p: Vec3) -> bool {
        p.x >= self.min.x && p.x <= self.max.x &&
        p.y >= self.min.y && p.y <= self.max.y &&
        p.z >= self.min.z && p.z <= self.max.z
    }

    /// Child octant AABB for octree subdivision.
    /// Octant bits: bit 0 = +x half, bit 1 = +y half, bit 2 = +z half.
    pub fn child_octant(&self, index: u8) -> Aabb {
        let center = self.center();
        let half = (self.max.x - self.min.x) * 0.25;

        let offset = Vec3::new(
            if index & 1 != 0 { half } else { -half },
            if index & 2 != 0 { half } else { -half },
            if index & 4 != 0 { half } else { -half },
        );

        Aabb::cube(center + offset, half)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let aabb = Aabb::new(Vec3::ZERO, Vec3::splat(32.0));
        assert_eq!(aabb.center(), Vec3::splat(16.0));
        assert_eq!(aabb.size(), Vec3::splat(32.0));
    }

    #[test]
    fn test_contains_point() {
        let aabb = Aabb::new(Vec3::ZERO, Vec3::splat(32.0));
        assert!(aabb.contains_point(Vec3::splat(16.0)));
        assert!(!aabb.contains_point(Vec3::new(16.0, 33.0, 16.0)));
    }

    #[test]
    fn test_child_octant_bit_order() {
        let parent = Aabb::new(Vec3::ZERO, Vec3::splat(32.0));

        // Octant 0: lower half on every axis
        let c0 = parent.child_octant(0);
        assert_eq!(c0.min, Vec3::ZERO);
        assert_eq!(c0.max, Vec3::splat(16.0));

        // Octant 2: bit 1 set moves to the upper Y half only
        let c2 = parent.child_octant(2);
        assert_eq!(c2.min, Vec3::new(0.0, 16.0, 0.0));
        assert_eq!(c2.max, Vec3::new(16.0, 32.0, 16.0));

        // Octant 4: bit 2 set moves to the upper Z half only
        let c4 = parent.child_octant(4);
        assert_eq!(c4.min, Vec3::new(0.0, 0.0, 16.0));
    }
}
