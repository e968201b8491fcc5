//! Transform helpers shared by the instancing core.

use glam::{Mat4, Vec3};

/// Matrix written into defunct pool slots.
///
/// A zero matrix collapses every vertex to the origin with zero area, so a
/// slot that is awaiting its removal batch draws nothing.
pub const DEFUNCT_MATRIX: Mat4 = Mat4::ZERO;

/// Returns the translation part of a world matrix.
#[inline]
#[must_use]
pub fn translation(world: &Mat4) -> Vec3 {
    world.w_axis.truncate()
}

/// Returns the largest axis scale of a world matrix.
///
/// Used to grow a prototype's bounding sphere to the instance's size.
#[inline]
#[must_use]
pub fn max_axis_scale(world: &Mat4) -> f32 {
    world
        .x_axis
        .truncate()
        .length()
        .max(world.y_axis.truncate().length())
        .max(world.z_axis.truncate().length())
}

/// Checks whether a matrix is the defunct sentinel.
#[inline]
#[must_use]
pub fn is_defunct(world: &Mat4) -> bool {
    *world == DEFUNCT_MATRIX
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;

    #[test]
    fn test_translation() {
        let m = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(translation(&m), Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_max_axis_scale() {
        let m = Mat4::from_scale_rotation_translation(
            Vec3::new(1.0, 4.0, 2.0),
            Quat::from_rotation_y(0.7),
            Vec3::ZERO,
        );
        assert!((max_axis_scale(&m) - 4.0).abs() < 1e-4);
    }

    #[test]
    fn test_defunct_sentinel() {
        assert!(is_defunct(&DEFUNCT_MATRIX));
        assert!(!is_defunct(&Mat4::IDENTITY));
        // Sentinel must be safe to upload byte-for-byte.
        let bytes: &[u8] = bytemuck::bytes_of(&DEFUNCT_MATRIX);
        assert!(bytes.iter().all(|b| *b == 0));
    }
}
