//! Instance placement policies.

use horde_shared::{Quaternion, Vec3, Vec4};
use rand::Rng;

use crate::config::PlacementPolicy;

/// Position of instance `index` out of `count` under `policy`.
///
/// Grid placement ignores `rng`; the random policies draw three samples.
#[allow(clippy::cast_precision_loss)]
pub fn position(policy: &PlacementPolicy, index: u32, count: u32, rng: &mut impl Rng) -> Vec3 {
    match policy {
        PlacementPolicy::Grid { spacing, origin } => {
            let columns = grid_columns(count);
            let rows = count.div_ceil(columns.max(1));
            let col = index % columns;
            let row = index / columns;
            // Centre the whole grid on the origin
            let x = (col as f32 - (columns - 1) as f32 * 0.5) * spacing[0];
            let y = (row as f32 - (rows.max(1) - 1) as f32 * 0.5) * spacing[1];
            Vec3::from_array(*origin) + Vec3::new(x, y, 0.0)
        }
        PlacementPolicy::RandomInVolume { center, extent } => {
            let offset = Vec3::new(
                (rng.gen::<f32>() - 0.5) * extent[0],
                (rng.gen::<f32>() - 0.5) * extent[1],
                (rng.gen::<f32>() - 0.5) * extent[2],
            );
            Vec3::from_array(*center) + offset
        }
        PlacementPolicy::RandomOnSphere { center, radius } => {
            // Uniform on the sphere: z uniform in [-1, 1], azimuth uniform
            let z = rng.gen::<f32>().mul_add(2.0, -1.0);
            let phi = rng.gen::<f32>() * std::f32::consts::TAU;
            let r = (1.0 - z * z).max(0.0).sqrt();
            Vec3::from_array(*center) + Vec3::new(r * phi.cos(), r * phi.sin(), z) * *radius
        }
    }
}

/// Columns of a square-ish grid holding `count` cells.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
pub fn grid_columns(count: u32) -> u32 {
    let mut columns = (count as f32).sqrt().ceil() as u32;
    // Float sqrt can land one short for large counts
    while u64::from(columns) * u64::from(columns) < u64::from(count) {
        columns += 1;
    }
    columns.max(1)
}

/// Uniformly random orientation.
pub fn rotation(rng: &mut impl Rng) -> Quaternion {
    Quaternion::from_uniform_samples(rng.gen(), rng.gen(), rng.gen())
}

/// Random opaque color.
pub fn color(rng: &mut impl Rng) -> Vec4 {
    Vec4::new(rng.gen(), rng.gen(), rng.gen(), 1.0)
}
