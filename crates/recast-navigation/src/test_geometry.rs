//! Input geometry fixtures

/// Appends an axis aligned quad at height `y`, wound so it faces up
fn push_quad(positions: &mut Vec<f32>, indices: &mut Vec<i32>, min: [f32; 2], max: [f32; 2], y: f32) {
    let base = (positions.len() / 3) as i32;
    positions.extend_from_slice(&[
        min[0], y, min[1], //
        min[0], y, max[1], //
        max[0], y, max[1], //
        max[0], y, min[1],
    ]);
    indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
}

fn quads(quads: &[([f32; 2], [f32; 2], f32)]) -> (Vec<f32>, Vec<i32>) {
    let mut positions = Vec::new();
    let mut indices = Vec::new();
    for &(min, max, y) in quads {
        push_quad(&mut positions, &mut indices, min, max, y);
    }
    (positions, indices)
}

/// Square floor from the origin to `(size, 0, size)`
pub(crate) fn flat_plane(size: f32) -> (Vec<f32>, Vec<i32>) {
    quads(&[([0.0, 0.0], [size, size], 0.0)])
}

/// Floor strip along x
pub(crate) fn corridor(length: f32, width: f32) -> (Vec<f32>, Vec<i32>) {
    quads(&[([0.0, 0.0], [length, width], 0.0)])
}

/// Strip along x that turns into a strip along z at its far end
pub(crate) fn l_corridor(length: f32, width: f32) -> (Vec<f32>, Vec<i32>) {
    quads(&[
        ([0.0, 0.0], [length, width], 0.0),
        ([length - width, width], [length, length], 0.0),
    ])
}

/// Two stacked floors, the upper one `gap` above the ground
pub(crate) fn two_floors(size: f32, gap: f32) -> (Vec<f32>, Vec<i32>) {
    quads(&[([0.0, 0.0], [size, size], 0.0), ([0.0, 0.0], [size, size], gap)])
}
