//! Renderer-agnostic debug drawing
//!
//! Mesh and query types describe themselves through the [`DebugDraw`]
//! trait. A renderer implements the trait; [`DebugDrawRecorder`] is a
//! ready-made implementation that simply records the emitted geometry.

/// Color representation for debug visualization
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Creates a color from RGB values (alpha = 1.0)
    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self::new(r, g, b, 1.0)
    }

    /// Creates a color from RGBA bytes
    pub const fn from_rgba_bytes(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self::new(
            r as f32 / 255.0,
            g as f32 / 255.0,
            b as f32 / 255.0,
            a as f32 / 255.0,
        )
    }

    /// Returns the same color with a different alpha
    pub const fn with_alpha(self, a: f32) -> Self {
        Self::new(self.r, self.g, self.b, a)
    }

    /// Scales the rgb channels, keeping alpha
    pub fn darken(self, factor: f32) -> Self {
        Self::new(self.r * factor, self.g * factor, self.b * factor, self.a)
    }

    /// Deterministic pseudo-random color for an integer id (regions, areas, tiles)
    pub fn from_id(id: u32, alpha: f32) -> Self {
        let mut h = id.wrapping_add(1);
        h ^= h >> 16;
        h = h.wrapping_mul(0x7feb_352d);
        h ^= h >> 15;
        h = h.wrapping_mul(0x846c_a68b);
        h ^= h >> 16;
        let [r, g, b, _] = h.to_le_bytes();
        Self::new(
            0.25 + r as f32 / 340.0,
            0.25 + g as f32 / 340.0,
            0.25 + b as f32 / 340.0,
            alpha,
        )
    }
}

impl Color {
    pub const WHITE: Color = Color::rgb(1.0, 1.0, 1.0);
    pub const BLACK: Color = Color::rgb(0.0, 0.0, 0.0);
    pub const RED: Color = Color::rgb(1.0, 0.0, 0.0);
    pub const GREEN: Color = Color::rgb(0.0, 1.0, 0.0);
    pub const BLUE: Color = Color::rgb(0.0, 0.0, 1.0);
    pub const YELLOW: Color = Color::rgb(1.0, 1.0, 0.0);
    pub const CYAN: Color = Color::rgb(0.0, 1.0, 1.0);
    pub const ORANGE: Color = Color::rgb(1.0, 0.5, 0.0);
    pub const GRAY: Color = Color::rgb(0.5, 0.5, 0.5);
}

/// Primitive kinds a draw batch can contain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugDrawPrimitive {
    Points,
    Lines,
    Tris,
    Quads,
}

/// Consumer of debug geometry
///
/// Calls are always bracketed: `begin`, any number of `vertex`, `end`.
pub trait DebugDraw {
    /// Enables or disables depth testing for the following batches
    fn depth_mask(&mut self, _state: bool) {}

    fn begin(&mut self, prim: DebugDrawPrimitive, size: f32);

    fn vertex(&mut self, pos: [f32; 3], color: Color);

    fn end(&mut self);
}

/// A batch of primitives captured by [`DebugDrawRecorder`]
#[derive(Debug, Clone)]
pub struct DebugBatch {
    pub primitive: DebugDrawPrimitive,
    pub size: f32,
    pub vertices: Vec<([f32; 3], Color)>,
}

/// Records everything drawn into it
#[derive(Debug, Default, Clone)]
pub struct DebugDrawRecorder {
    pub batches: Vec<DebugBatch>,
    open: Option<DebugBatch>,
}

impl DebugDrawRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of vertices recorded for a primitive kind
    pub fn vertex_count(&self, prim: DebugDrawPrimitive) -> usize {
        self.batches
            .iter()
            .filter(|b| b.primitive == prim)
            .map(|b| b.vertices.len())
            .sum()
    }

    pub fn clear(&mut self) {
        self.batches.clear();
        self.open = None;
    }
}

impl DebugDraw for DebugDrawRecorder {
    fn begin(&mut self, prim: DebugDrawPrimitive, size: f32) {
        if let Some(batch) = self.open.take() {
            self.batches.push(batch);
        }
        self.open = Some(DebugBatch {
            primitive: prim,
            size,
            vertices: Vec::new(),
        });
    }

    fn vertex(&mut self, pos: [f32; 3], color: Color) {
        if let Some(batch) = self.open.as_mut() {
            batch.vertices.push((pos, color));
        }
    }

    fn end(&mut self) {
        if let Some(batch) = self.open.take() {
            self.batches.push(batch);
        }
    }
}

/// Appends the twelve edges of an axis-aligned box to an open line batch
pub fn append_box_wire(dd: &mut dyn DebugDraw, bmin: [f32; 3], bmax: [f32; 3], color: Color) {
    let c = [
        [bmin[0], bmin[1], bmin[2]],
        [bmax[0], bmin[1], bmin[2]],
        [bmax[0], bmin[1], bmax[2]],
        [bmin[0], bmin[1], bmax[2]],
        [bmin[0], bmax[1], bmin[2]],
        [bmax[0], bmax[1], bmin[2]],
        [bmax[0], bmax[1], bmax[2]],
        [bmin[0], bmax[1], bmax[2]],
    ];
    for i in 0..4 {
        let j = (i + 1) % 4;
        dd.vertex(c[i], color);
        dd.vertex(c[j], color);
        dd.vertex(c[i + 4], color);
        dd.vertex(c[j + 4], color);
        dd.vertex(c[i], color);
        dd.vertex(c[i + 4], color);
    }
}

/// Appends a horizontal circle as line segments to an open line batch
pub fn append_circle(dd: &mut dyn DebugDraw, center: [f32; 3], radius: f32, color: Color) {
    const SEGMENTS: usize = 40;
    let point = |i: usize| {
        let a = i as f32 / SEGMENTS as f32 * std::f32::consts::TAU;
        [
            center[0] + a.cos() * radius,
            center[1],
            center[2] + a.sin() * radius,
        ]
    };
    for i in 0..SEGMENTS {
        dd.vertex(point(i), color);
        dd.vertex(point(i + 1), color);
    }
}

/// Appends a vertical cylinder outline to an open line batch
pub fn append_cylinder_wire(
    dd: &mut dyn DebugDraw,
    center: [f32; 3],
    radius: f32,
    height: f32,
    color: Color,
) {
    append_circle(dd, center, radius, color);
    append_circle(dd, [center[0], center[1] + height, center[2]], radius, color);
    for (dx, dz) in [(1.0, 0.0), (-1.0, 0.0), (0.0, 1.0), (0.0, -1.0)] {
        let p = [center[0] + dx * radius, center[1], center[2] + dz * radius];
        dd.vertex(p, color);
        dd.vertex([p[0], p[1] + height, p[2]], color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_collects_batches() {
        let mut dd = DebugDrawRecorder::new();
        dd.begin(DebugDrawPrimitive::Lines, 2.0);
        append_box_wire(&mut dd, [0.0; 3], [1.0; 3], Color::WHITE);
        dd.end();
        dd.begin(DebugDrawPrimitive::Tris, 1.0);
        dd.vertex([0.0; 3], Color::RED);
        dd.vertex([1.0, 0.0, 0.0], Color::RED);
        dd.vertex([0.0, 0.0, 1.0], Color::RED);
        dd.end();

        assert_eq!(dd.batches.len(), 2);
        assert_eq!(dd.vertex_count(DebugDrawPrimitive::Lines), 24);
        assert_eq!(dd.vertex_count(DebugDrawPrimitive::Tris), 3);
    }

    #[test]
    fn test_id_colors_are_stable() {
        assert_eq!(Color::from_id(7, 1.0), Color::from_id(7, 1.0));
        assert_ne!(Color::from_id(7, 1.0), Color::from_id(8, 1.0));
    }
}
