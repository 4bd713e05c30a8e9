//! Inputs and outputs of host graphics functions.

use crate::args::HostArgs;

/// Highest number of color targets a fragment function may write.
pub const MAX_COLOR_TARGETS: usize = 8;

pub struct VertexInput<'a> {
    pub vertex_index: u32,
    pub instance_index: u32,
    /// Layer being rendered in a multi-view frame, else 0.
    pub view_index: u32,
    /// Vertex attributes by shader location; unset locations read `(0, 0, 0, 1)`.
    pub attributes: &'a [[f32; 4]],
    pub args: &'a HostArgs,
}

impl VertexInput<'_> {
    pub fn attribute(&self, location: usize) -> [f32; 4] {
        self.attributes.get(location).copied().unwrap_or([0.0, 0.0, 0.0, 1.0])
    }
}

/// Clip-space position plus the values interpolated across the primitive.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VertexOutput {
    pub position: [f32; 4],
    pub varyings: Vec<f32>,
}

impl VertexOutput {
    pub fn new(position: [f32; 4]) -> Self {
        Self {
            position,
            varyings: Vec::new(),
        }
    }

    pub fn with_varyings(mut self, varyings: impl IntoIterator<Item = f32>) -> Self {
        self.varyings.extend(varyings);
        self
    }
}

pub struct FragmentInput<'a> {
    /// Pixel center in framebuffer coordinates, depth in `z`, `1 / w` in `w`.
    pub position: [f32; 4],
    /// Perspective-correct interpolation of the vertex varyings.
    pub varyings: &'a [f32],
    pub front_facing: bool,
    pub primitive_id: u32,
    pub view_index: u32,
    pub args: &'a HostArgs,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FragmentOutput {
    pub colors: [[f32; 4]; MAX_COLOR_TARGETS],
    /// Replaces the interpolated depth when set.
    pub depth: Option<f32>,
    pub discard: bool,
}

impl FragmentOutput {
    pub fn color(color: [f32; 4]) -> Self {
        let mut colors = [[0.0; 4]; MAX_COLOR_TARGETS];
        colors[0] = color;
        Self {
            colors,
            depth: None,
            discard: false,
        }
    }

    pub fn discard() -> Self {
        Self {
            discard: true,
            ..Self::color([0.0; 4])
        }
    }

    pub fn with_color(mut self, target: usize, color: [f32; 4]) -> Self {
        if let Some(slot) = self.colors.get_mut(target) {
            *slot = color;
        }
        self
    }

    pub fn with_depth(mut self, depth: f32) -> Self {
        self.depth = Some(depth);
        self
    }
}

/// One tessellated vertex of a triangle patch.
pub struct TessEvalInput<'a> {
    pub patch_id: u32,
    pub instance_index: u32,
    pub view_index: u32,
    /// Barycentric `(u, v, w)` inside the patch, summing to 1.
    pub tess_coord: [f32; 3],
    /// Attributes of the three control points, each indexed by shader location.
    pub control_points: [&'a [[f32; 4]]; 3],
    pub args: &'a HostArgs,
}

impl TessEvalInput<'_> {
    /// Attribute `location` interpolated at `tess_coord`.
    pub fn interpolate(&self, location: usize) -> [f32; 4] {
        let mut out = [0.0f32; 4];
        for (point, weight) in self.control_points.iter().zip(self.tess_coord) {
            let value = point.get(location).copied().unwrap_or([0.0, 0.0, 0.0, 1.0]);
            for (o, v) in out.iter_mut().zip(value) {
                *o += v * weight;
            }
        }
        out
    }
}
