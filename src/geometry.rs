//! Converts resampled ink dabs into renderable primitives: a triangle
//! ribbon, or the falloff mask used by the stamped brush.

use crate::math::Vec2f;
use crate::stroke::Dab;

/// Side length of the precomputed brush mask, in texels.
pub const BRUSH_MASK_SIZE: u32 = 64;

/// Fraction of the mask's half-extent that carries ink. The rim beyond it
/// stays fully transparent so the bilinear sampler never bleeds past the
/// quad edge.
const BRUSH_RADIUS_FRACTION: f32 = 0.95;

/// Greyscale radial falloff mask for the stamped brush, one byte per texel,
/// row-major.
///
/// Coverage drops with the squared distance from the center and reaches
/// zero at [`BRUSH_RADIUS_FRACTION`] of the half-extent.
pub fn brush_mask() -> Vec<u8> {
    let size = BRUSH_MASK_SIZE as usize;
    let half = BRUSH_MASK_SIZE as f32 * 0.5;
    let radius = half * BRUSH_RADIUS_FRACTION;

    let mut mask = Vec::with_capacity(size * size);
    for y in 0..size {
        for x in 0..size {
            let dx = x as f32 + 0.5 - half;
            let dy = y as f32 + 0.5 - half;
            let d2 = dx * dx + dy * dy;
            let value = 255.0 * (1.0 - d2 / (radius * radius));
            mask.push(value.clamp(0.0, 255.0) as u8);
        }
    }
    mask
}

/// Builds a variable-width triangle ribbon along a stroke.
///
/// Each consecutive dab pair becomes a quad (two triangles): the travel
/// direction is rotated 90° into the ribbon normal and both endpoints are
/// pushed outwards by their own radius, so the ribbon width follows the pen
/// pressure.
#[derive(Debug, Default)]
pub struct RibbonBuilder {
    last: Option<Dab>,
    /// Leading edge points (positive, negative) of the last emitted segment.
    edge: Option<(Vec2f, Vec2f)>,
    vertices: Vec<Vec2f>,
}

impl RibbonBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the next dab of the current stroke, extending the ribbon by
    /// one quad unless the segment is degenerate.
    pub fn append(&mut self, dab: Dab) {
        let Some(last) = self.last.replace(dab) else {
            // First dab of a stroke; a segment needs two.
            return;
        };

        let dir = dab.pos - last.pos;
        let dist = dir.length();
        if dist == 0.0 {
            return;
        }
        let normal = (dir / dist).perp();

        // Recomputing the trailing edge from this segment's normal tears the
        // ribbon open at sharp turns, so reuse the previous segment's
        // leading edge, assigned by which of its points the fresh
        // computation lands nearer to.
        let naive_positive = last.pos + normal * (last.size * 0.5);
        let (last_positive, last_negative) = match self.edge {
            None => (naive_positive, last.pos - normal * (last.size * 0.5)),
            Some((positive, negative)) => {
                if positive.dist(naive_positive) <= negative.dist(naive_positive) {
                    (positive, negative)
                } else {
                    (negative, positive)
                }
            }
        };

        let ink_positive = dab.pos + normal * (dab.size * 0.5);
        let ink_negative = dab.pos - normal * (dab.size * 0.5);

        self.vertices.extend_from_slice(&[
            last_positive,
            last_negative,
            ink_positive,
            last_negative,
            ink_negative,
            ink_positive,
        ]);
        self.edge = Some((ink_positive, ink_negative));
    }

    /// Ends the current stroke; the next dab starts a fresh ribbon.
    pub fn end_stroke(&mut self) {
        self.last = None;
        self.edge = None;
    }

    /// Triangle-list vertices synthesized since the last
    /// [`clear_pending`](Self::clear_pending), across stroke boundaries.
    pub fn pending(&self) -> &[Vec2f] {
        &self.vertices
    }

    /// Discards the pending vertices once they have been drawn.
    pub fn clear_pending(&mut self) {
        self.vertices.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::vec2;

    fn dab(x: f32, y: f32, size: f32) -> Dab {
        Dab {
            pos: vec2(x, y),
            size,
        }
    }

    #[test]
    fn single_dab_emits_no_geometry() {
        let mut ribbon = RibbonBuilder::new();
        ribbon.append(dab(1.0, 2.0, 4.0));
        assert!(ribbon.pending().is_empty());

        ribbon.end_stroke();
        assert!(ribbon.pending().is_empty());
    }

    #[test]
    fn two_dabs_bridge_into_a_quad() {
        let mut ribbon = RibbonBuilder::new();
        ribbon.append(dab(0.0, 0.0, 4.0));
        ribbon.append(dab(10.0, 0.0, 4.0));

        // Travel along +x, so the ribbon normal points along +y and both
        // edges sit two units off the centerline.
        assert_eq!(
            ribbon.pending(),
            &[
                vec2(0.0, 2.0),
                vec2(0.0, -2.0),
                vec2(10.0, 2.0),
                vec2(0.0, -2.0),
                vec2(10.0, -2.0),
                vec2(10.0, 2.0),
            ],
        );
    }

    #[test]
    fn ribbon_width_follows_dab_size() {
        let mut ribbon = RibbonBuilder::new();
        ribbon.append(dab(0.0, 0.0, 2.0));
        ribbon.append(dab(10.0, 0.0, 6.0));

        let verts = ribbon.pending();
        assert_eq!(verts[0], vec2(0.0, 1.0));
        assert_eq!(verts[4], vec2(10.0, -3.0));
    }

    #[test]
    fn trailing_edge_reuses_previous_leading_edge() {
        let mut ribbon = RibbonBuilder::new();
        ribbon.append(dab(0.0, 0.0, 4.0));
        ribbon.append(dab(10.0, 0.0, 4.0));
        ribbon.append(dab(20.0, 5.0, 4.0));

        // The second segment starts from the exact points the first one
        // ended on, not from freshly projected ones.
        let verts = ribbon.pending();
        assert_eq!(verts[6], vec2(10.0, 2.0));
        assert_eq!(verts[7], vec2(10.0, -2.0));
    }

    #[test]
    fn edge_assignment_flips_on_direction_reversal() {
        let mut ribbon = RibbonBuilder::new();
        ribbon.append(dab(0.0, 0.0, 4.0));
        ribbon.append(dab(10.0, 0.0, 4.0));
        // Straight back the way we came: the ribbon normal flips sign, so
        // the reused edge points must swap roles to stay seamless.
        ribbon.append(dab(0.0, 0.0, 4.0));

        let verts = ribbon.pending();
        assert_eq!(verts[6], vec2(10.0, -2.0));
        assert_eq!(verts[7], vec2(10.0, 2.0));
    }

    #[test]
    fn zero_length_segment_emits_nothing() {
        let mut ribbon = RibbonBuilder::new();
        ribbon.append(dab(5.0, 5.0, 4.0));
        ribbon.append(dab(5.0, 5.0, 8.0));
        assert!(ribbon.pending().is_empty());
    }

    #[test]
    fn end_stroke_starts_a_fresh_ribbon() {
        let mut ribbon = RibbonBuilder::new();
        ribbon.append(dab(0.0, 0.0, 4.0));
        ribbon.append(dab(10.0, 0.0, 4.0));
        ribbon.end_stroke();

        ribbon.append(dab(0.0, 100.0, 4.0));
        ribbon.append(dab(10.0, 100.0, 4.0));

        // The new stroke's trailing edge comes from its own normal, not
        // from the previous stroke.
        let verts = ribbon.pending();
        assert_eq!(verts.len(), 12);
        assert_eq!(verts[6], vec2(0.0, 102.0));
        assert_eq!(verts[7], vec2(0.0, 98.0));
    }

    #[test]
    fn brush_mask_is_a_radial_falloff() {
        let mask = brush_mask();
        let size = BRUSH_MASK_SIZE as usize;
        assert_eq!(mask.len(), size * size);

        // Bright center, fully transparent corners.
        let center = size / 2 * size + size / 2;
        assert!(mask[center] >= 250);
        assert_eq!(mask[0], 0);
        assert_eq!(mask[size * size - 1], 0);

        // Coverage never increases away from the center.
        let row = &mask[size / 2 * size..size / 2 * size + size];
        for pair in row[size / 2..].windows(2) {
            assert!(pair[1] <= pair[0]);
        }
    }
}
