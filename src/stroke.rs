//! Stroke synthesis: mapping pen packets into canvas space, grouping them
//! into strokes, and resampling each stroke at a fixed arc-length interval.

use crate::math::{lerp, vec2, Vec2f};

/// One resampled stroke sample: a position in canvas space and the brush
/// diameter at that point, derived from pen pressure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dab {
    pub pos: Vec2f,
    pub size: f32,
}

/// Maps a screen-space position into canvas space.
///
/// Canvas space has its origin at the window center and the y axis pointing
/// up; screen space has its origin at the top left with y pointing down.
/// Window geometry is passed per call because the window can move between
/// two packets of the same batch.
pub fn canvas_from_screen(raw: Vec2f, win_pos: Vec2f, win_size: Vec2f, scale: f32) -> Vec2f {
    let x = (raw.x() - win_pos.x() - win_size.x() * 0.5) * scale;
    let y = -((raw.y() - win_pos.y() - win_size.y() * 0.5) * scale);
    vec2(x, y)
}

/// Resamples a stroke's raw samples at a fixed arc-length interval.
///
/// Packets arrive irregularly spaced: fast pen movement leaves large gaps
/// between them, slow movement clusters them. Emitting dabs on a fixed
/// arc-length grid instead makes the rendered stroke continuous no matter
/// how the input is spaced. The grid runs along the whole stroke: the
/// unconsumed remainder of one raw segment carries over into the next, so
/// segment boundaries don't reset it.
#[derive(Debug)]
pub struct Resampler {
    spacing: f32,
    last: Option<Dab>,
    leftover: f32,
}

impl Resampler {
    pub fn new(spacing: f32) -> Self {
        Self {
            spacing,
            last: None,
            leftover: 0.0,
        }
    }

    /// Feeds the next raw sample, appending any resampled dabs onto `out`.
    ///
    /// The first sample of a stroke is emitted unconditionally at its own
    /// size; afterwards one dab is emitted for every multiple of `spacing`
    /// the arc length passes, with position and size interpolated between
    /// the two raw samples bracketing the grid point.
    pub fn push(&mut self, curr: Dab, out: &mut Vec<Dab>) {
        let Some(prev) = self.last.replace(curr) else {
            out.push(curr);
            return;
        };

        let dist = prev.pos.dist(curr.pos);
        if dist == 0.0 {
            // Duplicate packet. Not a fault, just nothing to emit.
            return;
        }

        let total = dist + self.leftover;
        let mut count = 1;
        while self.spacing * count as f32 <= total {
            // Can end up slightly above 1.0 when a grid point rounds past
            // `curr`; the interpolation then extrapolates a tiny bit.
            let scaling = (self.spacing * count as f32 - self.leftover) / dist;
            out.push(Dab {
                pos: lerp(prev.pos..=curr.pos, scaling),
                size: lerp(prev.size..=curr.size, scaling),
            });
            count += 1;
        }
        self.leftover = total - self.spacing * (count - 1) as f32;
    }
}

/// A finished stroke. Owns its dabs and is never mutated again.
#[derive(Debug)]
pub struct Stroke {
    dabs: Vec<Dab>,
}

impl Stroke {
    pub fn dabs(&self) -> &[Dab] {
        &self.dabs
    }
}

#[derive(Debug)]
struct ActiveStroke {
    resampler: Resampler,
    dabs: Vec<Dab>,
}

/// Groups the pen sample stream into strokes.
///
/// A stroke opens on the first pressed sample while idle and closes on the
/// first zero-pressure sample that follows; the closing sample itself is
/// discarded. Repeated pen-up notifications are no-ops, so pen-lift
/// detection behaves the same no matter how samples are batched.
#[derive(Debug)]
pub struct StrokeEngine {
    spacing: f32,
    current: Option<ActiveStroke>,
}

impl StrokeEngine {
    pub fn new(spacing: f32) -> Self {
        Self {
            spacing,
            current: None,
        }
    }

    /// Feeds a pressed (pressure > 0) sample, already mapped into canvas
    /// space. Newly resampled dabs are appended onto `out`.
    pub fn pen_move(&mut self, dab: Dab, out: &mut Vec<Dab>) {
        let spacing = self.spacing;
        let stroke = self.current.get_or_insert_with(|| ActiveStroke {
            resampler: Resampler::new(spacing),
            dabs: Vec::new(),
        });

        let start = out.len();
        stroke.resampler.push(dab, out);
        stroke.dabs.extend_from_slice(&out[start..]);
    }

    /// Finalizes the current stroke on pen-up. Returns `None` when no stroke
    /// is open.
    pub fn pen_up(&mut self) -> Option<Stroke> {
        self.current.take().map(|active| Stroke { dabs: active.dabs })
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::config::Brush;

    fn dab(x: f32, y: f32, size: f32) -> Dab {
        Dab {
            pos: vec2(x, y),
            size,
        }
    }

    fn xs(dabs: &[Dab]) -> Vec<f32> {
        dabs.iter().map(|d| d.pos.x()).collect()
    }

    #[test]
    fn first_dab_is_emitted_unconditionally() {
        let mut resampler = Resampler::new(50.0);
        let mut out = Vec::new();
        resampler.push(dab(3.0, 7.0, 9.0), &mut out);
        assert_eq!(out, vec![dab(3.0, 7.0, 9.0)]);
    }

    #[test]
    fn dabs_land_on_spacing_multiples() {
        let mut resampler = Resampler::new(3.0);
        let mut out = Vec::new();
        resampler.push(dab(0.0, 0.0, 1.0), &mut out);
        resampler.push(dab(10.0, 0.0, 1.0), &mut out);

        let expected = [0.0, 3.0, 6.0, 9.0];
        assert_eq!(out.len(), expected.len());
        for (d, x) in out.iter().zip(expected) {
            assert_relative_eq!(d.pos.x(), x, epsilon = 1e-5);
            assert_relative_eq!(d.pos.y(), 0.0);
        }
    }

    #[test]
    fn resampling_is_split_invariant() {
        // The same 10 units of arc length, pushed in one, two, and four raw
        // segments, must produce identical dab positions.
        let splits: &[&[f32]] = &[&[10.0], &[2.0, 10.0], &[1.0, 2.0, 3.0, 10.0]];

        let mut results = Vec::new();
        for split in splits {
            let mut resampler = Resampler::new(3.0);
            let mut out = Vec::new();
            resampler.push(dab(0.0, 0.0, 1.0), &mut out);
            for &x in *split {
                resampler.push(dab(x, 0.0, 1.0), &mut out);
            }
            results.push(out);
        }

        for other in &results[1..] {
            assert_eq!(results[0].len(), other.len());
            for (a, b) in results[0].iter().zip(other) {
                assert_relative_eq!(a.pos.x(), b.pos.x(), epsilon = 1e-5);
                assert_relative_eq!(a.pos.y(), b.pos.y(), epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn leftover_carries_across_short_segments() {
        let mut resampler = Resampler::new(4.0);
        let mut out = Vec::new();
        resampler.push(dab(0.0, 0.0, 1.0), &mut out);
        // Too short to reach the next grid point on its own.
        resampler.push(dab(3.0, 0.0, 1.0), &mut out);
        assert_eq!(xs(&out), vec![0.0]);

        // The 3 units of leftover make grid points at 4 and 8 reachable.
        resampler.push(dab(9.0, 0.0, 1.0), &mut out);
        let expected = [0.0, 4.0, 8.0];
        assert_eq!(out.len(), expected.len());
        for (d, x) in out.iter().zip(expected) {
            assert_relative_eq!(d.pos.x(), x, epsilon = 1e-5);
        }
    }

    #[test]
    fn zero_length_segment_is_a_noop() {
        let mut resampler = Resampler::new(4.0);
        let mut out = Vec::new();
        resampler.push(dab(0.0, 0.0, 1.0), &mut out);
        resampler.push(dab(0.0, 0.0, 5.0), &mut out);
        assert_eq!(out.len(), 1);

        // The grid continues unaffected afterwards.
        resampler.push(dab(6.0, 0.0, 5.0), &mut out);
        assert_eq!(out.len(), 2);
        assert_relative_eq!(out[1].pos.x(), 4.0, epsilon = 1e-5);
    }

    #[test]
    fn size_interpolation_is_linear_and_bounded() {
        let mut resampler = Resampler::new(2.0);
        let mut out = Vec::new();
        resampler.push(dab(0.0, 0.0, 2.0), &mut out);
        resampler.push(dab(8.0, 0.0, 10.0), &mut out);

        for d in &out[1..] {
            assert!((2.0..=10.0).contains(&d.size));
        }
        // Grid point at arc length 4 sits halfway along the segment.
        assert_relative_eq!(out[2].size, 6.0, epsilon = 1e-5);
    }

    #[test]
    fn single_sample_stroke_has_one_dab() {
        let mut engine = StrokeEngine::new(50.0);
        let mut out = Vec::new();
        engine.pen_move(dab(5.0, 5.0, 3.0), &mut out);
        let stroke = engine.pen_up().unwrap();
        assert_eq!(stroke.dabs(), &[dab(5.0, 5.0, 3.0)]);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn pen_up_is_idempotent() {
        let mut engine = StrokeEngine::new(50.0);
        assert!(engine.pen_up().is_none());

        let mut out = Vec::new();
        engine.pen_move(dab(0.0, 0.0, 1.0), &mut out);
        assert!(engine.pen_up().is_some());
        assert!(engine.pen_up().is_none());
        assert!(engine.pen_up().is_none());
    }

    #[test]
    fn strokes_are_independent() {
        let mut engine = StrokeEngine::new(4.0);
        let mut out = Vec::new();
        engine.pen_move(dab(0.0, 0.0, 1.0), &mut out);
        engine.pen_move(dab(8.0, 0.0, 1.0), &mut out);
        let first = engine.pen_up().unwrap();
        assert_eq!(first.dabs().len(), 3);

        // A fresh stroke starts with an unconditional dab and a fresh grid.
        out.clear();
        engine.pen_move(dab(100.0, 0.0, 1.0), &mut out);
        let second = engine.pen_up().unwrap();
        assert_eq!(second.dabs(), &[dab(100.0, 0.0, 1.0)]);
    }

    #[test]
    fn pen_stream_end_to_end() {
        // Raw packets (0,0,1000), (100,0,1000), (0,0,0) against a max
        // pressure of 1000 and spacing 50: dabs at arc lengths 0, 50, 100,
        // all at full size, and the stroke closes on the third packet.
        let brush = Brush::default();
        let mut engine = StrokeEngine::new(50.0);
        let mut out = Vec::new();

        for (x, pressure) in [(0.0, 1000), (100.0, 1000)] {
            let normalized = pressure as f32 / 1000.0;
            engine.pen_move(dab(x, 0.0, brush.dab_size(normalized)), &mut out);
        }
        let stroke = engine.pen_up().unwrap();

        let expected = [0.0, 50.0, 100.0];
        assert_eq!(stroke.dabs().len(), expected.len());
        for (d, x) in stroke.dabs().iter().zip(expected) {
            assert_relative_eq!(d.pos.x(), x, epsilon = 1e-4);
            assert_relative_eq!(d.pos.y(), 0.0);
            assert_relative_eq!(d.size, brush.dab_size(1.0));
        }
        assert!(engine.pen_up().is_none());
    }

    /// Inverse of [`canvas_from_screen`] for the same window geometry.
    fn screen_from_canvas(canvas: Vec2f, win_pos: Vec2f, win_size: Vec2f, scale: f32) -> Vec2f {
        vec2(
            canvas.x() / scale + win_pos.x() + win_size.x() * 0.5,
            -canvas.y() / scale + win_pos.y() + win_size.y() * 0.5,
        )
    }

    #[test]
    fn mapper_centers_and_flips() {
        let win_pos = vec2(100.0, 50.0);
        let win_size = vec2(800.0, 600.0);

        // The window center maps to the canvas origin.
        let center = win_pos + win_size * 0.5;
        assert_eq!(canvas_from_screen(center, win_pos, win_size, 1.0), vec2(0.0, 0.0));

        // Screen y grows downwards, canvas y grows upwards.
        let p = canvas_from_screen(center + vec2(10.0, 20.0), win_pos, win_size, 2.0);
        assert_relative_eq!(p.x(), 20.0);
        assert_relative_eq!(p.y(), -40.0);
    }

    #[test]
    fn mapper_round_trips() {
        let win_pos = vec2(37.0, 113.0);
        let win_size = vec2(1280.0, 720.0);
        let scale = 1.5;

        let raw = vec2(123.5, 456.25);
        let mapped = canvas_from_screen(raw, win_pos, win_size, scale);
        let back = screen_from_canvas(mapped, win_pos, win_size, scale);
        assert_relative_eq!(back.x(), raw.x(), epsilon = 1e-4);
        assert_relative_eq!(back.y(), raw.y(), epsilon = 1e-4);
    }
}
