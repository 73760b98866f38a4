use crate::math::Vec2f;

#[derive(Debug)]
pub enum Cmd {
    /// Wipes the canvas.
    Clear,

    PenMove {
        /// Pen position in the tablet's coordinate system, from 0-1.
        position: Vec2f,
        /// Physical aspect ratio of the tablet.
        aspect_ratio: f32,
        /// Pressure from 0-1. A pressure of 0 means the pen is lifted or
        /// hovering; it never starts or continues a stroke.
        pressure: f32,
    },
}
