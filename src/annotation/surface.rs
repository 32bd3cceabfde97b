//! RGBA8 drawing surface

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const TRANSPARENT: Rgba = Rgba::new(0, 0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Rgba { r, g, b, a }
    }

    pub const fn opaque(r: u8, g: u8, b: u8) -> Self {
        Rgba::new(r, g, b, 255)
    }

    /// Parses `#RRGGBB` or `#RRGGBBAA`.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.strip_prefix('#')?;
        if !hex.is_ascii() {
            return None;
        }
        let byte = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
        match hex.len() {
            6 => Some(Rgba::opaque(byte(0)?, byte(2)?, byte(4)?)),
            8 => Some(Rgba::new(byte(0)?, byte(2)?, byte(4)?, byte(6)?)),
            _ => None,
        }
    }

    pub fn to_hex(self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Point { x, y }
    }

    pub fn distance(self, other: Point) -> f32 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub from: Point,
    pub to: Point,
}

impl Segment {
    pub const fn new(from: Point, to: Point) -> Self {
        Segment { from, to }
    }

    pub fn length(&self) -> f32 {
        self.from.distance(self.to)
    }

    /// Distance from `p` to the closest point of the segment.
    pub fn distance_to(&self, p: Point) -> f32 {
        let (dx, dy) = (self.to.x - self.from.x, self.to.y - self.from.y);
        let len2 = dx * dx + dy * dy;
        if len2 == 0.0 {
            return p.distance(self.from);
        }
        let t = (((p.x - self.from.x) * dx + (p.y - self.from.y) * dy) / len2).clamp(0.0, 1.0);
        p.distance(Point::new(self.from.x + t * dx, self.from.y + t * dy))
    }
}

/// Raster the annotations are drawn on, composited over the video.
///
/// Pixel `(x, y)` covers the square `[x, x+1) × [y, y+1)`; strokes cover the
/// pixels whose center lies within half the stroke width of the segment,
/// which gives round caps and joins.
#[derive(Clone, PartialEq, Eq)]
pub struct Surface {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Surface {
    pub fn new(width: u32, height: u32) -> Self {
        Surface {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 4],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row-major RGBA8 buffer.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    fn offset(&self, x: u32, y: u32) -> Option<usize> {
        (x < self.width && y < self.height)
            .then(|| (y as usize * self.width as usize + x as usize) * 4)
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba> {
        let i = self.offset(x, y)?;
        let p = &self.pixels[i..i + 4];
        Some(Rgba::new(p[0], p[1], p[2], p[3]))
    }

    pub fn put_pixel(&mut self, x: u32, y: u32, color: Rgba) {
        if let Some(i) = self.offset(x, y) {
            self.pixels[i..i + 4].copy_from_slice(&[color.r, color.g, color.b, color.a]);
        }
    }

    pub fn is_blank(&self) -> bool {
        self.pixels.iter().all(|&b| b == 0)
    }

    /// Number of non-transparent pixels.
    pub fn painted(&self) -> usize {
        self.pixels.chunks_exact(4).filter(|p| p[3] != 0).count()
    }

    pub fn clear(&mut self) {
        self.pixels.fill(0);
    }

    /// Blank surface at the new size; nothing is carried over.
    pub fn resize(&mut self, width: u32, height: u32) {
        *self = Surface::new(width, height);
    }

    /// Replaces the content with `other`, clipped to this surface when the
    /// sizes differ.
    pub fn restore(&mut self, other: &Surface) {
        if self.width == other.width && self.height == other.height {
            self.pixels.copy_from_slice(&other.pixels);
            return;
        }
        self.clear();
        let w = self.width.min(other.width) as usize * 4;
        for y in 0..self.height.min(other.height) as usize {
            let dst = y * self.width as usize * 4;
            let src = y * other.width as usize * 4;
            self.pixels[dst..dst + w].copy_from_slice(&other.pixels[src..src + w]);
        }
    }

    pub fn stroke_segment(&mut self, segment: Segment, width: f32, color: Rgba) {
        let r = (width / 2.0).max(0.5);
        let (from, to) = (segment.from, segment.to);

        // float to int casts saturate, so off-canvas bounds clamp to 0
        let min_x = (from.x.min(to.x) - r).floor().max(0.0) as u32;
        let min_y = (from.y.min(to.y) - r).floor().max(0.0) as u32;
        let max_x = ((from.x.max(to.x) + r).ceil() as u32).min(self.width);
        let max_y = ((from.y.max(to.y) + r).ceil() as u32).min(self.height);

        for y in min_y..max_y {
            for x in min_x..max_x {
                let center = Point::new(x as f32 + 0.5, y as f32 + 0.5);
                if segment.distance_to(center) <= r {
                    self.put_pixel(x, y, color);
                }
            }
        }
    }

    pub fn stroke_segments(&mut self, segments: &[Segment], width: f32, color: Rgba) {
        for segment in segments {
            self.stroke_segment(*segment, width, color);
        }
    }

    /// Strokes the path through `points`, closing it back to the first point
    /// when `closed` is set.
    pub fn stroke_path(&mut self, points: &[Point], closed: bool, width: f32, color: Rgba) {
        for pair in points.windows(2) {
            self.stroke_segment(Segment::new(pair[0], pair[1]), width, color);
        }
        if let (true, Some(&first), Some(&last)) = (closed, points.first(), points.last()) {
            self.stroke_segment(Segment::new(last, first), width, color);
        }
    }
}

impl fmt::Debug for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Surface")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("painted", &self.painted())
            .finish()
    }
}
