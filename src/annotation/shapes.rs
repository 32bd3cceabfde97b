use crate::annotation::surface::{Point, Rgba, Segment, Surface};
use crate::assets::ARROW_HEAD_ANGLE;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tool {
    /// Input passes through to the video below
    Select,
    #[default]
    Freehand,
    Arrow,
    Cross,
    Ellipse,
}

impl Tool {
    pub fn is_drawing(self) -> bool {
        self != Tool::Select
    }

    /// Tools drawn from the start and current point only.
    pub fn is_shape(self) -> bool {
        matches!(self, Tool::Arrow | Tool::Cross | Tool::Ellipse)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeColor {
    #[default]
    Yellow,
    Red,
    Blue,
    Custom(Rgba),
}

impl ShapeColor {
    pub const PALETTE: [ShapeColor; 3] = [ShapeColor::Yellow, ShapeColor::Red, ShapeColor::Blue];

    pub fn rgba(self) -> Rgba {
        match self {
            ShapeColor::Yellow => Rgba::opaque(0xFA, 0xCC, 0x15),
            ShapeColor::Red => Rgba::opaque(0xEF, 0x44, 0x44),
            ShapeColor::Blue => Rgba::opaque(0x3B, 0x82, 0xF6),
            ShapeColor::Custom(color) => color,
        }
    }
}

/// A parametric shape spanned by the gesture's start and current point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Shape {
    Arrow { from: Point, to: Point, head: f32 },
    Cross { start: Point, end: Point },
    Ellipse { start: Point, end: Point },
}

impl Shape {
    pub fn for_tool(tool: Tool, start: Point, end: Point, head: f32) -> Option<Shape> {
        match tool {
            Tool::Arrow => Some(Shape::Arrow { from: start, to: end, head }),
            Tool::Cross => Some(Shape::Cross { start, end }),
            Tool::Ellipse => Some(Shape::Ellipse { start, end }),
            Tool::Select | Tool::Freehand => None,
        }
    }

    pub fn draw(&self, surface: &mut Surface, width: f32, color: Rgba) {
        match *self {
            Shape::Arrow { from, to, head } => {
                surface.stroke_segments(&arrow(from, to, head), width, color)
            }
            Shape::Cross { start, end } => {
                surface.stroke_segments(&cross(start, end), width, color)
            }
            Shape::Ellipse { start, end } => {
                surface.stroke_path(&ellipse(start, end), true, width, color)
            }
        }
    }
}

/// Body `from → to` and the two head strokes at `to`, each
/// [`ARROW_HEAD_ANGLE`] off the reversed direction.
pub fn arrow(from: Point, to: Point, head: f32) -> [Segment; 3] {
    let angle = (to.y - from.y).atan2(to.x - from.x);
    let barb = |a: f32| Point::new(to.x - head * a.cos(), to.y - head * a.sin());
    [
        Segment::new(from, to),
        Segment::new(to, barb(angle - ARROW_HEAD_ANGLE)),
        Segment::new(to, barb(angle + ARROW_HEAD_ANGLE)),
    ]
}

/// Both diagonals of the box spanned by `start` and `end`.
pub fn cross(start: Point, end: Point) -> [Segment; 2] {
    [
        Segment::new(start, end),
        Segment::new(Point::new(start.x, end.y), Point::new(end.x, start.y)),
    ]
}

/// Closed outline of the ellipse inscribed in the box spanned by `start` and
/// `end`, as a polygon fine enough to look smooth at stroke width.
pub fn ellipse(start: Point, end: Point) -> Vec<Point> {
    let center = Point::new((start.x + end.x) / 2.0, (start.y + end.y) / 2.0);
    let rx = (end.x - start.x).abs() / 2.0;
    let ry = (end.y - start.y).abs() / 2.0;

    // roughly one vertex per 2px of perimeter
    let steps = ((PI * (rx + ry)) / 2.0).ceil().clamp(16.0, 720.0) as usize;
    (0..steps)
        .map(|i| {
            let t = 2.0 * PI * i as f32 / steps as f32;
            Point::new(center.x + rx * t.cos(), center.y + ry * t.sin())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Point, b: Point) -> bool {
        a.distance(b) < 1e-3
    }

    #[test]
    fn test_arrow_geometry() {
        let [body, left, right] = arrow(Point::new(0.0, 0.0), Point::new(100.0, 0.0), 20.0);
        assert_eq!(body, Segment::new(Point::new(0.0, 0.0), Point::new(100.0, 0.0)));

        for head in [left, right] {
            assert_eq!(head.from, Point::new(100.0, 0.0));
            assert!((head.length() - 20.0).abs() < 1e-3);
            // 30 degrees off the reversed direction (-1, 0)
            let (dx, dy) = (head.to.x - head.from.x, head.to.y - head.from.y);
            let cos = -dx / head.length();
            assert!((cos - (PI / 6.0).cos()).abs() < 1e-4);
            assert!((dy.abs() - 10.0).abs() < 1e-3);
        }
        assert!(close(left.to, Point::new(100.0 - 20.0 * (PI / 6.0).cos(), 10.0)));
        assert!(close(right.to, Point::new(100.0 - 20.0 * (PI / 6.0).cos(), -10.0)));
    }

    #[test]
    fn test_cross_geometry() {
        let [a, b] = cross(Point::new(10.0, 10.0), Point::new(50.0, 40.0));
        assert_eq!(a, Segment::new(Point::new(10.0, 10.0), Point::new(50.0, 40.0)));
        assert_eq!(b, Segment::new(Point::new(10.0, 40.0), Point::new(50.0, 10.0)));
    }

    #[test]
    fn test_ellipse_inscribed() {
        let points = ellipse(Point::new(50.0, 40.0), Point::new(10.0, 10.0));
        assert!(points.len() >= 16);
        for p in &points {
            let nx = (p.x - 30.0) / 20.0;
            let ny = (p.y - 25.0) / 15.0;
            assert!((nx * nx + ny * ny - 1.0).abs() < 1e-3);
        }
        assert!(close(points[0], Point::new(50.0, 25.0)));
    }

    #[test]
    fn test_palette() {
        assert_eq!(ShapeColor::default().rgba().to_hex(), "#FACC15");
        assert_eq!(ShapeColor::Red.rgba().to_hex(), "#EF4444");
        assert_eq!(ShapeColor::Blue.rgba().to_hex(), "#3B82F6");
        assert_eq!(Shape::for_tool(Tool::Freehand, Point::default(), Point::default(), 20.0), None);
    }

    #[test]
    fn test_color_config_format() {
        let red: ShapeColor = serde_json::from_str(r#""red""#).unwrap();
        assert_eq!(red, ShapeColor::Red);
        let custom: ShapeColor =
            serde_json::from_str(r#"{"custom":{"r":1,"g":2,"b":3,"a":255}}"#).unwrap();
        assert_eq!(custom.rgba(), Rgba::opaque(1, 2, 3));
    }
}
