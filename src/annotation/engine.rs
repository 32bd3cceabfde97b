//! Annotation engine
//!
//! Gesture state machine over a [`Surface`]: `Idle → Drawing → Idle`.
//! Every gesture first pushes the surface onto the undo history. Shape
//! tools redraw from a copy of the surface taken at gesture start, so only
//! the latest shape of a gesture is ever visible.

use crate::annotation::history::History;
use crate::annotation::shapes::{Shape, ShapeColor, Tool};
use crate::annotation::surface::{Point, Segment, Surface};
use crate::config::AnnotationConfig;

/// A gesture in progress or just completed.
#[derive(Debug, Clone, PartialEq)]
pub struct Stroke {
    pub tool: Tool,
    pub color: ShapeColor,
    pub start: Point,
    /// Every point seen; shape tools only use the first and last.
    pub path: Vec<Point>,
}

impl Stroke {
    pub fn last(&self) -> Point {
        self.path.last().copied().unwrap_or(self.start)
    }
}

#[derive(Debug)]
enum Gesture {
    Idle,
    Drawing { stroke: Stroke, base: Surface },
}

#[derive(Debug)]
pub struct AnnotationEngine {
    surface: Surface,
    history: History,
    tool: Tool,
    color: ShapeColor,
    stroke_width: f32,
    head_length: f32,
    gesture: Gesture,
}

impl AnnotationEngine {
    pub fn new(width: u32, height: u32) -> Self {
        AnnotationEngine::with_config(width, height, &AnnotationConfig::default())
    }

    pub fn with_config(width: u32, height: u32, config: &AnnotationConfig) -> Self {
        AnnotationEngine {
            surface: Surface::new(width, height),
            history: History::new(config.history_limit),
            tool: Tool::default(),
            color: config.color,
            stroke_width: config.stroke_width,
            head_length: config.arrow_head_length,
            gesture: Gesture::Idle,
        }
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    pub fn tool(&self) -> Tool {
        self.tool
    }

    pub fn color(&self) -> ShapeColor {
        self.color
    }

    pub fn stroke_width(&self) -> f32 {
        self.stroke_width
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn is_drawing(&self) -> bool {
        matches!(self.gesture, Gesture::Drawing { .. })
    }

    /// Takes effect on the next gesture.
    pub fn select_tool(&mut self, tool: Tool) {
        self.tool = tool;
    }

    /// Takes effect on the next gesture.
    pub fn select_color(&mut self, color: ShapeColor) {
        self.color = color;
    }

    /// Starts a gesture. Returns false in select mode, where the input
    /// belongs to whatever is under the overlay.
    pub fn gesture_start(&mut self, point: Point) -> bool {
        if !self.tool.is_drawing() {
            return false;
        }
        self.history.push(self.surface.clone());
        self.gesture = Gesture::Drawing {
            stroke: Stroke {
                tool: self.tool,
                color: self.color,
                start: point,
                path: vec![point],
            },
            base: self.surface.clone(),
        };
        true
    }

    pub fn gesture_move(&mut self, point: Point) {
        let Gesture::Drawing { stroke, base } = &mut self.gesture else {
            return;
        };
        let color = stroke.color.rgba();

        if stroke.tool == Tool::Freehand {
            let segment = Segment::new(stroke.last(), point);
            self.surface.stroke_segment(segment, self.stroke_width, color);
        } else if let Some(shape) =
            Shape::for_tool(stroke.tool, stroke.start, point, self.head_length)
        {
            self.surface.restore(base);
            shape.draw(&mut self.surface, self.stroke_width, color);
        }
        stroke.path.push(point);
    }

    /// Ends the gesture, returning what was drawn.
    pub fn gesture_end(&mut self) -> Option<Stroke> {
        match std::mem::replace(&mut self.gesture, Gesture::Idle) {
            Gesture::Drawing { stroke, .. } => Some(stroke),
            Gesture::Idle => None,
        }
    }

    /// Puts back the surface as it was before the latest gesture or clear.
    pub fn undo(&mut self) -> bool {
        let Some(previous) = self.history.pop() else {
            return false;
        };
        self.gesture = Gesture::Idle;
        self.surface.restore(&previous);
        true
    }

    pub fn clear(&mut self) {
        self.history.push(self.surface.clone());
        self.surface.clear();
    }

    /// Blanks the surface at the new size. History is kept; undoing into a
    /// snapshot of another size clips it.
    pub fn resize(&mut self, width: u32, height: u32) {
        if self.is_drawing() {
            log::debug!("Resize during a gesture, dropping it");
        }
        self.gesture = Gesture::Idle;
        self.surface.resize(width, height);
    }

    /// Ends the session: blank surface, empty history.
    pub fn reset(&mut self) {
        self.gesture = Gesture::Idle;
        self.history.clear();
        self.surface.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::surface::Rgba;

    fn drag(engine: &mut AnnotationEngine, points: &[(f32, f32)]) {
        let mut points = points.iter().map(|&(x, y)| Point::new(x, y));
        let Some(start) = points.next() else {
            return;
        };
        engine.gesture_start(start);
        for p in points {
            engine.gesture_move(p);
        }
        engine.gesture_end();
    }

    #[test]
    fn test_freehand_draws_path() {
        let mut engine = AnnotationEngine::new(100, 100);
        drag(&mut engine, &[(10.0, 10.0), (50.0, 10.0), (50.0, 50.0)]);

        let yellow = ShapeColor::Yellow.rgba();
        assert_eq!(engine.surface().pixel(30, 10), Some(yellow));
        assert_eq!(engine.surface().pixel(50, 30), Some(yellow));
        assert_eq!(engine.surface().pixel(30, 30), Some(Rgba::TRANSPARENT));
        assert_eq!(engine.history_len(), 1);
        assert!(!engine.is_drawing());
    }

    #[test]
    fn test_undo_round_trip() {
        let mut engine = AnnotationEngine::new(64, 48);
        drag(&mut engine, &[(5.0, 5.0), (60.0, 40.0)]);
        let before = engine.surface().clone();

        engine.select_tool(Tool::Ellipse);
        engine.select_color(ShapeColor::Blue);
        drag(&mut engine, &[(10.0, 10.0), (30.0, 20.0), (50.0, 40.0)]);
        assert_ne!(engine.surface(), &before);

        assert!(engine.undo());
        assert_eq!(engine.surface(), &before);

        // start alone already records a snapshot
        engine.gesture_start(Point::new(1.0, 1.0));
        assert!(engine.undo());
        assert_eq!(engine.surface(), &before);
    }

    #[test]
    fn test_undo_on_empty_history() {
        let mut engine = AnnotationEngine::new(8, 8);
        assert!(!engine.undo());
        assert!(engine.surface().is_blank());
    }

    #[test]
    fn test_preview_shows_one_shape() {
        let mut engine = AnnotationEngine::new(120, 80);
        drag(&mut engine, &[(5.0, 70.0), (115.0, 70.0)]);
        let base = engine.surface().clone();

        engine.select_tool(Tool::Arrow);
        engine.gesture_start(Point::new(10.0, 10.0));
        for p in [(50.0, 50.0), (100.0, 10.0), (90.0, 20.0)] {
            engine.gesture_move(Point::new(p.0, p.1));
        }

        let mut expected = base.clone();
        Shape::for_tool(Tool::Arrow, Point::new(10.0, 10.0), Point::new(90.0, 20.0), 20.0)
            .unwrap()
            .draw(&mut expected, 4.0, ShapeColor::Yellow.rgba());
        assert_eq!(engine.surface(), &expected);

        let stroke = engine.gesture_end().unwrap();
        assert_eq!(stroke.tool, Tool::Arrow);
        assert_eq!(stroke.last(), Point::new(90.0, 20.0));
    }

    #[test]
    fn test_select_passes_through() {
        let mut engine = AnnotationEngine::new(32, 32);
        engine.select_tool(Tool::Select);

        assert!(!engine.gesture_start(Point::new(1.0, 1.0)));
        engine.gesture_move(Point::new(30.0, 30.0));
        assert_eq!(engine.gesture_end(), None);
        assert!(engine.surface().is_blank());
        assert_eq!(engine.history_len(), 0);
    }

    #[test]
    fn test_clear_is_undoable() {
        let mut engine = AnnotationEngine::new(32, 32);
        engine.select_tool(Tool::Cross);
        drag(&mut engine, &[(4.0, 4.0), (28.0, 28.0)]);
        let drawn = engine.surface().clone();

        engine.clear();
        assert!(engine.surface().is_blank());
        assert_eq!(engine.history_len(), 2);

        engine.undo();
        assert_eq!(engine.surface(), &drawn);
    }

    #[test]
    fn test_resize_blanks_and_keeps_history() {
        let mut engine = AnnotationEngine::new(40, 40);
        drag(&mut engine, &[(2.0, 2.0), (38.0, 2.0)]);
        drag(&mut engine, &[(2.0, 20.0), (38.0, 20.0)]);

        engine.resize(20, 30);
        assert!(engine.surface().is_blank());
        assert_eq!(engine.surface().width(), 20);
        assert_eq!(engine.history_len(), 2);

        // snapshot before the second stroke, clipped to 20x30
        engine.undo();
        assert_eq!(engine.surface().width(), 20);
        assert_eq!(engine.surface().pixel(10, 2), Some(ShapeColor::Yellow.rgba()));
        assert_eq!(engine.surface().pixel(10, 20), Some(Rgba::TRANSPARENT));
    }

    #[test]
    fn test_history_limit_from_config() {
        let config = AnnotationConfig {
            history_limit: Some(1),
            ..AnnotationConfig::default()
        };
        let mut engine = AnnotationEngine::with_config(16, 16, &config);
        drag(&mut engine, &[(1.0, 1.0), (15.0, 1.0)]);
        let after_first = engine.surface().clone();
        drag(&mut engine, &[(1.0, 8.0), (15.0, 8.0)]);

        assert_eq!(engine.history_len(), 1);
        assert!(engine.undo());
        assert_eq!(engine.surface(), &after_first);
        assert!(!engine.undo());
    }
}
