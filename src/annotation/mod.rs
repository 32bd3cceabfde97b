//! Hub-side markup drawn over the full-screen feed. Local only, never sent
//! to other nodes.

pub mod engine;
pub mod history;
pub mod shapes;
pub mod surface;

pub use engine::{AnnotationEngine, Stroke};
pub use history::History;
pub use shapes::{Shape, ShapeColor, Tool};
pub use surface::{Point, Rgba, Segment, Surface};
