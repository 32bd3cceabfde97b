use crate::annotation::surface::Surface;

/// Undo stack of full-surface snapshots.
///
/// With a limit set, the oldest snapshot is dropped to make room.
#[derive(Debug, Default, Clone)]
pub struct History {
    snapshots: Vec<Surface>,
    limit: Option<usize>,
}

impl History {
    pub fn new(limit: Option<usize>) -> Self {
        History {
            snapshots: Vec::new(),
            limit,
        }
    }

    pub fn push(&mut self, snapshot: Surface) {
        if self.limit == Some(0) {
            return;
        }
        self.snapshots.push(snapshot);
        if let Some(limit) = self.limit {
            let excess = self.snapshots.len().saturating_sub(limit);
            self.snapshots.drain(..excess);
        }
    }

    pub fn pop(&mut self) -> Option<Surface> {
        self.snapshots.pop()
    }

    pub fn peek(&self) -> Option<&Surface> {
        self.snapshots.last()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
    }
}
