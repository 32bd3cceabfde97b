//! Hub and Satellite nodes
//!
//! [`ConnectionManager`] holds a node's links and tally replica,
//! [`driver::spawn`] runs it as a task fed by transport events and UI
//! commands.

pub mod driver;
pub mod manager;
pub mod registry;
pub mod tally;

pub use driver::{spawn, Command, NodeHandle};
pub use manager::{ConnectionManager, NodeError, NodeSnapshot};
pub use registry::{PeerLink, StreamRegistry};
pub use tally::{BroadcastReport, TallyBroadcaster, TallyError, TallyState};
