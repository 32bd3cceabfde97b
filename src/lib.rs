//! Multi-camera session core.
//!
//! A Hub advertises a 4-digit join code, Satellites join with it and stream
//! their camera to the Hub, and the Hub broadcasts a shared tally
//! (recording / standby) back to every Satellite. The Hub operator can
//! annotate the full-screen feed.

pub mod annotation;
pub mod assets;
pub mod config;
pub mod net;
pub mod node;
pub mod session;
pub mod utils;

pub use config::Config;
