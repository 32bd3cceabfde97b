// session
pub const NAMESPACE_PREFIX: &str = "multicam-";
pub const CODE_LEN: usize = 4;
pub const CODE_MIN: u16 = 1000;
pub const CODE_MAX: u16 = 9999;

// capture
pub const CAPTURE_WIDTH: u32 = 1280;
pub const CAPTURE_FACING: &str = "environment";
pub const STREAM_CHUNK_BACKLOG: usize = 64;

// connections
pub const SIGNALING_URL: &str = "ws://127.0.0.1:31413";
pub const STUN_SERVER: &str = "stun:stun.l.google.com:19302";
pub const CONTROL_CHANNEL_LABEL: &str = "control";

// telestrator
pub const STROKE_WIDTH: f32 = 4.0;
pub const ARROW_HEAD_LENGTH: f32 = 20.0;
pub const ARROW_HEAD_ANGLE: f32 = std::f32::consts::FRAC_PI_6;
