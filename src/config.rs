use crate::annotation::ShapeColor;
use crate::assets::{
    ARROW_HEAD_LENGTH, CODE_MAX, CODE_MIN, NAMESPACE_PREFIX, SIGNALING_URL, STROKE_WIDTH,
    STUN_SERVER,
};
use crate::net::media::CaptureRequest;
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    pub stroke_width: f32,
    pub arrow_head_length: f32,
    /// Maximum undo depth; `None` keeps every snapshot for the session.
    pub history_limit: Option<usize>,
    pub color: ShapeColor,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        AnnotationConfig {
            stroke_width: STROKE_WIDTH,
            arrow_head_length: ARROW_HEAD_LENGTH,
            history_limit: None,
            color: ShapeColor::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Prefix joined with the code to form the Hub's transport identity.
    pub namespace: String,
    pub code_min: u16,
    pub code_max: u16,
    pub capture: CaptureRequest,
    pub signaling_url: String,
    pub ice_servers: Vec<String>,
    pub annotation: AnnotationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            namespace: NAMESPACE_PREFIX.to_string(),
            code_min: CODE_MIN,
            code_max: CODE_MAX,
            capture: CaptureRequest::default(),
            signaling_url: SIGNALING_URL.to_string(),
            ice_servers: vec![STUN_SERVER.to_string()],
            annotation: AnnotationConfig::default(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Config::default()
    }

    /// Parses a JSON document; missing keys keep their defaults.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Config = serde_json::from_str(json).context("malformed configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.code_min > self.code_max {
            bail!("code range {}..={} is empty", self.code_min, self.code_max);
        }
        if self.code_max > 9999 {
            bail!("code range must stay within 4 digits, got {}", self.code_max);
        }
        if self.namespace.is_empty() {
            bail!("namespace prefix must not be empty");
        }
        if !(self.annotation.stroke_width > 0.0) {
            bail!("stroke width must be positive, got {}", self.annotation.stroke_width);
        }
        if self.annotation.arrow_head_length < 0.0 {
            bail!("arrow head length must not be negative");
        }
        Ok(())
    }
}

/// Installs the fmt subscriber, which also collects `log` records.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt::try_init();
}

/// Returns a version as specified in Cargo.toml
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}
