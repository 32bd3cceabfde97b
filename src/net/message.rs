//! Control-channel messages

use serde::{Deserialize, Serialize};

/// On-air flag shared by every node of a session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TallyState {
    #[default]
    Standby,
    Recording,
}

impl TallyState {
    pub fn toggled(self) -> TallyState {
        match self {
            TallyState::Standby => TallyState::Recording,
            TallyState::Recording => TallyState::Standby,
        }
    }

    pub fn is_recording(self) -> bool {
        self == TallyState::Recording
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TallyState::Standby => "STANDBY",
            TallyState::Recording => "RECORDING",
        }
    }
}

impl std::fmt::Display for TallyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Messages carried by a control channel, serialized as JSON with a `type`
/// discriminator, e.g. `{"type":"TALLY","status":"RECORDING"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    #[serde(rename = "TALLY")]
    Tally { status: TallyState },
}

impl ControlMessage {
    pub fn tally(status: TallyState) -> Self {
        ControlMessage::Tally { status }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let msg = ControlMessage::tally(TallyState::Recording);
        assert_eq!(msg.encode().unwrap(), r#"{"type":"TALLY","status":"RECORDING"}"#);

        let parsed = ControlMessage::decode(r#"{"status":"STANDBY","type":"TALLY"}"#).unwrap();
        assert_eq!(parsed, ControlMessage::tally(TallyState::Standby));
    }

    #[test]
    fn test_unknown_messages_rejected() {
        assert!(ControlMessage::decode(r#"{"type":"CHAT","text":"hi"}"#).is_err());
        assert!(ControlMessage::decode(r#"{"type":"TALLY","status":"LIVE"}"#).is_err());
        assert!(ControlMessage::decode("garbage").is_err());
    }

    #[test]
    fn test_toggle() {
        assert_eq!(TallyState::default(), TallyState::Standby);
        assert_eq!(TallyState::Standby.toggled(), TallyState::Recording);
        assert_eq!(TallyState::Recording.toggled(), TallyState::Standby);
        assert!(TallyState::Recording.is_recording());
    }
}
