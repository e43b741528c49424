//! Signaling message types and their wire format
//!
//! SDP messages travel as `{"type": "offer"|"answer"|"pranswer", "sdp": ...}`,
//! trickled candidates as `{"sdpMid", "sdpMLineIndex", "candidate"}`, and a
//! hangup as the bare text `BYE`.

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Plain-text hangup signal
pub const HANGUP: &str = "BYE";

/// Identifier of a remote endpoint on the signaling relay
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u64> for PeerId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<u32> for PeerId {
    fn from(id: u32) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Role of a session description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
}

impl SdpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SdpType::Offer => "offer",
            SdpType::Answer => "answer",
            SdpType::Pranswer => "pranswer",
        }
    }
}

impl std::fmt::Display for SdpType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable SDP blob together with its role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescriptor {
    sdp_type: SdpType,
    sdp: String,
}

impl SessionDescriptor {
    pub fn new(sdp_type: SdpType, sdp: impl Into<String>) -> Self {
        Self {
            sdp_type,
            sdp: sdp.into(),
        }
    }

    pub fn offer(sdp: impl Into<String>) -> Self {
        Self::new(SdpType::Offer, sdp)
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self::new(SdpType::Answer, sdp)
    }

    pub fn sdp_type(&self) -> SdpType {
        self.sdp_type
    }

    pub fn sdp(&self) -> &str {
        &self.sdp
    }

    /// New descriptor with the same role and a rewritten SDP body
    pub fn with_sdp(&self, sdp: impl Into<String>) -> Self {
        Self::new(self.sdp_type, sdp)
    }
}

/// ICE candidate exchanged over signaling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// SDP mid (media ID)
    #[serde(rename = "sdpMid")]
    pub sdp_mid: String,
    /// SDP mline index
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: u16,
    /// Candidate string
    pub candidate: String,
}

impl IceCandidate {
    pub fn new(sdp_mid: impl Into<String>, sdp_mline_index: u16, candidate: impl Into<String>) -> Self {
        Self {
            sdp_mid: sdp_mid.into(),
            sdp_mline_index,
            candidate: candidate.into(),
        }
    }
}

/// Parsed signaling message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingMessage {
    Offer(String),
    Answer(String),
    ProvisionalAnswer(String),
    IceCandidate(IceCandidate),
    Hangup,
}

/// Loose view of an inbound JSON payload; every field optional so that
/// validation can report what is missing.
#[derive(Debug, Deserialize)]
struct WirePayload {
    #[serde(rename = "type")]
    kind: Option<String>,
    sdp: Option<String>,
    #[serde(rename = "sdpMid")]
    sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex")]
    sdp_mline_index: Option<f64>,
    candidate: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl SignalingMessage {
    /// Parse a raw payload received from the relay
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(raw)
            .map_err(|e| AppError::MalformedMessage(format!("payload is not UTF-8: {}", e)))?;

        if text.trim() == HANGUP {
            return Ok(SignalingMessage::Hangup);
        }

        let payload: WirePayload = serde_json::from_str(text)
            .map_err(|e| AppError::MalformedMessage(format!("invalid JSON: {}", e)))?;

        if let Some(kind) = non_empty(payload.kind) {
            let sdp_type = match kind.as_str() {
                "offer" => SdpType::Offer,
                "answer" => SdpType::Answer,
                "pranswer" => SdpType::Pranswer,
                _ => return Err(AppError::UnsupportedMessageType(kind)),
            };
            let sdp = non_empty(payload.sdp).ok_or_else(|| {
                AppError::MalformedMessage(format!("{} without session description", kind))
            })?;

            return Ok(match sdp_type {
                SdpType::Offer => SignalingMessage::Offer(sdp),
                SdpType::Answer => SignalingMessage::Answer(sdp),
                SdpType::Pranswer => SignalingMessage::ProvisionalAnswer(sdp),
            });
        }

        match (
            non_empty(payload.sdp_mid),
            payload.sdp_mline_index,
            non_empty(payload.candidate),
        ) {
            (Some(sdp_mid), Some(index), Some(candidate)) => {
                if index.fract() != 0.0 || index < 0.0 || index > f64::from(u16::MAX) {
                    return Err(AppError::MalformedMessage(format!(
                        "invalid sdpMLineIndex {}",
                        index
                    )));
                }
                Ok(SignalingMessage::IceCandidate(IceCandidate {
                    sdp_mid,
                    sdp_mline_index: index as u16,
                    candidate,
                }))
            }
            _ => Err(AppError::MalformedMessage(
                "neither a session description nor a complete ICE candidate".to_string(),
            )),
        }
    }

    /// Serialize for the relay
    pub fn to_wire(&self) -> String {
        match self {
            SignalingMessage::Offer(sdp) => sdp_json(SdpType::Offer, sdp),
            SignalingMessage::Answer(sdp) => sdp_json(SdpType::Answer, sdp),
            SignalingMessage::ProvisionalAnswer(sdp) => sdp_json(SdpType::Pranswer, sdp),
            SignalingMessage::IceCandidate(c) => serde_json::json!({
                "sdpMid": c.sdp_mid,
                "sdpMLineIndex": c.sdp_mline_index,
                "candidate": c.candidate,
            })
            .to_string(),
            SignalingMessage::Hangup => HANGUP.to_string(),
        }
    }

    /// Message carrying the given local description
    pub fn from_description(desc: &SessionDescriptor) -> Self {
        let sdp = desc.sdp().to_string();
        match desc.sdp_type() {
            SdpType::Offer => SignalingMessage::Offer(sdp),
            SdpType::Answer => SignalingMessage::Answer(sdp),
            SdpType::Pranswer => SignalingMessage::ProvisionalAnswer(sdp),
        }
    }

    /// Session description carried by this message, if any
    pub fn session_description(&self) -> Option<SessionDescriptor> {
        match self {
            SignalingMessage::Offer(sdp) => Some(SessionDescriptor::new(SdpType::Offer, sdp.clone())),
            SignalingMessage::Answer(sdp) => Some(SessionDescriptor::new(SdpType::Answer, sdp.clone())),
            SignalingMessage::ProvisionalAnswer(sdp) => {
                Some(SessionDescriptor::new(SdpType::Pranswer, sdp.clone()))
            }
            _ => None,
        }
    }

    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            SignalingMessage::Offer(_) => "offer",
            SignalingMessage::Answer(_) => "answer",
            SignalingMessage::ProvisionalAnswer(_) => "pranswer",
            SignalingMessage::IceCandidate(_) => "candidate",
            SignalingMessage::Hangup => "hangup",
        }
    }
}

fn sdp_json(sdp_type: SdpType, sdp: &str) -> String {
    serde_json::json!({
        "type": sdp_type.as_str(),
        "sdp": sdp,
    })
    .to_string()
}
