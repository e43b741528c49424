use serde::{Deserialize, Serialize};

use crate::codec::{CodecCatalog, MediaKind};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Call session settings
    pub session: SessionConfig,
}

/// Peer connection and negotiation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// STUN/TURN servers handed to every new peer connection
    pub ice_servers: Vec<IceServerConfig>,
    /// Media bundling policy
    pub bundle_policy: BundlePolicy,
    /// Which candidate types ICE may use
    pub ice_transport_policy: IceTransportPolicy,
    /// Audio payload type moved to the front of the local offer (catalog default if unset)
    pub preferred_audio_payload_type: Option<u8>,
    /// Video payload type moved to the front of the local offer (catalog default if unset)
    pub preferred_video_payload_type: Option<u8>,
    /// Ask the remote side to send audio
    pub offer_to_receive_audio: bool,
    /// Ask the remote side to send video
    pub offer_to_receive_video: bool,
    /// Attach local audio/video tracks when a connection is created
    pub send_local_media: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![],
            bundle_policy: BundlePolicy::Balanced,
            ice_transport_policy: IceTransportPolicy::All,
            preferred_audio_payload_type: None,
            preferred_video_payload_type: None,
            offer_to_receive_audio: true,
            offer_to_receive_video: true,
            send_local_media: true,
        }
    }
}

impl SessionConfig {
    /// Payload types to prefer in the local offer, as (audio, video)
    pub fn preferred_payload_types(&self, catalog: &CodecCatalog) -> (u8, u8) {
        (
            self.preferred_audio_payload_type
                .unwrap_or_else(|| catalog.preferred(MediaKind::Audio).payload_type),
            self.preferred_video_payload_type
                .unwrap_or_else(|| catalog.preferred(MediaKind::Video).payload_type),
        )
    }
}

/// STUN or TURN server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    /// Server URLs (e.g. `stun:stun.l.google.com:19302`, `turn:turn.example.com:3478?transport=udp`)
    pub urls: Vec<String>,
    /// Username for TURN authentication
    #[serde(default)]
    pub username: String,
    /// Credential for TURN authentication
    #[serde(default)]
    pub credential: String,
}

impl IceServerConfig {
    /// STUN server without credentials
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: String::new(),
            credential: String::new(),
        }
    }

    /// Whether any URL points at a TURN server
    pub fn is_turn(&self) -> bool {
        self.urls
            .iter()
            .any(|u| u.starts_with("turn:") || u.starts_with("turns:"))
    }
}

/// Bundle policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BundlePolicy {
    #[default]
    Balanced,
    MaxCompat,
    MaxBundle,
}

/// ICE transport policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceTransportPolicy {
    #[default]
    All,
    Relay,
}
