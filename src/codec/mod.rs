//! Supported codec catalog
//!
//! Static, ordered lists of the audio and video codecs offered in a call.
//! The first entry of each list is the default preference used to bias the
//! local offer (see [`crate::sdp::reorder_codecs`]).

use serde::{Deserialize, Serialize};

/// Media kind of a codec, track or SDP media section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// Media type token as it appears in an SDP `m=` line
    pub fn as_sdp_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_sdp_str())
    }
}

/// RTP codec descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CodecDescriptor {
    /// Preferred RTP payload type
    pub payload_type: u8,
    /// RTP clock rate in Hz
    pub clock_rate: u32,
    /// Encoding name as used in `a=rtpmap`
    pub name: &'static str,
}

impl CodecDescriptor {
    const fn new(payload_type: u8, clock_rate: u32, name: &'static str) -> Self {
        Self {
            payload_type,
            clock_rate,
            name,
        }
    }
}

impl std::fmt::Display for CodecDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{} (pt {})", self.name, self.clock_rate, self.payload_type)
    }
}

const AUDIO_CODECS: &[CodecDescriptor] = &[
    CodecDescriptor::new(111, 48000, "opus"),
    CodecDescriptor::new(103, 16000, "ISAC"),
    CodecDescriptor::new(104, 32000, "ISAC"),
    CodecDescriptor::new(9, 8000, "G722"),
    CodecDescriptor::new(102, 8000, "ILBC"),
    CodecDescriptor::new(0, 8000, "PCMU"),
    CodecDescriptor::new(8, 8000, "PCMA"),
];

const VIDEO_CODECS: &[CodecDescriptor] = &[
    CodecDescriptor::new(96, 90000, "VP8"),
    CodecDescriptor::new(98, 90000, "VP9"),
    CodecDescriptor::new(100, 90000, "H264"),
];

/// Read-only codec catalog
///
/// Zero-sized; all data is `'static`, so it can be copied and shared freely
/// without synchronization.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodecCatalog;

impl CodecCatalog {
    /// Supported audio codecs in preference order
    pub fn audio(&self) -> &'static [CodecDescriptor] {
        AUDIO_CODECS
    }

    /// Supported video codecs in preference order
    pub fn video(&self) -> &'static [CodecDescriptor] {
        VIDEO_CODECS
    }

    /// Codecs of the given kind
    pub fn codecs(&self, kind: MediaKind) -> &'static [CodecDescriptor] {
        match kind {
            MediaKind::Audio => AUDIO_CODECS,
            MediaKind::Video => VIDEO_CODECS,
        }
    }

    /// Default (first) codec of the given kind
    pub fn preferred(&self, kind: MediaKind) -> CodecDescriptor {
        self.codecs(kind)[0]
    }

    /// Look up a codec by payload type
    pub fn find(&self, kind: MediaKind, payload_type: u8) -> Option<CodecDescriptor> {
        self.codecs(kind)
            .iter()
            .copied()
            .find(|c| c.payload_type == payload_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preferred_codecs() {
        let catalog = CodecCatalog;
        assert_eq!(catalog.preferred(MediaKind::Audio).name, "opus");
        assert_eq!(catalog.preferred(MediaKind::Audio).payload_type, 111);
        assert_eq!(catalog.preferred(MediaKind::Video).name, "VP8");
        assert_eq!(catalog.preferred(MediaKind::Video).clock_rate, 90000);
    }

    #[test]
    fn test_payload_types_unique_per_kind() {
        let catalog = CodecCatalog;
        for kind in [MediaKind::Audio, MediaKind::Video] {
            let mut pts: Vec<u8> = catalog.codecs(kind).iter().map(|c| c.payload_type).collect();
            let len = pts.len();
            pts.sort_unstable();
            pts.dedup();
            assert_eq!(pts.len(), len, "duplicate payload type in {} list", kind);
        }
    }

    #[test]
    fn test_find() {
        let catalog = CodecCatalog;
        assert_eq!(catalog.find(MediaKind::Video, 100).map(|c| c.name), Some("H264"));
        assert_eq!(catalog.find(MediaKind::Audio, 100), None);
        assert_eq!(catalog.audio().len(), 7);
        assert_eq!(catalog.video().len(), 3);
    }
}
