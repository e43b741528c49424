//! Session description editing
//!
//! Pure text transforms over SDP blobs. Only the format list of `m=` lines is
//! touched; every other line, including its line ending, is copied verbatim.

use thiserror::Error;

use crate::codec::MediaKind;

/// SDP editing errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SdpEditError {
    #[error("payload type {payload_type} not offered in {kind} media section")]
    MissingPayloadType { kind: MediaKind, payload_type: u8 },
    #[error("malformed media line: {0}")]
    MalformedMediaLine(String),
}

/// Move the preferred audio and video payload types to the front of every
/// audio and video media section's format list.
///
/// Sections of other kinds (e.g. `application`) are left alone, and so is an
/// SDP without an audio or video section. Fails without producing output if a
/// present audio/video section does not list the preferred payload type.
pub fn reorder_codecs(
    sdp: &str,
    preferred_audio_payload_type: u8,
    preferred_video_payload_type: u8,
) -> Result<String, SdpEditError> {
    let mut out = String::with_capacity(sdp.len());

    for line in sdp.split_inclusive('\n') {
        let (content, ending) = split_line_ending(line);

        let Some(kind) = media_kind(content) else {
            out.push_str(line);
            continue;
        };

        let preferred = match kind {
            MediaKind::Audio => preferred_audio_payload_type,
            MediaKind::Video => preferred_video_payload_type,
        };
        out.push_str(&prefer_payload_type(content, kind, preferred)?);
        out.push_str(ending);
    }

    Ok(out)
}

/// Payload types listed by each media section of the given kind, in order
pub fn payload_types(sdp: &str, kind: MediaKind) -> Vec<Vec<String>> {
    sdp.lines()
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| media_kind(l) == Some(kind))
        .map(|l| l.split(' ').skip(3).map(str::to_string).collect())
        .collect()
}

fn split_line_ending(line: &str) -> (&str, &str) {
    if let Some(content) = line.strip_suffix("\r\n") {
        (content, "\r\n")
    } else if let Some(content) = line.strip_suffix('\n') {
        (content, "\n")
    } else {
        (line, "")
    }
}

fn media_kind(line: &str) -> Option<MediaKind> {
    let rest = line.strip_prefix("m=")?;
    let kind = rest.split(' ').next()?;
    match kind {
        "audio" => Some(MediaKind::Audio),
        "video" => Some(MediaKind::Video),
        _ => None,
    }
}

fn prefer_payload_type(line: &str, kind: MediaKind, preferred: u8) -> Result<String, SdpEditError> {
    // m=<media> <port> <proto> <fmt> ...
    let tokens: Vec<&str> = line.split(' ').collect();
    if tokens.len() < 4 {
        return Err(SdpEditError::MalformedMediaLine(line.to_string()));
    }

    let (head, formats) = tokens.split_at(3);
    let wanted = preferred.to_string();
    let position = formats
        .iter()
        .position(|f| *f == wanted)
        .ok_or(SdpEditError::MissingPayloadType {
            kind,
            payload_type: preferred,
        })?;

    let mut reordered = Vec::with_capacity(tokens.len());
    reordered.extend_from_slice(head);
    reordered.push(formats[position]);
    reordered.extend(
        formats
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != position)
            .map(|(_, f)| *f),
    );

    Ok(reordered.join(" "))
}
