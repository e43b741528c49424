//! Remote video statistics derived from RTP
//!
//! Frame rate is counted from marker bits (last packet of a frame) over
//! one-second windows. Resolution is read from VP8 keyframe headers; other
//! codecs only report frame rate.

use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(1);

/// Change detected by [`VideoStats::on_packet`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum VideoStatsChange {
    FrameRate(f32),
    Resolution { width: u32, height: u32 },
}

pub(crate) struct VideoStats {
    parse_vp8: bool,
    window_start: Instant,
    frames: u32,
    fps: Option<f32>,
    resolution: Option<(u32, u32)>,
}

impl VideoStats {
    pub(crate) fn new(parse_vp8: bool, now: Instant) -> Self {
        Self {
            parse_vp8,
            window_start: now,
            frames: 0,
            fps: None,
            resolution: None,
        }
    }

    /// Account for one RTP packet, returning what changed
    pub(crate) fn on_packet(
        &mut self,
        now: Instant,
        marker: bool,
        payload: &[u8],
    ) -> Vec<VideoStatsChange> {
        let mut changes = vec![];

        if self.parse_vp8 {
            if let Some(size) = vp8_keyframe_size(payload) {
                if self.resolution != Some(size) {
                    self.resolution = Some(size);
                    changes.push(VideoStatsChange::Resolution {
                        width: size.0,
                        height: size.1,
                    });
                }
            }
        }

        if marker {
            self.frames += 1;
        }

        let elapsed = now.duration_since(self.window_start);
        if elapsed >= WINDOW {
            let fps = (self.frames as f32 / elapsed.as_secs_f32()).round();
            if self.fps != Some(fps) {
                self.fps = Some(fps);
                changes.push(VideoStatsChange::FrameRate(fps));
            }
            self.window_start = now;
            self.frames = 0;
        }

        changes
    }
}

/// Width and height from the first packet of a VP8 keyframe (RFC 7741)
pub(crate) fn vp8_keyframe_size(payload: &[u8]) -> Option<(u32, u32)> {
    let descriptor = *payload.first()?;
    let extended = descriptor & 0x80 != 0;
    let start_of_partition = descriptor & 0x10 != 0;
    let partition_id = descriptor & 0x07;
    if !start_of_partition || partition_id != 0 {
        return None;
    }

    let mut offset = 1;
    if extended {
        let ext = *payload.get(offset)?;
        offset += 1;
        if ext & 0x80 != 0 {
            // PictureID, 7 or 15 bits
            let picture_id = *payload.get(offset)?;
            offset += if picture_id & 0x80 != 0 { 2 } else { 1 };
        }
        if ext & 0x40 != 0 {
            offset += 1;
        }
        if ext & 0x30 != 0 {
            offset += 1;
        }
    }

    let frame = payload.get(offset..offset + 10)?;
    // Inverse keyframe flag
    if frame[0] & 0x01 != 0 {
        return None;
    }
    if frame[3..6] != [0x9d, 0x01, 0x2a] {
        return None;
    }

    let width = u16::from_le_bytes([frame[6], frame[7]]) & 0x3fff;
    let height = u16::from_le_bytes([frame[8], frame[9]]) & 0x3fff;
    Some((u32::from(width), u32::from(height)))
}
