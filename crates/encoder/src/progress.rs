//! Parsing of the encoder's live status stream.
//!
//! ffmpeg reports progress as `key=value` tokens on its diagnostic stream
//! (`frame= 123 fps= 60.0 size= 1024kB time=00:00:10.00 bitrate= ... speed= 1.0x`).
//! Each received chunk is scanned with a fixed set of extractors; any subset
//! of keys may be present and whatever is found updates a running snapshot.

use std::sync::Arc;

use serde::Serialize;

/// Callback receiving progress snapshots as the status stream advances.
pub type ProgressSink = Arc<dyn Fn(EncodeProgress) + Send + Sync>;

/// Snapshot of encoder status, parsed from the live status stream.
///
/// Ephemeral: forwarded to the caller as parsed, never persisted.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EncodeProgress {
    /// Frames emitted so far.
    pub frame: Option<u64>,

    /// Measured encoding throughput in frames per second.
    pub fps: Option<f64>,

    /// Output bitrate in kbit/s.
    pub bitrate_kbps: Option<f64>,

    /// Cumulative output size in bytes.
    pub total_size_bytes: Option<u64>,

    /// Elapsed output timestamp in seconds.
    pub out_time_secs: Option<f64>,

    /// Duplicated frames inserted to hold constant frame rate.
    pub dup_frames: Option<u64>,

    /// Frames dropped to hold constant frame rate.
    pub drop_frames: Option<u64>,

    /// Encoding speed as a multiple of realtime.
    pub speed: Option<f64>,

    /// Coarse completion ratio in `[0, 1]`, derived from the frame count.
    /// Heuristic only; exact completion is tracked at the batch level.
    pub ratio: f64,
}

/// Incremental scanner over status-stream chunks.
#[derive(Debug)]
pub struct ProgressParser {
    expected_frames: u64,
    snapshot: EncodeProgress,
}

impl ProgressParser {
    /// `expected_frames` of zero disables the completion-ratio heuristic.
    pub fn new(expected_frames: u64) -> Self {
        Self {
            expected_frames,
            snapshot: EncodeProgress::default(),
        }
    }

    pub fn snapshot(&self) -> &EncodeProgress {
        &self.snapshot
    }

    /// Scan one chunk of status output. Returns true when at least one field
    /// was recognized and the snapshot advanced.
    pub fn ingest(&mut self, chunk: &str) -> bool {
        let mut updated = false;

        if let Some(frame) = extract_value(chunk, "frame=").and_then(|v| v.parse::<u64>().ok()) {
            self.snapshot.frame = Some(frame);
            if self.expected_frames > 0 {
                self.snapshot.ratio = (frame as f64 / self.expected_frames as f64).clamp(0.0, 1.0);
            }
            updated = true;
        }
        if let Some(fps) = extract_value(chunk, "fps=").and_then(|v| v.parse::<f64>().ok()) {
            self.snapshot.fps = Some(fps);
            updated = true;
        }
        if let Some(bitrate) = extract_value(chunk, "bitrate=").and_then(parse_bitrate_kbps) {
            self.snapshot.bitrate_kbps = Some(bitrate);
            updated = true;
        }
        if let Some(size) = extract_value(chunk, "size=").and_then(parse_size_bytes) {
            self.snapshot.total_size_bytes = Some(size);
            updated = true;
        }
        if let Some(secs) = extract_value(chunk, "time=").and_then(|v| parse_clock(&v)) {
            self.snapshot.out_time_secs = Some(secs);
            updated = true;
        }
        if let Some(dup) = extract_value(chunk, "dup=").and_then(|v| v.parse::<u64>().ok()) {
            self.snapshot.dup_frames = Some(dup);
            updated = true;
        }
        if let Some(drop) = extract_value(chunk, "drop=").and_then(|v| v.parse::<u64>().ok()) {
            self.snapshot.drop_frames = Some(drop);
            updated = true;
        }
        if let Some(speed) = extract_value(chunk, "speed=").and_then(parse_speed) {
            self.snapshot.speed = Some(speed);
            updated = true;
        }

        updated
    }
}

/// Pull the whitespace-delimited value following `key` out of a status line.
/// ffmpeg pads some values (`frame=  123`), so leading whitespace is skipped.
fn extract_value(line: &str, key: &str) -> Option<String> {
    let start = line.find(key)?;
    let after_key = &line[start + key.len()..];
    let value_start = after_key.find(|c: char| !c.is_whitespace()).unwrap_or(0);
    let value_part = &after_key[value_start..];
    let end = value_part
        .find(|c: char| c.is_whitespace())
        .unwrap_or(value_part.len());
    if end == 0 {
        return None;
    }
    Some(value_part[..end].to_string())
}

/// `"1200.5kbits/s"` → 1200.5. `N/A` and malformed values are dropped.
fn parse_bitrate_kbps(value: String) -> Option<f64> {
    value.strip_suffix("kbits/s")?.parse::<f64>().ok()
}

/// `"1024kB"` or `"1024KiB"` → bytes.
fn parse_size_bytes(value: String) -> Option<u64> {
    let digits: String = value.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() || digits.len() == value.len() {
        return None;
    }
    let kb = digits.parse::<u64>().ok()?;
    match &value[digits.len()..] {
        "kB" | "KiB" => Some(kb * 1024),
        "MB" | "MiB" => Some(kb * 1024 * 1024),
        "B" => Some(kb),
        _ => None,
    }
}

/// `"HH:MM:SS.ff"` → seconds.
fn parse_clock(value: &str) -> Option<f64> {
    let mut parts = value.splitn(3, ':');
    let hours = parts.next()?.parse::<f64>().ok()?;
    let minutes = parts.next()?.parse::<f64>().ok()?;
    let seconds = parts.next()?.parse::<f64>().ok()?;
    if hours < 0.0 || !(0.0..60.0).contains(&minutes) || !(0.0..60.0).contains(&seconds) {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// `"1.02x"` → 1.02.
fn parse_speed(value: String) -> Option<f64> {
    value.strip_suffix('x')?.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str =
        "frame=  123 fps= 60.0 q=28.0 size=    1024kB time=00:00:10.50 bitrate=2000.5kbits/s dup=1 drop=0 speed=1.25x";

    #[test]
    fn ingest_parses_a_full_status_line() {
        let mut parser = ProgressParser::new(246);
        assert!(parser.ingest(SAMPLE));

        let snapshot = parser.snapshot();
        assert_eq!(snapshot.frame, Some(123));
        assert_eq!(snapshot.fps, Some(60.0));
        assert_eq!(snapshot.bitrate_kbps, Some(2000.5));
        assert_eq!(snapshot.total_size_bytes, Some(1024 * 1024));
        assert_eq!(snapshot.out_time_secs, Some(10.5));
        assert_eq!(snapshot.dup_frames, Some(1));
        assert_eq!(snapshot.drop_frames, Some(0));
        assert_eq!(snapshot.speed, Some(1.25));
        assert!((snapshot.ratio - 0.5).abs() < 1e-9);
    }

    #[test]
    fn ingest_accepts_partial_lines() {
        let mut parser = ProgressParser::new(0);
        assert!(parser.ingest("size=     512kB time=00:00:30.00 bitrate= 128.0kbits/s speed=1.0x"));
        assert_eq!(parser.snapshot().frame, None);
        assert_eq!(parser.snapshot().out_time_secs, Some(30.0));
    }

    #[test]
    fn ingest_ignores_unrelated_output() {
        let mut parser = ProgressParser::new(100);
        assert!(!parser.ingest("Input #0, matroska,webm, from 'input.mkv':"));
        assert!(!parser.ingest(""));
    }

    #[test]
    fn not_available_bitrate_is_dropped() {
        let mut parser = ProgressParser::new(0);
        parser.ingest("frame=5 bitrate=N/A");
        assert_eq!(parser.snapshot().bitrate_kbps, None);
        assert_eq!(parser.snapshot().frame, Some(5));
    }

    #[test]
    fn ratio_clamps_past_expected_frames() {
        let mut parser = ProgressParser::new(10);
        parser.ingest("frame=25");
        assert_eq!(parser.snapshot().ratio, 1.0);
    }

    #[test]
    fn clock_parsing_handles_hours_and_rejects_garbage() {
        assert_eq!(parse_clock("01:02:03.50"), Some(3723.5));
        assert_eq!(parse_clock("00:99:00.00"), None);
        assert_eq!(parse_clock("bogus"), None);
    }
}
