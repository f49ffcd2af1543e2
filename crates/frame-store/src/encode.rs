//! RGBA-to-PNG conversion with a bounded retry loop.
//!
//! The retry loop is deliberately generic over the encode operation so it can
//! be unit-tested without touching the real codec. There is no degraded
//! fallback: if encoding never succeeds within the attempt budget, the save
//! fails rather than emitting a corrupt frame.

use std::time::Duration;

use versemotion_common::{VersemotionError, VersemotionResult};

/// Fixed pause between encode attempts.
pub const RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Encode an RGBA8 pixel buffer into an in-memory PNG.
///
/// The caller is responsible for dimension/payload validation; this only
/// fails when the codec itself does.
pub fn encode_rgba_png(pixels: &[u8], width: u32, height: u32) -> VersemotionResult<Vec<u8>> {
    use image::codecs::png::PngEncoder;
    use image::{ExtendedColorType, ImageEncoder};

    let mut out = Vec::new();
    PngEncoder::new(&mut out)
        .write_image(pixels, width, height, ExtendedColorType::Rgba8)
        .map_err(|e| VersemotionError::frame_write(format!("png encode failed: {e}")))?;
    Ok(out)
}

/// Run `op` up to `attempts` times with a fixed backoff between failures.
///
/// Runs on a blocking thread (the backoff is a thread sleep); callers inside
/// the async runtime wrap this in `spawn_blocking`.
pub fn encode_with_retry<T>(
    attempts: u32,
    backoff: Duration,
    mut op: impl FnMut() -> VersemotionResult<T>,
) -> VersemotionResult<T> {
    let attempts = attempts.max(1);
    let mut last_err = None;
    for attempt in 1..=attempts {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) => {
                tracing::warn!(attempt, attempts, error = %e, "Frame encode attempt failed");
                last_err = Some(e);
                if attempt < attempts {
                    std::thread::sleep(backoff);
                }
            }
        }
    }
    // attempts >= 1, so at least one error was recorded
    Err(last_err
        .unwrap_or_else(|| VersemotionError::frame_write("encode retry loop ran zero attempts")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn succeeds_on_first_attempt() {
        let mut calls = 0;
        let result = encode_with_retry(5, Duration::ZERO, || {
            calls += 1;
            Ok(42)
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 1);
    }

    #[test]
    fn recovers_after_transient_failures() {
        let mut calls = 0;
        let result = encode_with_retry(5, Duration::ZERO, || {
            calls += 1;
            if calls < 4 {
                Err(VersemotionError::frame_write("transient"))
            } else {
                Ok("done")
            }
        });
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls, 4);
    }

    #[test]
    fn surfaces_final_error_when_budget_exhausted() {
        let mut calls = 0;
        let result: VersemotionResult<()> = encode_with_retry(5, Duration::ZERO, || {
            calls += 1;
            Err(VersemotionError::frame_write(format!("attempt {calls}")))
        });
        assert_eq!(calls, 5);
        let err = result.unwrap_err();
        assert!(err.to_string().contains("attempt 5"));
    }

    #[test]
    fn zero_attempts_is_clamped_to_one() {
        let mut calls = 0;
        let _ = encode_with_retry(0, Duration::ZERO, || {
            calls += 1;
            Err::<(), _>(VersemotionError::frame_write("x"))
        });
        assert_eq!(calls, 1);
    }

    #[test]
    fn real_codec_produces_decodable_png() {
        let pixels = vec![255u8; 4 * 4 * 4];
        let png = encode_rgba_png(&pixels, 4, 4).unwrap();
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!(decoded.width(), 4);
        assert_eq!(decoded.height(), 4);
    }
}
