/// Video bitrate (kbps) used when the duration is unknown
pub const FALLBACK_VIDEO_KBPS: u32 = 500;
/// Audio bitrate (kbps) reserved out of the size budget; matches `-b:a 128k`
pub const AUDIO_KBPS: u32 = 128;
pub const MIN_VIDEO_KBPS: u32 = 100;
/// Quality cap; higher rates buy little at the sizes this tool targets
pub const MAX_VIDEO_KBPS: u32 = 5000;
/// Fraction of the computed rate actually requested from the encoder
pub const SAFETY_MARGIN: f64 = 0.95;

/// Compute the video bitrate that keeps a two-pass encode under `target_size_mb`
///
/// Steps, in this exact order:
/// 1. unknown duration (`<= 0`) returns [`FALLBACK_VIDEO_KBPS`]
/// 2. total = size * 8000 / duration (8000 rather than 8192 biases low)
/// 3. subtract the audio reservation and truncate, floor at [`MIN_VIDEO_KBPS`]
/// 4. cap at [`MAX_VIDEO_KBPS`]
/// 5. apply [`SAFETY_MARGIN`] and truncate
pub fn plan_video_bitrate(duration_secs: f64, target_size_mb: u32) -> u32 {
    if duration_secs <= 0.0 || duration_secs.is_nan() {
        return FALLBACK_VIDEO_KBPS;
    }

    let total_kbps = f64::from(target_size_mb) * 8000.0 / duration_secs;
    let video = ((total_kbps - f64::from(AUDIO_KBPS)) as i64).max(i64::from(MIN_VIDEO_KBPS));
    let video = video.min(i64::from(MAX_VIDEO_KBPS));

    (video as f64 * SAFETY_MARGIN) as u32
}
