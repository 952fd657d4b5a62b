//! Progress milestones for a single attempt.
//!
//! The values are cosmetic estimates for display. They only have to rise
//! monotonically and stay at or below the cap until the job succeeds.

/// Highest progress shown before a job has actually produced its results.
pub const PROGRESS_CAP_BEFORE_COMPLETION: u8 = 90;

/// Progress credited per uploaded input.
pub const PROGRESS_PER_UPLOAD: u8 = 10;

/// Ceiling for the upload phase.
pub const PROGRESS_UPLOADS_MAX: u8 = 30;

/// Progress once the remote job has been accepted.
pub const PROGRESS_SUBMITTED: u8 = 35;

/// Progress after `uploaded` of the job's inputs are on the remote side.
pub fn upload_progress(uploaded: usize) -> u8 {
    let raw = uploaded.saturating_mul(PROGRESS_PER_UPLOAD as usize);
    raw.min(PROGRESS_UPLOADS_MAX as usize) as u8
}

/// Progress after `poll` status checks out of at most `max_polls`.
///
/// Rises linearly from [`PROGRESS_SUBMITTED`] towards the cap.
pub fn poll_progress(poll: u32, max_polls: u32) -> u8 {
    if max_polls == 0 {
        return PROGRESS_SUBMITTED;
    }
    let span = (PROGRESS_CAP_BEFORE_COMPLETION - PROGRESS_SUBMITTED) as u64;
    let step = span * poll.min(max_polls) as u64 / max_polls as u64;
    (PROGRESS_SUBMITTED as u64 + step).min(PROGRESS_CAP_BEFORE_COMPLETION as u64) as u8
}
