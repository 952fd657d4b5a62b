//! Result file naming.

use crate::kind::JobKind;
use crate::types::JobId;

/// Extension used when an output URL has none.
pub const DEFAULT_RESULT_EXTENSION: &str = "png";

/// Generate the filename for output `index` (1-based) of a job.
///
/// Convention: `{kind}_{job_id}_{index}.{ext}`, with `ext` taken from the
/// output URL's path.
///
/// # Examples
///
/// ```
/// use hubqueue_core::kind::JobKind;
/// use hubqueue_core::naming::result_filename;
///
/// assert_eq!(
///     result_filename(JobKind::PoseTransfer, 7, 2, "https://cdn.example/out/a.webp?sig=1"),
///     "pose-transfer_7_2.webp"
/// );
/// ```
pub fn result_filename(kind: JobKind, job_id: JobId, index: usize, url: &str) -> String {
    format!("{}_{}_{}.{}", kind.as_str(), job_id, index, extension_from_url(url))
}

/// Lowercased extension of the last path segment of a URL.
///
/// Query strings and fragments are ignored. Falls back to
/// [`DEFAULT_RESULT_EXTENSION`] for missing or implausible extensions.
pub fn extension_from_url(url: &str) -> String {
    let clean = url.split(['?', '#']).next().unwrap_or(url);
    let path = clean
        .strip_prefix("https://")
        .or_else(|| clean.strip_prefix("http://"))
        .map(|rest| rest.find('/').map(|i| &rest[i..]).unwrap_or(""))
        .unwrap_or(clean);

    let segment = path.rsplit('/').find(|s| !s.is_empty()).unwrap_or("");
    match segment.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && !ext.is_empty()
                && ext.len() <= 5
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            ext.to_ascii_lowercase()
        }
        _ => DEFAULT_RESULT_EXTENSION.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_from_plain_url() {
        assert_eq!(extension_from_url("https://cdn.example/a/b/result.JPG"), "jpg");
    }

    #[test]
    fn extension_ignores_query_and_fragment() {
        assert_eq!(extension_from_url("https://cdn.example/x.webp?token=a.b#c.d"), "webp");
    }

    #[test]
    fn missing_extension_falls_back() {
        assert_eq!(extension_from_url("https://cdn.example/download"), "png");
        assert_eq!(extension_from_url("https://cdn.example/"), "png");
        assert_eq!(extension_from_url("https://cdn.example.com"), "png");
    }

    #[test]
    fn hidden_file_has_no_extension() {
        assert_eq!(extension_from_url("https://cdn.example/.png"), "png");
        assert_eq!(extension_from_url("https://cdn.example/archive.verylongext"), "png");
    }

    #[test]
    fn single_output_uses_index_one() {
        assert_eq!(
            result_filename(JobKind::Enhance, 12, 1, "https://cdn.example/r.png"),
            "enhance_12_1.png"
        );
    }
}
