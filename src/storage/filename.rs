//! Filename sanitization for attacker-controlled upload metadata.
//!
//! The original filename sent by a client is never trusted: it can carry
//! path separators (`../../etc/passwd`), shell metacharacters, or be
//! arbitrarily long. `sanitize_filename` reduces any input to a bounded
//! string that is safe to log, echo back, and use as a plain file name.
//! The stored file itself is named after the request UUID, never after
//! the client-supplied name.

use std::path::Path;

/// Upper bound on a sanitized filename, applied after substitution.
const MAX_FILENAME_LEN: usize = 120;

/// Name substituted when sanitization leaves nothing usable.
const FALLBACK_NAME: &str = "file";

/// Reduce an untrusted filename to a filesystem-safe base name.
///
/// Steps, in order:
/// 1. Trim surrounding whitespace.
/// 2. Normalize backslashes to forward slashes and keep only the final
///    path segment, discarding any traversal components.
/// 3. Replace every run of characters outside `[A-Za-z0-9._-]` with a
///    single underscore.
/// 4. Substitute `"file"` if nothing remains.
/// 5. Truncate to 120 characters (may cut mid-token; acceptable).
///
/// Pure and total: never fails, never returns an empty string.
pub fn sanitize_filename(name: &str) -> String {
    let normalized = name.trim().replace('\\', "/");
    let base = normalized.rsplit('/').next().unwrap_or("");

    let mut out = String::with_capacity(base.len());
    let mut in_run = false;
    for c in base.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            out.push(c);
            in_run = false;
        } else if !in_run {
            // Collapse a run of disallowed characters into one underscore
            out.push('_');
            in_run = true;
        }
    }

    if out.is_empty() {
        return FALLBACK_NAME.to_string();
    }

    // Output is pure ASCII at this point, so byte truncation is safe
    out.truncate(MAX_FILENAME_LEN);
    out
}

/// Return the lowercase extension of a filename without the leading dot,
/// or an empty string if there is none. Only the final suffix counts:
/// `a.tar.gz` yields `gz`.
pub fn get_extension(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_path_traversal() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("..\\..\\windows\\system32"), "system32");
        assert_eq!(sanitize_filename("/var/log/audio.wav"), "audio.wav");
    }

    #[test]
    fn test_sanitize_replaces_unsafe_runs() {
        assert_eq!(sanitize_filename("a b*c.wav"), "a_b_c.wav");
        // A maximal run of disallowed characters collapses to one underscore
        assert_eq!(sanitize_filename("a  ??  b.mp3"), "a_b.mp3");
        assert_eq!(sanitize_filename("voice note (2).m4a"), "voice_note_2_.m4a");
    }

    #[test]
    fn test_sanitize_empty_falls_back() {
        assert_eq!(sanitize_filename(""), "file");
        assert_eq!(sanitize_filename("   "), "file");
        assert_eq!(sanitize_filename("///"), "file");
    }

    #[test]
    fn test_sanitize_truncates_to_limit() {
        let long = "a".repeat(500) + ".wav";
        let result = sanitize_filename(&long);
        assert_eq!(result.len(), 120);
        assert!(result.chars().all(|c| c == 'a'));
    }

    #[test]
    fn test_sanitize_output_is_always_safe() {
        for input in ["héllo wörld.ogg", "\t spaced \n", "C:\\Users\\x\\a.wav", "№§±.webm"] {
            let result = sanitize_filename(input);
            assert!(!result.is_empty());
            assert!(result.len() <= 120);
            assert!(result
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')));
            assert!(!result.contains('/'));
            assert!(!result.contains('\\'));
        }
    }

    #[test]
    fn test_extension_takes_final_suffix() {
        assert_eq!(get_extension("a.tar.gz"), "gz");
        assert_eq!(get_extension("recording.wav"), "wav");
    }

    #[test]
    fn test_extension_lowercases() {
        assert_eq!(get_extension("A.WAV"), "wav");
        assert_eq!(get_extension("Track.Mp3"), "mp3");
    }

    #[test]
    fn test_extension_missing_is_empty() {
        assert_eq!(get_extension("noext"), "");
        assert_eq!(get_extension(".hidden"), "");
    }
}
