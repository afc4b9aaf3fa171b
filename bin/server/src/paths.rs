//! Request path canonicalization.
//!
//! Passthrough matching and upstream rewriting must agree on which path a
//! request names. The upstream URL resolves dot segments (including their
//! percent-encoded spellings), so the gate only ever decides on a path that
//! has none left.

use std::borrow::Cow;

enum DotSegment {
    Current,
    Parent,
}

fn dot_segment(segment: &str) -> Option<DotSegment> {
    if segment.len() > 6 {
        return None;
    }
    match segment.replace("%2e", ".").replace("%2E", ".").as_str() {
        "." => Some(DotSegment::Current),
        ".." => Some(DotSegment::Parent),
        _ => None,
    }
}

/// Returns the canonical form of `path`.
///
/// Empty segments collapse, `.` segments vanish and `..` removes its parent
/// without climbing above the root. A trailing `/` is kept. The result is
/// borrowed exactly when `path` is already canonical.
#[must_use]
pub fn clean_path(path: &str) -> Cow<'_, str> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match dot_segment(segment) {
            Some(DotSegment::Current) => {}
            Some(DotSegment::Parent) => {
                segments.pop();
            }
            None if segment.is_empty() => {}
            None => segments.push(segment),
        }
    }

    let mut cleaned = String::with_capacity(path.len());
    for segment in &segments {
        cleaned.push('/');
        cleaned.push_str(segment);
    }
    if segments.is_empty() || path.ends_with('/') {
        cleaned.push('/');
    }

    if cleaned == path {
        Cow::Borrowed(path)
    } else {
        Cow::Owned(cleaned)
    }
}

/// Returns true if `url` stays on this origin when used as a redirect.
///
/// Browsers read `//host` and `/\host` as references to another host.
#[must_use]
pub fn is_local_path(url: &str) -> bool {
    url.starts_with('/') && !url.starts_with("//") && !url.starts_with("/\\")
}
