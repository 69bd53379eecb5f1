//! Joining caller-supplied relative paths onto a service's base url

use crate::MeshError;
use hyper::Uri;

/// Join `relative_path` (and an optional query) onto `base_url`.
///
/// Empty and `.` segments are dropped. Segments that would climb out of the
/// base prefix (`..`, including percent-encoded forms) or smuggle a separator
/// (`%2f`, `%5c`, `\`) are rejected.
pub fn join_upstream(
    base_url: &str,
    relative_path: &str,
    query: Option<&str>,
) -> Result<Uri, MeshError> {
    let mut segments = Vec::new();
    for segment in relative_path.split('/') {
        if segment.is_empty() || segment == "." {
            continue;
        }
        check_segment(segment)?;
        segments.push(segment);
    }

    let base = base_url.trim_end_matches('/');
    let mut target = format!("{}/{}", base, segments.join("/"));
    if relative_path.ends_with('/') && !segments.is_empty() {
        target.push('/');
    }
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        target.push('?');
        target.push_str(query);
    }

    target
        .parse::<Uri>()
        .map_err(|e| MeshError::InvalidPath(format!("{}: {}", relative_path, e)))
}

fn check_segment(segment: &str) -> Result<(), MeshError> {
    let lowered = segment.to_ascii_lowercase();

    if lowered.contains("%2f") || lowered.contains("%5c") || lowered.contains('\\') {
        return Err(MeshError::InvalidPath(format!(
            "encoded separator in segment '{}'",
            segment
        )));
    }

    let decoded = lowered.replace("%2e", ".");
    if decoded == ".." || decoded == "." {
        return Err(MeshError::InvalidPath(format!(
            "traversal segment '{}'",
            segment
        )));
    }

    Ok(())
}
