//! Endpoint normalization for telemetry names.
//!
//! Raw platform paths embed snowflake-like numeric identifiers; using them
//! verbatim as span or metric labels would make cardinality unbounded. The
//! normalized form drops the version prefix and collapses identifier segments
//! to a fixed placeholder.

const ID_PLACEHOLDER: &str = "{id}";

fn is_version_segment(segment: &str) -> bool {
    let mut chars = segment.chars();
    chars.next() == Some('v') && segment.len() > 1 && chars.all(|c| c.is_ascii_digit())
}

/// Snowflake-like ids are runs of 17 to 19 digits; anything shorter or longer
/// is left untouched.
fn is_snowflake_segment(segment: &str) -> bool {
    (17..=19).contains(&segment.len()) && segment.chars().all(|c| c.is_ascii_digit())
}

/// Normalizes a request path for telemetry. Idempotent and deterministic.
pub fn normalize_endpoint(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.first().is_some_and(|s| is_version_segment(s)) {
        segments.remove(0);
    }
    let normalized: Vec<&str> = segments
        .into_iter()
        .map(|segment| {
            if is_snowflake_segment(segment) {
                ID_PLACEHOLDER
            } else {
                segment
            }
        })
        .collect();
    format!("/{}", normalized.join("/"))
}
