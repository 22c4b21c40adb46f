//! Merging recognized speech into typed input

/// Merge an interim transcript into the user's current input
///
/// Typed text is kept, and re-applying the same interim value leaves the
/// input unchanged.
#[must_use]
pub fn merge(existing: &str, interim: &str) -> String {
    if existing.trim().is_empty() {
        return interim.to_string();
    }

    if existing.contains(interim) {
        return existing.to_string();
    }

    format!("{} {interim}", existing.trim()).trim().to_string()
}
