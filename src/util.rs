//! Shared utility functions

use url::Url;

/// Truncate `s` to at most `max_len` bytes, ending in "..." when cut.
/// Cuts only at a char boundary.
pub fn truncate_str(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let suffix = "...";
    let mut end = max_len.saturating_sub(suffix.len());
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", s[..end].trim_end(), suffix)
}

/// Lowercased host of `url` without a leading `www.`
pub fn bare_host(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    Some(host.strip_prefix("www.").map(str::to_string).unwrap_or(host))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_str("short", 10), "short");
        assert_eq!(truncate_str("Merit Scholarship 2024", 12), "Merit...");
        // "₹" is three bytes
        let cut = truncate_str("₹₹₹₹₹₹", 8);
        assert!(cut.ends_with("..."));
        assert!(cut.len() <= 8);
    }

    #[test]
    fn test_bare_host() {
        assert_eq!(bare_host("https://www.UGC.ac.in/schemes").as_deref(), Some("ugc.ac.in"));
        assert_eq!(bare_host("https://scholarships.gov.in").as_deref(), Some("scholarships.gov.in"));
        assert_eq!(bare_host("not a url"), None);
    }
}
