use once_cell::sync::Lazy;
use regex::Regex;

/// Label used when no section marker is present.
pub const UNKNOWN_SECTION: &str = "Unknown";

// Priority order matters: "Sec" would otherwise shadow "Section".
static SECTION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)Section\s*([A-Z0-9]+)",
        r"(?i)Sec\s*([A-Z0-9]+)",
        r"(?i)Class\s*([A-Z0-9]+)",
        r"(?i)Group\s*([A-Z0-9]+)",
        r"(?i)section\s*([A-Z0-9]+)",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("Invalid section regex"))
    .collect()
});

/// Pull a section/group label out of free text, or [`UNKNOWN_SECTION`].
pub fn extract_section(text: &str) -> String {
    SECTION_PATTERNS
        .iter()
        .find_map(|pattern| pattern.captures(text))
        .and_then(|captures| captures.get(1))
        .map(|label| label.as_str().to_string())
        .unwrap_or_else(|| UNKNOWN_SECTION.to_string())
}
