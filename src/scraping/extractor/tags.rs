//! Keyword classification of category, education level and tags

/// Lowercased text padded with spaces, punctuation turned into spaces, so
/// keywords can be matched as whole words.
fn padded(text: &str) -> String {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    format!(" {} ", cleaned.split_whitespace().collect::<Vec<_>>().join(" "))
}

fn has_word(haystack: &str, keyword: &str) -> bool {
    haystack.contains(&format!(" {} ", keyword))
}

const CATEGORIES: &[(&str, &[&str])] = &[
    ("merit", &["merit", "toppers", "academic excellence", "meritorious"]),
    ("need-based", &["need based", "financial aid", "economically weaker", "ews", "low income"]),
    ("minority", &["minority", "minorities", "muslim", "christian", "sikh", "buddhist", "jain", "parsi"]),
    ("women", &["women", "girl", "girls", "female"]),
    ("disability", &["disabled", "disability", "divyang", "differently abled", "pwd"]),
    ("sc-st", &["sc", "st", "scheduled caste", "scheduled castes", "scheduled tribe", "scheduled tribes", "tribal"]),
    ("obc", &["obc", "other backward class", "other backward classes"]),
    ("sports", &["sports", "athlete", "athletes"]),
    ("research", &["research", "fellowship", "phd", "doctoral"]),
];

const LEVELS: &[(&str, &[&str])] = &[
    ("doctoral", &["phd", "doctoral", "doctorate", "post doctoral"]),
    ("postgraduate", &["postgraduate", "post graduate", "post graduation", "masters", "m tech", "mtech", "mba", "msc"]),
    ("undergraduate", &["undergraduate", "graduation", "bachelor", "degree", "b tech", "btech", "bsc", "college"]),
    ("school", &["pre matric", "post matric", "class 9", "class 10", "class 11", "class 12", "school"]),
];

const TAG_KEYWORDS: &[&str] = &[
    "engineering",
    "medical",
    "law",
    "management",
    "science",
    "arts",
    "agriculture",
    "technical",
    "international",
    "abroad",
    "government",
    "private",
    "national",
    "state",
    "renewable",
];

/// First category whose keywords appear in the text
pub fn category(text: &str) -> Option<String> {
    let hay = padded(text);
    CATEGORIES
        .iter()
        .find(|(_, kws)| kws.iter().any(|k| has_word(&hay, k)))
        .map(|(name, _)| name.to_string())
}

/// Most advanced education level mentioned
pub fn level(text: &str) -> Option<String> {
    let hay = padded(text);
    LEVELS
        .iter()
        .find(|(_, kws)| kws.iter().any(|k| has_word(&hay, k)))
        .map(|(name, _)| name.to_string())
}

/// Every category plus topical keywords present in the text
pub fn tags(text: &str) -> Vec<String> {
    let hay = padded(text);
    let mut out: Vec<String> = CATEGORIES
        .iter()
        .filter(|(_, kws)| kws.iter().any(|k| has_word(&hay, k)))
        .map(|(name, _)| name.to_string())
        .collect();
    out.extend(
        TAG_KEYWORDS
            .iter()
            .filter(|k| has_word(&hay, k))
            .map(|k| k.to_string()),
    );
    out
}
