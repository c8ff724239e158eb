// Language routing for evaluation comments.
//
// Comments arrive in French, Modern Standard Arabic, or Moroccan Darija
// (usually written in Latin script). A declared tag is trusted when it is
// valid. Otherwise a cheap, deterministic heuristic decides: mostly Arabic
// script means AR, a Darija marker word means DARIJA, anything else is FR.
// Routing never fails and never makes a network call.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::OnceLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

/// The working languages the pipeline has models for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "FR")]
    Fr,
    #[serde(rename = "AR")]
    Ar,
    #[serde(rename = "DARIJA")]
    Darija,
}

impl Language {
    pub const ALL: [Language; 3] = [Language::Fr, Language::Ar, Language::Darija];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Fr => "FR",
            Language::Ar => "AR",
            Language::Darija => "DARIJA",
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Language {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fr" | "french" | "français" | "francais" => Ok(Language::Fr),
            "ar" | "arabic" | "arabe" => Ok(Language::Ar),
            "darija" | "dz" | "ary" => Ok(Language::Darija),
            other => anyhow::bail!("Unknown language tag: {other:?} (expected FR, AR or DARIJA)"),
        }
    }
}

/// Latin-script Darija tokens that rarely occur in French.
const DARIJA_MARKERS: &[&str] = &[
    "daba", "bezzaf", "bzaf", "mezyan", "mezyana", "mzyan", "mzyana", "dyal", "dial", "kayn",
    "makaynch", "wakha", "chno", "kifach", "fach", "wach", "smiya", "kheddam", "khdam", "bach",
    "hna", "nta", "ntina", "ghir", "bghit", "bgha", "machi", "yallah", "safi", "khayb", "khayba",
    "walo", "zwina", "zwin", "3jbni", "t3allemt", "fayda", "nafed", "lwaqt", "mafhamtch",
];

/// Multi-word markers checked against the lowercased text.
const DARIJA_PHRASES: &[&str] = &["had chi", "machi mezyan", "ma kanet"];

fn darija_markers() -> &'static HashSet<&'static str> {
    static MARKERS: OnceLock<HashSet<&'static str>> = OnceLock::new();
    MARKERS.get_or_init(|| DARIJA_MARKERS.iter().copied().collect())
}

fn darija_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"\b(ach|chno|kifach|wach)\b",
            r"\b(dyal|dial)\s+\w+",
            r"\b(ghir|ghi)\s+\w+",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// Whether a character belongs to one of the Arabic Unicode blocks.
pub fn is_arabic_char(c: char) -> bool {
    matches!(c,
        '\u{0600}'..='\u{06FF}'
        | '\u{0750}'..='\u{077F}'
        | '\u{08A0}'..='\u{08FF}'
        | '\u{FB50}'..='\u{FDFF}'
        | '\u{FE70}'..='\u{FEFF}')
}

/// Fraction of alphabetic characters written in Arabic script (0.0 for no letters).
pub fn arabic_script_ratio(text: &str) -> f64 {
    let mut letters = 0usize;
    let mut arabic = 0usize;
    for c in text.chars().filter(|c| c.is_alphabetic()) {
        letters += 1;
        if is_arabic_char(c) {
            arabic += 1;
        }
    }
    if letters == 0 {
        0.0
    } else {
        arabic as f64 / letters as f64
    }
}

/// Number of Darija markers, phrases and patterns found in the text.
pub fn darija_hits(text: &str) -> usize {
    let lower = text.to_lowercase();
    let markers = darija_markers();

    let token_hits = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|tok| markers.contains(tok))
        .count();
    let phrase_hits = DARIJA_PHRASES.iter().filter(|p| lower.contains(*p)).count();
    let pattern_hits = darija_patterns().iter().filter(|re| re.is_match(&lower)).count();

    token_hits + phrase_hits + pattern_hits
}

/// Outcome of routing one comment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution {
    pub language: Language,
    /// True when the record's own tag was used
    pub declared: bool,
    /// How sure the router is, 0.0 to 1.0
    pub confidence: f64,
}

/// Resolves the working language of a comment.
#[derive(Debug, Clone)]
pub struct LanguageRouter {
    /// Arabic-script ratio above which a comment is treated as AR.
    pub arabic_threshold: f64,
}

impl Default for LanguageRouter {
    fn default() -> Self {
        Self {
            arabic_threshold: 0.5,
        }
    }
}

impl LanguageRouter {
    /// Resolve the language, trusting a valid declared tag.
    pub fn resolve(&self, text: &str, declared: Option<&str>) -> Resolution {
        if let Some(language) = declared.and_then(|tag| tag.parse::<Language>().ok()) {
            return Resolution {
                language,
                declared: true,
                confidence: 1.0,
            };
        }
        self.detect(text)
    }

    /// Heuristic detection, ignoring any declared tag.
    pub fn detect(&self, text: &str) -> Resolution {
        if text.trim().is_empty() {
            return Resolution {
                language: Language::Fr,
                declared: false,
                confidence: 0.5,
            };
        }

        let ratio = arabic_script_ratio(text);
        if ratio > self.arabic_threshold {
            return Resolution {
                language: Language::Ar,
                declared: false,
                confidence: ratio,
            };
        }

        let hits = darija_hits(text);
        if hits > 0 {
            return Resolution {
                language: Language::Darija,
                declared: false,
                confidence: (hits as f64 / 5.0).min(1.0).max(0.6),
            };
        }

        Resolution {
            language: Language::Fr,
            declared: false,
            confidence: 0.7,
        }
    }
}
