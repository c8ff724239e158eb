// Per-comment keyphrase extraction and the corpus-wide theme fold.
//
// Each comment is tokenized, stop words for its language are dropped, and
// the surviving unigrams plus adjacent bigrams become candidate themes,
// ranked by how often they occur in the comment. Comments are short (one or
// two sentences), so in-comment counts matter less than position: ties are
// broken by first occurrence.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::OnceLock;

use stop_words::{get, LANGUAGE};

use crate::language::{is_arabic_char, Language};
use crate::themes::taxonomy::{self, Category};

/// French words too generic to be a theme, on top of the stop-words list.
const FRENCH_EXTRA: &[&str] = &[
    "tous", "tout", "toute", "toutes", "bien", "très", "plus", "moins", "comme", "aucun",
    "aucune", "beaucoup", "peu", "assez", "trop", "même", "aussi", "encore", "déjà", "jamais",
    "toujours", "souvent", "rien", "quelque", "plusieurs", "quelques", "certains", "certaines",
    "pas", "non", "oui", "était", "été", "avoir", "être", "fait", "faire", "cette",
];

const ARABIC_EXTRA: &[&str] = &[
    "في", "من", "إلى", "على", "عن", "هذا", "ذلك", "التي", "الذي", "هو", "هي", "أن", "كان", "لم",
    "لن", "قد", "لكن", "أو", "و", "جدا",
];

/// Darija function words. Darija comments mix in French, so the French
/// lists apply as well.
const DARIJA_STOP: &[&str] = &[
    "dyal", "dial", "wla", "ola", "bach", "bla", "hadi", "hadak", "hadik", "hna", "nta", "nti",
    "howa", "hia", "had", "chi", "rah", "kan", "kant", "ana", "m3a", "3la", "li", "fach", "ghir",
    "bezzaf", "bzaf", "walakin", "daba",
];

fn stop_list(language: Language) -> &'static HashSet<String> {
    static LISTS: OnceLock<HashMap<Language, HashSet<String>>> = OnceLock::new();
    let lists = LISTS.get_or_init(|| {
        let french: HashSet<String> = get(LANGUAGE::French)
            .into_iter()
            .chain(FRENCH_EXTRA.iter().map(|s| s.to_string()))
            .collect();
        let arabic: HashSet<String> = get(LANGUAGE::Arabic)
            .into_iter()
            .chain(ARABIC_EXTRA.iter().map(|s| s.to_string()))
            .collect();
        let darija: HashSet<String> = french
            .iter()
            .cloned()
            .chain(DARIJA_STOP.iter().map(|s| s.to_string()))
            .collect();

        HashMap::from([
            (Language::Fr, without_keywords(french, Language::Fr)),
            (Language::Ar, without_keywords(arabic, Language::Ar)),
            (Language::Darija, without_keywords(darija, Language::Darija)),
        ])
    });
    &lists[&language]
}

/// Taxonomy keywords are always themes, whatever the generic lists say.
fn without_keywords(mut stop: HashSet<String>, language: Language) -> HashSet<String> {
    for category in Category::MATCH_ORDER {
        for keyword in taxonomy::keywords(category, language) {
            stop.remove(*keyword);
        }
    }
    stop
}

/// Lowercase and strip Arabic diacritics and tatweel, which would otherwise
/// split words at non-alphanumeric marks.
fn normalize(text: &str) -> String {
    text.chars()
        .filter(|&c| !matches!(c, '\u{064B}'..='\u{065F}' | '\u{0670}' | '\u{0640}'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Split normalized text into word tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    normalize(text)
        .split(|c: char| !c.is_alphanumeric())
        .filter(|tok| !tok.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_candidate(token: &str, stop: &HashSet<String>) -> bool {
    if token.chars().all(|c| c.is_numeric()) || stop.contains(token) {
        return false;
    }
    let min_len = if token.chars().any(is_arabic_char) { 2 } else { 3 };
    token.chars().count() >= min_len
}

/// Extracts candidate themes from a single comment.
#[derive(Debug, Clone)]
pub struct ThemeExtractor {
    /// Maximum number of themes kept per comment
    pub top_n: usize,
}

impl Default for ThemeExtractor {
    fn default() -> Self {
        Self { top_n: 5 }
    }
}

impl ThemeExtractor {
    /// Extract up to `top_n` themes from one comment. Empty text yields none.
    pub fn extract(&self, text: &str, language: Language) -> Vec<String> {
        if text.trim().is_empty() || self.top_n == 0 {
            return Vec::new();
        }

        let stop = stop_list(language);
        let tokens = tokenize(text);
        let keep: Vec<bool> = tokens.iter().map(|t| is_candidate(t, stop)).collect();

        // phrase -> (count, first position)
        let mut seen: HashMap<String, (usize, usize)> = HashMap::new();
        let mut position = 0usize;
        let mut bump = |phrase: String, seen: &mut HashMap<String, (usize, usize)>| {
            let entry = seen.entry(phrase).or_insert((0, position));
            entry.0 += 1;
            position += 1;
        };

        for i in 0..tokens.len() {
            if !keep[i] {
                continue;
            }
            bump(tokens[i].clone(), &mut seen);
            if i + 1 < tokens.len() && keep[i + 1] {
                bump(format!("{} {}", tokens[i], tokens[i + 1]), &mut seen);
            }
        }

        let mut ranked: Vec<(String, usize, usize)> = seen
            .into_iter()
            .map(|(phrase, (count, first))| (phrase, count, first))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

        ranked
            .into_iter()
            .take(self.top_n)
            .map(|(phrase, _, _)| phrase)
            .collect()
    }
}

/// Accumulates theme frequency changes for one batch before they are
/// written to the store in one go.
#[derive(Debug, Default, Clone)]
pub struct ThemeTally {
    deltas: BTreeMap<(Language, String), i64>,
}

impl ThemeTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count each theme of one result once.
    pub fn add<'a>(&mut self, language: Language, themes: impl IntoIterator<Item = &'a str>) {
        for theme in themes {
            *self.deltas.entry((language, theme.to_string())).or_insert(0) += 1;
        }
    }

    /// Undo the contribution of a superseded result.
    pub fn remove<'a>(&mut self, language: Language, themes: impl IntoIterator<Item = &'a str>) {
        for theme in themes {
            *self.deltas.entry((language, theme.to_string())).or_insert(0) -= 1;
        }
    }

    /// Take `count` occurrences of one theme off the tally.
    pub fn remove_count(&mut self, language: Language, theme: &str, count: i64) {
        *self.deltas.entry((language, theme.to_string())).or_insert(0) -= count;
    }

    /// Non-zero deltas as (theme, language, delta), in a stable order.
    pub fn deltas(&self) -> Vec<(String, Language, i64)> {
        self.deltas
            .iter()
            .filter(|(_, delta)| **delta != 0)
            .map(|((language, name), delta)| (name.clone(), *language, *delta))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.values().all(|d| *d == 0)
    }
}
