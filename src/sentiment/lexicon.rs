// Rule-based multilingual sentiment backend.
//
// Counts polar words and phrases from small FR/AR/Darija lexicons. Entries
// match whole tokens only ("bon" does not fire on "bonjour"). The longest
// entry starting at a token wins and consumes its tokens, so "pas terrible"
// is one negative hit and never also scores "terrible". Negative evidence
// wins ties, since a mixed comment usually carries a complaint.
//
// Used offline (no API key) and in tests. It never fails, so it never
// produces degraded results.

use std::collections::HashMap;

use async_trait::async_trait;

use super::traits::{RawSentiment, SentimentModel};
use crate::error::PipelineError;
use crate::themes::extract::tokenize;

const POSITIVE: &[&str] = &[
    // French
    "excellent", "excellente", "très bien", "parfait", "parfaite", "super", "génial", "bon",
    "bonne", "bien", "satisfait", "satisfaisant", "intéressant", "intéressante", "utile",
    "efficace", "professionnel", "compétent", "clair", "claire", "dynamique", "enrichissant",
    "pertinent", "recommande", "bravo", "merci",
    // Arabic
    "ممتاز", "ممتازة", "جيد", "جيدة", "مفيد", "مفيدة", "رائع", "رائعة", "شكرا",
    // Darija
    "mezyan", "mezyana", "mzyan", "mzyana", "zwin", "zwina", "labas", "top", "kamel", "nadi",
    "nadia", "3jbni", "fayda",
];

const NEGATIVE: &[&str] = &[
    // French
    "mauvais", "mauvaise", "nul", "nulle", "décevant", "décevante", "déçu", "déçue",
    "insatisfait", "problème", "difficile", "compliqué", "incompréhensible", "ennuyeux",
    "perte de temps", "catastrophe", "inutile", "médiocre", "faible", "horrible", "terrible",
    "désastre", "incompétent", "mal", "pire", "vide", "superficiel", "obsolète", "périmé",
    "désengagé", "agressif", "erreur", "pas terrible", "manque", "correct sans plus",
    "pas clair", "pas claire", "pas utile",
    // Arabic
    "سيء", "سيئة", "ضعيف", "ضعيفة", "قديم", "مضيعة", "ممل", "غير مفيد",
    // Darija
    "khayb", "khayba", "machi mezyan", "machi mezyana", "machi mzyan", "machi mzyana", "ma3lich", "khsara", "walo", "ma kanet",
    "f9ir", "katastroph", "mafhamtch",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Polarity {
    Positive,
    Negative,
}

/// Offline lexicon classifier. Ignores the model id.
pub struct LexiconModel {
    /// Entry tokens joined by a single space -> polarity
    entries: HashMap<String, Polarity>,
    /// Token count of the longest entry
    longest: usize,
}

impl Default for LexiconModel {
    fn default() -> Self {
        let mut entries = HashMap::new();
        let mut longest = 1;
        for (list, polarity) in [(POSITIVE, Polarity::Positive), (NEGATIVE, Polarity::Negative)] {
            for entry in list {
                let tokens = tokenize(entry);
                longest = longest.max(tokens.len());
                entries.insert(tokens.join(" "), polarity);
            }
        }
        Self { entries, longest }
    }
}

impl LexiconModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count (positive, negative) hits in a text.
    pub fn polarity_counts(&self, text: &str) -> (usize, usize) {
        let tokens = tokenize(text);
        let (mut pos, mut neg) = (0, 0);

        let mut i = 0;
        while i < tokens.len() {
            let max_len = self.longest.min(tokens.len() - i);
            let hit = (1..=max_len).rev().find_map(|len| {
                self.entries
                    .get(&tokens[i..i + len].join(" "))
                    .map(|&polarity| (polarity, len))
            });
            match hit {
                Some((Polarity::Positive, len)) => {
                    pos += 1;
                    i += len;
                }
                Some((Polarity::Negative, len)) => {
                    neg += 1;
                    i += len;
                }
                None => i += 1,
            }
        }
        (pos, neg)
    }
}

/// Confidence grows with the number of hits and tops out at 0.8.
fn hit_confidence(hits: usize) -> f64 {
    (0.5 + 0.15 * hits as f64).min(0.8)
}

#[async_trait]
impl SentimentModel for LexiconModel {
    async fn invoke(&self, text: &str, _model_id: &str) -> Result<RawSentiment, PipelineError> {
        let (pos, neg) = self.polarity_counts(text);

        let raw = if neg > 0 && neg >= pos {
            RawSentiment::new("negative", hit_confidence(neg))
        } else if pos > neg {
            RawSentiment::new("positive", hit_confidence(pos))
        } else {
            RawSentiment::new("neutral", 0.5)
        };
        Ok(raw)
    }

    fn name(&self) -> &'static str {
        "lexicon"
    }
}
