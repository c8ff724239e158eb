// Per-language model registry.
//
// Routing picks a language; this table picks the classifier for it. Arabic
// and Darija currently have separate models, but nothing outside this table
// depends on that, so the policy can change (e.g. route Darija to the
// Arabic model) with a config change.

use std::collections::HashMap;

use crate::language::Language;

pub const DEFAULT_FR_MODEL: &str = "cmarkea/distilcamembert-base-sentiment";
pub const DEFAULT_AR_MODEL: &str = "CAMeL-Lab/bert-base-arabic-camelbert-msa-sentiment";
pub const DEFAULT_DARIJA_MODEL: &str = "SI2M-Lab/DarijaBERT";

#[derive(Debug, Clone, PartialEq)]
pub struct ModelRegistry {
    models: HashMap<Language, String>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_FR_MODEL, DEFAULT_AR_MODEL, DEFAULT_DARIJA_MODEL)
    }
}

impl ModelRegistry {
    pub fn new(fr: &str, ar: &str, darija: &str) -> Self {
        Self {
            models: HashMap::from([
                (Language::Fr, fr.to_string()),
                (Language::Ar, ar.to_string()),
                (Language::Darija, darija.to_string()),
            ]),
        }
    }

    /// Replace the model for one language.
    pub fn with_model(mut self, language: Language, model_id: impl Into<String>) -> Self {
        self.models.insert(language, model_id.into());
        self
    }

    /// The model designated for a language. Falls back to the French model,
    /// since French is also the routing fallback.
    pub fn model_for(&self, language: Language) -> &str {
        self.models
            .get(&language)
            .or_else(|| self.models.get(&Language::Fr))
            .map(String::as_str)
            .unwrap_or(DEFAULT_FR_MODEL)
    }

    /// (language, model id) pairs in a fixed order, for display.
    pub fn entries(&self) -> Vec<(Language, &str)> {
        Language::ALL
            .iter()
            .map(|&language| (language, self.model_for(language)))
            .collect()
    }
}
