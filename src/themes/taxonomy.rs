// Canonical theme taxonomy.
//
// This table is the single source of truth for theme categories. Every place
// that shows a category (analysis results, the theme list, the category
// breakdown, the terminal output) goes through `categorize`. Changing the
// table means bumping TAXONOMY_VERSION.

use serde::{Deserialize, Serialize};

use crate::language::Language;

/// Version of the keyword table below.
pub const TAXONOMY_VERSION: &str = "1";

/// The four fixed semantic buckets, plus a catch-all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Quality of the training content itself
    Quality,
    /// The trainer's skills and delivery
    Trainer,
    /// Rooms, schedule, equipment, organization
    Logistics,
    /// Applicability and usefulness on the job
    Usefulness,
    Other,
}

impl Category {
    /// Categories in matching order; the first match wins.
    pub const MATCH_ORDER: [Category; 4] = [
        Category::Quality,
        Category::Trainer,
        Category::Logistics,
        Category::Usefulness,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Quality => "quality",
            Category::Trainer => "trainer",
            Category::Logistics => "logistics",
            Category::Usefulness => "usefulness",
            Category::Other => "other",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Category::Quality => "Training quality",
            Category::Trainer => "Trainer skills",
            Category::Logistics => "Organization & logistics",
            Category::Usefulness => "Applicability & usefulness",
            Category::Other => "Other",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Keyword lists for one category, per language.
struct CategoryKeywords {
    category: Category,
    fr: &'static [&'static str],
    ar: &'static [&'static str],
    darija: &'static [&'static str],
}

impl CategoryKeywords {
    fn for_language(&self, language: Language) -> &'static [&'static str] {
        match language {
            Language::Fr => self.fr,
            Language::Ar => self.ar,
            Language::Darija => self.darija,
        }
    }
}

static TABLE: [CategoryKeywords; 4] = [
    CategoryKeywords {
        category: Category::Quality,
        fr: &[
            "formation", "contenu", "qualité", "niveau", "profondeur", "structuré", "organisé",
            "excellent", "bon", "mauvais", "nul", "obsolète", "périmé", "nouveau", "clair",
            "théorique", "pratique", "exemples", "exercices", "cas",
        ],
        ar: &[
            "تدريب", "محتوى", "المحتوى", "جودة", "ممتاز", "جيد", "سيء", "قديم", "جداً", "واضح",
            "مفيد", "نظري", "عملي", "أمثلة",
        ],
        darija: &[
            "formation", "contenu", "niveau", "mezyana", "mzyana", "khayba", "top", "zina",
            "practique", "exemples",
        ],
    },
    CategoryKeywords {
        category: Category::Trainer,
        fr: &[
            "formateur", "instructeur", "prof", "enseignant", "compétent", "incompétent",
            "préparé", "professionnel", "dynamique", "passionné", "engageant", "monotone",
            "maîtrise", "expert", "expérience", "pédagogique", "communication",
        ],
        ar: &[
            "مدرب", "المدرب", "معلم", "محترف", "مؤهل", "خبرة", "شرح", "يشرح", "تفسير", "مستعد",
            "جاهز",
        ],
        darija: &[
            "formateur", "prof", "instructor", "maalem", "professionnel", "kamel", "ma3arafch",
            "khatar",
        ],
    },
    CategoryKeywords {
        category: Category::Logistics,
        fr: &[
            "logistique", "organisation", "organisé", "salle", "équipement", "matériel",
            "supports", "horaire", "temps", "durée", "pause", "accueil", "réservation",
            "planification", "coordination", "infrastructure",
        ],
        ar: &[
            "تنظيم", "قاعة", "القاعة", "مكان", "وقت", "الوقت", "ساعات", "مدة", "مرافق", "معدات",
            "صوت",
        ],
        darija: &["organisation", "qa3a", "blassa", "waqt", "lwaqt", "ma9an"],
    },
    CategoryKeywords {
        category: Category::Usefulness,
        fr: &[
            "applicable", "applicabilité", "utile", "pratique", "concret", "réaliste",
            "pertinent", "efficace", "recommande", "valeur", "bénéfice", "impact", "résultat",
            "amélioration", "compétences", "apprises", "acquérir",
        ],
        ar: &[
            "تطبيق", "التطبيق", "عملي", "مفيد", "فائدة", "نتيجة", "تحسين", "مهارات", "استفدت",
            "استفادة", "واقعي",
        ],
        darija: &[
            "practique", "fayda", "nafed", "ستفدت", "3jbni", "mazyan", "t3allemt", "استفدت",
        ],
    },
];

/// Map a theme to its category.
///
/// Pure and deterministic: case-insensitive substring match in both
/// directions (keyword inside theme, or theme inside keyword) against the
/// keywords of the given language, categories tried in `MATCH_ORDER`.
pub fn categorize(theme: &str, language: Language) -> Category {
    let theme = theme.trim().to_lowercase();
    if theme.is_empty() {
        return Category::Other;
    }

    for entry in &TABLE {
        for keyword in entry.for_language(language) {
            if theme.contains(keyword) || keyword.contains(theme.as_str()) {
                return entry.category;
            }
        }
    }

    Category::Other
}

/// The keyword list of one category in one language.
/// Exposed so consumers that must display the table can reuse this copy.
pub fn keywords(category: Category, language: Language) -> &'static [&'static str] {
    TABLE
        .iter()
        .find(|entry| entry.category == category)
        .map(|entry| entry.for_language(language))
        .unwrap_or(&[])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formation_is_quality_in_french_and_darija() {
        assert_eq!(categorize("formation", Language::Fr), Category::Quality);
        assert_eq!(categorize("formation", Language::Darija), Category::Quality);
    }

    #[test]
    fn test_mezyana_is_quality() {
        assert_eq!(categorize("mezyana", Language::Darija), Category::Quality);
    }

    #[test]
    fn test_arabic_keyword_inside_theme() {
        // "تدريب" is contained in "التدريب"
        assert_eq!(categorize("التدريب", Language::Ar), Category::Quality);
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(categorize("FORMATEUR", Language::Fr), Category::Trainer);
        assert_eq!(categorize("Salle", Language::Fr), Category::Logistics);
    }

    #[test]
    fn test_theme_inside_keyword() {
        // "applica" is a prefix of "applicable"
        assert_eq!(categorize("applica", Language::Fr), Category::Usefulness);
    }

    #[test]
    fn test_first_category_wins_on_overlap() {
        // "pratique" is listed under Quality and Usefulness
        assert_eq!(categorize("pratique", Language::Fr), Category::Quality);
    }

    #[test]
    fn test_no_match_is_other() {
        assert_eq!(categorize("parking", Language::Fr), Category::Other);
        assert_eq!(categorize("", Language::Fr), Category::Other);
    }

    #[test]
    fn test_language_selects_keyword_list() {
        // "salle" is only a French logistics keyword
        assert_eq!(categorize("salle", Language::Ar), Category::Other);
    }

    #[test]
    fn test_repeated_calls_agree() {
        let themes = ["formation", "utile", "المدرب", "waqt", "xyz"];
        for lang in Language::ALL {
            for theme in themes {
                let first = categorize(theme, lang);
                for _ in 0..10 {
                    assert_eq!(categorize(theme, lang), first);
                }
            }
        }
    }

    #[test]
    fn test_keywords_lookup() {
        assert!(keywords(Category::Trainer, Language::Fr).contains(&"formateur"));
        assert!(keywords(Category::Other, Language::Fr).is_empty());
    }
}
