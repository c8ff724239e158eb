// Sentiment classification — trait-based abstraction over per-language models.
//
// SentimentModel is the boundary to the classifiers. HuggingFaceClassifier
// calls the hosted inference API; LexiconModel is the offline fallback.
// SentimentStage wraps either one with timeouts, retries and the
// degrade-to-neutral rule.

pub mod huggingface;
pub mod lexicon;
pub mod rate_limiter;
pub mod registry;
pub mod stage;
pub mod traits;
