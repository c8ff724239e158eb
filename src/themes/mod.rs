// Theme extraction and categorization.
//
// extract pulls short keyphrases out of each comment; taxonomy maps a theme
// to one of the four fixed categories. Everything that shows a category goes
// through taxonomy::categorize.

pub mod extract;
pub mod taxonomy;
