// Built-in stopword lists
//
// English plus Spanish function words, filtered out before indexing and
// before query execution. The set can be replaced wholesale through
// `ClusterConfig::stopwords_override`.

use once_cell::sync::Lazy;
use std::collections::HashSet;

pub(crate) const ENGLISH: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "because",
    "been", "but", "by", "can", "come", "could", "day", "do", "even", "first", "for", "from",
    "get", "give", "go", "had", "has", "have", "he", "her", "him", "his", "how", "if", "in",
    "into", "is", "it", "its", "just", "know", "like", "look", "make", "me", "most", "my", "new",
    "no", "not", "now", "of", "on", "one", "only", "or", "other", "our", "out", "over", "say",
    "see", "she", "so", "some", "take", "than", "that", "the", "their", "them", "then", "there",
    "these", "they", "this", "time", "to", "two", "up", "us", "use", "was", "way", "we", "well",
    "what", "when", "which", "who", "will", "with", "would", "year", "you", "your",
];

pub(crate) const SPANISH: &[&str] = &[
    "al", "algo", "ante", "antes", "aquel", "como", "con", "contra", "cual", "cuando", "de",
    "del", "desde", "donde", "dos", "el", "ella", "ellas", "ellos", "en", "entre", "era", "eran",
    "es", "esa", "ese", "eso", "esta", "este", "esto", "fue", "ha", "hace", "han", "hasta",
    "hay", "la", "las", "le", "les", "lo", "los", "mas", "me", "mi", "mientras", "muy", "nada",
    "ni", "no", "nos", "nosotros", "o", "os", "otra", "otro", "para", "pero", "poco", "por",
    "porque", "que", "quien", "se", "segun", "ser", "si", "sin", "sobre", "son", "su", "sus",
    "tal", "tambien", "te", "tiene", "todo", "tras", "tu", "un", "una", "uno", "unos", "y", "ya",
    "yo",
];

/// The combined built-in stopword set.
pub static DEFAULT_STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ENGLISH.iter().chain(SPANISH.iter()).copied().collect()
});
