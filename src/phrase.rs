use once_cell::sync::Lazy;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Fallback word lists, used when no external lists are configured.
/// Kept lowercase so generated phrases are already canonical.
const ADJECTIVES: &[&str] = &[
    "amber", "bold", "brave", "bright", "calm", "clever", "cosmic", "crisp",
    "eager", "early", "fancy", "fierce", "floral", "gentle", "golden", "grand",
    "happy", "hazel", "humble", "jolly", "keen", "kind", "lively", "lucky",
    "mellow", "merry", "misty", "noble", "polar", "proud", "quiet", "rapid",
    "royal", "rustic", "shiny", "silent", "silver", "smooth", "snowy", "solar",
    "steady", "stormy", "sunny", "swift", "tidal", "vivid", "warm", "wild",
];

const NOUNS: &[&str] = &[
    "anchor", "aspen", "badger", "beacon", "birch", "breeze", "brook", "canyon",
    "cedar", "cliff", "cloud", "comet", "coral", "crane", "delta", "dune",
    "ember", "falcon", "fjord", "forest", "garnet", "glacier", "harbor", "heron",
    "island", "lagoon", "lantern", "maple", "meadow", "meteor", "ocean", "orchid",
    "otter", "pebble", "pine", "prairie", "raven", "reef", "river", "saddle",
    "shore", "sparrow", "summit", "thistle", "tundra", "valley", "willow", "wren",
];

/// Directory holding `adjectives.txt` and `nouns.txt`, one word per line.
pub const WORDS_DIR_ENV: &str = "GUST_WORDS_DIR";

static WORD_LISTS: Lazy<(Vec<String>, Vec<String>)> = Lazy::new(|| {
    match load_external_lists() {
        Some(lists) => lists,
        None => (
            ADJECTIVES.iter().map(|s| s.to_string()).collect(),
            NOUNS.iter().map(|s| s.to_string()).collect(),
        ),
    }
});

fn load_external_lists() -> Option<(Vec<String>, Vec<String>)> {
    let dir = std::env::var(WORDS_DIR_ENV).ok()?;
    let read = |name: &str| -> Option<Vec<String>> {
        let text = std::fs::read_to_string(std::path::Path::new(&dir).join(name)).ok()?;
        let words: Vec<String> = text
            .lines()
            .map(|l| l.trim().to_lowercase())
            .filter(|l| !l.is_empty() && l.chars().all(|c| c.is_ascii_alphabetic()))
            .collect();
        if words.is_empty() {
            None
        } else {
            Some(words)
        }
    };
    Some((read("adjectives.txt")?, read("nouns.txt")?))
}

/// Generates a fresh `<adjective>-<noun>` pairing phrase.
///
/// Both words are drawn independently and uniformly with a CSPRNG
/// (`thread_rng` is ChaCha-based), so an observer who sees one transfer's
/// phrase learns nothing about the next.
pub fn generate() -> String {
    let (adjectives, nouns) = &*WORD_LISTS;
    let mut rng = rand::thread_rng();
    let adjective = &adjectives[rng.gen_range(0..adjectives.len())];
    let noun = &nouns[rng.gen_range(0..nouns.len())];
    format!("{}-{}", adjective, noun)
}

/// Normalizes a user-entered phrase to its canonical form: trimmed and
/// lowercased. All cryptographic derivations operate on this form.
pub fn normalize(input: &str) -> String {
    input.trim().to_lowercase()
}

/// Accepts exactly two non-empty segments joined by a single `-`.
pub fn validate(input: &str) -> bool {
    let canonical = normalize(input);
    if canonical.is_empty() {
        return false;
    }
    let segments: Vec<&str> = canonical.split('-').collect();
    segments.len() == 2 && segments.iter().all(|s| !s.is_empty())
}

/// Lowercase-hex SHA-256 of the canonical phrase. This is the value published
/// in beacons as the multicast selector; it never reveals the phrase itself
/// beyond a dictionary attack on the word lists.
pub fn hash(input: &str) -> String {
    let canonical = normalize(input);
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)
}
