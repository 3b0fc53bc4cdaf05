use crate::{CoreError, Result};
use rand::seq::SliceRandom;
use rand::Rng;

const COLORS: &[&str] = &[
    "amber", "aqua", "azure", "beige", "black", "blue", "bronze", "coffee", "coral", "crimson",
    "cyan", "emerald", "fuchsia", "gold", "gray", "green", "indigo", "ivory", "jade", "lavender",
    "lime", "magenta", "maroon", "moccasin", "olive", "orange", "peach", "pink", "plum", "purple",
    "red", "rose", "salmon", "sapphire", "scarlet", "silver", "tan", "teal", "tomato", "violet",
    "white", "yellow",
];

const ANIMALS: &[&str] = &[
    "alpaca", "ant", "badger", "bat", "bear", "beaver", "bee", "bison", "boar", "buffalo", "camel",
    "cat", "cheetah", "cobra", "crab", "crane", "crow", "deer", "dingo", "dolphin", "dove", "eagle",
    "eel", "elk", "falcon", "ferret", "finch", "fox", "gecko", "gerbil", "goat", "goose", "gorilla",
    "hamster", "hare", "hawk", "heron", "hyena", "ibex", "jackal", "koala", "lemur", "leopard",
    "lion", "llama", "lobster", "lynx", "marmot", "mink", "mole", "moose", "mouse", "narwhal",
    "newt", "otter", "owl", "panda", "parrot", "pelican", "penguin", "pig", "puma", "quail",
    "rabbit", "raven", "salmon", "seal", "shark", "sheep", "sloth", "snail", "snake", "spider",
    "squid", "stork", "swan", "tapir", "tiger", "toad", "trout", "turtle", "walrus", "whale",
    "wolf", "wombat", "yak", "zebra",
];

const SUFFIX_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const SUFFIX_LEN: usize = 8;
pub const MAX_APPLICATION_ID_LEN: usize = 36;

/// Generates a readable application id such as `teal-otter-3k9x02ab`.
pub fn generate_application_id() -> String {
    let mut rng = rand::thread_rng();
    let color = COLORS.choose(&mut rng).copied().unwrap_or("gray");
    let animal = ANIMALS.choose(&mut rng).copied().unwrap_or("fox");
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect();

    format!("{color}-{animal}-{suffix}")
}

/// Checks the `word-word-xxxxxxxx` shape of application ids.
pub fn is_application_id(candidate: &str) -> bool {
    if candidate.len() > MAX_APPLICATION_ID_LEN {
        return false;
    }

    let parts: Vec<&str> = candidate.split('-').collect();
    let [first, second, suffix] = parts.as_slice() else {
        return false;
    };

    let is_word = |part: &str| {
        (2..=16).contains(&part.len())
            && part
                .bytes()
                .all(|b| b.is_ascii_digit() || b.is_ascii_lowercase())
    };

    is_word(first)
        && is_word(second)
        && suffix.len() == SUFFIX_LEN
        && suffix
            .bytes()
            .all(|b| b.is_ascii_digit() || b.is_ascii_lowercase())
}

pub fn validate_application_id(candidate: &str) -> Result<()> {
    if is_application_id(candidate) {
        Ok(())
    } else {
        Err(CoreError::InvalidApplicationId(candidate.to_string()))
    }
}

/// Name of the cluster service (and its endpoints) that fronts the IDE of
/// an application. Derived from the metadata id, trimmed and lower-cased.
pub fn ide_service_name(meta_id: &str) -> String {
    format!("ws-{}-ide", meta_id.trim().to_lowercase())
}
