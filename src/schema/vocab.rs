//! Shared vocabulary for temporal-correctness checks.

/// Field names that only exist once a race has been run.
pub const OUTCOME_FIELDS: &[&str] = &[
    "result",
    "results",
    "winner",
    "finishing_position",
    "finish_position",
    "final_price",
    "actual_time",
    "placings",
    "official_result",
];

/// Name fragments that signal future knowledge even when no value is present.
pub const LOOKAHEAD_PATTERNS: &[&str] = &[
    "winner",
    "final_",
    "actual_",
    "result",
    "finishing_",
    "post_race",
    "settled",
    "payout",
];

/// Keys treated as timestamps wherever they appear.
pub const TIMESTAMP_KEYS: &[&str] = &[
    "timestamp",
    "updated_at",
    "fetched_at",
    "scraped_at",
    "captured_at",
    "observed_at",
    "published_at",
    "as_of",
];

/// Words in free text that only make sense after the result is known.
pub const OUTCOME_WORDS: &[&str] = &[
    "won",
    "winner",
    "finished",
    "result",
    "placed",
    "beaten",
    "romped home",
    "official",
];

pub fn is_outcome_field(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    OUTCOME_FIELDS.contains(&key.as_str())
}

pub fn lookahead_pattern(key: &str) -> Option<&'static str> {
    let key = key.to_ascii_lowercase();
    LOOKAHEAD_PATTERNS.iter().copied().find(|p| key.contains(p))
}

pub fn is_timestamp_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    TIMESTAMP_KEYS.contains(&key.as_str()) || key.ends_with("_at") || key.ends_with("_ts")
}

/// Features whose names imply a probability-like value in [0, 1].
pub fn implies_unit_range(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name.contains("probability")
        || name.contains("confidence")
        || name.ends_with("_prob")
        || name.starts_with("prob_")
}
