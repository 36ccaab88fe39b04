//! Deterministic cache key builders.
//!
//! Every key lives under [`CACHE_PREFIX`] so clearing the cache can never
//! touch the sync queue document. The second segment names the scope
//! (user, date, search) so unrelated objects never collide.

use chrono::NaiveDate;

pub const CACHE_PREFIX: &str = "cache:";

pub const PROFILE: &str = "profile";
pub const FOOD_ENTRIES: &str = "food_entries";
pub const CUSTOM_FOODS: &str = "custom_foods";
pub const RECIPES: &str = "recipes";

/// `cache:user:{user_id}:{suffix}`
#[must_use]
pub fn user_key(user_id: &str, suffix: &str) -> String {
    format!("{}user:{}:{}", CACHE_PREFIX, user_id, suffix)
}

/// `cache:date:{user_id}:{YYYY-MM-DD}:{suffix}`
#[must_use]
pub fn date_key(user_id: &str, date: NaiveDate, suffix: &str) -> String {
    format!("{}date:{}:{}:{}", CACHE_PREFIX, user_id, date.format("%Y-%m-%d"), suffix)
}

/// `cache:date:{user_id}:`, the prefix of every date-scoped key of a user.
#[must_use]
pub fn date_prefix(user_id: &str) -> String {
    format!("{}date:{}:", CACHE_PREFIX, user_id)
}

/// `cache:search:{normalized query}`
#[must_use]
pub fn search_key(query: &str) -> String {
    format!("{}search:{}", CACHE_PREFIX, normalize_query(query))
}

/// Lowercase, trim, and collapse runs of whitespace to one space.
#[must_use]
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}
