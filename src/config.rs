/// Storage keys, cache namespace and lifetimes for the persistence layer.
///
/// The defaults mirror the keys the web client has always written, so a
/// build with a default `Config` keeps reading existing data.
#[derive(Clone, Debug)]
pub struct Config {
    /// Key under which the user directory is stored.
    pub users_key: String,
    /// Key under which the current session record is stored.
    pub session_key: String,
    /// Key for the session-active marker.
    pub session_flag_key: String,
    /// Key under which the ratings-by-recipe collection is stored.
    pub ratings_key: String,
    /// Prefix for every cache key.
    pub cache_prefix: String,
    /// Cache namespace version; bumping it orphans old entries.
    pub cache_version: String,
    /// Default cache TTL in milliseconds.
    pub default_cache_ttl_ms: i64,
    /// TTL for cached rating aggregates.
    pub rating_cache_ttl_ms: i64,
    /// TTL for cached resolved recipe documents.
    pub recipe_cache_ttl_ms: i64,
    /// TTL for cached user snapshots.
    pub user_cache_ttl_ms: i64,
    /// Lifetime of an ephemeral session in hours.
    pub ephemeral_session_hours: i64,
    /// Lifetime of a remembered session in days.
    pub persistent_session_days: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            users_key: "smart_meal_users".to_string(),
            session_key: "smart_meal_current_user".to_string(),
            session_flag_key: "smart_meal_session".to_string(),
            ratings_key: "recipeRatings".to_string(),
            cache_prefix: "nutriplanner_".to_string(),
            cache_version: "1.0.0".to_string(),
            default_cache_ttl_ms: 24 * 60 * 60 * 1000,
            rating_cache_ttl_ms: 5 * 60 * 1000,
            recipe_cache_ttl_ms: 60 * 60 * 1000,
            user_cache_ttl_ms: 30 * 60 * 1000,
            ephemeral_session_hours: 24,
            persistent_session_days: 30,
        }
    }
}
