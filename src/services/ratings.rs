use std::sync::Arc;

use crate::cache::TtlCache;
use crate::clock::Clock;
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::rating::{RatingEntry, RecipeRatings, Reply};
use crate::models::role::Role;
use crate::storage::driver::KeyValueStore;

/// The outcome of an accepted rating submission.
#[derive(Debug, Clone, PartialEq)]
pub struct RatingOutcome {
    /// True when an existing rating by the same user was updated in place.
    pub updated: bool,
    /// The refreshed average for the recipe.
    pub average_rating: f64,
    /// The refreshed rating count for the recipe.
    pub total_ratings: usize,
}

/// Owns the per-recipe rating collections.
///
/// Enforces one rating per identity, recomputes the derived aggregate after
/// every mutation, and writes the whole collection back as one document.
/// Reads go through the TTL cache to avoid re-parsing the collection on
/// every call; two contexts racing on the same collection remain last
/// writer wins, a documented property of the storage medium.
pub struct RatingLedger {
    storage: Arc<dyn KeyValueStore>,
    cache: TtlCache,
    clock: Arc<dyn Clock>,
    ratings_key: String,
    rating_ttl_ms: i64,
}

impl RatingLedger {
    /// Creates a ledger over the persistent storage scope.
    pub fn new(
        storage: Arc<dyn KeyValueStore>,
        cache: TtlCache,
        clock: Arc<dyn Clock>,
        config: &Config,
    ) -> Self {
        Self {
            storage,
            cache,
            clock,
            ratings_key: config.ratings_key.clone(),
            rating_ttl_ms: config.rating_cache_ttl_ms,
        }
    }

    fn cache_key(recipe_id: &str) -> String {
        format!("rating_{}", recipe_id)
    }

    /// Reads the full ratings-by-recipe collection.
    ///
    /// Storage faults degrade to an empty collection.
    pub async fn all_ratings(&self) -> Vec<RecipeRatings> {
        match self.load_collection().await {
            Ok(collection) => collection,
            Err(e) => {
                tracing::error!("Failed to get rating data: {}", e);
                Vec::new()
            }
        }
    }

    async fn load_collection(&self) -> Result<Vec<RecipeRatings>> {
        match self.storage.get(&self.ratings_key).await? {
            Some(raw) => Ok(sonic_rs::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    async fn store_collection(&self, collection: &[RecipeRatings]) -> Result<()> {
        let raw = sonic_rs::to_string(collection)?;
        self.storage.set(&self.ratings_key, raw).await
    }

    /// Returns the aggregate for `recipe_id`, consulting the cache first.
    ///
    /// A recipe nobody has rated yet comes back as an empty aggregate.
    pub async fn recipe_ratings(&self, recipe_id: &str) -> RecipeRatings {
        let cache_key = Self::cache_key(recipe_id);
        if let Some(cached) = self.cache.get::<RecipeRatings>(&cache_key).await {
            return cached;
        }

        let collection = self.all_ratings().await;
        let aggregate = collection
            .into_iter()
            .find(|r| r.recipe_id == recipe_id)
            .unwrap_or_else(|| RecipeRatings::empty(recipe_id));

        self.cache
            .set(&cache_key, &aggregate, Some(self.rating_ttl_ms))
            .await;
        aggregate
    }

    /// The rating written by `user_id` for `recipe_id`, if any.
    pub async fn user_rating(&self, recipe_id: &str, user_id: &str) -> Option<RatingEntry> {
        self.recipe_ratings(recipe_id)
            .await
            .entry_for(user_id)
            .cloned()
    }

    /// Adds or updates `user_id`'s rating of `recipe_id`.
    ///
    /// Upserts by identity: a second rating from the same user replaces the
    /// first in place and keeps its replies. The aggregate numbers are
    /// recomputed and the whole collection is written back.
    pub async fn add_rating(
        &self,
        recipe_id: &str,
        user_id: &str,
        rating: u8,
        comment: &str,
    ) -> Result<RatingOutcome> {
        if recipe_id.is_empty() || user_id.is_empty() {
            return Err(AppError::Validation(
                "Recipe ID and User ID are required".to_string(),
            ));
        }
        if !(1..=5).contains(&rating) {
            return Err(AppError::Validation(
                "Rating must be between 1-5".to_string(),
            ));
        }

        let mut collection = self.load_collection().await?;
        let index = match collection.iter().position(|r| r.recipe_id == recipe_id) {
            Some(index) => index,
            None => {
                collection.push(RecipeRatings::empty(recipe_id));
                collection.len() - 1
            }
        };

        let now = self.clock.now();
        let aggregate = &mut collection[index];
        let updated = match aggregate.ratings.iter_mut().find(|r| r.user_id == user_id) {
            Some(existing) => {
                existing.rating = rating;
                existing.comment = comment.to_string();
                existing.timestamp = now;
                true
            }
            None => {
                aggregate.ratings.push(RatingEntry {
                    user_id: user_id.to_string(),
                    rating,
                    comment: comment.to_string(),
                    timestamp: now,
                    replies: Vec::new(),
                });
                false
            }
        };
        aggregate.recompute();

        let outcome = RatingOutcome {
            updated,
            average_rating: aggregate.average_rating,
            total_ratings: aggregate.total_ratings,
        };
        let refreshed = collection[index].clone();

        self.store_collection(&collection).await?;
        self.cache
            .set(&Self::cache_key(recipe_id), &refreshed, Some(self.rating_ttl_ms))
            .await;

        tracing::debug!(
            "Rating {} for recipe {} by {}: avg {:.2} over {}",
            if updated { "updated" } else { "added" },
            recipe_id,
            user_id,
            outcome.average_rating,
            outcome.total_ratings,
        );
        Ok(outcome)
    }

    /// Removes `user_id`'s rating from `recipe_id`.
    ///
    /// `privileged` marks a moderator removing someone else's rating; the
    /// authorization decision itself belongs to the caller. Returns `false`
    /// when no matching entry existed, and on storage faults.
    pub async fn remove_rating(&self, recipe_id: &str, user_id: &str, privileged: bool) -> bool {
        match self.try_remove_rating(recipe_id, user_id, privileged).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::error!("Failed to remove rating: {}", e);
                false
            }
        }
    }

    async fn try_remove_rating(
        &self,
        recipe_id: &str,
        user_id: &str,
        privileged: bool,
    ) -> Result<bool> {
        let mut collection = self.load_collection().await?;
        let Some(index) = collection.iter().position(|r| r.recipe_id == recipe_id) else {
            return Ok(false);
        };

        let aggregate = &mut collection[index];
        let Some(position) = aggregate.ratings.iter().position(|r| r.user_id == user_id) else {
            return Ok(false);
        };
        aggregate.ratings.remove(position);
        aggregate.recompute();

        if privileged {
            tracing::info!(
                "Moderator removed rating by {} on recipe {}",
                user_id,
                recipe_id
            );
        } else {
            tracing::debug!("Removed rating by {} on recipe {}", user_id, recipe_id);
        }

        let refreshed = collection[index].clone();
        self.store_collection(&collection).await?;
        self.cache
            .set(&Self::cache_key(recipe_id), &refreshed, Some(self.rating_ttl_ms))
            .await;
        Ok(true)
    }

    /// Appends a reply to the rating written by `target_user_id`.
    ///
    /// Replies are append-only and order-preserving. Returns the target
    /// rating's full reply sequence.
    pub async fn add_reply(
        &self,
        recipe_id: &str,
        target_user_id: &str,
        replier_user_id: &str,
        replier_role: Role,
        content: &str,
    ) -> Result<Vec<Reply>> {
        if recipe_id.is_empty() || target_user_id.is_empty() || replier_user_id.is_empty() {
            return Err(AppError::Validation(
                "Recipe ID, target user ID and replier user ID are required".to_string(),
            ));
        }
        let content = content.trim();
        if content.is_empty() {
            return Err(AppError::Validation(
                "Reply content is required".to_string(),
            ));
        }

        let mut collection = self.load_collection().await?;
        let Some(index) = collection.iter().position(|r| r.recipe_id == recipe_id) else {
            return Err(AppError::NotFound);
        };
        let aggregate = &mut collection[index];
        let Some(target) = aggregate
            .ratings
            .iter_mut()
            .find(|r| r.user_id == target_user_id)
        else {
            return Err(AppError::NotFound);
        };

        target.replies.push(Reply {
            user_id: replier_user_id.to_string(),
            role: replier_role,
            content: content.to_string(),
            timestamp: self.clock.now(),
        });
        let replies = target.replies.clone();

        let refreshed = collection[index].clone();
        self.store_collection(&collection).await?;
        self.cache
            .set(&Self::cache_key(recipe_id), &refreshed, Some(self.rating_ttl_ms))
            .await;

        tracing::debug!(
            "Reply by {} added to rating by {} on recipe {}",
            replier_user_id,
            target_user_id,
            recipe_id
        );
        Ok(replies)
    }

    /// The recipe ids with at least one rating, best average first,
    /// truncated to `limit`.
    ///
    /// The sort is stable, so recipes with equal averages keep their
    /// collection order.
    pub async fn top_rated_recipes(&self, limit: usize) -> Vec<String> {
        let mut rated: Vec<RecipeRatings> = self
            .all_ratings()
            .await
            .into_iter()
            .filter(|r| r.total_ratings > 0)
            .collect();
        rated.sort_by(|a, b| b.average_rating.total_cmp(&a.average_rating));
        rated
            .into_iter()
            .take(limit)
            .map(|r| r.recipe_id)
            .collect()
    }
}
