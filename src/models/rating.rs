use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::role::Role;

/// A moderator reply attached to a rating. Append-only; never edited or
/// removed by this subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    /// The replier's user id.
    pub user_id: String,
    /// The replier's role at the time of the reply.
    pub role: Role,
    /// The reply text.
    pub content: String,
    /// When the reply was written.
    pub timestamp: DateTime<Utc>,
}

/// One user's rating of one recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingEntry {
    /// The rating author's user id. At most one entry per user per recipe.
    pub user_id: String,
    /// The star rating, an integer in 1..=5.
    pub rating: u8,
    /// An optional comment.
    pub comment: String,
    /// When the rating was written or last updated.
    pub timestamp: DateTime<Utc>,
    /// Replies to this rating, oldest first.
    #[serde(default)]
    pub replies: Vec<Reply>,
}

/// A recipe's rating collection plus its derived aggregate numbers.
///
/// `average_rating` and `total_ratings` are recomputed from `ratings` after
/// every mutation and never stored independently of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeRatings {
    /// The recipe these ratings belong to.
    pub recipe_id: String,
    /// The rating entries, keyed by author; insertion ordered.
    pub ratings: Vec<RatingEntry>,
    /// Arithmetic mean of the ratings; 0 when there are none.
    pub average_rating: f64,
    /// Number of rating entries.
    pub total_ratings: usize,
}

impl RecipeRatings {
    /// An empty aggregate for a recipe nobody has rated yet.
    pub fn empty(recipe_id: impl Into<String>) -> Self {
        Self {
            recipe_id: recipe_id.into(),
            ratings: Vec::new(),
            average_rating: 0.0,
            total_ratings: 0,
        }
    }

    /// Recomputes the derived aggregate numbers from the rating entries.
    pub fn recompute(&mut self) {
        self.total_ratings = self.ratings.len();
        self.average_rating = if self.ratings.is_empty() {
            0.0
        } else {
            let sum: f64 = self.ratings.iter().map(|r| f64::from(r.rating)).sum();
            sum / self.ratings.len() as f64
        };
    }

    /// The rating entry written by `user_id`, if any.
    pub fn entry_for(&self, user_id: &str) -> Option<&RatingEntry> {
        self.ratings.iter().find(|r| r.user_id == user_id)
    }
}
