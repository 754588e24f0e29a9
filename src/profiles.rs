use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

/// Diesel model for the profiles table
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::profiles)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Profile {
    pub id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub total_spent_cents: i64,
    pub order_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Who to address a notification to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContact {
    pub email: Option<String>,
    pub display_name: Option<String>,
}

impl From<Profile> for UserContact {
    fn from(profile: Profile) -> Self {
        Self {
            email: profile.email,
            display_name: profile.display_name,
        }
    }
}

/// Lookup of user contact details
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_contact(&self, user_id: &str) -> Result<Option<UserContact>>;
}

/// Cumulative per-user purchase statistics
#[async_trait]
pub trait UserStats: Send + Sync {
    /// Add one order of `amount_cents` to the user's totals.
    /// Returns false when the user has no profile.
    async fn increment_spend(&self, user_id: &str, amount_cents: i64) -> Result<bool>;
}
