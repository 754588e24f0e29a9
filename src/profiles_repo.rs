use anyhow::Result;
use async_trait::async_trait;
use diesel::prelude::*;

use crate::profiles::{Profile, UserContact, UserDirectory, UserStats};
use crate::web::PgPool;

#[derive(Clone)]
pub struct ProfilesRepository {
    pool: PgPool,
}

impl ProfilesRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, user_id: &str) -> Result<Option<Profile>> {
        use crate::schema::profiles::dsl;

        let pool = self.pool.clone();
        let user_id = user_id.to_string();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let profile: Option<Profile> = dsl::profiles
                .filter(dsl::id.eq(&user_id))
                .select(Profile::as_select())
                .first(&mut conn)
                .optional()?;

            Ok::<Option<Profile>, anyhow::Error>(profile)
        })
        .await??;

        Ok(result)
    }
}

#[async_trait]
impl UserDirectory for ProfilesRepository {
    async fn find_contact(&self, user_id: &str) -> Result<Option<UserContact>> {
        Ok(self.get_by_id(user_id).await?.map(UserContact::from))
    }
}

#[async_trait]
impl UserStats for ProfilesRepository {
    async fn increment_spend(&self, user_id: &str, amount_cents: i64) -> Result<bool> {
        use crate::schema::profiles;

        let pool = self.pool.clone();
        let user_id = user_id.to_string();
        let updated = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let rows = diesel::update(profiles::table)
                .filter(profiles::id.eq(&user_id))
                .set((
                    profiles::total_spent_cents.eq(profiles::total_spent_cents + amount_cents),
                    profiles::order_count.eq(profiles::order_count + 1),
                    profiles::updated_at.eq(diesel::dsl::now),
                ))
                .execute(&mut conn)?;

            Ok::<usize, anyhow::Error>(rows)
        })
        .await??;

        Ok(updated > 0)
    }
}
