//! Target profile repository implementation.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use geolens_core::{Error, ProfileRepository, Result, TargetProfile};

/// PostgreSQL implementation of ProfileRepository.
pub struct PgProfileRepository {
    pool: Pool<Postgres>,
}

impl PgProfileRepository {
    /// Create a new PgProfileRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfileRepository for PgProfileRepository {
    async fn get(&self, profile_id: Uuid) -> Result<Option<TargetProfile>> {
        let row = sqlx::query(
            "SELECT id, company_name, domain, industry, description, competitors, created_at
             FROM target_profiles WHERE id = $1",
        )
        .bind(profile_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(|row| {
            let competitors: serde_json::Value = row.get("competitors");
            Ok(TargetProfile {
                id: row.get("id"),
                company_name: row.get("company_name"),
                domain: row.get("domain"),
                industry: row.get("industry"),
                description: row.get("description"),
                competitors: serde_json::from_value(competitors)
                    .map_err(|e| Error::Serialization(format!("invalid competitors list: {e}")))?,
                created_at: row.get("created_at"),
            })
        })
        .transpose()
    }

    async fn insert(&self, profile: &TargetProfile) -> Result<()> {
        sqlx::query(
            "INSERT INTO target_profiles (id, company_name, domain, industry, description, competitors, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(profile.id)
        .bind(&profile.company_name)
        .bind(&profile.domain)
        .bind(&profile.industry)
        .bind(&profile.description)
        .bind(serde_json::to_value(&profile.competitors)?)
        .bind(profile.created_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }
}
