use crate::store::{max_generation, RepositoryStore};
use praefect_base::{Error, Generation, RepositoryId, Result, StorageName};
use sqlx::{PgPool, Row};
use std::collections::{HashMap, HashSet};

/// PgStore is the Postgres-backed implementation of the spec.md §4.C
/// interface, against the `storage_repositories` / `repositories`
/// tables laid out in spec.md §6. Queries use the plain runtime
/// `sqlx::query`/`query_as` API (rather than the `query!` compile-time
/// macros `automations::server` uses) because this store's schema is
/// owned by this crate's migrations, not checked against a live
/// database at workspace build time.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }

    /// Runs the embedded schema migration. Idempotent.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS storage_repositories (
                virtual_storage TEXT NOT NULL,
                relative_path   TEXT NOT NULL,
                storage         TEXT NOT NULL,
                generation      BIGINT,
                PRIMARY KEY (virtual_storage, relative_path, storage)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS repositories (
                virtual_storage TEXT NOT NULL,
                relative_path   TEXT NOT NULL,
                primary_storage TEXT,
                replica_path    TEXT,
                generation      BIGINT,
                PRIMARY KEY (virtual_storage, relative_path)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl RepositoryStore for PgStore {
    async fn get_replicas(&self, repo: &RepositoryId) -> Result<HashMap<StorageName, Generation>> {
        let rows = sqlx::query(
            "SELECT storage, generation FROM storage_repositories WHERE virtual_storage = $1 AND relative_path = $2",
        )
        .bind(&repo.virtual_storage.0)
        .bind(&repo.relative_path.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let storage: String = row.get("storage");
                let generation: Option<i64> = row.get("generation");
                (StorageName(storage), Generation::from_nullable(generation))
            })
            .collect())
    }

    async fn increment_generation(
        &self,
        repo: &RepositoryId,
        primary: &StorageName,
        secondaries: &[StorageName],
    ) -> Result<Generation> {
        let mut txn = self.pool.begin().await?;

        let rows = sqlx::query(
            "SELECT storage, generation FROM storage_repositories \
             WHERE virtual_storage = $1 AND relative_path = $2 FOR UPDATE",
        )
        .bind(&repo.virtual_storage.0)
        .bind(&repo.relative_path.0)
        .fetch_all(&mut *txn)
        .await?;

        let current: HashMap<StorageName, Generation> = rows
            .into_iter()
            .map(|row| {
                let storage: String = row.get("storage");
                let generation: Option<i64> = row.get("generation");
                (StorageName(storage), Generation::from_nullable(generation))
            })
            .collect();

        let max = max_generation(current.values());
        let primary_gen = current.get(primary).copied().unwrap_or(Generation::Unknown);

        if !max.is_unknown() && primary_gen != max {
            return Err(Error::FailedPrecondition(format!(
                "primary '{primary}' generation {primary_gen} is not the current maximum {max} for {repo}"
            )));
        }

        let next = Generation::advanced_from(max);
        let next_value = next.as_i64().expect("advanced_from always yields Known");

        for storage in std::iter::once(primary).chain(secondaries.iter()) {
            sqlx::query(
                "INSERT INTO storage_repositories (virtual_storage, relative_path, storage, generation) \
                 VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (virtual_storage, relative_path, storage) \
                 DO UPDATE SET generation = EXCLUDED.generation",
            )
            .bind(&repo.virtual_storage.0)
            .bind(&repo.relative_path.0)
            .bind(&storage.0)
            .bind(next_value)
            .execute(&mut *txn)
            .await?;
        }

        txn.commit().await?;
        Ok(next)
    }

    async fn set_generation(&self, repo: &RepositoryId, storage: &StorageName, gen: Generation) -> Result<()> {
        sqlx::query(
            "INSERT INTO storage_repositories (virtual_storage, relative_path, storage, generation) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (virtual_storage, relative_path, storage) \
             DO UPDATE SET generation = EXCLUDED.generation",
        )
        .bind(&repo.virtual_storage.0)
        .bind(&repo.relative_path.0)
        .bind(&storage.0)
        .bind(gen.as_i64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_outdated_replicas(&self, repo: &RepositoryId) -> Result<HashSet<StorageName>> {
        let replicas = self.get_replicas(repo).await?;
        Ok(crate::store::outdated(&replicas))
    }

    async fn get_primary(&self, repo: &RepositoryId) -> Result<Option<StorageName>> {
        let row = sqlx::query(
            "SELECT primary_storage FROM repositories WHERE virtual_storage = $1 AND relative_path = $2",
        )
        .bind(&repo.virtual_storage.0)
        .bind(&repo.relative_path.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|row| row.get::<Option<String>, _>("primary_storage")).map(StorageName))
    }

    async fn set_primary(&self, repo: &RepositoryId, storage: &StorageName) -> Result<()> {
        sqlx::query(
            "INSERT INTO repositories (virtual_storage, relative_path, primary_storage) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (virtual_storage, relative_path) \
             DO UPDATE SET primary_storage = EXCLUDED.primary_storage",
        )
        .bind(&repo.virtual_storage.0)
        .bind(&repo.relative_path.0)
        .bind(&storage.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
