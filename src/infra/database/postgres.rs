//! PostgreSQL database client implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgPoolOptions, postgres::PgRow};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::domain::{
    AppError, DatabaseClient, DatabaseError, NewRating, ProofRecord, ProofStatus, ProofUpdate,
    Rating, RatingProofTask, Trade, TradeParties, TradeStatus, User,
};

/// PostgreSQL connection pool configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

const TRADE_COLUMNS: &str = "t.id, t.from_user_id, t.to_user_id, t.from_item_id, t.to_item_id, \
     t.status, t.proof_status, t.transaction_hash, t.pending_transaction_hash, \
     t.proof_retry_count, t.proof_last_error, t.proof_next_retry_at, t.created_at, t.updated_at";

const RATING_COLUMNS: &str = "r.id, r.trade_id, r.from_user_id, r.to_user_id, r.rating, \
     r.comment, r.proof_status, r.transaction_hash, r.pending_transaction_hash, \
     r.proof_retry_count, r.proof_last_error, r.proof_next_retry_at, r.created_at";

/// PostgreSQL database client with connection pooling
pub struct PostgresClient {
    pool: PgPool,
}

impl PostgresClient {
    /// Create a new PostgreSQL client with custom configuration
    pub async fn new(database_url: &str, config: PostgresConfig) -> Result<Self, AppError> {
        info!("Connecting to PostgreSQL...");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(database_url)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a new PostgreSQL client with default configuration
    pub async fn with_defaults(database_url: &str) -> Result<Self, AppError> {
        Self::new(database_url, PostgresConfig::default()).await
    }

    /// Run database migrations using sqlx migrate
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying connection pool (for testing)
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn parse_column<T: FromStr>(row: &PgRow, column: &str) -> Result<T, AppError> {
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|_| {
        AppError::Database(DatabaseError::Query(format!(
            "unexpected value '{}' in column {}",
            raw, column
        )))
    })
}

fn row_to_proof(row: &PgRow) -> Result<ProofRecord, AppError> {
    Ok(ProofRecord {
        status: parse_column::<ProofStatus>(row, "proof_status")?,
        transaction_hash: row.try_get("transaction_hash")?,
        pending_transaction_hash: row.try_get("pending_transaction_hash")?,
        retry_count: row.try_get("proof_retry_count")?,
        last_error: row.try_get("proof_last_error")?,
        next_retry_at: row.try_get("proof_next_retry_at")?,
    })
}

fn row_to_trade(row: &PgRow) -> Result<Trade, AppError> {
    Ok(Trade {
        id: row.try_get("id")?,
        from_user_id: row.try_get("from_user_id")?,
        to_user_id: row.try_get("to_user_id")?,
        from_item_id: row.try_get("from_item_id")?,
        to_item_id: row.try_get("to_item_id")?,
        status: parse_column::<TradeStatus>(row, "status")?,
        proof: row_to_proof(row)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_parties(row: &PgRow) -> Result<TradeParties, AppError> {
    Ok(TradeParties {
        trade: row_to_trade(row)?,
        buyer_email: row.try_get("buyer_email")?,
        seller_email: row.try_get("seller_email")?,
    })
}

fn row_to_rating(row: &PgRow) -> Result<Rating, AppError> {
    let score: i16 = row.try_get("rating")?;
    let rating = u8::try_from(score).map_err(|_| {
        AppError::Database(DatabaseError::Query(format!("rating {} out of range", score)))
    })?;

    Ok(Rating {
        id: row.try_get("id")?,
        trade_id: row.try_get("trade_id")?,
        from_user_id: row.try_get("from_user_id")?,
        to_user_id: row.try_get("to_user_id")?,
        rating,
        comment: row.try_get("comment")?,
        proof: row_to_proof(row)?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl DatabaseClient for PostgresClient {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_user(&self, id: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query("SELECT id, email, name, role FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| -> Result<User, AppError> {
            Ok(User {
                id: row.try_get("id")?,
                email: row.try_get("email")?,
                name: row.try_get("name")?,
                role: parse_column(&row, "role")?,
            })
        })
        .transpose()
    }

    #[instrument(skip(self))]
    async fn get_trade(&self, id: &str) -> Result<Option<Trade>, AppError> {
        let query = format!("SELECT {TRADE_COLUMNS} FROM trades t WHERE t.id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_trade).transpose()
    }

    #[instrument(skip(self))]
    async fn get_trade_with_parties(&self, id: &str) -> Result<Option<TradeParties>, AppError> {
        let query = format!(
            "SELECT {TRADE_COLUMNS}, b.email AS buyer_email, s.email AS seller_email
             FROM trades t
             JOIN users b ON b.id = t.to_user_id
             JOIN users s ON s.id = t.from_user_id
             WHERE t.id = $1"
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_parties).transpose()
    }

    #[instrument(skip(self))]
    async fn mark_trade_completed(
        &self,
        id: &str,
        lease_until: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT proof_status, from_item_id, to_item_id FROM trades WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::not_found(format!("trade {}", id)))?;

        let proof_status = parse_column::<ProofStatus>(&row, "proof_status")?;
        let from_item_id: String = row.try_get("from_item_id")?;
        let to_item_id: String = row.try_get("to_item_id")?;
        let claimed = proof_status.is_claimable();

        if claimed {
            sqlx::query(
                "UPDATE trades
                 SET status = $1, updated_at = $2,
                     proof_status = $3, proof_last_error = NULL, proof_next_retry_at = $4
                 WHERE id = $5",
            )
            .bind(TradeStatus::Completed.as_str())
            .bind(now)
            .bind(ProofStatus::Pending.as_str())
            .bind(lease_until)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        } else {
            sqlx::query("UPDATE trades SET status = $1, updated_at = $2 WHERE id = $3")
                .bind(TradeStatus::Completed.as_str())
                .bind(now)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query("UPDATE items SET status = 'traded', updated_at = $1 WHERE id = ANY($2)")
            .bind(now)
            .bind(vec![from_item_id, to_item_id])
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(trade_id = %id, claimed, "Trade marked completed");
        Ok(claimed)
    }

    #[instrument(skip(self, update), fields(status = %update.status))]
    async fn update_trade_proof(&self, id: &str, update: &ProofUpdate) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE trades
             SET proof_status = $1,
                 transaction_hash = COALESCE($2, transaction_hash),
                 pending_transaction_hash = $3,
                 proof_last_error = $4,
                 proof_next_retry_at = $5,
                 updated_at = $6
             WHERE id = $7 AND proof_status <> 'confirmed'",
        )
        .bind(update.status.as_str())
        .bind(&update.transaction_hash)
        .bind(&update.pending_transaction_hash)
        .bind(&update.last_error)
        .bind(update.next_retry_at)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(trade_id = %id, "Proof update skipped: trade missing or already confirmed");
        }
        Ok(())
    }

    #[instrument(skip(self, rating), fields(trade_id = %rating.trade_id))]
    async fn insert_rating(&self, rating: &NewRating) -> Result<Rating, AppError> {
        let row = sqlx::query(
            "INSERT INTO user_ratings
                 (id, from_user_id, to_user_id, trade_id, rating, comment,
                  proof_status, proof_next_retry_at, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING created_at",
        )
        .bind(&rating.id)
        .bind(&rating.from_user_id)
        .bind(&rating.to_user_id)
        .bind(&rating.trade_id)
        .bind(i16::from(rating.rating))
        .bind(&rating.comment)
        .bind(ProofStatus::Pending.as_str())
        .bind(rating.lease_until)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        let mut proof = ProofRecord::default();
        proof.claim(rating.lease_until);

        Ok(Rating {
            id: rating.id.clone(),
            trade_id: rating.trade_id.clone(),
            from_user_id: rating.from_user_id.clone(),
            to_user_id: rating.to_user_id.clone(),
            rating: rating.rating,
            comment: rating.comment.clone(),
            proof,
            created_at: row.try_get("created_at")?,
        })
    }

    #[instrument(skip(self))]
    async fn get_rating(&self, id: &str) -> Result<Option<Rating>, AppError> {
        let query = format!("SELECT {RATING_COLUMNS} FROM user_ratings r WHERE r.id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_rating).transpose()
    }

    #[instrument(skip(self, update), fields(status = %update.status))]
    async fn update_rating_proof(&self, id: &str, update: &ProofUpdate) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE user_ratings
             SET proof_status = $1,
                 transaction_hash = COALESCE($2, transaction_hash),
                 pending_transaction_hash = $3,
                 proof_last_error = $4,
                 proof_next_retry_at = $5
             WHERE id = $6 AND proof_status <> 'confirmed'",
        )
        .bind(update.status.as_str())
        .bind(&update.transaction_hash)
        .bind(&update.pending_transaction_hash)
        .bind(&update.last_error)
        .bind(update.next_retry_at)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(rating_id = %id, "Proof update skipped: rating missing or already confirmed");
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_ratings_for_trade(&self, trade_id: &str) -> Result<Vec<Rating>, AppError> {
        let query = format!(
            "SELECT {RATING_COLUMNS} FROM user_ratings r
             WHERE r.trade_id = $1
             ORDER BY r.created_at ASC, r.id ASC"
        );
        let rows = sqlx::query(&query)
            .bind(trade_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_rating).collect()
    }

    #[instrument(skip(self))]
    async fn list_ratings_for_user(&self, user_id: &str) -> Result<Vec<Rating>, AppError> {
        let query = format!(
            "SELECT {RATING_COLUMNS} FROM user_ratings r
             WHERE r.to_user_id = $1
             ORDER BY r.created_at DESC, r.id DESC"
        );
        let rows = sqlx::query(&query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_rating).collect()
    }

    #[instrument(skip(self))]
    async fn claim_due_trade_proofs(
        &self,
        limit: i64,
        max_attempts: i32,
        lease_until: DateTime<Utc>,
    ) -> Result<Vec<TradeParties>, AppError> {
        let query = format!(
            "WITH due AS (
                 SELECT id FROM trades
                 WHERE status = 'completed'
                   AND proof_status IN ('pending', 'failed')
                   AND transaction_hash IS NULL
                   AND (proof_next_retry_at IS NULL OR proof_next_retry_at <= $1)
                   AND proof_retry_count < $2
                 ORDER BY proof_next_retry_at ASC NULLS FIRST, updated_at ASC
                 LIMIT $3
                 FOR UPDATE SKIP LOCKED
             )
             UPDATE trades t
             SET proof_retry_count = t.proof_retry_count + 1,
                 proof_status = 'pending',
                 proof_next_retry_at = $4
             FROM due, users b, users s
             WHERE t.id = due.id AND b.id = t.to_user_id AND s.id = t.from_user_id
             RETURNING {TRADE_COLUMNS}, b.email AS buyer_email, s.email AS seller_email"
        );
        let rows = sqlx::query(&query)
            .bind(Utc::now())
            .bind(max_attempts)
            .bind(limit)
            .bind(lease_until)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_parties).collect()
    }

    #[instrument(skip(self))]
    async fn claim_due_rating_proofs(
        &self,
        limit: i64,
        max_attempts: i32,
        lease_until: DateTime<Utc>,
    ) -> Result<Vec<RatingProofTask>, AppError> {
        let query = format!(
            "WITH due AS (
                 SELECT id FROM user_ratings
                 WHERE proof_status IN ('pending', 'failed')
                   AND transaction_hash IS NULL
                   AND (proof_next_retry_at IS NULL OR proof_next_retry_at <= $1)
                   AND proof_retry_count < $2
                 ORDER BY proof_next_retry_at ASC NULLS FIRST, created_at ASC
                 LIMIT $3
                 FOR UPDATE SKIP LOCKED
             )
             UPDATE user_ratings r
             SET proof_retry_count = r.proof_retry_count + 1,
                 proof_status = 'pending',
                 proof_next_retry_at = $4
             FROM due, users u
             WHERE r.id = due.id AND u.id = r.to_user_id
             RETURNING {RATING_COLUMNS}, u.email AS ratee_email"
        );
        let rows = sqlx::query(&query)
            .bind(Utc::now())
            .bind(max_attempts)
            .bind(limit)
            .bind(lease_until)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<RatingProofTask, AppError> {
                Ok(RatingProofTask {
                    rating: row_to_rating(row)?,
                    ratee_email: row.try_get("ratee_email")?,
                })
            })
            .collect()
    }
}
