//! PostgreSQL operation store

use super::{OperationStats, OperationStore};
use crate::config::DatabaseConfig;
use crate::crosschain::{CrossChainOperation, OperationState};
use crate::error::{ExchangeError, ExchangeResult};

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};

const COLUMNS: &str = r#"
    operation_id, user_address, token_in, token_out, amount, src_chain, dst_chain,
    recipient, state, failure_reason, provider, message_id, created_at, updated_at
"#;

pub struct PgOperationStore {
    pool: PgPool,
}

impl PgOperationStore {
    pub async fn new(config: &DatabaseConfig) -> ExchangeResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Create tables inline
    pub async fn run_migrations(&self) -> ExchangeResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS crosschain_operations (
                operation_id BYTEA PRIMARY KEY,
                user_address BYTEA NOT NULL,
                token_in BYTEA NOT NULL,
                token_out BYTEA NOT NULL,
                amount TEXT NOT NULL,
                src_chain BIGINT NOT NULL,
                dst_chain BIGINT NOT NULL,
                recipient BYTEA NOT NULL,
                state VARCHAR(20) NOT NULL,
                failure_reason TEXT,
                provider VARCHAR(64),
                message_id BYTEA,
                created_at BIGINT NOT NULL,
                updated_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_operations_state
            ON crosschain_operations (state, created_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_operations_user
            ON crosschain_operations (user_address)
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations complete");
        Ok(())
    }

    fn from_row(row: &PgRow) -> ExchangeResult<CrossChainOperation> {
        let state: String = row.try_get("state")?;
        let amount: String = row.try_get("amount")?;
        let message_id: Option<Vec<u8>> = row.try_get("message_id")?;

        Ok(CrossChainOperation {
            operation_id: b256(&row.try_get::<Vec<u8>, _>("operation_id")?)?,
            user: address(&row.try_get::<Vec<u8>, _>("user_address")?)?,
            token_in: address(&row.try_get::<Vec<u8>, _>("token_in")?)?,
            token_out: address(&row.try_get::<Vec<u8>, _>("token_out")?)?,
            amount: amount
                .parse::<U256>()
                .map_err(|e| ExchangeError::Internal(format!("bad stored amount: {}", e)))?,
            src_chain: row.try_get::<i64, _>("src_chain")? as u64,
            dst_chain: row.try_get::<i64, _>("dst_chain")? as u64,
            recipient: address(&row.try_get::<Vec<u8>, _>("recipient")?)?,
            state: state.parse()?,
            failure_reason: row.try_get("failure_reason")?,
            provider: row.try_get("provider")?,
            message_id: message_id.as_deref().map(b256).transpose()?,
            created_at: row.try_get::<i64, _>("created_at")? as u64,
            updated_at: row.try_get::<i64, _>("updated_at")? as u64,
        })
    }
}

fn address(bytes: &[u8]) -> ExchangeResult<Address> {
    if bytes.len() != 20 {
        return Err(ExchangeError::Internal(format!(
            "stored address has {} bytes",
            bytes.len()
        )));
    }
    Ok(Address::from_slice(bytes))
}

fn b256(bytes: &[u8]) -> ExchangeResult<B256> {
    if bytes.len() != 32 {
        return Err(ExchangeError::Internal(format!(
            "stored hash has {} bytes",
            bytes.len()
        )));
    }
    Ok(B256::from_slice(bytes))
}

#[async_trait]
impl OperationStore for PgOperationStore {
    async fn insert(&self, op: &CrossChainOperation) -> ExchangeResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO crosschain_operations
                (operation_id, user_address, token_in, token_out, amount, src_chain, dst_chain,
                 recipient, state, failure_reason, provider, message_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (operation_id) DO NOTHING
            "#,
        )
        .bind(op.operation_id.as_slice())
        .bind(op.user.as_slice())
        .bind(op.token_in.as_slice())
        .bind(op.token_out.as_slice())
        .bind(op.amount.to_string())
        .bind(op.src_chain as i64)
        .bind(op.dst_chain as i64)
        .bind(op.recipient.as_slice())
        .bind(op.state.as_str())
        .bind(&op.failure_reason)
        .bind(&op.provider)
        .bind(op.message_id.map(|id| id.to_vec()))
        .bind(op.created_at as i64)
        .bind(op.updated_at as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ExchangeError::DuplicateOperation(op.operation_id));
        }
        debug!("Stored operation {}", op.operation_id);
        Ok(())
    }

    async fn get(&self, id: B256) -> ExchangeResult<Option<CrossChainOperation>> {
        let query = format!(
            "SELECT {} FROM crosschain_operations WHERE operation_id = $1",
            COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(id.as_slice())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn update(&self, op: &CrossChainOperation) -> ExchangeResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE crosschain_operations
            SET state = $2, failure_reason = $3, provider = $4, message_id = $5, updated_at = $6
            WHERE operation_id = $1
            "#,
        )
        .bind(op.operation_id.as_slice())
        .bind(op.state.as_str())
        .bind(&op.failure_reason)
        .bind(&op.provider)
        .bind(op.message_id.map(|id| id.to_vec()))
        .bind(op.updated_at as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ExchangeError::OperationNotFound(op.operation_id));
        }
        debug!("Operation {} is now {}", op.operation_id, op.state);
        Ok(())
    }

    async fn list_by_state(&self, state: OperationState) -> ExchangeResult<Vec<CrossChainOperation>> {
        let query = format!(
            "SELECT {} FROM crosschain_operations WHERE state = $1 ORDER BY created_at",
            COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(state.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::from_row).collect()
    }

    async fn stats(&self) -> ExchangeResult<OperationStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE state = 'pending') as pending,
                COUNT(*) FILTER (WHERE state = 'completed') as completed,
                COUNT(*) FILTER (WHERE state = 'failed') as failed,
                COUNT(*) FILTER (WHERE state = 'recovered') as recovered
            FROM crosschain_operations
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(OperationStats {
            pending: row.get::<i64, _>("pending") as u64,
            completed: row.get::<i64, _>("completed") as u64,
            failed: row.get::<i64, _>("failed") as u64,
            recovered: row.get::<i64, _>("recovered") as u64,
        })
    }

    async fn health_check(&self) -> ExchangeResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
