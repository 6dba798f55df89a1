//! Postgres persistence for restart recovery and audit.
//!
//! Orders are mirrored as they settle, positions are replaced wholesale
//! each sync (the broker is the source of truth, the table is a cache
//! with our protective annotations), and the agent status lives in a
//! single row.

use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::info;

use crate::domain::{Order, Position};
use crate::error::{Result, StewardError};
use crate::orchestrator::state::{AgentStatus, OperatingMode, RunState};

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("database migrations applied");
        Ok(())
    }

    /// Mirror an order's latest known state.
    pub async fn upsert_order(&self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders
                (id, broker_order_id, client_order_id, symbol, side, order_type,
                 qty, notional, status, filled_qty, filled_avg_price,
                 rejection_reason, submitted_at, filled_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, now())
            ON CONFLICT (id) DO UPDATE SET
                broker_order_id = EXCLUDED.broker_order_id,
                status = EXCLUDED.status,
                filled_qty = EXCLUDED.filled_qty,
                filled_avg_price = EXCLUDED.filled_avg_price,
                rejection_reason = EXCLUDED.rejection_reason,
                filled_at = EXCLUDED.filled_at,
                updated_at = now()
            "#,
        )
        .bind(order.id)
        .bind(&order.broker_order_id)
        .bind(&order.client_order_id)
        .bind(&order.symbol)
        .bind(order.side.as_str())
        .bind(order.order_type.as_str())
        .bind(order.qty)
        .bind(order.notional)
        .bind(order.status.as_str())
        .bind(order.filled_qty)
        .bind(order.filled_avg_price)
        .bind(&order.rejection_reason)
        .bind(order.submitted_at)
        .bind(order.filled_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Replace the position snapshot in one transaction. Readers never
    /// see a half-updated table.
    pub async fn replace_positions(&self, positions: &[Position]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM positions").execute(&mut *tx).await?;

        for p in positions {
            sqlx::query(
                r#"
                INSERT INTO positions
                    (symbol, qty, available_qty, entry_price, current_price,
                     unrealized_pnl, unrealized_pnl_pct, stop_loss_price,
                     take_profit_price, trailing_stop_pct, opened_at, strategy_id,
                     updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, now())
                "#,
            )
            .bind(&p.symbol)
            .bind(p.qty)
            .bind(p.available_qty)
            .bind(p.entry_price)
            .bind(p.current_price)
            .bind(p.unrealized_pnl)
            .bind(p.unrealized_pnl_pct)
            .bind(p.stop_loss_price)
            .bind(p.take_profit_price)
            .bind(p.trailing_stop_pct)
            .bind(p.opened_at)
            .bind(&p.strategy_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn load_positions(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query("SELECT * FROM positions ORDER BY symbol")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(position_from_row).collect()
    }

    /// Write the single agent status row.
    pub async fn save_status(&self, status: &AgentStatus) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO agent_status
                (id, state, mode, kill_switch_active, consecutive_errors,
                 last_heartbeat, last_analysis_at, updated_at)
            VALUES (1, $1, $2, $3, $4, $5, $6, now())
            ON CONFLICT (id) DO UPDATE SET
                state = EXCLUDED.state,
                mode = EXCLUDED.mode,
                kill_switch_active = EXCLUDED.kill_switch_active,
                consecutive_errors = EXCLUDED.consecutive_errors,
                last_heartbeat = EXCLUDED.last_heartbeat,
                last_analysis_at = EXCLUDED.last_analysis_at,
                updated_at = now()
            "#,
        )
        .bind(status.state.as_str())
        .bind(status.mode.as_str())
        .bind(status.kill_switch_active)
        .bind(status.consecutive_errors as i32)
        .bind(status.last_heartbeat)
        .bind(status.last_analysis_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_status(&self) -> Result<Option<AgentStatus>> {
        let row = sqlx::query("SELECT * FROM agent_status WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let state_raw: String = row.try_get("state")?;
        let mode_raw: String = row.try_get("mode")?;
        let consecutive_errors: i32 = row.try_get("consecutive_errors")?;

        Ok(Some(AgentStatus {
            state: RunState::parse(&state_raw).ok_or_else(|| {
                StewardError::Internal(format!("unknown run state in store: {}", state_raw))
            })?,
            mode: OperatingMode::parse(&mode_raw).ok_or_else(|| {
                StewardError::Internal(format!("unknown mode in store: {}", mode_raw))
            })?,
            kill_switch_active: row.try_get("kill_switch_active")?,
            consecutive_errors: consecutive_errors.max(0) as u32,
            last_heartbeat: row.try_get("last_heartbeat")?,
            last_analysis_at: row.try_get("last_analysis_at")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }
}

fn position_from_row(row: &PgRow) -> Result<Position> {
    Ok(Position {
        symbol: row.try_get("symbol")?,
        qty: row.try_get("qty")?,
        available_qty: row.try_get("available_qty")?,
        entry_price: row.try_get("entry_price")?,
        current_price: row.try_get("current_price")?,
        unrealized_pnl: row.try_get("unrealized_pnl")?,
        unrealized_pnl_pct: row.try_get("unrealized_pnl_pct")?,
        stop_loss_price: row.try_get("stop_loss_price")?,
        take_profit_price: row.try_get("take_profit_price")?,
        trailing_stop_pct: row.try_get("trailing_stop_pct")?,
        opened_at: row.try_get("opened_at")?,
        strategy_id: row.try_get("strategy_id")?,
    })
}
