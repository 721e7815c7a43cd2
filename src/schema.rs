//! Database schema management for `ecosync-core`.
//!
//! Ensures required tables and indexes exist before serving requests.
//! Applied once on startup from `main.rs` (EMBP: single gateway call).

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create or update the database schema (idempotent).
///
/// Creates the `devices`, `readings`, `alert_subscriptions`, and
/// `alert_records` tables. Safe to call on every startup; no-op if objects
/// already exist.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    // Device registry; rows are created on first reading from a new source.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS devices (
            id             TEXT PRIMARY KEY,
            name           TEXT        NOT NULL,
            connector_kind TEXT        NOT NULL,
            lat            DOUBLE PRECISION,
            lon            DOUBLE PRECISION,
            status         TEXT        NOT NULL,
            last_seen      TIMESTAMPTZ,
            created_at     TIMESTAMPTZ NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Append-only annotated readings.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS readings (
            id                 BIGSERIAL PRIMARY KEY,
            device_id          TEXT        NOT NULL REFERENCES devices (id),
            timestamp          TIMESTAMPTZ NOT NULL,
            owner_email        TEXT,
            temperature        DOUBLE PRECISION NOT NULL,
            humidity           DOUBLE PRECISION NOT NULL,
            pm2_5              DOUBLE PRECISION NOT NULL,
            pressure           DOUBLE PRECISION NOT NULL,
            gas                DOUBLE PRECISION NOT NULL,
            wind_speed         DOUBLE PRECISION NOT NULL,
            rain               DOUBLE PRECISION,
            motion             BOOLEAN,
            ph                 DOUBLE PRECISION,
            kalman_temp        DOUBLE PRECISION NOT NULL,
            kalman_hum         DOUBLE PRECISION NOT NULL,
            kalman_pm25        DOUBLE PRECISION NOT NULL,
            gas_smoothed       DOUBLE PRECISION NOT NULL,
            trust_score        DOUBLE PRECISION NOT NULL,
            is_anomaly         BOOLEAN     NOT NULL,
            anomaly_score      DOUBLE PRECISION NOT NULL,
            risk_level         TEXT        NOT NULL,
            insight            TEXT        NOT NULL,
            temp_trend         TEXT        NOT NULL,
            gas_trend          TEXT        NOT NULL,
            health_temperature TEXT        NOT NULL,
            health_gas         TEXT        NOT NULL,
            health_humidity    TEXT        NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Per-subscriber thresholds; one row per email.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS alert_subscriptions (
            user_email     TEXT PRIMARY KEY,
            temp_threshold DOUBLE PRECISION NOT NULL,
            humidity_min   DOUBLE PRECISION NOT NULL,
            humidity_max   DOUBLE PRECISION NOT NULL,
            pm25_threshold DOUBLE PRECISION NOT NULL,
            wind_threshold DOUBLE PRECISION NOT NULL,
            gas_threshold  DOUBLE PRECISION NOT NULL,
            rain_alerts    BOOLEAN NOT NULL DEFAULT FALSE,
            motion_alerts  BOOLEAN NOT NULL DEFAULT FALSE,
            is_active      BOOLEAN NOT NULL DEFAULT TRUE,
            lat            DOUBLE PRECISION,
            lon            DOUBLE PRECISION
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Write-once audit trail of triggered notifications.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS alert_records (
            id         BIGSERIAL PRIMARY KEY,
            alert_id   UUID        NOT NULL,
            device_id  TEXT        NOT NULL,
            timestamp  TIMESTAMPTZ NOT NULL,
            message    TEXT        NOT NULL,
            recipients TEXT        NOT NULL,
            email_sent BOOLEAN     NOT NULL,
            push_sent  BOOLEAN     NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Basic indexes for common queries
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_readings_device_ts
            ON readings (device_id, timestamp DESC);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_alert_records_device
            ON alert_records (device_id);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
