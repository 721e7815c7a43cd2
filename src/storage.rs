//! Storage port for the monitoring core.
//!
//! Components receive an injected [`Storage`] implementation and never touch
//! connection details. The production implementation is Postgres via sqlx;
//! tests use the in-memory implementation at the bottom of this file.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;

use crate::models::{AlertRecord, AlertSubscription, Device, Reading};

// ---

/// Create/read/update of devices, append-only readings and alert records,
/// and subscription lookup by subscriber and by active flag.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn upsert_device(&self, device: &Device) -> Result<()>;
    async fn get_device(&self, id: &str) -> Result<Option<Device>>;
    /// Devices the polling loop is responsible for (everything not push-fed).
    async fn list_polled_devices(&self) -> Result<Vec<Device>>;

    async fn insert_reading(&self, reading: &Reading) -> Result<()>;
    async fn latest_reading(&self, device_id: &str) -> Result<Option<Reading>>;
    async fn recent_readings(&self, device_id: &str, limit: i64) -> Result<Vec<Reading>>;

    async fn subscription_for(&self, email: &str) -> Result<Option<AlertSubscription>>;
    async fn active_subscriptions(&self) -> Result<Vec<AlertSubscription>>;
    async fn upsert_subscription(&self, sub: &AlertSubscription) -> Result<()>;

    async fn insert_alert_record(&self, record: &AlertRecord) -> Result<()>;
}

// ---

/// Postgres-backed storage.
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        PgStorage { pool }
    }
}

#[async_trait]
impl Storage for PgStorage {
    async fn upsert_device(&self, device: &Device) -> Result<()> {
        // ---
        sqlx::query(
            r#"
            INSERT INTO devices (id, name, connector_kind, lat, lon, status, last_seen, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                lat = EXCLUDED.lat,
                lon = EXCLUDED.lon,
                status = EXCLUDED.status,
                last_seen = EXCLUDED.last_seen
            "#,
        )
        .bind(&device.id)
        .bind(&device.name)
        .bind(&device.connector_kind)
        .bind(device.lat)
        .bind(device.lon)
        .bind(&device.status)
        .bind(device.last_seen)
        .bind(device.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_device(&self, id: &str) -> Result<Option<Device>> {
        // ---
        let device = sqlx::query_as::<_, Device>("SELECT * FROM devices WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(device)
    }

    async fn list_polled_devices(&self) -> Result<Vec<Device>> {
        // ---
        let devices =
            sqlx::query_as::<_, Device>("SELECT * FROM devices WHERE connector_kind <> 'push'")
                .fetch_all(&self.pool)
                .await?;
        Ok(devices)
    }

    async fn insert_reading(&self, reading: &Reading) -> Result<()> {
        // ---
        sqlx::query(
            r#"
            INSERT INTO readings (
                device_id, timestamp, owner_email,
                temperature, humidity, pm2_5, pressure, gas, wind_speed,
                rain, motion, ph,
                kalman_temp, kalman_hum, kalman_pm25, gas_smoothed,
                trust_score, is_anomaly, anomaly_score,
                risk_level, insight, temp_trend, gas_trend,
                health_temperature, health_gas, health_humidity
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26
            )
            "#,
        )
        .bind(&reading.device_id)
        .bind(reading.timestamp)
        .bind(&reading.owner_email)
        .bind(reading.temperature)
        .bind(reading.humidity)
        .bind(reading.pm2_5)
        .bind(reading.pressure)
        .bind(reading.gas)
        .bind(reading.wind_speed)
        .bind(reading.rain)
        .bind(reading.motion)
        .bind(reading.ph)
        .bind(reading.kalman_temp)
        .bind(reading.kalman_hum)
        .bind(reading.kalman_pm25)
        .bind(reading.gas_smoothed)
        .bind(reading.trust_score)
        .bind(reading.is_anomaly)
        .bind(reading.anomaly_score)
        .bind(&reading.risk_level)
        .bind(&reading.insight)
        .bind(&reading.temp_trend)
        .bind(&reading.gas_trend)
        .bind(&reading.health_temperature)
        .bind(&reading.health_gas)
        .bind(&reading.health_humidity)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_reading(&self, device_id: &str) -> Result<Option<Reading>> {
        // ---
        let reading = sqlx::query_as::<_, Reading>(
            "SELECT * FROM readings WHERE device_id = $1 ORDER BY timestamp DESC LIMIT 1",
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(reading)
    }

    async fn recent_readings(&self, device_id: &str, limit: i64) -> Result<Vec<Reading>> {
        // ---
        let readings = sqlx::query_as::<_, Reading>(
            "SELECT * FROM readings WHERE device_id = $1 ORDER BY timestamp DESC LIMIT $2",
        )
        .bind(device_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(readings)
    }

    async fn subscription_for(&self, email: &str) -> Result<Option<AlertSubscription>> {
        // ---
        let sub = sqlx::query_as::<_, AlertSubscription>(
            "SELECT * FROM alert_subscriptions WHERE user_email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(sub)
    }

    async fn active_subscriptions(&self) -> Result<Vec<AlertSubscription>> {
        // ---
        let subs = sqlx::query_as::<_, AlertSubscription>(
            "SELECT * FROM alert_subscriptions WHERE is_active = TRUE",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(subs)
    }

    async fn upsert_subscription(&self, sub: &AlertSubscription) -> Result<()> {
        // ---
        sqlx::query(
            r#"
            INSERT INTO alert_subscriptions (
                user_email, temp_threshold, humidity_min, humidity_max,
                pm25_threshold, wind_threshold, gas_threshold,
                rain_alerts, motion_alerts, is_active, lat, lon
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (user_email) DO UPDATE SET
                temp_threshold = EXCLUDED.temp_threshold,
                humidity_min = EXCLUDED.humidity_min,
                humidity_max = EXCLUDED.humidity_max,
                pm25_threshold = EXCLUDED.pm25_threshold,
                wind_threshold = EXCLUDED.wind_threshold,
                gas_threshold = EXCLUDED.gas_threshold,
                rain_alerts = EXCLUDED.rain_alerts,
                motion_alerts = EXCLUDED.motion_alerts,
                is_active = EXCLUDED.is_active,
                lat = EXCLUDED.lat,
                lon = EXCLUDED.lon
            "#,
        )
        .bind(&sub.user_email)
        .bind(sub.temp_threshold)
        .bind(sub.humidity_min)
        .bind(sub.humidity_max)
        .bind(sub.pm25_threshold)
        .bind(sub.wind_threshold)
        .bind(sub.gas_threshold)
        .bind(sub.rain_alerts)
        .bind(sub.motion_alerts)
        .bind(sub.is_active)
        .bind(sub.lat)
        .bind(sub.lon)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_alert_record(&self, record: &AlertRecord) -> Result<()> {
        // ---
        sqlx::query(
            r#"
            INSERT INTO alert_records (alert_id, device_id, timestamp, message, recipients, email_sent, push_sent)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.alert_id)
        .bind(&record.device_id)
        .bind(record.timestamp)
        .bind(&record.message)
        .bind(&record.recipients)
        .bind(record.email_sent)
        .bind(record.push_sent)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ---

#[cfg(test)]
pub mod mem {
    //! In-memory storage used by component tests.

    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Inner {
        devices: HashMap<String, Device>,
        readings: Vec<Reading>,
        subscriptions: HashMap<String, AlertSubscription>,
        alert_records: Vec<AlertRecord>,
    }

    #[derive(Default)]
    pub struct MemStorage {
        inner: Mutex<Inner>,
    }

    impl MemStorage {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn alert_record_count(&self) -> usize {
            self.inner.lock().unwrap().alert_records.len()
        }

        pub fn last_alert_record(&self) -> Option<AlertRecord> {
            self.inner.lock().unwrap().alert_records.last().cloned()
        }

        pub fn reading_count(&self) -> usize {
            self.inner.lock().unwrap().readings.len()
        }
    }

    #[async_trait]
    impl Storage for MemStorage {
        async fn upsert_device(&self, device: &Device) -> Result<()> {
            let mut inner = self.inner.lock().unwrap();
            inner.devices.insert(device.id.clone(), device.clone());
            Ok(())
        }

        async fn get_device(&self, id: &str) -> Result<Option<Device>> {
            Ok(self.inner.lock().unwrap().devices.get(id).cloned())
        }

        async fn list_polled_devices(&self) -> Result<Vec<Device>> {
            Ok(self
                .inner
                .lock()
                .unwrap()
                .devices
                .values()
                .filter(|d| d.connector_kind != "push")
                .cloned()
                .collect())
        }

        async fn insert_reading(&self, reading: &Reading) -> Result<()> {
            self.inner.lock().unwrap().readings.push(reading.clone());
            Ok(())
        }

        async fn latest_reading(&self, device_id: &str) -> Result<Option<Reading>> {
            Ok(self
                .inner
                .lock()
                .unwrap()
                .readings
                .iter()
                .filter(|r| r.device_id == device_id)
                .last()
                .cloned())
        }

        async fn recent_readings(&self, device_id: &str, limit: i64) -> Result<Vec<Reading>> {
            Ok(self
                .inner
                .lock()
                .unwrap()
                .readings
                .iter()
                .rev()
                .filter(|r| r.device_id == device_id)
                .take(limit as usize)
                .cloned()
                .collect())
        }

        async fn subscription_for(&self, email: &str) -> Result<Option<AlertSubscription>> {
            Ok(self.inner.lock().unwrap().subscriptions.get(email).cloned())
        }

        async fn active_subscriptions(&self) -> Result<Vec<AlertSubscription>> {
            Ok(self
                .inner
                .lock()
                .unwrap()
                .subscriptions
                .values()
                .filter(|s| s.is_active)
                .cloned()
                .collect())
        }

        async fn upsert_subscription(&self, sub: &AlertSubscription) -> Result<()> {
            let mut inner = self.inner.lock().unwrap();
            inner.subscriptions.insert(sub.user_email.clone(), sub.clone());
            Ok(())
        }

        async fn insert_alert_record(&self, record: &AlertRecord) -> Result<()> {
            self.inner.lock().unwrap().alert_records.push(record.clone());
            Ok(())
        }
    }
}
