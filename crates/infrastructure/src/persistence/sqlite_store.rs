use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::error::DriverError;
use domain::{BufferedReading, RelationalStore, SensorId};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};

/// Relational backing store for the store-and-forward buffer. SQLite
/// is single-writer, so the pool is capped at one connection, the
/// same constraint the teacher's `SQLiteBuffer` works under.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self, DriverError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await
            .map_err(|e| DriverError::Connection(format!("failed to open buffer database: {e}")))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS buffered_readings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sensor_id INTEGER NOT NULL,
                sensor_name TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                value REAL NOT NULL,
                raw_value REAL NOT NULL,
                synced INTEGER NOT NULL DEFAULT 0,
                synced_at TEXT
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| DriverError::Connection(format!("failed to create buffer table: {e}")))?;

        Ok(Self { pool })
    }

    fn row_to_reading(row: &sqlx::sqlite::SqliteRow) -> Result<BufferedReading, DriverError> {
        let synced_at: Option<String> = row
            .try_get("synced_at")
            .map_err(|e| DriverError::Read(format!("malformed row: {e}")))?;
        let timestamp: String = row
            .try_get("timestamp")
            .map_err(|e| DriverError::Read(format!("malformed row: {e}")))?;

        Ok(BufferedReading {
            id: Some(
                row.try_get("id")
                    .map_err(|e| DriverError::Read(format!("malformed row: {e}")))?,
            ),
            sensor_id: SensorId::new(
                row.try_get::<i64, _>("sensor_id")
                    .map_err(|e| DriverError::Read(format!("malformed row: {e}")))?,
            ),
            sensor_name: row
                .try_get("sensor_name")
                .map_err(|e| DriverError::Read(format!("malformed row: {e}")))?,
            timestamp: timestamp
                .parse::<DateTime<Utc>>()
                .map_err(|e| DriverError::Read(format!("malformed timestamp: {e}")))?,
            value: row
                .try_get("value")
                .map_err(|e| DriverError::Read(format!("malformed row: {e}")))?,
            raw_value: row
                .try_get("raw_value")
                .map_err(|e| DriverError::Read(format!("malformed row: {e}")))?,
            synced: row
                .try_get::<i64, _>("synced")
                .map_err(|e| DriverError::Read(format!("malformed row: {e}")))?
                != 0,
            synced_at: synced_at
                .map(|s| s.parse::<DateTime<Utc>>())
                .transpose()
                .map_err(|e| DriverError::Read(format!("malformed synced_at: {e}")))?,
        })
    }
}

#[async_trait]
impl RelationalStore for SqliteStore {
    async fn append(&self, reading: BufferedReading) -> Result<i64, DriverError> {
        let result = sqlx::query(
            "INSERT INTO buffered_readings
                (sensor_id, sensor_name, timestamp, value, raw_value, synced, synced_at)
             VALUES (?, ?, ?, ?, ?, 0, NULL)",
        )
        .bind(reading.sensor_id.value())
        .bind(&reading.sensor_name)
        .bind(reading.timestamp.to_rfc3339())
        .bind(reading.value)
        .bind(reading.raw_value)
        .execute(&self.pool)
        .await
        .map_err(|e| DriverError::Write(format!("failed to persist reading: {e}")))?;

        Ok(result.last_insert_rowid())
    }

    async fn select_unsynced_ordered(
        &self,
        limit: u32,
    ) -> Result<Vec<BufferedReading>, DriverError> {
        let rows = sqlx::query(
            "SELECT id, sensor_id, sensor_name, timestamp, value, raw_value, synced, synced_at
             FROM buffered_readings
             WHERE synced = 0
             ORDER BY timestamp ASC
             LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DriverError::Read(format!("failed to select unsynced readings: {e}")))?;

        rows.iter().map(Self::row_to_reading).collect()
    }

    async fn mark_synced(&self, id: i64, synced_at: DateTime<Utc>) -> Result<(), DriverError> {
        sqlx::query("UPDATE buffered_readings SET synced = 1, synced_at = ? WHERE id = ?")
            .bind(synced_at.to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| DriverError::Write(format!("failed to mark reading synced: {e}")))?;
        Ok(())
    }

    async fn delete_synced_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, DriverError> {
        let result = sqlx::query("DELETE FROM buffered_readings WHERE synced = 1 AND timestamp < ?")
            .bind(cutoff.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|e| DriverError::Write(format!("failed to garbage collect readings: {e}")))?;
        Ok(result.rows_affected())
    }

    async fn count_unsynced(&self) -> Result<u64, DriverError> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM buffered_readings WHERE synced = 0")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DriverError::Read(format!("failed to count unsynced readings: {e}")))?;
        Ok(row.try_get::<i64, _>("count").unwrap_or(0) as u64)
    }

    async fn count_synced(&self) -> Result<u64, DriverError> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM buffered_readings WHERE synced = 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DriverError::Read(format!("failed to count synced readings: {e}")))?;
        Ok(row.try_get::<i64, _>("count").unwrap_or(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(value: f64) -> BufferedReading {
        BufferedReading::new(SensorId::new(1), "temp1", Utc::now(), value, value)
    }

    #[tokio::test]
    async fn append_then_select_unsynced_round_trips() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        store.append(reading(21.5)).await.unwrap();

        let unsynced = store.select_unsynced_ordered(10).await.unwrap();
        assert_eq!(unsynced.len(), 1);
        assert_eq!(unsynced[0].value, 21.5);
        assert!(!unsynced[0].synced);
    }

    #[tokio::test]
    async fn mark_synced_excludes_row_from_unsynced_selection() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        let id = store.append(reading(1.0)).await.unwrap();
        store.mark_synced(id, Utc::now()).await.unwrap();

        assert_eq!(store.select_unsynced_ordered(10).await.unwrap().len(), 0);
        assert_eq!(store.count_synced().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_synced_older_than_respects_cutoff() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        let id = store.append(reading(1.0)).await.unwrap();
        store.mark_synced(id, Utc::now()).await.unwrap();

        let deleted = store
            .delete_synced_older_than(Utc::now() + chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
    }
}
