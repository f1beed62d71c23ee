//! Relational schema definitions.
//!
//! Statements are written in the SQL subset shared by PostgreSQL and SQLite
//! so the same text runs through the `Any` driver on either backend.

/// SQL statement for creating the metrics table.
///
/// One row per metric name; `delta` is set for counters and `value` for
/// gauges, the other column stays NULL.
pub const METRICS_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS metrics (
    name  VARCHAR(255) PRIMARY KEY,
    type  VARCHAR(16) NOT NULL,
    delta BIGINT,
    value DOUBLE PRECISION
)
"#;

/// Atomic counter merge. Returns no row when `name` is stored as a gauge.
pub const UPSERT_COUNTER: &str = r#"
INSERT INTO metrics (name, type, delta) VALUES ($1, 'counter', $2)
ON CONFLICT (name) DO UPDATE SET delta = metrics.delta + EXCLUDED.delta
WHERE metrics.type = EXCLUDED.type
RETURNING delta
"#;

/// Atomic gauge replace. Returns no row when `name` is stored as a counter.
pub const UPSERT_GAUGE: &str = r#"
INSERT INTO metrics (name, type, value) VALUES ($1, 'gauge', $2)
ON CONFLICT (name) DO UPDATE SET value = EXCLUDED.value
WHERE metrics.type = EXCLUDED.type
RETURNING value
"#;

pub const SELECT_COUNTER: &str = "SELECT delta FROM metrics WHERE name = $1 AND type = 'counter'";

pub const SELECT_GAUGE: &str = "SELECT value FROM metrics WHERE name = $1 AND type = 'gauge'";

/// Kind currently stored under a name, used to report a mismatch.
pub const SELECT_KIND: &str = "SELECT type FROM metrics WHERE name = $1";

pub const SELECT_ALL: &str = "SELECT name, type, delta, value FROM metrics ORDER BY name";

/// Initialize the schema on a freshly connected pool.
pub async fn init_schema(pool: &sqlx::AnyPool) -> Result<(), sqlx::Error> {
    sqlx::query(METRICS_TABLE_DDL).execute(pool).await?;
    Ok(())
}
