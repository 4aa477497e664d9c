//! Startup check that stored embedding columns match the configured model.

use sqlx::{Pool, Postgres};
use tracing::{info, warn};

use echolens_core::{Error, Result};

/// Tables holding an `embedding vector(N)` column.
pub const EMBEDDING_TABLES: [&str; 3] = ["transcriptions", "terms", "vector_slices"];

/// Declared and configured dimension of one table's embedding column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionMismatch {
    pub table: String,
    pub stored: i32,
    pub configured: i32,
    pub embedding_count: i64,
}

impl DimensionMismatch {
    fn into_error(self) -> Error {
        Error::Config(format!(
            "Embedding dimension mismatch on {}: column is vector({}) but the configured model \
             produces {} dimensions, and {} embeddings are already stored. Set \
             EMBEDDING_DIMENSION={} to keep the current model, or clear the stored embeddings \
             and restart to migrate the column.",
            self.table, self.stored, self.configured, self.embedding_count, self.stored
        ))
    }
}

/// Declared dimension of `table.embedding`, or `None` when the column is missing
/// or unconstrained.
pub async fn column_dimension(pool: &Pool<Postgres>, table: &str) -> Result<Option<i32>> {
    let typmod: Option<i32> = sqlx::query_scalar(
        "SELECT a.atttypmod
         FROM pg_attribute a
         WHERE a.attrelid = to_regclass($1)
           AND a.attname = 'embedding'
           AND NOT a.attisdropped",
    )
    .bind(table)
    .fetch_optional(pool)
    .await
    .map_err(Error::Database)?;

    Ok(typmod.filter(|t| *t > 0))
}

/// Ensure every embedding column is declared with `expected` dimensions.
///
/// A mismatched column with no stored embeddings is altered in place; the
/// names of altered tables are returned. A mismatched column that already
/// holds embeddings is a configuration error.
pub async fn validate_embedding_dimensions(
    pool: &Pool<Postgres>,
    expected: usize,
) -> Result<Vec<String>> {
    let configured = i32::try_from(expected)
        .map_err(|_| Error::Config(format!("Embedding dimension {} is too large", expected)))?;
    if configured <= 0 {
        return Err(Error::Config("Embedding dimension must be positive".to_string()));
    }

    let mut migrated = Vec::new();

    for table in EMBEDDING_TABLES {
        let Some(stored) = column_dimension(pool, table).await? else {
            warn!(
                subsystem = "db",
                component = "schema",
                table,
                "Embedding column not found, skipping dimension check"
            );
            continue;
        };
        if stored == configured {
            continue;
        }

        let embedding_count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {table} WHERE embedding IS NOT NULL"
        ))
        .fetch_one(pool)
        .await
        .map_err(Error::Database)?;

        if embedding_count > 0 {
            return Err(DimensionMismatch {
                table: table.to_string(),
                stored,
                configured,
                embedding_count,
            }
            .into_error());
        }

        sqlx::query(&format!(
            "ALTER TABLE {table} ALTER COLUMN embedding TYPE vector({configured})"
        ))
        .execute(pool)
        .await
        .map_err(Error::Database)?;

        info!(
            subsystem = "db",
            component = "schema",
            op = "migrate_dimension",
            table,
            from = stored,
            to = configured,
            "Migrated empty embedding column to configured dimension"
        );
        migrated.push(table.to_string());
    }

    Ok(migrated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mismatch_error_is_descriptive() {
        let err = DimensionMismatch {
            table: "vector_slices".to_string(),
            stored: 1536,
            configured: 768,
            embedding_count: 42,
        }
        .into_error();

        let msg = err.to_string();
        assert!(matches!(err, Error::Config(_)));
        assert!(msg.contains("vector_slices"));
        assert!(msg.contains("1536"));
        assert!(msg.contains("768"));
        assert!(msg.contains("42"));
        assert!(msg.contains("EMBEDDING_DIMENSION"));
    }
}
