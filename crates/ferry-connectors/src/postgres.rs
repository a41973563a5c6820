//! PostgreSQL source and destination.
//!
//! The source pages through one partition at a time with keyset queries
//! (`key >= min AND key < max AND key > last ORDER BY key LIMIT n`); the
//! destination writes each chunk as a single multi-row `INSERT` inside a
//! transaction, so a chunk lands completely or not at all.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use ferry_core::{
    BatchWriter, ColumnMapping, CopyError, Domain, Partition, Record, RowMapper, SourceReader,
    Value,
};
use sqlx::postgres::{PgPool, PgRow, Postgres};
use sqlx::query_builder::Separated;
use sqlx::{Column, QueryBuilder, Row, TypeInfo};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ConnectorError;

/// PostgreSQL refuses statements with more bind parameters than this.
pub const MAX_BIND_PARAMS: usize = 65_535;

/// Double-quote an identifier, one segment per `.`.
pub fn quote_ident(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

// ===========================================================================
// Row mapping
// ===========================================================================

/// Default mapper: the key is the first selected column, every following
/// column becomes a field in select order.
#[derive(Debug, Default, Clone, Copy)]
pub struct ColumnRowMapper;

impl RowMapper<PgRow> for ColumnRowMapper {
    fn map_row(&self, row: &PgRow) -> Result<Record, CopyError> {
        let id = match decode_value(row, 0)? {
            Value::Int(id) => id,
            other => {
                return Err(CopyError::SourceRead(format!(
                    "key column '{}' is not an integer: {:?}",
                    row.column(0).name(),
                    other
                )))
            }
        };
        let fields = (1..row.len())
            .map(|i| decode_value(row, i))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Record::new(id, fields))
    }
}

/// Decode one column by its PostgreSQL type name.
fn decode_value(row: &PgRow, idx: usize) -> Result<Value, CopyError> {
    let column = row.column(idx);
    let err = |e: sqlx::Error| CopyError::SourceRead(format!("column '{}': {}", column.name(), e));

    let value = match column.type_info().name() {
        "INT2" => row
            .try_get::<Option<i16>, _>(idx)
            .map_err(err)?
            .map(|v| Value::Int(v as i64)),
        "INT4" => row
            .try_get::<Option<i32>, _>(idx)
            .map_err(err)?
            .map(|v| Value::Int(v as i64)),
        "INT8" => row.try_get::<Option<i64>, _>(idx).map_err(err)?.map(Value::Int),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(idx)
            .map_err(err)?
            .map(|v| Value::Float(v as f64)),
        "FLOAT8" => row.try_get::<Option<f64>, _>(idx).map_err(err)?.map(Value::Float),
        "BOOL" => row.try_get::<Option<bool>, _>(idx).map_err(err)?.map(Value::Bool),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => row
            .try_get::<Option<String>, _>(idx)
            .map_err(err)?
            .map(Value::Text),
        "DATE" => row
            .try_get::<Option<NaiveDate>, _>(idx)
            .map_err(err)?
            .map(Value::Date),
        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(idx)
            .map_err(err)?
            .map(Value::Timestamp),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(idx)
            .map_err(err)?
            .map(Value::TimestampTz),
        "UUID" => row.try_get::<Option<Uuid>, _>(idx).map_err(err)?.map(Value::Uuid),
        other => {
            return Err(CopyError::SourceRead(format!(
                "column '{}' has unsupported type {}",
                column.name(),
                other
            )))
        }
    };

    Ok(value.unwrap_or(Value::Null))
}

/// List the columns of `table` from `information_schema.columns`.
async fn table_columns(pool: &PgPool, table: &str) -> Result<Vec<String>, ConnectorError> {
    let (schema, name) = match table.rsplit_once('.') {
        Some((schema, name)) => (Some(schema), name),
        None => (None, table),
    };

    let query = r#"
        SELECT column_name::TEXT
        FROM information_schema.columns
        WHERE table_name = $1
          AND ($2::TEXT IS NULL OR table_schema = $2)
        ORDER BY ordinal_position
    "#;

    let rows: Vec<(String,)> = sqlx::query_as(query)
        .bind(name)
        .bind(schema)
        .fetch_all(pool)
        .await?;

    if rows.is_empty() {
        return Err(ConnectorError::TableNotFound(table.to_string()));
    }
    Ok(rows.into_iter().map(|(c,)| c).collect())
}

async fn verify_columns(pool: &PgPool, table: &str, wanted: &[String]) -> Result<(), ConnectorError> {
    let existing = table_columns(pool, table).await?;
    let missing: Vec<&str> = wanted
        .iter()
        .filter(|c| !existing.contains(c))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(ConnectorError::ConfigError(format!(
            "table '{}' has no column(s) {:?}",
            table, missing
        )));
    }
    Ok(())
}

// ===========================================================================
// PostgresSource
// ===========================================================================

pub struct PostgresSource {
    pool: PgPool,
    table: String,
    key_column: String,
    columns: Vec<String>,
    mapper: Arc<dyn RowMapper<PgRow>>,
}

impl PostgresSource {
    /// Build a source without touching the database.
    pub fn new(pool: PgPool, table: &str, key_column: &str, mapping: &ColumnMapping) -> Self {
        Self {
            pool,
            table: table.to_string(),
            key_column: key_column.to_string(),
            columns: mapping
                .source_columns()
                .into_iter()
                .map(str::to_string)
                .collect(),
            mapper: Arc::new(ColumnRowMapper),
        }
    }

    /// Build a source after checking the table and every mapped column exist.
    pub async fn connect(
        pool: PgPool,
        table: &str,
        key_column: &str,
        mapping: &ColumnMapping,
    ) -> Result<Self, ConnectorError> {
        let source = Self::new(pool, table, key_column, mapping);
        let mut wanted = source.columns.clone();
        wanted.push(source.key_column.clone());
        verify_columns(&source.pool, table, &wanted).await?;

        info!(
            "PostgresSource: table='{}', key='{}', columns={:?}",
            source.table, source.key_column, source.columns
        );
        Ok(source)
    }

    /// Replace the default [`ColumnRowMapper`]. The row handed to the mapper
    /// has the key column first, then the mapped source columns.
    pub fn with_mapper(mut self, mapper: Arc<dyn RowMapper<PgRow>>) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn probe_query(&self) -> String {
        let key = quote_ident(&self.key_column);
        format!(
            "SELECT MIN({key})::BIGINT, MAX({key})::BIGINT FROM {}",
            quote_ident(&self.table)
        )
    }

    /// Page query: `$1` min, then `$2` max when `bounded`, then the last
    /// seen key when `resume`, and the limit last.
    pub fn page_query(&self, bounded: bool, resume: bool) -> String {
        let key = quote_ident(&self.key_column);
        let select_list = std::iter::once(key.clone())
            .chain(self.columns.iter().map(|c| quote_ident(c)))
            .collect::<Vec<_>>()
            .join(", ");

        let mut conditions = vec![format!("{key} >= $1")];
        let mut param = 1;
        if bounded {
            param += 1;
            conditions.push(format!("{key} < ${param}"));
        }
        if resume {
            param += 1;
            conditions.push(format!("{key} > ${param}"));
        }
        param += 1;

        format!(
            "SELECT {select_list} FROM {} WHERE {} ORDER BY {key} LIMIT ${param}",
            quote_ident(&self.table),
            conditions.join(" AND ")
        )
    }
}

#[async_trait]
impl SourceReader for PostgresSource {
    async fn probe(&self) -> Result<Domain, CopyError> {
        let (min, max): (Option<i64>, Option<i64>) = sqlx::query_as(&self.probe_query())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| CopyError::SourceRead(e.to_string()))?;

        match (min, max) {
            (Some(min), Some(max)) => {
                info!(
                    "PostgresSource: table='{}' key domain [{}, {}]",
                    self.table, min, max
                );
                Ok(Domain::new(min, max))
            }
            _ => Err(CopyError::EmptyDomain(self.table.clone())),
        }
    }

    async fn fetch_page(
        &self,
        partition: &Partition,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Record>, CopyError> {
        let sql = self.page_query(partition.max_value.is_some(), after.is_some());
        debug!("Partition {} page query: {}", partition.index, sql);

        let mut query = sqlx::query(&sql).bind(partition.min_value);
        if let Some(max) = partition.max_value {
            query = query.bind(max);
        }
        if let Some(after) = after {
            query = query.bind(after);
        }
        let rows: Vec<PgRow> = query
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CopyError::SourceRead(e.to_string()))?;

        rows.iter().map(|row| self.mapper.map_row(row)).collect()
    }
}

// ===========================================================================
// PostgresDestination
// ===========================================================================

pub struct PostgresDestination {
    pool: PgPool,
    table: String,
    columns: Vec<String>,
}

impl PostgresDestination {
    /// Build a destination without touching the database.
    ///
    /// Fails when a full chunk would need more bind parameters than
    /// PostgreSQL accepts in one statement.
    pub fn new(
        pool: PgPool,
        table: &str,
        mapping: &ColumnMapping,
        chunk_size: usize,
    ) -> Result<Self, ConnectorError> {
        let params = chunk_size.saturating_mul(mapping.len());
        if params > MAX_BIND_PARAMS {
            return Err(ConnectorError::ConfigError(format!(
                "chunk of {} rows x {} columns needs {} bind parameters (limit {})",
                chunk_size,
                mapping.len(),
                params,
                MAX_BIND_PARAMS
            )));
        }

        Ok(Self {
            pool,
            table: table.to_string(),
            columns: mapping
                .destination_columns()
                .into_iter()
                .map(str::to_string)
                .collect(),
        })
    }

    /// Build a destination after checking the table and columns exist.
    pub async fn connect(
        pool: PgPool,
        table: &str,
        mapping: &ColumnMapping,
        chunk_size: usize,
    ) -> Result<Self, ConnectorError> {
        let destination = Self::new(pool, table, mapping, chunk_size)?;
        verify_columns(&destination.pool, table, &destination.columns).await?;

        info!(
            "PostgresDestination: table='{}', columns={:?}",
            destination.table, destination.columns
        );
        Ok(destination)
    }

    fn insert_prefix(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        format!("INSERT INTO {} ({}) ", quote_ident(&self.table), columns)
    }

    /// Build the multi-row insert for `chunk`.
    pub fn build_insert<'a>(&self, chunk: &'a [Record]) -> QueryBuilder<'a, Postgres> {
        let mut builder = QueryBuilder::new(self.insert_prefix());
        builder.push_values(chunk, |mut row, record| {
            for value in &record.fields {
                push_value(&mut row, value);
            }
        });
        builder
    }
}

fn push_value(row: &mut Separated<'_, '_, Postgres, &'static str>, value: &Value) {
    match value {
        Value::Null => {
            row.push("NULL");
        }
        Value::Bool(v) => {
            row.push_bind(*v);
        }
        Value::Int(v) => {
            row.push_bind(*v);
        }
        Value::Float(v) => {
            row.push_bind(*v);
        }
        Value::Text(v) => {
            row.push_bind(v.clone());
        }
        Value::Date(v) => {
            row.push_bind(*v);
        }
        Value::Timestamp(v) => {
            row.push_bind(*v);
        }
        Value::TimestampTz(v) => {
            row.push_bind(*v);
        }
        Value::Uuid(v) => {
            row.push_bind(*v);
        }
    }
}

#[async_trait]
impl BatchWriter for PostgresDestination {
    async fn write_chunk(&self, chunk: &[Record]) -> Result<u64, CopyError> {
        if chunk.is_empty() {
            return Ok(0);
        }
        if let Some(bad) = chunk.iter().find(|r| r.fields.len() != self.columns.len()) {
            return Err(CopyError::DestinationWrite(format!(
                "record {} has {} fields, destination expects {}",
                bad.id,
                bad.fields.len(),
                self.columns.len()
            )));
        }

        let write_err = |e: sqlx::Error| CopyError::DestinationWrite(e.to_string());
        let mut builder = self.build_insert(chunk);

        // Dropping the transaction on error rolls the whole chunk back.
        let mut tx = self.pool.begin().await.map_err(write_err)?;
        let result = builder.build().execute(&mut *tx).await.map_err(write_err)?;
        tx.commit().await.map_err(write_err)?;

        debug!(
            "Inserted chunk of {} rows into '{}'",
            result.rows_affected(),
            self.table
        );
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    fn lazy_pool() -> PgPool {
        PgPoolOptions::new()
            .max_connections(1)
            .connect_lazy("postgres://localhost/ferry")
            .unwrap()
    }

    fn mapping() -> ColumnMapping {
        "id,firstName:first_name,lastName:last_name,birthdate"
            .parse()
            .unwrap()
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("customer"), "\"customer\"");
        assert_eq!(quote_ident("public.customer"), "\"public\".\"customer\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[tokio::test]
    async fn test_probe_and_page_queries() {
        let source = PostgresSource::new(lazy_pool(), "customer", "id", &mapping());
        assert_eq!(
            source.probe_query(),
            "SELECT MIN(\"id\")::BIGINT, MAX(\"id\")::BIGINT FROM \"customer\""
        );
        assert_eq!(
            source.page_query(true, false),
            "SELECT \"id\", \"id\", \"firstName\", \"lastName\", \"birthdate\" FROM \"customer\" \
             WHERE \"id\" >= $1 AND \"id\" < $2 ORDER BY \"id\" LIMIT $3"
        );
        assert!(source
            .page_query(true, true)
            .ends_with("AND \"id\" > $3 ORDER BY \"id\" LIMIT $4"));
    }

    #[tokio::test]
    async fn test_open_ended_page_query_has_no_upper_bound() {
        let source = PostgresSource::new(lazy_pool(), "customer", "id", &mapping());
        assert!(source
            .page_query(false, false)
            .ends_with("WHERE \"id\" >= $1 ORDER BY \"id\" LIMIT $2"));
        assert!(source
            .page_query(false, true)
            .ends_with("WHERE \"id\" >= $1 AND \"id\" > $2 ORDER BY \"id\" LIMIT $3"));
    }

    #[tokio::test]
    async fn test_insert_statement_shape() {
        let destination =
            PostgresDestination::new(lazy_pool(), "new_customer", &mapping(), 100).unwrap();
        let chunk = vec![
            Record::new(
                1,
                vec![
                    Value::Int(1),
                    "Ada".into(),
                    Value::Null,
                    Value::Date(NaiveDate::from_ymd_opt(1815, 12, 10).unwrap()),
                ],
            ),
            Record::new(
                2,
                vec![Value::Int(2), "Alan".into(), "Turing".into(), Value::Null],
            ),
        ];
        let builder = destination.build_insert(&chunk);
        assert_eq!(
            builder.sql(),
            "INSERT INTO \"new_customer\" (\"id\", \"first_name\", \"last_name\", \"birthdate\") \
             VALUES ($1, $2, NULL, $3), ($4, $5, $6, NULL)"
        );
    }

    #[tokio::test]
    async fn test_chunk_exceeding_bind_limit_is_rejected() {
        let result = PostgresDestination::new(lazy_pool(), "new_customer", &mapping(), 20_000);
        assert!(matches!(result, Err(ConnectorError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_field_count_mismatch_fails_before_io() {
        let destination =
            PostgresDestination::new(lazy_pool(), "new_customer", &mapping(), 10).unwrap();
        let err = destination
            .write_chunk(&[Record::new(1, vec![Value::Int(1)])])
            .await
            .unwrap_err();
        assert!(matches!(err, CopyError::DestinationWrite(_)));
    }

    #[tokio::test]
    async fn test_empty_chunk_is_a_no_op() {
        let destination =
            PostgresDestination::new(lazy_pool(), "new_customer", &mapping(), 10).unwrap();
        assert_eq!(destination.write_chunk(&[]).await.unwrap(), 0);
    }
}
