//! LanceDB connection and housekeeping helpers.
use arrow_schema::SchemaRef;
use lancedb::{connect, Connection, Table};
use tracing::info;

use skilldb_core::{Error, Result};

pub async fn open_db(uri: &str) -> Result<Connection> {
    connect(uri)
        .execute()
        .await
        .map_err(|e| Error::Store(format!("Failed to connect to LanceDB at {uri}: {e}")))
}

pub async fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let names = conn.table_names().execute().await.map_err(Error::store)?;
    Ok(names.iter().any(|n| n == name))
}

/// Opens `name`, creating it empty with `schema` when absent.
pub async fn ensure_table(conn: &Connection, name: &str, schema: SchemaRef) -> Result<Table> {
    if !table_exists(conn, name).await? {
        info!(table = name, "Creating table");
        conn.create_empty_table(name, schema)
            .execute()
            .await
            .map_err(|e| Error::Store(format!("Failed to create table '{name}': {e}")))?;
    }
    open_table(conn, name).await
}

pub async fn open_table(conn: &Connection, name: &str) -> Result<Table> {
    conn.open_table(name)
        .execute()
        .await
        .map_err(|e| Error::Store(format!("Failed to open table '{name}': {e}")))
}

/// `'a','b'` with quotes doubled, for `IN (...)` predicates.
pub fn sql_list<S: AsRef<str>>(values: &[S]) -> String {
    values.iter().map(|v| sql_str(v.as_ref())).collect::<Vec<_>>().join(",")
}

pub fn sql_str(value: &str) -> String { format!("'{}'", value.replace('\'', "''")) }
