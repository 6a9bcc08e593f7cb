//! Read-only SQL over the configured datasets.
//!
//! Each call builds a fresh in-memory SQLite database with one table per
//! dataset, switches it to `query_only`, and runs the query on a blocking
//! thread. Cancellation interrupts the running statement.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, InterruptHandle, params_from_iter};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{ToolCall, ToolContext, ToolDefinition, ToolReport, check_name, parse_input};
use crate::config::DatasetConfig;
use crate::core::artifacts::{Artifact, ArtifactKind};
use crate::core::events::ToolOutput;

pub const TOOL_NAME: &str = "sql_query";
const MAX_ROWS: usize = 200;
const INTERRUPT_RETRY: Duration = Duration::from_millis(10);

/// A named table of JSON rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub name: String,
    pub rows: Vec<Map<String, Value>>,
}

impl Dataset {
    pub fn new(name: impl Into<String>, rows: Vec<Map<String, Value>>) -> Self {
        Self {
            name: name.into(),
            rows,
        }
    }

    /// Loads a dataset file holding a JSON array of objects.
    ///
    /// # Errors
    /// Returns an error if the file is missing or not an array of objects.
    pub fn load(config: &DatasetConfig) -> Result<Self> {
        Self::from_file(&config.name, &config.path)
    }

    fn from_file(name: &str, path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read dataset '{name}' at {}", path.display()))?;
        let rows: Vec<Map<String, Value>> = serde_json::from_str(&text).with_context(|| {
            format!("Dataset '{name}' must be a JSON array of objects")
        })?;
        Ok(Self::new(name, rows))
    }

    /// Column names in first-seen order across all rows.
    fn columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = Vec::new();
        for row in &self.rows {
            for key in row.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }
        columns
    }
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: TOOL_NAME.to_string(),
        description: "Run a read-only SQLite query over the loaded datasets. Each dataset is \
            a table named after it. Returns column names and up to 200 rows."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "A single SELECT (or WITH ... SELECT) statement"
                },
                "title": {
                    "type": "string",
                    "description": "Short label for the result table"
                }
            },
            "required": ["query"],
            "additionalProperties": false
        }),
    }
}

#[derive(Debug, Deserialize)]
struct SqlQueryInput {
    query: String,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug)]
struct QueryResult {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    truncated: bool,
}

#[derive(Debug)]
enum QueryError {
    Setup(String),
    ReadOnly,
    Sql(String),
    Canceled,
}

pub async fn execute(call: ToolCall, ctx: ToolContext) -> ToolReport {
    if let Err(report) = check_name(&call, TOOL_NAME) {
        return report;
    }
    let input: SqlQueryInput = match parse_input(&call) {
        Ok(input) => input,
        Err(report) => return report,
    };
    let query = input.query.trim().to_string();
    if query.is_empty() {
        return ToolReport::failure("invalid_input", "query cannot be empty", None);
    }

    let code_artifact = Artifact::new(ArtifactKind::Code, json!({"language": "sql", "code": query}))
        .titled("SQL")
        .input();

    let services = Arc::clone(&ctx.services);
    let sql = query.clone();
    let cancel = ctx.cancel.clone();
    let (handle_tx, handle_rx) = oneshot::channel();
    let mut task = tokio::task::spawn_blocking(move || {
        run_query(&services.datasets, &sql, &cancel, handle_tx)
    });

    let joined = tokio::select! {
        biased;
        () = ctx.cancel.cancelled() => {
            interrupt_until_done(handle_rx, &mut task).await;
            return ToolOutput::canceled("SQL query canceled").into();
        }
        joined = &mut task => joined,
    };

    let result = match joined {
        Ok(Ok(result)) => result,
        Ok(Err(QueryError::ReadOnly)) => {
            return ToolReport::failure(
                "read_only",
                "Only read-only queries are allowed",
                Some(query),
            )
            .with_artifact(code_artifact);
        }
        Ok(Err(QueryError::Sql(message))) => {
            return ToolReport::failure("sql_error", message, Some(query))
                .with_artifact(code_artifact);
        }
        Ok(Err(QueryError::Canceled)) => return ToolOutput::canceled("SQL query canceled").into(),
        Ok(Err(QueryError::Setup(message))) => {
            return ToolReport::failure("dataset_error", message, None);
        }
        Err(e) => {
            return ToolReport::failure("panic", "SQL task failed", Some(e.to_string()));
        }
    };

    let row_count = result.rows.len();
    let table = json!({
        "columns": result.columns,
        "rows": result.rows,
        "row_count": row_count,
        "truncated": result.truncated,
    });
    let table_artifact = Artifact::new(ArtifactKind::Table, table.clone())
        .titled(input.title.unwrap_or_else(|| "Query result".to_string()));

    ToolReport::new(ToolOutput::success(table))
        .with_artifact(code_artifact)
        .with_artifact(table_artifact)
}

/// Interrupts the query until its blocking task ends. SQLite drops an
/// interrupt issued while no statement is running.
async fn interrupt_until_done(
    handle: oneshot::Receiver<InterruptHandle>,
    task: &mut JoinHandle<Result<QueryResult, QueryError>>,
) {
    let Ok(handle) = handle.await else {
        let _ = task.await;
        return;
    };
    loop {
        handle.interrupt();
        tokio::select! {
            _ = &mut *task => return,
            () = tokio::time::sleep(INTERRUPT_RETRY) => {}
        }
    }
}

fn run_query(
    datasets: &[Dataset],
    query: &str,
    cancel: &CancellationToken,
    handle_tx: oneshot::Sender<InterruptHandle>,
) -> Result<QueryResult, QueryError> {
    let conn = Connection::open_in_memory().map_err(|e| QueryError::Setup(e.to_string()))?;
    let _ = handle_tx.send(conn.get_interrupt_handle());
    for dataset in datasets {
        load_table(&conn, dataset).map_err(|e| {
            QueryError::Setup(format!("Failed to load dataset '{}': {e}", dataset.name))
        })?;
    }
    conn.pragma_update(None, "query_only", true)
        .map_err(|e| QueryError::Setup(e.to_string()))?;

    let mut stmt = conn
        .prepare(query)
        .map_err(|e| QueryError::Sql(e.to_string()))?;
    if !stmt.readonly() {
        return Err(QueryError::ReadOnly);
    }
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();

    let mut rows = Vec::new();
    let mut truncated = false;
    let step_error = |e: rusqlite::Error| {
        if cancel.is_cancelled() {
            QueryError::Canceled
        } else {
            QueryError::Sql(e.to_string())
        }
    };
    if cancel.is_cancelled() {
        return Err(QueryError::Canceled);
    }
    let mut cursor = stmt.query([]).map_err(step_error)?;
    while let Some(row) = cursor.next().map_err(step_error)? {
        if rows.len() == MAX_ROWS {
            truncated = true;
            break;
        }
        let mut values = Vec::with_capacity(width);
        for idx in 0..width {
            let value = row
                .get_ref(idx)
                .map_err(|e| QueryError::Sql(e.to_string()))?;
            values.push(to_json(value));
        }
        rows.push(values);
    }

    Ok(QueryResult {
        columns,
        rows,
        truncated,
    })
}

fn load_table(conn: &Connection, dataset: &Dataset) -> rusqlite::Result<()> {
    let columns = dataset.columns();
    if columns.is_empty() {
        return Ok(());
    }
    let table = quote_ident(&dataset.name);
    let column_list = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    conn.execute(&format!("CREATE TABLE {table} ({column_list})"), [])?;

    let placeholders = vec!["?"; columns.len()].join(", ");
    let mut insert =
        conn.prepare(&format!("INSERT INTO {table} ({column_list}) VALUES ({placeholders})"))?;
    for row in &dataset.rows {
        let values = columns.iter().map(|c| to_sql(row.get(c)));
        insert.execute(params_from_iter(values))?;
    }
    Ok(())
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn to_sql(value: Option<&Value>) -> SqlValue {
    match value {
        None | Some(Value::Null) => SqlValue::Null,
        Some(Value::Bool(b)) => SqlValue::Integer(i64::from(*b)),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Some(Value::String(s)) => SqlValue::Text(s.clone()),
        Some(other) => SqlValue::Text(other.to_string()),
    }
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => json!(i),
        ValueRef::Real(f) => json!(f),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(format!("<blob {} bytes>", bytes.len())),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::core::artifacts::ArtifactRole;
    use crate::tools::{ToolServices, call};

    fn row(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn ctx() -> ToolContext {
        let sales = Dataset::new(
            "sales",
            vec![
                row(json!({"region": "north", "revenue": 120, "closed": true})),
                row(json!({"region": "south", "revenue": 80.5})),
                row(json!({"region": "north", "revenue": 30, "notes": "late"})),
            ],
        );
        let services = ToolServices {
            datasets: vec![sales],
            ..ToolServices::default()
        };
        ToolContext::new(Arc::new(services))
    }

    #[tokio::test]
    async fn test_aggregates_over_dataset() {
        let query = "SELECT region, SUM(revenue) AS total FROM sales GROUP BY region ORDER BY region";
        let report = execute(call("c1", TOOL_NAME, json!({"query": query})), ctx()).await;

        let data = report.output.data().unwrap();
        assert_eq!(data["columns"], json!(["region", "total"]));
        assert_eq!(data["rows"], json!([["north", 150], ["south", 80.5]]));
        assert_eq!(report.artifacts.len(), 2);
        assert_eq!(report.artifacts[0].kind, ArtifactKind::Code);
        assert_eq!(report.artifacts[0].role, ArtifactRole::Input);
        assert_eq!(report.artifacts[1].kind, ArtifactKind::Table);
        assert_eq!(report.artifacts[1].role, ArtifactRole::Output);
    }

    #[tokio::test]
    async fn test_missing_keys_are_null() {
        let query = "SELECT notes, closed FROM sales ORDER BY rowid";
        let report = execute(call("c1", TOOL_NAME, json!({"query": query})), ctx()).await;
        let data = report.output.data().unwrap();
        assert_eq!(data["rows"], json!([[null, 1], [null, null], ["late", null]]));
    }

    #[tokio::test]
    async fn test_malformed_sql_fails() {
        let report = execute(call("c1", TOOL_NAME, json!({"query": "SELEC nope"})), ctx()).await;
        let (code, _, details) = report.output.error_info().unwrap();
        assert_eq!(code, "sql_error");
        assert_eq!(details, Some("SELEC nope"));
    }

    #[tokio::test]
    async fn test_writes_are_rejected() {
        let report = execute(call("c1", TOOL_NAME, json!({"query": "DELETE FROM sales"})), ctx()).await;
        assert_eq!(report.output.error_info().unwrap().0, "read_only");
    }

    #[tokio::test]
    async fn test_rows_are_capped() {
        let query = "WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n LIMIT 500) SELECT i FROM n";
        let report = execute(call("c1", TOOL_NAME, json!({"query": query})), ctx()).await;
        let data = report.output.data().unwrap();
        assert_eq!(data["row_count"], json!(MAX_ROWS));
        assert_eq!(data["truncated"], json!(true));
    }

    const UNBOUNDED: &str =
        "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) SELECT count(*) FROM c";

    #[tokio::test]
    async fn test_canceled_token_stops_unbounded_query() {
        let ctx = ctx();
        ctx.cancel.cancel();
        let report = tokio::time::timeout(
            Duration::from_secs(5),
            execute(call("c1", TOOL_NAME, json!({"query": UNBOUNDED})), ctx),
        )
        .await
        .expect("query should stop once canceled");
        assert_eq!(report.output.error_info().unwrap().0, "canceled");
    }

    #[tokio::test]
    async fn test_cancel_interrupts_running_query() {
        let ctx = ctx();
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });
        let report = tokio::time::timeout(
            Duration::from_secs(5),
            execute(call("c1", TOOL_NAME, json!({"query": UNBOUNDED})), ctx),
        )
        .await
        .expect("running query should be interrupted");
        assert_eq!(report.output.error_info().unwrap().0, "canceled");
    }

    #[test]
    fn test_dataset_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"a": 1}}, {{"b": "x"}}]"#).unwrap();
        let dataset = Dataset::from_file("t", file.path()).unwrap();
        assert_eq!(dataset.columns(), vec!["a", "b"]);

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        write!(bad, r#"{{"a": 1}}"#).unwrap();
        let err = Dataset::from_file("t", bad.path()).unwrap_err();
        assert!(err.to_string().contains("JSON array of objects"));
    }
}
