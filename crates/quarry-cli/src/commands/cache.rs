//! The `cache` CLI subcommand -- derive keys and read cached entries.

use std::io::Write;

use anyhow::Context;
use tracing::{debug, warn};

use quarry_cache::keys::RESULTS_KEY_PREFIX;
use quarry_cache::{decode_results, execution_key, TieredCache};
use quarry_core::sql::{is_cacheable, normalize_sql};
use quarry_core::ResultSet;
use quarry_storage::{KeyValueStore, StoreRegistry};

use crate::ExitCode;

/// Printed in place of NULL values in tabular output.
const NULL_MARKER: &str = "NULL";

// ---------------------------------------------------------------------------
// CacheArgs
// ---------------------------------------------------------------------------

/// Inspect cached executions and results.
#[derive(Debug, clap::Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache sub-subcommands.
#[derive(Debug, clap::Subcommand)]
pub enum CacheAction {
    /// Print the cache key of a statement.
    Key {
        /// Database the statement runs against.
        #[arg(long)]
        database: Option<String>,
        /// Use the statement exactly as given instead of normalizing it.
        #[arg(long)]
        raw: bool,
        /// The SQL statement.
        sql: String,
    },
    /// Print a stored execution id, or the result set under a `results-` key.
    Get {
        /// Store URI, such as `file:~/.quarry/cache` or `memory:`.
        uri: String,
        /// Key to read.
        key: String,
        /// Print result sets as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print the shape of a cached result set.
    Stat {
        /// Store URI holding the cached results.
        uri: String,
        /// Execution id whose results to inspect.
        execution_id: String,
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },
}

// ---------------------------------------------------------------------------
// execute
// ---------------------------------------------------------------------------

/// Executes the `cache` subcommand, printing to stdout.
pub fn execute(args: CacheArgs) -> Result<ExitCode, anyhow::Error> {
    let stdout = std::io::stdout();
    run(args, &StoreRegistry::with_defaults(), &mut stdout.lock())
}

/// Executes the `cache` subcommand against stores opened through `registry`,
/// printing to `out`.
pub fn run(
    args: CacheArgs,
    registry: &StoreRegistry,
    out: &mut impl Write,
) -> Result<ExitCode, anyhow::Error> {
    match args.action {
        CacheAction::Key { database, raw, sql } => {
            execute_key(database.as_deref(), &sql, raw, out)
        }
        CacheAction::Get { uri, key, json } => {
            let store = open(registry, &uri)?;
            execute_get(store.as_ref(), &key, json, out)
        }
        CacheAction::Stat {
            uri,
            execution_id,
            json,
        } => {
            let store = open(registry, &uri)?;
            execute_stat(store, &execution_id, json, out)
        }
    }
}

fn open(
    registry: &StoreRegistry,
    uri: &str,
) -> Result<std::sync::Arc<dyn KeyValueStore>, anyhow::Error> {
    let store = registry
        .open(uri)
        .with_context(|| format!("failed to open cache store '{uri}'"))?;
    debug!(uri = %store.uri(), "opened cache store");
    Ok(store)
}

/// Prints the execution key of `sql`.
fn execute_key(
    database: Option<&str>,
    sql: &str,
    raw: bool,
    out: &mut impl Write,
) -> Result<ExitCode, anyhow::Error> {
    let sql = if raw {
        sql.to_string()
    } else {
        normalize_sql(sql)
    };
    writeln!(out, "{}", execution_key(database, &sql))?;

    if is_cacheable(&sql) {
        Ok(ExitCode::Ok)
    } else {
        warn!("statement is not cacheable; the client never stores it");
        Ok(ExitCode::QueryError)
    }
}

/// Prints the value stored under `key`, decoding result payloads.
fn execute_get(
    store: &dyn KeyValueStore,
    key: &str,
    json: bool,
    out: &mut impl Write,
) -> Result<ExitCode, anyhow::Error> {
    if !store.has(key).context("failed to query cache store")? {
        eprintln!("No entry for key '{key}' in {}.", store.uri());
        return Ok(ExitCode::QueryError);
    }

    if key.starts_with(RESULTS_KEY_PREFIX) {
        let reader = store.reader(key).context("failed to open cached results")?;
        let results = decode_results(reader).context("failed to decode cached results")?;
        if json {
            serde_json::to_writer_pretty(&mut *out, &results)?;
            writeln!(out)?;
        } else {
            write_table(&results, out)?;
        }
    } else {
        let value = store.get(key).context("failed to read cache entry")?;
        writeln!(out, "{value}")?;
    }
    Ok(ExitCode::Ok)
}

/// Prints column and row counts of the results cached for `execution_id`.
fn execute_stat(
    store: std::sync::Arc<dyn KeyValueStore>,
    execution_id: &str,
    json: bool,
    out: &mut impl Write,
) -> Result<ExitCode, anyhow::Error> {
    let cache = TieredCache::new(Some(store), None);
    let Some(results) = cache
        .load_results(execution_id)
        .context("failed to decode cached results")?
    else {
        eprintln!("No cached results for execution '{execution_id}'.");
        return Ok(ExitCode::QueryError);
    };

    if json {
        let columns: Vec<serde_json::Value> = results
            .column_names()
            .iter()
            .zip(results.column_types())
            .map(|(name, ty)| serde_json::json!({ "name": name, "type": ty }))
            .collect();
        let stat = serde_json::json!({
            "execution_id": execution_id,
            "rows": results.len(),
            "columns": columns,
        });
        serde_json::to_writer_pretty(&mut *out, &stat)?;
        writeln!(out)?;
    } else {
        writeln!(out, "execution: {execution_id}")?;
        writeln!(out, "rows:      {}", results.len())?;
        writeln!(out, "columns:   {}", results.arity())?;
        for (name, ty) in results.column_names().iter().zip(results.column_types()) {
            writeln!(out, "  {name}  {ty}")?;
        }
    }
    Ok(ExitCode::Ok)
}

/// Writes `results` as tab-separated lines with a header.
fn write_table(results: &ResultSet, out: &mut impl Write) -> std::io::Result<()> {
    writeln!(out, "{}", results.column_names().join("\t"))?;
    for row in results.rows() {
        let cells: Vec<&str> = row
            .iter()
            .map(|v| v.as_deref().unwrap_or(NULL_MARKER))
            .collect();
        writeln!(out, "{}", cells.join("\t"))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_cache::results_key;
    use quarry_storage::FileSystemStore;

    fn results() -> ResultSet {
        ResultSet::new(
            vec!["id".into(), "name".into()],
            vec!["integer".into(), "varchar".into()],
            vec![
                vec![Some("1".into()), Some("ada".into())],
                vec![Some("2".into()), None],
            ],
        )
        .unwrap()
    }

    fn run_action(action: CacheAction) -> (ExitCode, String) {
        let mut out = Vec::new();
        let code = run(CacheArgs { action }, &StoreRegistry::with_defaults(), &mut out).unwrap();
        (code, String::from_utf8(out).unwrap())
    }

    /// A filesystem store holding one execution id and its results.
    fn populated() -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(FileSystemStore::new(dir.path()).unwrap());
        let cache = TieredCache::new(Some(store), None);
        cache.save_execution_id(None, "SELECT 1", "exec-7");
        cache.save_results("exec-7", &results());
        let uri = format!("file:{}", dir.path().display());
        (dir, uri)
    }

    #[test]
    fn key_normalizes_by_default() {
        let (code, out) = run_action(CacheAction::Key {
            database: None,
            raw: false,
            sql: "   SELECT 1  \n".into(),
        });
        assert_eq!(code, ExitCode::Ok);
        assert_eq!(out.trim(), execution_key(None, "SELECT 1"));
    }

    #[test]
    fn key_raw_keeps_formatting() {
        let (_, out) = run_action(CacheAction::Key {
            database: Some("db".into()),
            raw: true,
            sql: " SELECT 1".into(),
        });
        assert_eq!(out.trim(), execution_key(Some("db"), " SELECT 1"));
    }

    #[test]
    fn key_flags_non_cacheable_statements() {
        let (code, out) = run_action(CacheAction::Key {
            database: None,
            raw: false,
            sql: "DROP TABLE t".into(),
        });
        assert_eq!(code, ExitCode::QueryError);
        assert!(out.trim().starts_with("query-"));
    }

    #[test]
    fn get_prints_execution_id() {
        let (_dir, uri) = populated();
        let (code, out) = run_action(CacheAction::Get {
            uri,
            key: execution_key(None, "SELECT 1"),
            json: false,
        });
        assert_eq!(code, ExitCode::Ok);
        assert_eq!(out, "exec-7\n");
    }

    #[test]
    fn get_decodes_results_as_table() {
        let (_dir, uri) = populated();
        let (code, out) = run_action(CacheAction::Get {
            uri,
            key: results_key("exec-7"),
            json: false,
        });
        assert_eq!(code, ExitCode::Ok);
        assert_eq!(out, "id\tname\n1\tada\n2\tNULL\n");
    }

    #[test]
    fn get_decodes_results_as_json() {
        let (_dir, uri) = populated();
        let (_, out) = run_action(CacheAction::Get {
            uri,
            key: results_key("exec-7"),
            json: true,
        });
        let decoded: ResultSet = serde_json::from_str(&out).unwrap();
        assert_eq!(decoded, results());
    }

    #[test]
    fn get_missing_key() {
        let (_dir, uri) = populated();
        let (code, out) = run_action(CacheAction::Get {
            uri,
            key: "query-missing".into(),
            json: false,
        });
        assert_eq!(code, ExitCode::QueryError);
        assert!(out.is_empty());
    }

    #[test]
    fn stat_reports_shape() {
        let (_dir, uri) = populated();
        let (code, out) = run_action(CacheAction::Stat {
            uri,
            execution_id: "exec-7".into(),
            json: false,
        });
        assert_eq!(code, ExitCode::Ok);
        assert!(out.contains("rows:      2"), "{out}");
        assert!(out.contains("columns:   2"), "{out}");
        assert!(out.contains("  name  varchar"), "{out}");
    }

    #[test]
    fn stat_as_json() {
        let (_dir, uri) = populated();
        let (_, out) = run_action(CacheAction::Stat {
            uri,
            execution_id: "exec-7".into(),
            json: true,
        });
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["rows"], 2);
        assert_eq!(value["columns"][0]["name"], "id");
    }

    #[test]
    fn stat_missing_results() {
        let (_dir, uri) = populated();
        let (code, _) = run_action(CacheAction::Stat {
            uri,
            execution_id: "exec-404".into(),
            json: false,
        });
        assert_eq!(code, ExitCode::QueryError);
    }

    #[test]
    fn unknown_scheme_is_an_error() {
        let args = CacheArgs {
            action: CacheAction::Stat {
                uri: "gs://bucket/".into(),
                execution_id: "exec-1".into(),
                json: false,
            },
        };
        let result = run(args, &StoreRegistry::with_defaults(), &mut Vec::new());
        assert!(result.is_err());
    }
}
