//! Engine-call dispatch over the embedded engine.
//!
//! Shared by the worker binary and by direct (in-process) mode, so both
//! speak the same method set and value mapping. Every call here is
//! synchronous; callers are responsible for keeping it off async threads.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rusqlite::Connection;
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::{Value, json};

use crate::config::{DbPath, OpenFlags};

/// Engine-level failure for one command. Maps onto the protocol's structured
/// error frame; the connection stays healthy.
#[derive(Debug)]
pub struct EngineError {
    pub code: String,
    pub message: String,
}

impl EngineError {
    fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<EngineError> for crate::error::Error {
    fn from(err: EngineError) -> Self {
        crate::error::Error::Command {
            code: err.code,
            message: err.message,
        }
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        let code = match &err {
            rusqlite::Error::SqliteFailure(e, _) => format!("{:?}", e.code),
            _ => "ENGINE".to_string(),
        };
        EngineError {
            code,
            message: err.to_string(),
        }
    }
}

/// Open an engine connection for the given location and flag bits.
pub fn open(path: &DbPath, flags: OpenFlags) -> Result<Connection, EngineError> {
    let flags = rusqlite::OpenFlags::from_bits_truncate(flags.bits() as i32);
    let conn = match path {
        DbPath::Memory => Connection::open_in_memory_with_flags(flags)?,
        DbPath::Temporary => Connection::open_with_flags("", flags)?,
        DbPath::File(p) => Connection::open_with_flags(p, flags)?,
    };
    Ok(conn)
}

/// Execute one method against an open connection.
///
/// Methods:
/// - `exec [sql]` — batch execute, returns null
/// - `run [sql, params…]` — returns `{changes, last_insert_rowid}`
/// - `query [sql, params…]` — returns `{columns, rows}`
/// - `pid []` — the executing process id
pub fn dispatch(conn: &Connection, method: &str, args: &[Value]) -> Result<Value, EngineError> {
    match method {
        "exec" => {
            conn.execute_batch(str_arg(args, 0)?)?;
            Ok(Value::Null)
        }
        "run" => {
            let mut stmt = conn.prepare(str_arg(args, 0)?)?;
            let changes = stmt.execute(rusqlite::params_from_iter(bind_args(&args[1..])?))?;
            Ok(json!({
                "changes": changes,
                "last_insert_rowid": conn.last_insert_rowid(),
            }))
        }
        "query" => {
            let mut stmt = conn.prepare(str_arg(args, 0)?)?;
            let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
            let mut rows = stmt.query(rusqlite::params_from_iter(bind_args(&args[1..])?))?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut cells = Vec::with_capacity(columns.len());
                for i in 0..columns.len() {
                    cells.push(cell_to_json(row.get_ref(i)?));
                }
                out.push(Value::Array(cells));
            }
            Ok(json!({"columns": columns, "rows": out}))
        }
        "pid" => Ok(json!(std::process::id())),
        other => Err(EngineError::new(
            "UNKNOWN_METHOD",
            format!("unknown method: {other}"),
        )),
    }
}

fn str_arg<'a>(args: &'a [Value], idx: usize) -> Result<&'a str, EngineError> {
    args.get(idx)
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::new("BAD_REQUEST", format!("argument {idx} must be a string")))
}

/// JSON parameters to engine values. Blobs travel as `{"blob": <base64>}`.
fn bind_args(args: &[Value]) -> Result<Vec<SqlValue>, EngineError> {
    args.iter().map(bind_arg).collect()
}

fn bind_arg(arg: &Value) -> Result<SqlValue, EngineError> {
    match arg {
        Value::Null => Ok(SqlValue::Null),
        Value::Bool(b) => Ok(SqlValue::Integer(*b as i64)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(SqlValue::Integer(i))
            } else if let Some(f) = n.as_f64() {
                Ok(SqlValue::Real(f))
            } else {
                Err(EngineError::new(
                    "BAD_REQUEST",
                    format!("unrepresentable number: {n}"),
                ))
            }
        }
        Value::String(s) => Ok(SqlValue::Text(s.clone())),
        Value::Object(map) => match map.get("blob").and_then(Value::as_str) {
            Some(b64) if map.len() == 1 => {
                let bytes = BASE64.decode(b64).map_err(|e| {
                    EngineError::new("BAD_REQUEST", format!("invalid blob encoding: {e}"))
                })?;
                Ok(SqlValue::Blob(bytes))
            }
            _ => Err(EngineError::new(
                "BAD_REQUEST",
                "object parameters must be {\"blob\": <base64>}",
            )),
        },
        Value::Array(_) => Err(EngineError::new(
            "BAD_REQUEST",
            "array parameters are not supported",
        )),
    }
}

fn cell_to_json(cell: ValueRef<'_>) -> Value {
    match cell {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => json!(i),
        ValueRef::Real(f) => json!(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => json!({"blob": BASE64.encode(b)}),
    }
}
