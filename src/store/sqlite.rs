// ABOUTME: SQLite-backed record store with schema introspection
// ABOUTME: Reads column types, VARCHAR lengths and foreign keys from PRAGMA queries

use super::{RecordFilter, RecordStore};
use crate::encoding::{decode_best_effort, default_fallbacks};
use crate::error::{EtlError, Result};
use crate::record::{FieldInfo, FieldType, Key, Record};
use crate::utils::{quote_ident, validate_identifier};
use encoding_rs::Encoding;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde_json::Value;
use std::path::Path;

/// Bound parameters per statement; stays under SQLITE_MAX_VARIABLE_NUMBER on old builds
const PARAM_CHUNK: usize = 500;

pub struct SqliteStore {
    conn: Connection,
    table: String,
    key_column: String,
    fields: Vec<FieldInfo>,
    fallbacks: Vec<&'static Encoding>,
}

impl SqliteStore {
    /// Open an existing table in the database file at `path`
    pub fn open(path: impl AsRef<Path>, table: &str) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        Self::from_connection(conn, table)
    }

    /// Wrap an existing table, introspecting its key, columns and foreign keys
    pub fn from_connection(conn: Connection, table: &str) -> Result<Self> {
        validate_identifier(table)?;
        let (key_column, fields) = introspect(&conn, table)?;
        tracing::debug!(
            "Opened table '{}' (key '{}', {} field(s))",
            table,
            key_column,
            fields.len()
        );
        Ok(Self {
            conn,
            table: table.to_string(),
            key_column,
            fields,
            fallbacks: default_fallbacks(),
        })
    }

    /// Create `table` (if missing) with an integer `id` key and the given fields
    pub fn create(conn: Connection, table: &str, fields: &[FieldInfo]) -> Result<Self> {
        validate_identifier(table)?;
        let mut columns = vec!["\"id\" INTEGER PRIMARY KEY".to_string()];
        for field in fields {
            validate_identifier(&field.column)?;
            let mut decl = format!("{} {}", quote_ident(&field.column), declared_type(field));
            if !field.nullable {
                decl.push_str(" NOT NULL");
            }
            if let Some(target) = &field.related_to {
                validate_identifier(target)?;
                decl.push_str(&format!(" REFERENCES {}(\"id\")", quote_ident(target)));
            }
            columns.push(decl);
        }
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(table),
            columns.join(", ")
        );
        conn.execute(&sql, [])?;
        tracing::info!("Ensured table '{}' exists", table);
        Self::from_connection(conn, table)
    }

    /// User tables in the database, sorted by name
    pub fn list_tables(conn: &Connection) -> Result<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(names)
    }

    /// Encodings tried when a TEXT value is not valid UTF-8
    pub fn with_fallback_encodings(mut self, fallbacks: Vec<&'static Encoding>) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn key_column(&self) -> &str {
        &self.key_column
    }

    fn select_sql(&self, condition: &str) -> String {
        let mut columns = vec![quote_ident(&self.key_column)];
        columns.extend(self.fields.iter().map(|f| quote_ident(&f.column)));
        format!(
            "SELECT {} FROM {}{} ORDER BY {}",
            columns.join(", "),
            quote_ident(&self.table),
            condition,
            quote_ident(&self.key_column)
        )
    }

    fn query(&self, sql: &str, params: Vec<SqlValue>) -> Result<Vec<Record>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(params))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let pk = key_from_sql(row.get_ref(0)?, &self.fallbacks);
            let mut record = Record::new(pk);
            for (idx, field) in self.fields.iter().enumerate() {
                let value = value_from_sql(row.get_ref(idx + 1)?, field, &self.fallbacks);
                record.fields.insert(field.column.clone(), value);
            }
            records.push(record);
        }
        Ok(records)
    }

    fn query_in_chunks(&self, column: &str, values: Vec<SqlValue>) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        for chunk in values.chunks(PARAM_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = self.select_sql(&format!(
                " WHERE {} IN ({})",
                quote_ident(column),
                placeholders
            ));
            records.extend(self.query(&sql, chunk.to_vec())?);
        }
        records.sort_by(|a, b| a.pk.cmp(&b.pk));
        Ok(records)
    }
}

impl RecordStore for SqliteStore {
    fn name(&self) -> &str {
        &self.table
    }

    fn fields(&self) -> Result<Vec<FieldInfo>> {
        Ok(self.fields.clone())
    }

    fn count(&self) -> Result<usize> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(&self.table));
        let n: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(n as usize)
    }

    fn keys(&self) -> Result<Vec<Key>> {
        let key = quote_ident(&self.key_column);
        let sql = format!(
            "SELECT {key} FROM {} WHERE {key} IS NOT NULL ORDER BY {key}",
            quote_ident(&self.table)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        let mut keys = Vec::new();
        while let Some(row) = rows.next()? {
            if let Some(k) = key_from_sql(row.get_ref(0)?, &self.fallbacks) {
                keys.push(k);
            }
        }
        Ok(keys)
    }

    fn iterate(&self, filter: &RecordFilter) -> Result<Vec<Record>> {
        match filter {
            RecordFilter::All => self.query(&self.select_sql(""), Vec::new()),
            RecordFilter::KeyRange(range) => {
                let key = quote_ident(&self.key_column);
                let sql = self.select_sql(&format!(" WHERE {key} >= ?1 AND {key} <= ?2"));
                self.query(&sql, vec![key_to_sql(&range.low), key_to_sql(&range.high)])
            }
            RecordFilter::Keys(keys) => {
                let values = keys.iter().map(key_to_sql).collect();
                let column = self.key_column.clone();
                self.query_in_chunks(&column, values)
            }
            RecordFilter::FieldIn { field, values } => {
                validate_identifier(field)?;
                let values = values.iter().map(value_to_sql).collect();
                self.query_in_chunks(field, values)
            }
        }
    }

    fn count_matching(&self, filter: &RecordFilter) -> Result<usize> {
        match filter {
            RecordFilter::All => self.count(),
            RecordFilter::Keys(keys) => {
                let key = quote_ident(&self.key_column);
                let mut total = 0usize;
                for chunk in keys.chunks(PARAM_CHUNK) {
                    let sql = format!(
                        "SELECT COUNT(*) FROM {} WHERE {key} IN ({})",
                        quote_ident(&self.table),
                        vec!["?"; chunk.len()].join(", ")
                    );
                    let params: Vec<SqlValue> = chunk.iter().map(key_to_sql).collect();
                    let n: i64 =
                        self.conn
                            .query_row(&sql, params_from_iter(params), |row| row.get(0))?;
                    total += n as usize;
                }
                Ok(total)
            }
            other => Ok(self.iterate(other)?.len()),
        }
    }

    fn bulk_insert(&mut self, records: Vec<Record>) -> Result<usize> {
        let columns: Vec<String> = self.fields.iter().map(|f| f.column.clone()).collect();
        let quoted: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        let table = quote_ident(&self.table);
        let without_key = if quoted.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", table)
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table,
                quoted.join(", "),
                vec!["?"; quoted.len()].join(", ")
            )
        };
        let mut keyed_columns = vec![quote_ident(&self.key_column)];
        keyed_columns.extend(quoted.iter().cloned());
        let with_key = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            keyed_columns.join(", "),
            vec!["?"; keyed_columns.len()].join(", ")
        );

        let tx = self.conn.transaction()?;
        let mut written = 0usize;
        {
            let mut plain = tx.prepare_cached(&without_key)?;
            let mut keyed = tx.prepare_cached(&with_key)?;
            for record in &records {
                let mut params: Vec<SqlValue> = Vec::with_capacity(columns.len() + 1);
                if let Some(pk) = &record.pk {
                    params.push(key_to_sql(pk));
                }
                params.extend(columns.iter().map(|c| value_to_sql(record.get(c))));
                written += if record.pk.is_some() {
                    keyed.execute(params_from_iter(params))?
                } else {
                    plain.execute(params_from_iter(params))?
                };
            }
        }
        tx.commit()?;
        Ok(written)
    }

    fn delete(&mut self, keys: &[Key]) -> Result<usize> {
        let mut removed = 0usize;
        for chunk in keys.chunks(PARAM_CHUNK) {
            let sql = format!(
                "DELETE FROM {} WHERE {} IN ({})",
                quote_ident(&self.table),
                quote_ident(&self.key_column),
                vec!["?"; chunk.len()].join(", ")
            );
            let params: Vec<SqlValue> = chunk.iter().map(key_to_sql).collect();
            removed += self.conn.execute(&sql, params_from_iter(params))?;
        }
        Ok(removed)
    }

    fn clear(&mut self) -> Result<usize> {
        let sql = format!("DELETE FROM {}", quote_ident(&self.table));
        Ok(self.conn.execute(&sql, [])?)
    }
}

fn introspect(conn: &Connection, table: &str) -> Result<(String, Vec<FieldInfo>)> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let columns = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>("name")?,
                row.get::<_, Option<String>>("type")?.unwrap_or_default(),
                row.get::<_, i64>("notnull")? != 0,
                row.get::<_, i64>("pk")?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if columns.is_empty() {
        return Err(EtlError::InvalidArgument(format!(
            "table '{}' does not exist",
            table
        )));
    }

    let mut fk_stmt = conn.prepare(&format!("PRAGMA foreign_key_list({})", quote_ident(table)))?;
    let foreign_keys = fk_stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>("from")?,
                row.get::<_, String>("table")?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut key_column = None;
    let mut fields = Vec::new();
    for (name, decl, not_null, pk) in columns {
        if pk == 1 && key_column.is_none() {
            key_column = Some(name);
            continue;
        }
        let mut field = FieldInfo::new(&name, field_type_from_decl(&decl));
        field.max_length = max_length_from_decl(&decl);
        field.nullable = !not_null;
        if let Some((_, target)) = foreign_keys.iter().find(|(from, _)| *from == name) {
            field.name = name.strip_suffix("_id").unwrap_or(&name).to_string();
            field.related_to = Some(target.clone());
        }
        fields.push(field);
    }

    Ok((key_column.unwrap_or_else(|| "rowid".to_string()), fields))
}

fn field_type_from_decl(decl: &str) -> FieldType {
    let upper = decl.to_ascii_uppercase();
    if upper.contains("BOOL") {
        FieldType::Boolean
    } else if upper.contains("INT") {
        FieldType::Integer
    } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
        FieldType::Real
    } else if upper.contains("JSON") {
        FieldType::Json
    } else {
        FieldType::Text
    }
}

fn max_length_from_decl(decl: &str) -> Option<usize> {
    let open = decl.find('(')?;
    let close = decl[open..].find(')')? + open;
    decl[open + 1..close].trim().parse().ok()
}

fn declared_type(field: &FieldInfo) -> String {
    match (field.field_type, field.max_length) {
        (FieldType::Text, Some(n)) => format!("VARCHAR({})", n),
        (FieldType::Text, None) => "TEXT".to_string(),
        (FieldType::Integer, _) => "INTEGER".to_string(),
        (FieldType::Real, _) => "REAL".to_string(),
        (FieldType::Boolean, _) => "BOOLEAN".to_string(),
        (FieldType::Json, _) => "JSON".to_string(),
    }
}

fn key_to_sql(key: &Key) -> SqlValue {
    match key {
        Key::Int(i) => SqlValue::Integer(*i),
        Key::Text(s) => SqlValue::Text(s.clone()),
    }
}

fn key_from_sql(value: ValueRef<'_>, fallbacks: &[&'static Encoding]) -> Option<Key> {
    match value {
        ValueRef::Integer(i) => Some(Key::Int(i)),
        ValueRef::Text(bytes) => Some(Key::Text(decode_best_effort(bytes, fallbacks))),
        ValueRef::Real(f) if f.fract() == 0.0 => Some(Key::Int(f as i64)),
        _ => None,
    }
}

pub(crate) fn value_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn value_from_sql(value: ValueRef<'_>, field: &FieldInfo, fallbacks: &[&'static Encoding]) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) if field.field_type == FieldType::Boolean => Value::Bool(i != 0),
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            let text = decode_best_effort(bytes, fallbacks);
            if field.field_type == FieldType::Json {
                serde_json::from_str(&text).unwrap_or(Value::String(text))
            } else {
                Value::String(text)
            }
        }
    }
}
