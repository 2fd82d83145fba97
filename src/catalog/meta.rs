//! Table metadata and the line-oriented `.meta` text format.
//!
//! The file is whitespace-tokenized and must round-trip faithfully:
//!
//! ```text
//! TABLE <name>
//! COLUMNS <n>
//! <col> (INT | FLOAT | VARCHAR <cap>) <not_null> <has_default> [NULL|INT v|FLOAT v|STRING v]
//! PRIMARY_KEY <k> <col>...
//! FOREIGN_KEYS <n>
//! <name|-> <k> <col>... <ref_table> <m> <ref_col>...
//! INDEXES <k> <col>...
//! EXPLICIT_INDEXES <n>
//! <name> <k> <col>... <is_explicit> <is_unique>
//! PRIMARY_KEY_COLS <k> <col>...
//! RECORD_COUNT <n>
//! NEXT_RECORD_ID <n>
//! ```
//!
//! `PRIMARY_KEY_COLS` may be absent in older files; it then mirrors
//! `PRIMARY_KEY`.

use std::fmt::Write as _;

use super::error::{CatalogError, CatalogResult};
use crate::record::{ColumnDef, DataType, TableSchema, Value};

#[derive(Debug, Clone)]
pub struct ColumnMeta {
    pub name: String,
    pub data_type: DataType,
    pub not_null: bool,
    pub default_value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKeyMeta {
    /// Empty when the constraint is unnamed; written as `-`.
    pub name: String,
    pub columns: Vec<String>,
    pub ref_table: String,
    pub ref_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExplicitIndexMeta {
    pub name: String,
    pub columns: Vec<String>,
    pub is_explicit: bool,
    pub is_unique: bool,
}

#[derive(Debug, Clone)]
pub struct TableMeta {
    pub name: String,
    pub columns: Vec<ColumnMeta>,
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKeyMeta>,
    /// Columns backed by a `<table>_<column>.idx` file.
    pub indexes: Vec<String>,
    pub explicit_indexes: Vec<ExplicitIndexMeta>,
    pub record_count: i64,
    pub next_record_id: i32,
}

impl TableMeta {
    pub fn new(name: String, columns: Vec<ColumnMeta>) -> Self {
        Self {
            name,
            columns,
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
            explicit_indexes: Vec::new(),
            record_count: 0,
            next_record_id: 1,
        }
    }

    pub fn find_column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn has_index(&self, column: &str) -> bool {
        self.indexes.iter().any(|c| c == column)
    }

    /// The single primary-key column, when the key has exactly one.
    pub fn single_pk_column(&self) -> Option<&str> {
        match self.primary_key.as_slice() {
            [col] => Some(col.as_str()),
            _ => None,
        }
    }

    pub fn to_schema(&self) -> TableSchema {
        let columns = self
            .columns
            .iter()
            .map(|col| {
                ColumnDef::new(
                    col.name.clone(),
                    col.data_type.clone(),
                    col.not_null,
                    col.default_value.clone().unwrap_or(Value::Null),
                )
            })
            .collect();
        TableSchema::new(self.name.clone(), columns)
    }

    pub fn emit(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "TABLE {}", self.name);
        let _ = writeln!(out, "COLUMNS {}", self.columns.len());
        for col in &self.columns {
            let _ = write!(out, "{} ", col.name);
            match &col.data_type {
                DataType::Int => {
                    let _ = write!(out, "INT");
                }
                DataType::Float => {
                    let _ = write!(out, "FLOAT");
                }
                DataType::Varchar(n) => {
                    let _ = write!(out, "VARCHAR {}", n);
                }
            }
            let _ = write!(
                out,
                " {} {}",
                col.not_null as u32,
                col.default_value.is_some() as u32
            );
            if let Some(default) = &col.default_value {
                match default {
                    Value::Null => {
                        let _ = write!(out, " NULL");
                    }
                    Value::Int(v) => {
                        let _ = write!(out, " INT {}", v);
                    }
                    Value::Float(v) => {
                        let _ = write!(out, " FLOAT {}", v);
                    }
                    Value::String(s) => {
                        let _ = write!(out, " STRING {}", s);
                    }
                }
            }
            out.push('\n');
        }

        let _ = write!(out, "PRIMARY_KEY {}", self.primary_key.len());
        for col in &self.primary_key {
            let _ = write!(out, " {}", col);
        }
        out.push('\n');

        let _ = writeln!(out, "FOREIGN_KEYS {}", self.foreign_keys.len());
        for fk in &self.foreign_keys {
            let name = if fk.name.is_empty() { "-" } else { &fk.name };
            let _ = write!(out, "{} {}", name, fk.columns.len());
            for col in &fk.columns {
                let _ = write!(out, " {}", col);
            }
            let _ = write!(out, " {} {}", fk.ref_table, fk.ref_columns.len());
            for col in &fk.ref_columns {
                let _ = write!(out, " {}", col);
            }
            out.push('\n');
        }

        let _ = write!(out, "INDEXES {}", self.indexes.len());
        for col in &self.indexes {
            let _ = write!(out, " {}", col);
        }
        out.push('\n');

        let _ = writeln!(out, "EXPLICIT_INDEXES {}", self.explicit_indexes.len());
        for idx in &self.explicit_indexes {
            let _ = write!(out, "{} {}", idx.name, idx.columns.len());
            for col in &idx.columns {
                let _ = write!(out, " {}", col);
            }
            let _ = writeln!(out, " {} {}", idx.is_explicit as u32, idx.is_unique as u32);
        }

        let _ = write!(out, "PRIMARY_KEY_COLS {}", self.primary_key.len());
        for col in &self.primary_key {
            let _ = write!(out, " {}", col);
        }
        out.push('\n');

        let _ = writeln!(out, "RECORD_COUNT {}", self.record_count);
        let _ = writeln!(out, "NEXT_RECORD_ID {}", self.next_record_id);
        out
    }

    pub fn parse(text: &str) -> CatalogResult<TableMeta> {
        let mut tokens = Tokens::new(text);
        let mut meta = TableMeta::new(String::new(), Vec::new());
        let mut saw_pk_cols = false;
        let mut legacy_pk: Vec<String> = Vec::new();

        while let Some(section) = tokens.next_opt() {
            match section {
                "TABLE" => {
                    meta.name = tokens.next()?.to_string();
                }
                "COLUMNS" => {
                    let count = tokens.next_usize()?;
                    for _ in 0..count {
                        meta.columns.push(Self::parse_column(&mut tokens)?);
                    }
                }
                "PRIMARY_KEY" => {
                    let count = tokens.next_usize()?;
                    legacy_pk = tokens.next_names(count)?;
                }
                "FOREIGN_KEYS" => {
                    let count = tokens.next_usize()?;
                    for _ in 0..count {
                        let raw_name = tokens.next()?.to_string();
                        let name = if raw_name == "-" { String::new() } else { raw_name };
                        let k = tokens.next_usize()?;
                        let columns = tokens.next_names(k)?;
                        let ref_table = tokens.next()?.to_string();
                        let m = tokens.next_usize()?;
                        let ref_columns = tokens.next_names(m)?;
                        meta.foreign_keys.push(ForeignKeyMeta {
                            name,
                            columns,
                            ref_table,
                            ref_columns,
                        });
                    }
                }
                "INDEXES" => {
                    let count = tokens.next_usize()?;
                    meta.indexes = tokens.next_names(count)?;
                }
                "EXPLICIT_INDEXES" => {
                    let count = tokens.next_usize()?;
                    for _ in 0..count {
                        let name = tokens.next()?.to_string();
                        let k = tokens.next_usize()?;
                        let columns = tokens.next_names(k)?;
                        let is_explicit = tokens.next_flag()?;
                        let is_unique = tokens.next_flag()?;
                        meta.explicit_indexes.push(ExplicitIndexMeta {
                            name,
                            columns,
                            is_explicit,
                            is_unique,
                        });
                    }
                }
                "PRIMARY_KEY_COLS" => {
                    let count = tokens.next_usize()?;
                    meta.primary_key = tokens.next_names(count)?;
                    saw_pk_cols = true;
                }
                "RECORD_COUNT" => {
                    meta.record_count = tokens.next_i64()?;
                }
                "NEXT_RECORD_ID" => {
                    meta.next_record_id = tokens.next_i64()? as i32;
                }
                other => {
                    return Err(CatalogError::MetaParse(format!(
                        "unknown section {:?}",
                        other
                    )));
                }
            }
        }

        if meta.name.is_empty() {
            return Err(CatalogError::MetaParse("missing TABLE line".to_string()));
        }
        if !saw_pk_cols {
            meta.primary_key = legacy_pk;
        } else if meta.primary_key.is_empty() {
            meta.primary_key = legacy_pk;
        }

        Ok(meta)
    }

    fn parse_column(tokens: &mut Tokens) -> CatalogResult<ColumnMeta> {
        let name = tokens.next()?.to_string();
        let data_type = match tokens.next()? {
            "INT" => DataType::Int,
            "FLOAT" => DataType::Float,
            "VARCHAR" => DataType::Varchar(tokens.next_usize()?),
            other => {
                return Err(CatalogError::MetaParse(format!(
                    "unknown column type {:?}",
                    other
                )));
            }
        };
        let not_null = tokens.next_flag()?;
        let has_default = tokens.next_flag()?;
        let default_value = if has_default {
            Some(match tokens.next()? {
                "NULL" => Value::Null,
                "INT" => Value::Int(tokens.next_i64()? as i32),
                "FLOAT" => Value::Float(tokens.next_f64()?),
                "STRING" => Value::String(tokens.next()?.to_string()),
                other => {
                    return Err(CatalogError::MetaParse(format!(
                        "unknown default tag {:?}",
                        other
                    )));
                }
            })
        } else {
            None
        };

        Ok(ColumnMeta {
            name,
            data_type,
            not_null,
            default_value,
        })
    }
}

/// Whitespace tokenizer matching the original stream-extraction reader.
struct Tokens<'a> {
    inner: std::str::SplitWhitespace<'a>,
}

impl<'a> Tokens<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            inner: text.split_whitespace(),
        }
    }

    fn next_opt(&mut self) -> Option<&'a str> {
        self.inner.next()
    }

    fn next(&mut self) -> CatalogResult<&'a str> {
        self.inner
            .next()
            .ok_or_else(|| CatalogError::MetaParse("unexpected end of file".to_string()))
    }

    fn next_usize(&mut self) -> CatalogResult<usize> {
        let token = self.next()?;
        token
            .parse()
            .map_err(|_| CatalogError::MetaParse(format!("expected count, got {:?}", token)))
    }

    fn next_i64(&mut self) -> CatalogResult<i64> {
        let token = self.next()?;
        token
            .parse()
            .map_err(|_| CatalogError::MetaParse(format!("expected integer, got {:?}", token)))
    }

    fn next_f64(&mut self) -> CatalogResult<f64> {
        let token = self.next()?;
        token
            .parse()
            .map_err(|_| CatalogError::MetaParse(format!("expected float, got {:?}", token)))
    }

    fn next_flag(&mut self) -> CatalogResult<bool> {
        Ok(self.next_usize()? != 0)
    }

    fn next_names(&mut self, count: usize) -> CatalogResult<Vec<String>> {
        let mut names = Vec::with_capacity(count);
        for _ in 0..count {
            names.push(self.next()?.to_string());
        }
        Ok(names)
    }
}
