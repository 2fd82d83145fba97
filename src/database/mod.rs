use csv::ReaderBuilder;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::catalog::{
    Catalog, CatalogError, ColumnMeta, ExplicitIndexMeta, ForeignKeyMeta, TableMeta,
};
use crate::file::{BufferManager, PagedFileManager};
use crate::index::{IndexError, IndexKey, IndexRegistry, KeyKind};
use crate::record::{
    ColumnDef, DataType, RecordError, RecordId, RecordManager, TableSchema, Value, decode_row,
    encode_row, truncate_to_capacity,
};
use crate::sql::{
    ColumnRef, ColumnType, CompareOp, Condition, Literal, Operand, SelectItem, SelectItems,
    SelectQuery, Statement, TableElement,
};

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("No database selected")]
    NoDatabaseSelected,

    #[error("Database {0} already exists")]
    DatabaseExists(String),

    #[error("Database {0} not found")]
    DatabaseNotFound(String),

    #[error("Table {0} already exists")]
    TableExists(String),

    #[error("Table {0} not found")]
    TableNotFound(String),

    #[error("Column {0} not found in table {1}")]
    ColumnNotFound(String, String),

    #[error("Duplicate column {0}")]
    DuplicateColumn(String),

    #[error("Index {0} already exists")]
    IndexExists(String),

    #[error("Index {0} not found")]
    IndexNotFound(String),

    #[error("Foreign key {0} already exists")]
    ForeignKeyExists(String),

    #[error("Foreign key {0} not found")]
    ForeignKeyNotFound(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Cannot read/write file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("File error: {0}")]
    File(#[from] crate::file::FileError),
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Uniform result of one executed statement, consumed by the front end.
#[derive(Debug)]
pub enum QueryResult {
    Empty,
    RowsAffected(usize),
    ResultSet(Vec<String>, Vec<Vec<String>>),
    TableDescription(TableMeta),
}

/// WHERE conjunct with the LIKE pattern compiled once per statement.
enum PreparedCondition {
    Compare(ColumnRef, CompareOp, Operand),
    IsNull(ColumnRef),
    IsNotNull(ColumnRef),
    Like(ColumnRef, Regex),
    In(ColumnRef, Vec<Literal>),
}

/// WHERE conjunct resolved to flat column positions of a joined tuple.
enum FlatCondition {
    Compare(usize, CompareOp, FlatOperand),
    IsNull(usize),
    IsNotNull(usize),
    Like(usize, Regex),
    In(usize, Vec<Literal>),
}

enum FlatOperand {
    Literal(Value),
    Column(usize),
}

#[derive(Debug, Clone, Copy)]
enum NumericType {
    Int,
    Float,
}

#[derive(Debug, Clone)]
enum AggSpec {
    CountAll,
    Count { col: usize },
    Sum { col: usize, numeric: NumericType },
    Avg { col: usize },
    Min { col: usize },
    Max { col: usize },
}

#[derive(Debug, Clone)]
enum AggState {
    Count(i64),
    SumInt { sum: i64, has_value: bool },
    SumFloat { sum: f64, has_value: bool },
    Avg { sum: f64, count: i64 },
    Min(Option<Value>),
    Max(Option<Value>),
}

#[derive(Debug, Clone, Copy)]
enum OutputSelector {
    GroupKey,
    Agg(usize),
}

/// Projection plan for an aggregate SELECT.
struct AggPlan {
    headers: Vec<String>,
    outputs: Vec<OutputSelector>,
    specs: Vec<AggSpec>,
    group_col: Option<usize>,
}

/// Merged bounds over the primary-key column, collected from the WHERE
/// conjuncts that an index probe can serve.
struct ProbeBounds {
    lower: Option<(IndexKey, bool)>,
    upper: Option<(IndexKey, bool)>,
}

pub struct DatabaseManager {
    catalog: Catalog,
    buffer_manager: Arc<Mutex<BufferManager>>,
    record_manager: RecordManager,
    index_registry: IndexRegistry,
}

/// Render one value the way results print it: floats with two decimals,
/// nulls as the literal `NULL`.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => format!("{:.2}", f),
        Value::String(s) => s.clone(),
    }
}

/// A literal as a plain value; integers that overflow i32 become floats so
/// comparisons still see their magnitude.
fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Null => Value::Null,
        Literal::Integer(i) => match i32::try_from(*i) {
            Ok(v) => Value::Int(v),
            Err(_) => Value::Float(*i as f64),
        },
        Literal::Float(f) => Value::Float(*f),
        Literal::String(s) => Value::String(s.clone()),
    }
}

/// Comparison-operator evaluation. Null on either side is false; INT and
/// FLOAT promote to double; mismatched types never compare equal.
fn compare_values(left: &Value, op: CompareOp, right: &Value) -> bool {
    if left.is_null() || right.is_null() {
        return false;
    }

    let float_cmp = |l: f64, r: f64| {
        if l < r {
            Ordering::Less
        } else if l > r {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    };

    let cmp = match (left, right) {
        (Value::Int(l), Value::Int(r)) => l.cmp(r),
        (Value::Float(l), Value::Float(r)) => float_cmp(*l, *r),
        (Value::Int(l), Value::Float(r)) => float_cmp(*l as f64, *r),
        (Value::Float(l), Value::Int(r)) => float_cmp(*l, *r as f64),
        (Value::String(l), Value::String(r)) => l.cmp(r),
        _ => return false,
    };

    match op {
        CompareOp::Eq => cmp == Ordering::Equal,
        CompareOp::Ne => cmp != Ordering::Equal,
        CompareOp::Lt => cmp == Ordering::Less,
        CompareOp::Le => cmp != Ordering::Greater,
        CompareOp::Gt => cmp == Ordering::Greater,
        CompareOp::Ge => cmp != Ordering::Less,
    }
}

/// Ordering for ORDER BY and MIN/MAX: null sorts below every non-null.
fn compare_order_values(left: &Value, right: &Value) -> DatabaseResult<Ordering> {
    match (left, right) {
        (Value::Null, Value::Null) => Ok(Ordering::Equal),
        (Value::Null, _) => Ok(Ordering::Less),
        (_, Value::Null) => Ok(Ordering::Greater),
        (Value::Int(l), Value::Int(r)) => Ok(l.cmp(r)),
        (Value::Float(l), Value::Float(r)) => Ok(l.total_cmp(r)),
        (Value::Int(l), Value::Float(r)) => Ok((*l as f64).total_cmp(r)),
        (Value::Float(l), Value::Int(r)) => Ok(l.total_cmp(&(*r as f64))),
        (Value::String(l), Value::String(r)) => Ok(l.cmp(r)),
        _ => Err(DatabaseError::SchemaMismatch(
            "ordering comparison across mismatched types".to_string(),
        )),
    }
}

fn like_pattern_to_regex(pattern: &str) -> String {
    let mut regex = String::with_capacity(pattern.len() * 2 + 6);
    regex.push_str("(?i)^");
    for ch in pattern.chars() {
        match ch {
            '%' => regex.push_str(".*"),
            '_' => regex.push('.'),
            '.' | '+' | '*' | '?' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$'
            | '\\' => {
                regex.push('\\');
                regex.push(ch);
            }
            _ => regex.push(ch),
        }
    }
    regex.push('$');
    regex
}

fn init_agg_states(specs: &[AggSpec]) -> Vec<AggState> {
    specs
        .iter()
        .map(|spec| match spec {
            AggSpec::CountAll | AggSpec::Count { .. } => AggState::Count(0),
            AggSpec::Sum {
                numeric: NumericType::Int,
                ..
            } => AggState::SumInt {
                sum: 0,
                has_value: false,
            },
            AggSpec::Sum {
                numeric: NumericType::Float,
                ..
            } => AggState::SumFloat {
                sum: 0.0,
                has_value: false,
            },
            AggSpec::Avg { .. } => AggState::Avg { sum: 0.0, count: 0 },
            AggSpec::Min { .. } => AggState::Min(None),
            AggSpec::Max { .. } => AggState::Max(None),
        })
        .collect()
}

fn update_agg_states(
    states: &mut [AggState],
    specs: &[AggSpec],
    row: &[Value],
) -> DatabaseResult<()> {
    for (state, spec) in states.iter_mut().zip(specs.iter()) {
        update_agg_state(state, spec, row)?;
    }
    Ok(())
}

fn update_agg_state(state: &mut AggState, spec: &AggSpec, row: &[Value]) -> DatabaseResult<()> {
    match spec {
        AggSpec::CountAll => {
            if let AggState::Count(count) = state {
                *count += 1;
            }
        }
        AggSpec::Count { col } => {
            if !row[*col].is_null()
                && let AggState::Count(count) = state
            {
                *count += 1;
            }
        }
        AggSpec::Sum { col, numeric } => match (numeric, &row[*col], state) {
            (NumericType::Int, Value::Int(v), AggState::SumInt { sum, has_value }) => {
                *sum += *v as i64;
                *has_value = true;
            }
            (NumericType::Float, Value::Float(v), AggState::SumFloat { sum, has_value }) => {
                *sum += *v;
                *has_value = true;
            }
            (NumericType::Float, Value::Int(v), AggState::SumFloat { sum, has_value }) => {
                *sum += *v as f64;
                *has_value = true;
            }
            (_, Value::Null, _) => {}
            _ => {
                return Err(DatabaseError::SchemaMismatch(
                    "SUM requires a numeric column".to_string(),
                ));
            }
        },
        AggSpec::Avg { col } => {
            if let AggState::Avg { sum, count } = state {
                match &row[*col] {
                    Value::Int(v) => {
                        *sum += *v as f64;
                        *count += 1;
                    }
                    Value::Float(v) => {
                        *sum += *v;
                        *count += 1;
                    }
                    Value::Null => {}
                    _ => {
                        return Err(DatabaseError::SchemaMismatch(
                            "AVG requires a numeric column".to_string(),
                        ));
                    }
                }
            }
        }
        AggSpec::Min { col } => {
            let value = &row[*col];
            if value.is_null() {
                return Ok(());
            }
            if let AggState::Min(current) = state {
                let replace = match current {
                    None => true,
                    Some(existing) => compare_order_values(value, existing)? == Ordering::Less,
                };
                if replace {
                    *current = Some(value.clone());
                }
            }
        }
        AggSpec::Max { col } => {
            let value = &row[*col];
            if value.is_null() {
                return Ok(());
            }
            if let AggState::Max(current) = state {
                let replace = match current {
                    None => true,
                    Some(existing) => compare_order_values(value, existing)? == Ordering::Greater,
                };
                if replace {
                    *current = Some(value.clone());
                }
            }
        }
    }
    Ok(())
}

fn format_aggregate_value(state: &AggState) -> String {
    match state {
        AggState::Count(count) => count.to_string(),
        AggState::SumInt { sum, has_value } => {
            if *has_value {
                sum.to_string()
            } else {
                "NULL".to_string()
            }
        }
        AggState::SumFloat { sum, has_value } => {
            if *has_value {
                format!("{:.2}", sum)
            } else {
                "NULL".to_string()
            }
        }
        AggState::Avg { sum, count } => {
            if *count > 0 {
                format!("{:.2}", sum / *count as f64)
            } else {
                "NULL".to_string()
            }
        }
        AggState::Min(value) | AggState::Max(value) => value
            .as_ref()
            .map_or_else(|| "NULL".to_string(), format_value),
    }
}

fn format_column_name(column: &ColumnRef) -> String {
    match &column.table {
        Some(table) => format!("{}.{}", table, column.column),
        None => column.column.clone(),
    }
}

/// Lift catalog errors into their user-visible database-level kinds.
fn map_catalog_error(err: CatalogError) -> DatabaseError {
    match err {
        CatalogError::NoDatabaseSelected => DatabaseError::NoDatabaseSelected,
        CatalogError::DatabaseExists(name) => DatabaseError::DatabaseExists(name),
        CatalogError::DatabaseNotFound(name) => DatabaseError::DatabaseNotFound(name),
        CatalogError::TableExists(name) => DatabaseError::TableExists(name),
        CatalogError::TableNotFound(name) => DatabaseError::TableNotFound(name),
        other => DatabaseError::Catalog(other),
    }
}

impl DatabaseManager {
    pub fn new(data_dir: &str) -> DatabaseResult<Self> {
        let catalog = Catalog::new(data_dir)?;
        let buffer_manager = Arc::new(Mutex::new(BufferManager::new(PagedFileManager::new())));
        let record_manager = RecordManager::new(buffer_manager.clone());
        let index_registry = IndexRegistry::new(buffer_manager.clone());

        Ok(Self {
            catalog,
            buffer_manager,
            record_manager,
            index_registry,
        })
    }

    /// Persist all dirty state: metadata and buffered pages.
    pub fn flush(&mut self) -> DatabaseResult<()> {
        self.catalog.save_all()?;
        let mut buffer_manager = self.lock_buffers();
        buffer_manager.flush_all()?;
        Ok(())
    }

    pub fn current_database(&self) -> Option<&str> {
        self.catalog.current_database()
    }

    fn lock_buffers(&self) -> std::sync::MutexGuard<'_, BufferManager> {
        match self.buffer_manager.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn db_path(&self) -> DatabaseResult<String> {
        Ok(self
            .catalog
            .current_database_path()?
            .to_string_lossy()
            .to_string())
    }

    fn table_meta(&self, table: &str) -> DatabaseResult<TableMeta> {
        match self.catalog.table(table) {
            Ok(meta) => Ok(meta.clone()),
            Err(err) => Err(map_catalog_error(err)),
        }
    }

    fn open_table(&mut self, table: &str) -> DatabaseResult<()> {
        let path = self.catalog.table_data_path(table)?;
        self.record_manager
            .open_table(table, &path.to_string_lossy())?;
        Ok(())
    }

    // ===== statement dispatch =====

    pub fn execute(&mut self, statement: Statement) -> DatabaseResult<QueryResult> {
        match statement {
            Statement::CreateDatabase(name) => {
                self.catalog.create_database(&name).map_err(map_catalog_error)?;
                Ok(QueryResult::Empty)
            }
            Statement::DropDatabase(name) => {
                self.drop_database(&name)?;
                Ok(QueryResult::Empty)
            }
            Statement::ShowDatabases => {
                let rows = self
                    .catalog
                    .list_databases()
                    .map_err(map_catalog_error)?
                    .into_iter()
                    .map(|db| vec![db])
                    .collect();
                Ok(QueryResult::ResultSet(vec!["DATABASES".to_string()], rows))
            }
            Statement::UseDatabase(name) => {
                self.use_database(&name)?;
                Ok(QueryResult::Empty)
            }
            Statement::ShowTables => {
                let rows = self
                    .catalog
                    .list_tables()
                    .map_err(map_catalog_error)?
                    .into_iter()
                    .map(|t| vec![t])
                    .collect();
                Ok(QueryResult::ResultSet(vec!["TABLES".to_string()], rows))
            }
            Statement::ShowIndexes => {
                let mut rows = Vec::new();
                for table in self.catalog.list_tables().map_err(map_catalog_error)? {
                    let meta = self.catalog.table(&table).map_err(map_catalog_error)?;
                    for column in &meta.indexes {
                        rows.push(vec![table.clone(), column.clone()]);
                    }
                }
                Ok(QueryResult::ResultSet(
                    vec!["TABLE".to_string(), "COLUMN".to_string()],
                    rows,
                ))
            }
            Statement::CreateTable(name, elements) => {
                self.create_table(&name, elements)?;
                Ok(QueryResult::Empty)
            }
            Statement::DropTable(name) => {
                self.drop_table(&name)?;
                Ok(QueryResult::Empty)
            }
            Statement::Describe(name) => Ok(QueryResult::TableDescription(self.table_meta(&name)?)),
            Statement::Insert(table, rows) => {
                let count = self.insert(&table, rows)?;
                Ok(QueryResult::RowsAffected(count))
            }
            Statement::Delete(table, conditions) => {
                let count = self.delete(&table, &conditions)?;
                Ok(QueryResult::RowsAffected(count))
            }
            Statement::Update(table, updates, conditions) => {
                let count = self.update(&table, updates, &conditions)?;
                Ok(QueryResult::RowsAffected(count))
            }
            Statement::Select(query) => {
                let (headers, rows) = self.select(query)?;
                Ok(QueryResult::ResultSet(headers, rows))
            }
            Statement::LoadData(path, table, delimiter) => {
                let count = self.load_data(&path, &table, delimiter)?;
                Ok(QueryResult::RowsAffected(count))
            }
            Statement::AddIndex(table, index_name, columns) => {
                self.add_index(&table, index_name, columns, false)?;
                Ok(QueryResult::Empty)
            }
            Statement::AddUnique(table, index_name, columns) => {
                self.add_index(&table, index_name, columns, true)?;
                Ok(QueryResult::Empty)
            }
            Statement::DropIndex(table, index_name) => {
                self.drop_explicit_index(&table, &index_name)?;
                Ok(QueryResult::Empty)
            }
            Statement::AddPrimaryKey(table, columns) => {
                self.add_primary_key(&table, columns)?;
                Ok(QueryResult::Empty)
            }
            Statement::DropPrimaryKey(table) => {
                self.drop_primary_key(&table)?;
                Ok(QueryResult::Empty)
            }
            Statement::AddForeignKey(table, name, columns, ref_table, ref_columns) => {
                self.add_foreign_key(&table, name, columns, ref_table, ref_columns)?;
                Ok(QueryResult::Empty)
            }
            Statement::DropForeignKey(table, name) => {
                self.drop_foreign_key(&table, &name)?;
                Ok(QueryResult::Empty)
            }
        }
    }

    // ===== database lifecycle =====

    /// Switch databases: everything belonging to the old one is flushed and
    /// closed first.
    pub fn use_database(&mut self, name: &str) -> DatabaseResult<()> {
        if self.catalog.current_database().is_some() {
            self.close_current_database()?;
        }
        self.catalog.use_database(name).map_err(map_catalog_error)?;
        Ok(())
    }

    pub fn drop_database(&mut self, name: &str) -> DatabaseResult<()> {
        if self.catalog.current_database() == Some(name) {
            self.record_manager.close_all();
            self.index_registry.close_all();
            let mut buffer_manager = self.lock_buffers();
            buffer_manager.flush_and_clear()?;
        }
        self.catalog.drop_database(name).map_err(map_catalog_error)?;
        Ok(())
    }

    fn close_current_database(&mut self) -> DatabaseResult<()> {
        self.catalog.save_all()?;
        self.record_manager.close_all();
        self.index_registry.close_all();
        let mut buffer_manager = self.lock_buffers();
        buffer_manager.flush_all()?;
        drop(buffer_manager);
        self.catalog.close_current();
        Ok(())
    }

    // ===== DDL =====

    pub fn create_table(&mut self, name: &str, elements: Vec<TableElement>) -> DatabaseResult<()> {
        if self.catalog.current_database().is_none() {
            return Err(DatabaseError::NoDatabaseSelected);
        }
        if self.catalog.has_table(name) {
            return Err(DatabaseError::TableExists(name.to_string()));
        }

        let mut columns: Vec<ColumnMeta> = Vec::new();
        let mut primary_key: Vec<String> = Vec::new();
        let mut foreign_keys: Vec<ForeignKeyMeta> = Vec::new();

        for element in elements {
            match element {
                TableElement::Column(decl) => {
                    if columns.iter().any(|c| c.name == decl.name) {
                        return Err(DatabaseError::DuplicateColumn(decl.name));
                    }
                    let data_type = match decl.column_type {
                        ColumnType::Int => DataType::Int,
                        ColumnType::Float => DataType::Float,
                        ColumnType::Varchar(n) => DataType::Varchar(n),
                    };
                    let default_value = match decl.default_value {
                        Some(literal) => Some(self.literal_to_value(&literal, &data_type)?),
                        None => None,
                    };
                    columns.push(ColumnMeta {
                        name: decl.name,
                        data_type,
                        not_null: decl.not_null,
                        default_value,
                    });
                }
                TableElement::PrimaryKey(cols) => {
                    if !primary_key.is_empty() {
                        return Err(DatabaseError::SchemaMismatch(
                            "multiple primary key clauses".to_string(),
                        ));
                    }
                    primary_key = cols;
                }
                TableElement::ForeignKey {
                    name: fk_name,
                    columns: fk_cols,
                    ref_table,
                    ref_columns,
                } => {
                    foreign_keys.push(ForeignKeyMeta {
                        name: fk_name.unwrap_or_default(),
                        columns: fk_cols,
                        ref_table,
                        ref_columns,
                    });
                }
            }
        }

        // Primary-key columns are implicitly NOT NULL
        for pk_col in &primary_key {
            match columns.iter_mut().find(|c| &c.name == pk_col) {
                Some(col) => col.not_null = true,
                None => {
                    return Err(DatabaseError::ColumnNotFound(
                        pk_col.clone(),
                        name.to_string(),
                    ));
                }
            }
        }

        let mut meta = TableMeta::new(name.to_string(), columns);
        meta.primary_key = primary_key;

        for fk in &foreign_keys {
            self.validate_foreign_key_shape(&meta, fk)?;
        }
        meta.foreign_keys = foreign_keys;

        let data_path = self
            .catalog
            .current_database_path()?
            .join(format!("{}.dat", name));
        self.record_manager
            .create_table(name, &data_path.to_string_lossy())?;

        if let Some(pk_col) = meta.single_pk_column().map(str::to_string) {
            let col_idx = meta.find_column(&pk_col).ok_or_else(|| {
                DatabaseError::ColumnNotFound(pk_col.clone(), name.to_string())
            })?;
            let (kind, key_len) = KeyKind::from_data_type(&meta.columns[col_idx].data_type);
            let db_path = self.db_path()?;
            self.index_registry
                .create_index(&db_path, name, &pk_col, kind, key_len)?;
            meta.indexes.push(pk_col);
        }

        self.catalog.create_table(meta)?;
        Ok(())
    }

    pub fn drop_table(&mut self, name: &str) -> DatabaseResult<()> {
        let meta = self.table_meta(name)?;
        let db_path = self.db_path()?;

        self.record_manager.close_table(name);
        for column in &meta.indexes {
            match self.index_registry.drop_index(&db_path, name, column) {
                Ok(()) | Err(IndexError::IndexNotFound(_)) => {}
                Err(err) => return Err(err.into()),
            }
        }

        let data_path = self.catalog.table_data_path(name)?;
        self.catalog.drop_table(name)?;
        if data_path.exists() {
            let mut buffer_manager = self.lock_buffers();
            buffer_manager.discard_and_remove(&data_path)?;
        }
        Ok(())
    }

    // ===== value coercion =====

    /// Coerce a literal into a column's type. Integer literals promote into
    /// FLOAT columns; any other cross-type assignment fails; VARCHAR values
    /// are truncated to capacity.
    fn literal_to_value(&self, literal: &Literal, data_type: &DataType) -> DatabaseResult<Value> {
        match (literal, data_type) {
            (Literal::Null, _) => Ok(Value::Null),
            (Literal::Integer(i), DataType::Int) => {
                i32::try_from(*i).map(Value::Int).map_err(|_| {
                    DatabaseError::SchemaMismatch(format!("integer {} out of range", i))
                })
            }
            (Literal::Integer(i), DataType::Float) => Ok(Value::Float(*i as f64)),
            (Literal::Float(f), DataType::Float) => Ok(Value::Float(*f)),
            (Literal::String(s), DataType::Varchar(cap)) => {
                Ok(Value::String(truncate_to_capacity(s, *cap).to_string()))
            }
            (literal, data_type) => Err(DatabaseError::SchemaMismatch(format!(
                "cannot store {:?} into a {} column",
                literal, data_type
            ))),
        }
    }

    // ===== predicates =====

    fn prepare_conditions(
        &self,
        conditions: &[Condition],
    ) -> DatabaseResult<Vec<PreparedCondition>> {
        let mut prepared = Vec::with_capacity(conditions.len());
        for condition in conditions {
            prepared.push(match condition {
                Condition::Compare(col, op, rhs) => {
                    PreparedCondition::Compare(col.clone(), *op, rhs.clone())
                }
                Condition::IsNull(col) => PreparedCondition::IsNull(col.clone()),
                Condition::IsNotNull(col) => PreparedCondition::IsNotNull(col.clone()),
                Condition::Like(col, pattern) => {
                    let regex = Regex::new(&like_pattern_to_regex(pattern)).map_err(|err| {
                        DatabaseError::SchemaMismatch(format!("invalid LIKE pattern: {}", err))
                    })?;
                    PreparedCondition::Like(col.clone(), regex)
                }
                Condition::In(col, values) => PreparedCondition::In(col.clone(), values.clone()),
            });
        }
        Ok(prepared)
    }

    fn resolve_column(&self, schema: &TableSchema, column: &ColumnRef) -> DatabaseResult<usize> {
        if let Some(table) = &column.table
            && table != schema.table_name()
        {
            return Err(DatabaseError::ColumnNotFound(
                column.column.clone(),
                table.clone(),
            ));
        }
        schema.find_column(&column.column).ok_or_else(|| {
            DatabaseError::ColumnNotFound(column.column.clone(), schema.table_name().to_string())
        })
    }

    /// Evaluate a WHERE conjunction against one row. The three-valued logic
    /// collapses to false: any null comparison fails the row.
    fn eval_conditions(
        &self,
        row: &[Value],
        schema: &TableSchema,
        conditions: &[PreparedCondition],
    ) -> DatabaseResult<bool> {
        for condition in conditions {
            match condition {
                PreparedCondition::Compare(col, op, rhs) => {
                    let left = &row[self.resolve_column(schema, col)?];
                    let right = match rhs {
                        Operand::Literal(literal) => literal_value(literal),
                        Operand::Column(other) => {
                            row[self.resolve_column(schema, other)?].clone()
                        }
                    };
                    if !compare_values(left, *op, &right) {
                        return Ok(false);
                    }
                }
                PreparedCondition::IsNull(col) => {
                    if !row[self.resolve_column(schema, col)?].is_null() {
                        return Ok(false);
                    }
                }
                PreparedCondition::IsNotNull(col) => {
                    if row[self.resolve_column(schema, col)?].is_null() {
                        return Ok(false);
                    }
                }
                PreparedCondition::Like(col, regex) => {
                    let matches = match &row[self.resolve_column(schema, col)?] {
                        Value::String(s) => regex.is_match(s),
                        _ => false,
                    };
                    if !matches {
                        return Ok(false);
                    }
                }
                PreparedCondition::In(col, literals) => {
                    let left = &row[self.resolve_column(schema, col)?];
                    let any = literals
                        .iter()
                        .any(|lit| compare_values(left, CompareOp::Eq, &literal_value(lit)));
                    if !any {
                        return Ok(false);
                    }
                }
            }
        }
        Ok(true)
    }

    // ===== access method =====

    /// When the table has a single-column primary key with an index and the
    /// WHERE clause bounds that column with `=`/`<`/`<=`/`>`/`>=` literals,
    /// answer the candidate RIDs from a point or range probe. The caller
    /// still re-evaluates the full WHERE per fetched row.
    fn pk_index_candidates(
        &mut self,
        meta: &TableMeta,
        conditions: &[Condition],
    ) -> DatabaseResult<Option<Vec<RecordId>>> {
        if conditions.is_empty() {
            return Ok(None);
        }
        let Some(pk_col) = meta.single_pk_column().map(str::to_string) else {
            return Ok(None);
        };
        if !meta.has_index(&pk_col) {
            return Ok(None);
        }
        let Some(col_idx) = meta.find_column(&pk_col) else {
            return Ok(None);
        };
        let data_type = meta.columns[col_idx].data_type.clone();
        let (kind, key_len) = KeyKind::from_data_type(&data_type);

        let mut bounds = ProbeBounds {
            lower: None,
            upper: None,
        };
        let mut bounded = false;
        for condition in conditions {
            let Condition::Compare(col, op, Operand::Literal(literal)) = condition else {
                continue;
            };
            if col.column != pk_col {
                continue;
            }
            if let Some(table) = &col.table
                && table != &meta.name
            {
                continue;
            }
            let Ok(value) = self.literal_to_value(literal, &data_type) else {
                continue;
            };
            let Some(key) = IndexKey::from_value(&value, kind, key_len) else {
                continue;
            };
            match op {
                CompareOp::Eq => {
                    Self::tighten_lower(&mut bounds, key.clone(), true);
                    Self::tighten_upper(&mut bounds, key, true);
                    bounded = true;
                }
                CompareOp::Gt => {
                    Self::tighten_lower(&mut bounds, key, false);
                    bounded = true;
                }
                CompareOp::Ge => {
                    Self::tighten_lower(&mut bounds, key, true);
                    bounded = true;
                }
                CompareOp::Lt => {
                    Self::tighten_upper(&mut bounds, key, false);
                    bounded = true;
                }
                CompareOp::Le => {
                    Self::tighten_upper(&mut bounds, key, true);
                    bounded = true;
                }
                CompareOp::Ne => {}
            }
        }

        if !bounded {
            return Ok(None);
        }

        // an impossible window needs no IO
        if let (Some((low, low_inc)), Some((high, high_inc))) = (&bounds.lower, &bounds.upper) {
            match low.compare(high) {
                Ordering::Greater => return Ok(Some(Vec::new())),
                Ordering::Equal if !(*low_inc && *high_inc) => return Ok(Some(Vec::new())),
                _ => {}
            }
        }

        self.ensure_index_open(meta, &pk_col)?;

        // equality collapses to a point lookup
        if let (Some((low, true)), Some((high, true))) = (&bounds.lower, &bounds.upper)
            && low.compare(high) == Ordering::Equal
        {
            let rid = self.index_registry.search(&meta.name, &pk_col, low)?;
            return Ok(Some(rid.into_iter().collect()));
        }

        let (lower, include_lower) = match bounds.lower {
            Some((key, inc)) => (Some(key), inc),
            None => (None, true),
        };
        let (upper, include_upper) = match bounds.upper {
            Some((key, inc)) => (Some(key), inc),
            None => (None, true),
        };
        let scan = self.index_registry.range(
            &meta.name,
            &pk_col,
            lower,
            upper,
            include_lower,
            include_upper,
        )?;
        let mut rids = Vec::new();
        for rid in scan {
            rids.push(rid?);
        }
        Ok(Some(rids))
    }

    fn tighten_lower(bounds: &mut ProbeBounds, key: IndexKey, inclusive: bool) {
        let replace = match &bounds.lower {
            None => true,
            Some((existing, existing_inc)) => match key.compare(existing) {
                Ordering::Greater => true,
                Ordering::Equal => *existing_inc && !inclusive,
                Ordering::Less => false,
            },
        };
        if replace {
            bounds.lower = Some((key, inclusive));
        }
    }

    fn tighten_upper(bounds: &mut ProbeBounds, key: IndexKey, inclusive: bool) {
        let replace = match &bounds.upper {
            None => true,
            Some((existing, existing_inc)) => match key.compare(existing) {
                Ordering::Less => true,
                Ordering::Equal => *existing_inc && !inclusive,
                Ordering::Greater => false,
            },
        };
        if replace {
            bounds.upper = Some((key, inclusive));
        }
    }

    /// Run `f` on every row matching the WHERE clause, via the index probe
    /// when one applies and a streaming full scan otherwise.
    fn for_each_matching_row<F>(
        &mut self,
        meta: &TableMeta,
        schema: &TableSchema,
        conditions: &[Condition],
        prepared: &[PreparedCondition],
        mut f: F,
    ) -> DatabaseResult<()>
    where
        F: FnMut(i32, Vec<Value>) -> DatabaseResult<()>,
    {
        if let Some(rids) = self.pk_index_candidates(meta, conditions)? {
            for rid in rids {
                let payload = self.record_manager.get(&meta.name, rid.slot_id)?;
                let row = decode_row(&payload, schema)?;
                if self.eval_conditions(&row, schema, prepared)? {
                    f(rid.slot_id, row)?;
                }
            }
        } else {
            for item in self.record_manager.scan_iter(&meta.name)? {
                let (slot_id, payload) = item?;
                let row = decode_row(&payload, schema)?;
                if self.eval_conditions(&row, schema, prepared)? {
                    f(slot_id, row)?;
                }
            }
        }
        Ok(())
    }

    // ===== index upkeep =====

    /// Open a column's index, rebuilding the file from table data when it
    /// is missing or unreadable.
    fn ensure_index_open(&mut self, meta: &TableMeta, column: &str) -> DatabaseResult<()> {
        if self.index_registry.is_open(&meta.name, column) {
            return Ok(());
        }
        let db_path = self.db_path()?;
        match self.index_registry.open_index(&db_path, &meta.name, column) {
            Ok(()) => Ok(()),
            Err(
                IndexError::IndexNotFound(_)
                | IndexError::InvalidMagic
                | IndexError::InvalidKeyKind(_),
            ) => self.rebuild_index(meta, column),
            Err(err) => Err(err.into()),
        }
    }

    fn rebuild_index(&mut self, meta: &TableMeta, column: &str) -> DatabaseResult<()> {
        let db_path = self.db_path()?;
        let col_idx = meta.find_column(column).ok_or_else(|| {
            DatabaseError::ColumnNotFound(column.to_string(), meta.name.clone())
        })?;
        let (kind, key_len) = KeyKind::from_data_type(&meta.columns[col_idx].data_type);

        match self.index_registry.drop_index(&db_path, &meta.name, column) {
            Ok(()) | Err(IndexError::IndexNotFound(_)) => {}
            Err(err) => return Err(err.into()),
        }
        self.index_registry
            .create_index(&db_path, &meta.name, column, kind, key_len)?;

        self.open_table(&meta.name)?;
        let schema = meta.to_schema();
        for item in self.record_manager.scan_iter(&meta.name)? {
            let (slot_id, payload) = item?;
            let row = decode_row(&payload, &schema)?;
            if let Some(key) = IndexKey::from_value(&row[col_idx], kind, key_len) {
                // duplicates on a non-unique column are silently dropped
                let _ = self
                    .index_registry
                    .insert(&meta.name, column, key, RecordId::new(0, slot_id))?;
            }
        }
        Ok(())
    }

    /// Insert index entries for one row across all indexed columns.
    fn index_row(&mut self, meta: &TableMeta, row: &[Value], slot_id: i32) -> DatabaseResult<()> {
        for column in meta.indexes.clone() {
            let Some(col_idx) = meta.find_column(&column) else {
                continue;
            };
            let (kind, key_len) = KeyKind::from_data_type(&meta.columns[col_idx].data_type);
            if let Some(key) = IndexKey::from_value(&row[col_idx], kind, key_len) {
                self.ensure_index_open(meta, &column)?;
                let _ = self
                    .index_registry
                    .insert(&meta.name, &column, key, RecordId::new(0, slot_id))?;
            }
        }
        Ok(())
    }

    /// Remove a row's index entries for every indexed, non-null column.
    fn unindex_row(&mut self, meta: &TableMeta, row: &[Value]) -> DatabaseResult<()> {
        for column in meta.indexes.clone() {
            let Some(col_idx) = meta.find_column(&column) else {
                continue;
            };
            let (kind, key_len) = KeyKind::from_data_type(&meta.columns[col_idx].data_type);
            if let Some(key) = IndexKey::from_value(&row[col_idx], kind, key_len) {
                self.ensure_index_open(meta, &column)?;
                let _ = self.index_registry.delete(&meta.name, &column, &key)?;
            }
        }
        Ok(())
    }

    // ===== constraint checks =====

    fn validate_foreign_key_shape(
        &self,
        meta: &TableMeta,
        fk: &ForeignKeyMeta,
    ) -> DatabaseResult<()> {
        if fk.columns.len() != fk.ref_columns.len() {
            return Err(DatabaseError::SchemaMismatch(
                "foreign key column count mismatch".to_string(),
            ));
        }
        let ref_meta = self
            .catalog
            .table(&fk.ref_table)
            .map_err(map_catalog_error)?;

        for (local, remote) in fk.columns.iter().zip(&fk.ref_columns) {
            let local_idx = meta
                .find_column(local)
                .ok_or_else(|| DatabaseError::ColumnNotFound(local.clone(), meta.name.clone()))?;
            let remote_idx = ref_meta.find_column(remote).ok_or_else(|| {
                DatabaseError::ColumnNotFound(remote.clone(), fk.ref_table.clone())
            })?;
            if meta.columns[local_idx].data_type != ref_meta.columns[remote_idx].data_type {
                return Err(DatabaseError::SchemaMismatch(format!(
                    "foreign key type mismatch: {}.{} vs {}.{}",
                    meta.name, local, fk.ref_table, remote
                )));
            }
        }
        Ok(())
    }

    /// Does a parent row exist for the given non-null FK values? With
    /// `lenient_empty`, an empty referenced table passes so bulk loads may
    /// arrive in any order.
    fn fk_parent_exists(
        &mut self,
        fk: &ForeignKeyMeta,
        values: &[Value],
        lenient_empty: bool,
    ) -> DatabaseResult<bool> {
        let ref_meta = self.table_meta(&fk.ref_table)?;
        if lenient_empty && ref_meta.record_count == 0 {
            return Ok(true);
        }

        if fk.ref_columns.len() == 1 && ref_meta.has_index(&fk.ref_columns[0]) {
            let column = fk.ref_columns[0].clone();
            let col_idx = ref_meta.find_column(&column).ok_or_else(|| {
                DatabaseError::ColumnNotFound(column.clone(), ref_meta.name.clone())
            })?;
            let (kind, key_len) = KeyKind::from_data_type(&ref_meta.columns[col_idx].data_type);
            if let Some(key) = IndexKey::from_value(&values[0], kind, key_len) {
                self.ensure_index_open(&ref_meta, &column)?;
                return Ok(self
                    .index_registry
                    .search(&ref_meta.name, &column, &key)?
                    .is_some());
            }
            return Ok(false);
        }

        let ref_schema = ref_meta.to_schema();
        let ref_idxs: Vec<usize> = fk
            .ref_columns
            .iter()
            .map(|c| {
                ref_meta.find_column(c).ok_or_else(|| {
                    DatabaseError::ColumnNotFound(c.clone(), ref_meta.name.clone())
                })
            })
            .collect::<DatabaseResult<_>>()?;

        self.open_table(&ref_meta.name)?;
        for item in self.record_manager.scan_iter(&ref_meta.name)? {
            let (_slot, payload) = item?;
            let row = decode_row(&payload, &ref_schema)?;
            if ref_idxs.iter().zip(values).all(|(idx, v)| &row[*idx] == v) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Check every FK of a row about to be stored. Rows with a null in any
    /// constrained column are exempt from that constraint.
    fn check_row_foreign_keys(
        &mut self,
        meta: &TableMeta,
        row: &[Value],
        changed: Option<&HashSet<usize>>,
        lenient_empty: bool,
    ) -> DatabaseResult<()> {
        for fk in meta.foreign_keys.clone() {
            let idxs: Vec<usize> = fk
                .columns
                .iter()
                .map(|c| {
                    meta.find_column(c)
                        .ok_or_else(|| DatabaseError::ColumnNotFound(c.clone(), meta.name.clone()))
                })
                .collect::<DatabaseResult<_>>()?;

            if let Some(changed) = changed
                && !idxs.iter().any(|idx| changed.contains(idx))
            {
                continue;
            }

            let values: Vec<Value> = idxs.iter().map(|idx| row[*idx].clone()).collect();
            if values.iter().any(Value::is_null) {
                continue;
            }
            if !self.fk_parent_exists(&fk, &values, lenient_empty)? {
                return Err(DatabaseError::ConstraintViolation(format!(
                    "{}({}) references {}({}): value ({}) not found",
                    meta.name,
                    fk.columns.join(", "),
                    fk.ref_table,
                    fk.ref_columns.join(", "),
                    values.iter().map(format_value).collect::<Vec<_>>().join(", ")
                )));
            }
        }
        Ok(())
    }

    /// Reject removal (or key change) of a parent row that other tables
    /// still reference. `changed` restricts the sweep to constraints whose
    /// referenced columns were touched.
    fn check_row_not_referenced(
        &mut self,
        parent_meta: &TableMeta,
        row: &[Value],
        changed: Option<&HashSet<usize>>,
    ) -> DatabaseResult<()> {
        let referencing: Vec<(TableMeta, ForeignKeyMeta)> = self
            .catalog
            .tables()
            .flat_map(|child| {
                child
                    .foreign_keys
                    .iter()
                    .filter(|fk| fk.ref_table == parent_meta.name)
                    .map(|fk| (child.clone(), fk.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();

        for (child_meta, fk) in referencing {
            let parent_idxs: Vec<usize> = fk
                .ref_columns
                .iter()
                .map(|c| {
                    parent_meta.find_column(c).ok_or_else(|| {
                        DatabaseError::ColumnNotFound(c.clone(), parent_meta.name.clone())
                    })
                })
                .collect::<DatabaseResult<_>>()?;

            if let Some(changed) = changed
                && !parent_idxs.iter().any(|idx| changed.contains(idx))
            {
                continue;
            }

            let values: Vec<Value> = parent_idxs.iter().map(|idx| row[*idx].clone()).collect();
            if values.iter().any(Value::is_null) {
                continue;
            }

            let found = if fk.columns.len() == 1 && child_meta.has_index(&fk.columns[0]) {
                let column = fk.columns[0].clone();
                let col_idx = child_meta.find_column(&column).ok_or_else(|| {
                    DatabaseError::ColumnNotFound(column.clone(), child_meta.name.clone())
                })?;
                let (kind, key_len) =
                    KeyKind::from_data_type(&child_meta.columns[col_idx].data_type);
                match IndexKey::from_value(&values[0], kind, key_len) {
                    Some(key) => {
                        self.ensure_index_open(&child_meta, &column)?;
                        self.index_registry
                            .search(&child_meta.name, &column, &key)?
                            .is_some()
                    }
                    None => false,
                }
            } else {
                let child_schema = child_meta.to_schema();
                let child_idxs: Vec<usize> = fk
                    .columns
                    .iter()
                    .map(|c| {
                        child_meta.find_column(c).ok_or_else(|| {
                            DatabaseError::ColumnNotFound(c.clone(), child_meta.name.clone())
                        })
                    })
                    .collect::<DatabaseResult<_>>()?;
                self.open_table(&child_meta.name)?;
                let mut hit = false;
                for item in self.record_manager.scan_iter(&child_meta.name)? {
                    let (_slot, payload) = item?;
                    let child_row = decode_row(&payload, &child_schema)?;
                    if child_idxs
                        .iter()
                        .zip(&values)
                        .all(|(idx, v)| &child_row[*idx] == v)
                    {
                        hit = true;
                        break;
                    }
                }
                hit
            };

            if found {
                return Err(DatabaseError::ConstraintViolation(format!(
                    "{}({}) is referenced by {}({})",
                    parent_meta.name,
                    fk.ref_columns.join(", "),
                    child_meta.name,
                    fk.columns.join(", ")
                )));
            }
        }
        Ok(())
    }

    /// Does another live row carry the same primary-key values?
    fn pk_duplicate_exists(
        &mut self,
        meta: &TableMeta,
        schema: &TableSchema,
        pk_values: &[(usize, Value)],
        exclude_slot: Option<i32>,
    ) -> DatabaseResult<bool> {
        if let [(col_idx, value)] = pk_values
            && meta.has_index(&meta.columns[*col_idx].name)
        {
            let column = meta.columns[*col_idx].name.clone();
            let (kind, key_len) = KeyKind::from_data_type(&meta.columns[*col_idx].data_type);
            if let Some(key) = IndexKey::from_value(value, kind, key_len) {
                self.ensure_index_open(meta, &column)?;
                if let Some(rid) = self.index_registry.search(&meta.name, &column, &key)? {
                    return Ok(Some(rid.slot_id) != exclude_slot);
                }
            }
            return Ok(false);
        }

        for item in self.record_manager.scan_iter(&meta.name)? {
            let (slot_id, payload) = item?;
            if Some(slot_id) == exclude_slot {
                continue;
            }
            let row = decode_row(&payload, schema)?;
            if pk_values.iter().all(|(idx, v)| &row[*idx] == v) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Enforced uniqueness for columns declared via ALTER ADD UNIQUE.
    fn unique_violation(
        &mut self,
        meta: &TableMeta,
        row: &[Value],
        changed: Option<&HashSet<usize>>,
        exclude_slot: Option<i32>,
    ) -> DatabaseResult<Option<String>> {
        let unique_columns: Vec<String> = meta
            .explicit_indexes
            .iter()
            .filter(|idx| idx.is_unique && idx.columns.len() == 1)
            .map(|idx| idx.columns[0].clone())
            .collect();

        for column in unique_columns {
            let Some(col_idx) = meta.find_column(&column) else {
                continue;
            };
            if let Some(changed) = changed
                && !changed.contains(&col_idx)
            {
                continue;
            }
            if !meta.has_index(&column) {
                continue;
            }
            let (kind, key_len) = KeyKind::from_data_type(&meta.columns[col_idx].data_type);
            let Some(key) = IndexKey::from_value(&row[col_idx], kind, key_len) else {
                continue;
            };
            self.ensure_index_open(meta, &column)?;
            if let Some(rid) = self.index_registry.search(&meta.name, &column, &key)?
                && Some(rid.slot_id) != exclude_slot
            {
                return Ok(Some(column));
            }
        }
        Ok(None)
    }

    // ===== DML =====

    pub fn insert(&mut self, table: &str, rows: Vec<Vec<Literal>>) -> DatabaseResult<usize> {
        let mut meta = self.table_meta(table)?;
        let schema = meta.to_schema();
        self.open_table(table)?;

        let mut inserted = 0;
        let mut failure = None;
        for literals in rows {
            match self.insert_one(&mut meta, &schema, &literals, true) {
                Ok(()) => inserted += 1,
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        // rows inserted before a failure stay; commit their counters
        *self.catalog.table_mut(table)? = meta;
        self.catalog.save_table(table)?;

        match failure {
            Some(err) => Err(err),
            None => Ok(inserted),
        }
    }

    /// The single row-insert path shared by INSERT and LOAD DATA: coercion,
    /// NOT NULL, primary-key, foreign-key and unique checks, slot
    /// allocation, storage write, inline index maintenance.
    fn insert_one(
        &mut self,
        meta: &mut TableMeta,
        schema: &TableSchema,
        literals: &[Literal],
        fk_lenient_empty: bool,
    ) -> DatabaseResult<()> {
        if literals.len() != meta.columns.len() {
            return Err(DatabaseError::SchemaMismatch(format!(
                "expected {} values, got {}",
                meta.columns.len(),
                literals.len()
            )));
        }

        let mut row = Vec::with_capacity(meta.columns.len());
        for (literal, col) in literals.iter().zip(&meta.columns) {
            let value = self.literal_to_value(literal, &col.data_type)?;
            if col.not_null && value.is_null() {
                return Err(DatabaseError::ConstraintViolation(format!(
                    "column {} is NOT NULL",
                    col.name
                )));
            }
            row.push(value);
        }

        if !meta.primary_key.is_empty() {
            let pk_values: Vec<(usize, Value)> = meta
                .primary_key
                .iter()
                .map(|c| {
                    meta.find_column(c)
                        .map(|idx| (idx, row[idx].clone()))
                        .ok_or_else(|| DatabaseError::ColumnNotFound(c.clone(), meta.name.clone()))
                })
                .collect::<DatabaseResult<_>>()?;
            if self.pk_duplicate_exists(meta, schema, &pk_values, None)? {
                return Err(DatabaseError::ConstraintViolation(
                    "duplicate primary key".to_string(),
                ));
            }
        }

        self.check_row_foreign_keys(meta, &row, None, fk_lenient_empty)?;

        if let Some(column) = self.unique_violation(meta, &row, None, None)? {
            return Err(DatabaseError::ConstraintViolation(format!(
                "duplicate value for unique column {}",
                column
            )));
        }

        let slot_id = meta.next_record_id;
        meta.next_record_id += 1;

        let payload = encode_row(&row, schema)?;
        self.record_manager.insert(&meta.name, slot_id, &payload)?;
        self.index_row(meta, &row, slot_id)?;
        meta.record_count += 1;
        Ok(())
    }

    pub fn delete(&mut self, table: &str, conditions: &[Condition]) -> DatabaseResult<usize> {
        let mut meta = self.table_meta(table)?;
        let schema = meta.to_schema();
        self.open_table(table)?;

        let prepared = self.prepare_conditions(conditions)?;
        let mut targets: Vec<(i32, Vec<Value>)> = Vec::new();
        self.for_each_matching_row(&meta, &schema, conditions, &prepared, |slot, row| {
            targets.push((slot, row));
            Ok(())
        })?;

        // any referenced victim rejects the whole statement, before any write
        for (_slot, row) in &targets {
            self.check_row_not_referenced(&meta, row, None)?;
        }

        let mut deleted = 0;
        for (slot, row) in targets {
            self.unindex_row(&meta, &row)?;
            self.record_manager.delete(table, slot)?;
            deleted += 1;
        }

        meta.record_count -= deleted as i64;
        *self.catalog.table_mut(table)? = meta;
        self.catalog.save_table(table)?;
        Ok(deleted)
    }

    pub fn update(
        &mut self,
        table: &str,
        updates: Vec<(String, Literal)>,
        conditions: &[Condition],
    ) -> DatabaseResult<usize> {
        let meta = self.table_meta(table)?;
        let schema = meta.to_schema();
        self.open_table(table)?;

        let mut update_map: HashMap<usize, Literal> = HashMap::new();
        for (column, literal) in updates {
            let col_idx = meta.find_column(&column).ok_or_else(|| {
                DatabaseError::ColumnNotFound(column.clone(), table.to_string())
            })?;
            update_map.insert(col_idx, literal);
        }

        let prepared = self.prepare_conditions(conditions)?;
        let mut targets: Vec<(i32, Vec<Value>)> = Vec::new();
        self.for_each_matching_row(&meta, &schema, conditions, &prepared, |slot, row| {
            targets.push((slot, row));
            Ok(())
        })?;

        let pk_idxs: Vec<usize> = meta
            .primary_key
            .iter()
            .filter_map(|c| meta.find_column(c))
            .collect();

        let mut updated = 0;
        for (slot, old_row) in targets {
            let mut new_row = old_row.clone();
            let mut changed: HashSet<usize> = HashSet::new();
            for (col_idx, literal) in &update_map {
                let col = &meta.columns[*col_idx];
                let value = self.literal_to_value(literal, &col.data_type)?;
                if col.not_null && value.is_null() {
                    return Err(DatabaseError::ConstraintViolation(format!(
                        "column {} is NOT NULL",
                        col.name
                    )));
                }
                if new_row[*col_idx] != value {
                    changed.insert(*col_idx);
                }
                new_row[*col_idx] = value;
            }
            if changed.is_empty() {
                updated += 1;
                continue;
            }

            let pk_changed = pk_idxs.iter().any(|idx| changed.contains(idx));
            if pk_changed {
                let pk_values: Vec<(usize, Value)> = pk_idxs
                    .iter()
                    .map(|idx| (*idx, new_row[*idx].clone()))
                    .collect();
                if self.pk_duplicate_exists(&meta, &schema, &pk_values, Some(slot))? {
                    return Err(DatabaseError::ConstraintViolation(
                        "duplicate primary key".to_string(),
                    ));
                }
            }

            // a referenced parent key must not change out from under its children
            self.check_row_not_referenced(&meta, &old_row, Some(&changed))?;
            self.check_row_foreign_keys(&meta, &new_row, Some(&changed), true)?;

            if let Some(column) = self.unique_violation(&meta, &new_row, Some(&changed), Some(slot))? {
                return Err(DatabaseError::ConstraintViolation(format!(
                    "duplicate value for unique column {}",
                    column
                )));
            }

            // index upkeep for the changed, indexed columns only
            for column in meta.indexes.clone() {
                let Some(col_idx) = meta.find_column(&column) else {
                    continue;
                };
                if !changed.contains(&col_idx) {
                    continue;
                }
                let (kind, key_len) = KeyKind::from_data_type(&meta.columns[col_idx].data_type);
                self.ensure_index_open(&meta, &column)?;
                if let Some(old_key) = IndexKey::from_value(&old_row[col_idx], kind, key_len) {
                    let _ = self.index_registry.delete(&meta.name, &column, &old_key)?;
                }
                if let Some(new_key) = IndexKey::from_value(&new_row[col_idx], kind, key_len) {
                    let _ = self.index_registry.insert(
                        &meta.name,
                        &column,
                        new_key,
                        RecordId::new(0, slot),
                    )?;
                }
            }

            let payload = encode_row(&new_row, &schema)?;
            self.record_manager.update(table, slot, &payload)?;
            updated += 1;
        }

        self.catalog.save_table(table)?;
        Ok(updated)
    }

    pub fn load_data(&mut self, path: &str, table: &str, delimiter: char) -> DatabaseResult<usize> {
        let mut meta = self.table_meta(table)?;
        let schema = meta.to_schema();
        self.open_table(table)?;

        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter as u8)
            .has_headers(false)
            .flexible(true)
            .from_path(path)
            .map_err(|e| std::io::Error::other(e.to_string()))?;

        let mut loaded = 0;
        let mut failure = None;
        for record in reader.records() {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    failure = Some(DatabaseError::IoError(std::io::Error::other(e.to_string())));
                    break;
                }
            };

            let mut literals = Vec::with_capacity(meta.columns.len());
            for (i, col) in meta.columns.iter().enumerate() {
                // missing trailing fields, the literal NULL, the empty
                // field, and unparseable values all load as null
                let literal = match record.get(i) {
                    None => Literal::Null,
                    Some(field) => {
                        let trimmed = field.trim();
                        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
                            Literal::Null
                        } else {
                            match col.data_type {
                                DataType::Int => trimmed
                                    .parse::<i64>()
                                    .map(Literal::Integer)
                                    .unwrap_or(Literal::Null),
                                DataType::Float => trimmed
                                    .parse::<f64>()
                                    .map(Literal::Float)
                                    .unwrap_or(Literal::Null),
                                DataType::Varchar(_) => Literal::String(field.to_string()),
                            }
                        }
                    }
                };
                literals.push(literal);
            }

            match self.insert_one(&mut meta, &schema, &literals, true) {
                Ok(()) => loaded += 1,
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        // the record count is committed once, after the load
        *self.catalog.table_mut(table)? = meta;
        self.catalog.save_table(table)?;

        match failure {
            Some(err) => Err(err),
            None => Ok(loaded),
        }
    }

    // ===== SELECT =====

    pub fn select(&mut self, query: SelectQuery) -> DatabaseResult<(Vec<String>, Vec<Vec<String>>)> {
        match query.tables.len() {
            0 => Err(DatabaseError::SchemaMismatch(
                "SELECT requires a table".to_string(),
            )),
            1 => self.select_single_table(query),
            _ => self.select_join(query),
        }
    }

    fn select_has_aggregate(items: &SelectItems) -> bool {
        match items {
            SelectItems::All => false,
            SelectItems::List(list) => list
                .iter()
                .any(|item| !matches!(item, SelectItem::Column(_))),
        }
    }

    fn select_single_table(
        &mut self,
        query: SelectQuery,
    ) -> DatabaseResult<(Vec<String>, Vec<Vec<String>>)> {
        let table = query.tables[0].clone();
        let meta = self.table_meta(&table)?;
        let schema = meta.to_schema();
        self.open_table(&table)?;

        if Self::select_has_aggregate(&query.items) || query.group_by.is_some() {
            return self.select_single_table_aggregate(&query, &meta, &schema);
        }

        let (headers, col_idxs) = match &query.items {
            SelectItems::All => (
                schema.columns.iter().map(|c| c.name.clone()).collect(),
                (0..schema.columns.len()).collect::<Vec<_>>(),
            ),
            SelectItems::List(items) => {
                let mut headers = Vec::new();
                let mut idxs = Vec::new();
                for item in items {
                    let SelectItem::Column(col) = item else {
                        return Err(DatabaseError::SchemaMismatch(
                            "aggregates cannot mix with a plain select list".to_string(),
                        ));
                    };
                    idxs.push(self.resolve_column(&schema, col)?);
                    headers.push(col.column.clone());
                }
                (headers, idxs)
            }
        };

        let order_idx = match &query.order_by {
            Some((col, _)) => Some(self.resolve_column(&schema, col)?),
            None => None,
        };
        let prepared = self.prepare_conditions(&query.conditions)?;

        let mut plain_rows: Vec<Vec<String>> = Vec::new();
        let mut keyed_rows: Vec<(Value, Vec<String>)> = Vec::new();
        self.for_each_matching_row(&meta, &schema, &query.conditions, &prepared, |_slot, row| {
            let projected: Vec<String> = col_idxs.iter().map(|idx| format_value(&row[*idx])).collect();
            match order_idx {
                Some(idx) => keyed_rows.push((row[idx].clone(), projected)),
                None => plain_rows.push(projected),
            }
            Ok(())
        })?;

        let rows = if let Some((_, ascending)) = query.order_by {
            Self::sort_keyed_rows(keyed_rows, ascending)?
        } else {
            plain_rows
        };

        Ok((headers, Self::apply_limit_offset(rows, query.limit, query.offset)))
    }

    fn sort_keyed_rows(
        mut keyed_rows: Vec<(Value, Vec<String>)>,
        ascending: bool,
    ) -> DatabaseResult<Vec<Vec<String>>> {
        let mut ordering_error = None;
        keyed_rows.sort_by(|(left, _), (right, _)| match compare_order_values(left, right) {
            Ok(ordering) => {
                if ascending {
                    ordering
                } else {
                    ordering.reverse()
                }
            }
            Err(err) => {
                if ordering_error.is_none() {
                    ordering_error = Some(err);
                }
                Ordering::Equal
            }
        });
        if let Some(err) = ordering_error {
            return Err(err);
        }
        Ok(keyed_rows.into_iter().map(|(_, row)| row).collect())
    }

    fn apply_limit_offset(
        rows: Vec<Vec<String>>,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Vec<Vec<String>> {
        let start = offset.unwrap_or(0);
        if start >= rows.len() {
            return Vec::new();
        }
        let iter = rows.into_iter().skip(start);
        match limit {
            Some(count) => iter.take(count).collect(),
            None => iter.collect(),
        }
    }

    fn build_agg_plan(
        &self,
        items: &[SelectItem],
        group_col: Option<usize>,
        columns: &[ColumnDef],
        resolve: &dyn Fn(&ColumnRef) -> DatabaseResult<usize>,
    ) -> DatabaseResult<AggPlan> {
        let mut headers = Vec::new();
        let mut outputs = Vec::new();
        let mut specs = Vec::new();

        let numeric_type = |col: usize| -> DatabaseResult<NumericType> {
            match columns[col].data_type {
                DataType::Int => Ok(NumericType::Int),
                DataType::Float => Ok(NumericType::Float),
                _ => Err(DatabaseError::SchemaMismatch(
                    "aggregate requires a numeric column".to_string(),
                )),
            }
        };

        for item in items {
            match item {
                SelectItem::Column(col) => {
                    let idx = resolve(col)?;
                    match group_col {
                        Some(group_idx) if group_idx == idx => {
                            headers.push(col.column.clone());
                            outputs.push(OutputSelector::GroupKey);
                        }
                        Some(_) => {
                            return Err(DatabaseError::SchemaMismatch(
                                "selected column must match GROUP BY".to_string(),
                            ));
                        }
                        None => {
                            return Err(DatabaseError::SchemaMismatch(
                                "non-aggregate column requires GROUP BY".to_string(),
                            ));
                        }
                    }
                }
                SelectItem::CountAll => {
                    headers.push("COUNT(*)".to_string());
                    specs.push(AggSpec::CountAll);
                    outputs.push(OutputSelector::Agg(specs.len() - 1));
                }
                SelectItem::Count(col) => {
                    headers.push(format!("COUNT({})", format_column_name(col)));
                    specs.push(AggSpec::Count { col: resolve(col)? });
                    outputs.push(OutputSelector::Agg(specs.len() - 1));
                }
                SelectItem::Sum(col) => {
                    let idx = resolve(col)?;
                    headers.push(format!("SUM({})", format_column_name(col)));
                    specs.push(AggSpec::Sum {
                        col: idx,
                        numeric: numeric_type(idx)?,
                    });
                    outputs.push(OutputSelector::Agg(specs.len() - 1));
                }
                SelectItem::Avg(col) => {
                    let idx = resolve(col)?;
                    numeric_type(idx)?;
                    headers.push(format!("AVG({})", format_column_name(col)));
                    specs.push(AggSpec::Avg { col: idx });
                    outputs.push(OutputSelector::Agg(specs.len() - 1));
                }
                SelectItem::Min(col) => {
                    headers.push(format!("MIN({})", format_column_name(col)));
                    specs.push(AggSpec::Min { col: resolve(col)? });
                    outputs.push(OutputSelector::Agg(specs.len() - 1));
                }
                SelectItem::Max(col) => {
                    headers.push(format!("MAX({})", format_column_name(col)));
                    specs.push(AggSpec::Max { col: resolve(col)? });
                    outputs.push(OutputSelector::Agg(specs.len() - 1));
                }
            }
        }

        Ok(AggPlan {
            headers,
            outputs,
            specs,
            group_col,
        })
    }

    /// Fold rows into the plan's aggregate states and emit result rows.
    /// Group order is unspecified (insertion order here).
    fn run_aggregation<I>(&self, plan: &AggPlan, rows: I) -> DatabaseResult<Vec<Vec<String>>>
    where
        I: IntoIterator<Item = Vec<Value>>,
    {
        let mut group_index: HashMap<String, usize> = HashMap::new();
        let mut group_states: Vec<(Value, Vec<AggState>)> = Vec::new();
        let mut plain_state = if plan.group_col.is_none() {
            Some(init_agg_states(&plan.specs))
        } else {
            None
        };

        for row in rows {
            if let Some(group_idx) = plan.group_col {
                let group_value = row[group_idx].clone();
                // groups hash on the key's canonical string form
                let canonical = format_value(&group_value);
                let at = match group_index.get(&canonical) {
                    Some(at) => *at,
                    None => {
                        group_states.push((group_value, init_agg_states(&plan.specs)));
                        group_index.insert(canonical, group_states.len() - 1);
                        group_states.len() - 1
                    }
                };
                update_agg_states(&mut group_states[at].1, &plan.specs, &row)?;
            } else if let Some(states) = plain_state.as_mut() {
                update_agg_states(states, &plan.specs, &row)?;
            }
        }

        let mut out = Vec::new();
        if let Some(states) = plain_state {
            out.push(Self::emit_aggregate_row(plan, None, &states));
        } else {
            for (group_value, states) in &group_states {
                out.push(Self::emit_aggregate_row(plan, Some(group_value), states));
            }
        }
        Ok(out)
    }

    fn emit_aggregate_row(
        plan: &AggPlan,
        group_value: Option<&Value>,
        states: &[AggState],
    ) -> Vec<String> {
        plan.outputs
            .iter()
            .map(|output| match output {
                OutputSelector::GroupKey => group_value
                    .map_or_else(|| "NULL".to_string(), format_value),
                OutputSelector::Agg(at) => format_aggregate_value(&states[*at]),
            })
            .collect()
    }

    fn select_single_table_aggregate(
        &mut self,
        query: &SelectQuery,
        meta: &TableMeta,
        schema: &TableSchema,
    ) -> DatabaseResult<(Vec<String>, Vec<Vec<String>>)> {
        let SelectItems::List(items) = &query.items else {
            return Err(DatabaseError::SchemaMismatch(
                "SELECT * cannot be aggregated".to_string(),
            ));
        };

        let group_col = match &query.group_by {
            Some(col) => Some(self.resolve_column(schema, col)?),
            None => None,
        };
        let plan = self.build_agg_plan(items, group_col, &schema.columns, &|col| {
            self.resolve_column(schema, col)
        })?;

        // COUNT(*) with no WHERE answers straight from the catalog,
        // saturating at i32::MAX
        if query.conditions.is_empty()
            && plan.group_col.is_none()
            && plan.specs.len() == 1
            && plan.outputs.len() == 1
            && matches!(plan.specs[0], AggSpec::CountAll)
        {
            let count = meta.record_count.clamp(0, i32::MAX as i64);
            let rows = vec![vec![count.to_string()]];
            return Ok((plan.headers, Self::apply_limit_offset(rows, query.limit, query.offset)));
        }

        let prepared = self.prepare_conditions(&query.conditions)?;
        let mut matching: Vec<Vec<Value>> = Vec::new();
        self.for_each_matching_row(meta, schema, &query.conditions, &prepared, |_slot, row| {
            matching.push(row);
            Ok(())
        })?;

        let rows = self.run_aggregation(&plan, matching)?;
        Ok((plan.headers, Self::apply_limit_offset(rows, query.limit, query.offset)))
    }

    // ===== joins =====

    fn resolve_join_column(
        &self,
        tables: &[(String, TableSchema, usize)],
        column: &ColumnRef,
    ) -> DatabaseResult<usize> {
        if let Some(table) = &column.table {
            for (name, schema, offset) in tables {
                if name == table {
                    return match schema.find_column(&column.column) {
                        Some(idx) => Ok(offset + idx),
                        None => Err(DatabaseError::ColumnNotFound(
                            column.column.clone(),
                            table.clone(),
                        )),
                    };
                }
            }
            return Err(DatabaseError::TableNotFound(table.clone()));
        }

        // unqualified: first match in FROM order
        for (_name, schema, offset) in tables {
            if let Some(idx) = schema.find_column(&column.column) {
                return Ok(offset + idx);
            }
        }
        Err(DatabaseError::ColumnNotFound(
            column.column.clone(),
            tables
                .first()
                .map(|(name, _, _)| name.clone())
                .unwrap_or_default(),
        ))
    }

    fn flatten_conditions(
        &self,
        tables: &[(String, TableSchema, usize)],
        prepared: Vec<PreparedCondition>,
    ) -> DatabaseResult<Vec<FlatCondition>> {
        let mut flat = Vec::with_capacity(prepared.len());
        for condition in prepared {
            flat.push(match condition {
                PreparedCondition::Compare(col, op, rhs) => {
                    let left = self.resolve_join_column(tables, &col)?;
                    let rhs = match rhs {
                        Operand::Literal(literal) => FlatOperand::Literal(literal_value(&literal)),
                        Operand::Column(other) => {
                            FlatOperand::Column(self.resolve_join_column(tables, &other)?)
                        }
                    };
                    FlatCondition::Compare(left, op, rhs)
                }
                PreparedCondition::IsNull(col) => {
                    FlatCondition::IsNull(self.resolve_join_column(tables, &col)?)
                }
                PreparedCondition::IsNotNull(col) => {
                    FlatCondition::IsNotNull(self.resolve_join_column(tables, &col)?)
                }
                PreparedCondition::Like(col, regex) => {
                    FlatCondition::Like(self.resolve_join_column(tables, &col)?, regex)
                }
                PreparedCondition::In(col, literals) => {
                    FlatCondition::In(self.resolve_join_column(tables, &col)?, literals)
                }
            });
        }
        Ok(flat)
    }

    fn eval_flat_conditions(row: &[Value], conditions: &[FlatCondition]) -> bool {
        for condition in conditions {
            let ok = match condition {
                FlatCondition::Compare(left, op, rhs) => {
                    let right = match rhs {
                        FlatOperand::Literal(value) => value.clone(),
                        FlatOperand::Column(idx) => row[*idx].clone(),
                    };
                    compare_values(&row[*left], *op, &right)
                }
                FlatCondition::IsNull(idx) => row[*idx].is_null(),
                FlatCondition::IsNotNull(idx) => !row[*idx].is_null(),
                FlatCondition::Like(idx, regex) => match &row[*idx] {
                    Value::String(s) => regex.is_match(s),
                    _ => false,
                },
                FlatCondition::In(idx, literals) => literals
                    .iter()
                    .any(|lit| compare_values(&row[*idx], CompareOp::Eq, &literal_value(lit))),
            };
            if !ok {
                return false;
            }
        }
        true
    }

    /// Streaming nested-loop join: the first table streams, the rest are
    /// materialized, the full WHERE runs on each assembled tuple.
    fn select_join(&mut self, query: SelectQuery) -> DatabaseResult<(Vec<String>, Vec<Vec<String>>)> {
        let mut tables: Vec<(String, TableSchema, usize)> = Vec::new();
        let mut combined_columns: Vec<ColumnDef> = Vec::new();
        let mut offset = 0;
        for name in &query.tables {
            let meta = self.table_meta(name)?;
            let schema = meta.to_schema();
            self.open_table(name)?;
            tables.push((name.clone(), schema.clone(), offset));
            offset += schema.columns.len();
            combined_columns.extend(schema.columns.iter().cloned());
        }

        let prepared = self.prepare_conditions(&query.conditions)?;
        let flat = self.flatten_conditions(&tables, prepared)?;

        // materialize every table after the first
        let mut inner: Vec<Vec<Vec<Value>>> = Vec::new();
        for (name, schema, _) in tables.iter().skip(1) {
            let mut rows = Vec::new();
            for item in self.record_manager.scan_iter(name)? {
                let (_slot, payload) = item?;
                rows.push(decode_row(&payload, schema)?);
            }
            inner.push(rows);
        }

        let mut matches: Vec<Vec<Value>> = Vec::new();
        if inner.iter().all(|rows| !rows.is_empty()) {
            let first_schema = tables[0].1.clone();
            let first_name = tables[0].0.clone();
            for item in self.record_manager.scan_iter(&first_name)? {
                let (_slot, payload) = item?;
                let first_row = decode_row(&payload, &first_schema)?;

                let mut odometer = vec![0usize; inner.len()];
                let mut exhausted = false;
                while !exhausted {
                    let mut tuple = first_row.clone();
                    for (at, rows) in odometer.iter().zip(&inner) {
                        tuple.extend(rows[*at].iter().cloned());
                    }
                    if Self::eval_flat_conditions(&tuple, &flat) {
                        matches.push(tuple);
                    }

                    // advance the rightmost wheel, carrying leftwards
                    exhausted = true;
                    for wheel in (0..inner.len()).rev() {
                        odometer[wheel] += 1;
                        if odometer[wheel] < inner[wheel].len() {
                            exhausted = false;
                            break;
                        }
                        odometer[wheel] = 0;
                    }
                }
            }
        }

        // aggregates and GROUP BY run over the materialized join output
        if Self::select_has_aggregate(&query.items) || query.group_by.is_some() {
            let SelectItems::List(items) = &query.items else {
                return Err(DatabaseError::SchemaMismatch(
                    "SELECT * cannot be aggregated".to_string(),
                ));
            };
            let group_col = match &query.group_by {
                Some(col) => Some(self.resolve_join_column(&tables, col)?),
                None => None,
            };
            let plan = self.build_agg_plan(items, group_col, &combined_columns, &|col| {
                self.resolve_join_column(&tables, col)
            })?;
            let rows = self.run_aggregation(&plan, matches)?;
            return Ok((
                plan.headers,
                Self::apply_limit_offset(rows, query.limit, query.offset),
            ));
        }

        let (headers, col_idxs) = match &query.items {
            SelectItems::All => (
                combined_columns.iter().map(|c| c.name.clone()).collect(),
                (0..combined_columns.len()).collect::<Vec<_>>(),
            ),
            SelectItems::List(items) => {
                let mut headers = Vec::new();
                let mut idxs = Vec::new();
                for item in items {
                    let SelectItem::Column(col) = item else {
                        return Err(DatabaseError::SchemaMismatch(
                            "aggregates cannot mix with a plain select list".to_string(),
                        ));
                    };
                    idxs.push(self.resolve_join_column(&tables, col)?);
                    headers.push(col.column.clone());
                }
                (headers, idxs)
            }
        };

        let order_idx = match &query.order_by {
            Some((col, _)) => Some(self.resolve_join_column(&tables, col)?),
            None => None,
        };

        let mut plain_rows = Vec::new();
        let mut keyed_rows = Vec::new();
        for tuple in matches {
            let projected: Vec<String> =
                col_idxs.iter().map(|idx| format_value(&tuple[*idx])).collect();
            match order_idx {
                Some(idx) => keyed_rows.push((tuple[idx].clone(), projected)),
                None => plain_rows.push(projected),
            }
        }

        let rows = if let Some((_, ascending)) = query.order_by {
            Self::sort_keyed_rows(keyed_rows, ascending)?
        } else {
            plain_rows
        };

        Ok((headers, Self::apply_limit_offset(rows, query.limit, query.offset)))
    }

    // ===== ALTER =====

    fn add_index(
        &mut self,
        table: &str,
        index_name: Option<String>,
        columns: Vec<String>,
        unique: bool,
    ) -> DatabaseResult<()> {
        let [column] = columns.as_slice() else {
            return Err(DatabaseError::SchemaMismatch(
                "an index covers exactly one column".to_string(),
            ));
        };
        let column = column.clone();
        let mut meta = self.table_meta(table)?;
        let col_idx = meta
            .find_column(&column)
            .ok_or_else(|| DatabaseError::ColumnNotFound(column.clone(), table.to_string()))?;

        let index_name = index_name.unwrap_or_else(|| format!("idx_{}", column));
        if meta.explicit_indexes.iter().any(|idx| idx.name == index_name) {
            return Err(DatabaseError::IndexExists(index_name));
        }
        if meta
            .explicit_indexes
            .iter()
            .any(|idx| idx.columns.len() == 1 && idx.columns[0] == column)
        {
            return Err(DatabaseError::IndexExists(column.clone()));
        }

        if unique {
            // enforced uniqueness: existing data must already be unique
            let schema = meta.to_schema();
            self.open_table(table)?;
            let mut seen = HashSet::new();
            for item in self.record_manager.scan_iter(table)? {
                let (_slot, payload) = item?;
                let row = decode_row(&payload, &schema)?;
                if row[col_idx].is_null() {
                    continue;
                }
                if !seen.insert(format_value(&row[col_idx])) {
                    return Err(DatabaseError::ConstraintViolation(format!(
                        "column {} has duplicate values",
                        column
                    )));
                }
            }
        }

        if !meta.has_index(&column) {
            self.rebuild_index(&meta, &column)?;
            meta.indexes.push(column.clone());
        }

        meta.explicit_indexes.push(ExplicitIndexMeta {
            name: index_name,
            columns: vec![column],
            is_explicit: true,
            is_unique: unique,
        });

        *self.catalog.table_mut(table)? = meta;
        self.catalog.save_table(table)?;
        Ok(())
    }

    fn drop_explicit_index(&mut self, table: &str, index_name: &str) -> DatabaseResult<()> {
        let mut meta = self.table_meta(table)?;
        let at = meta
            .explicit_indexes
            .iter()
            .position(|idx| idx.name == index_name)
            .ok_or_else(|| DatabaseError::IndexNotFound(index_name.to_string()))?;
        let removed = meta.explicit_indexes.remove(at);

        // the backing tree survives while the primary key or another
        // explicit index still needs the column
        if let [column] = removed.columns.as_slice() {
            let still_used = meta.single_pk_column() == Some(column.as_str())
                || meta
                    .explicit_indexes
                    .iter()
                    .any(|idx| idx.columns.len() == 1 && &idx.columns[0] == column);
            if !still_used && meta.has_index(column) {
                let db_path = self.db_path()?;
                match self.index_registry.drop_index(&db_path, table, column) {
                    Ok(()) | Err(IndexError::IndexNotFound(_)) => {}
                    Err(err) => return Err(err.into()),
                }
                meta.indexes.retain(|c| c != column);
            }
        }

        *self.catalog.table_mut(table)? = meta;
        self.catalog.save_table(table)?;
        Ok(())
    }

    fn add_primary_key(&mut self, table: &str, columns: Vec<String>) -> DatabaseResult<()> {
        let mut meta = self.table_meta(table)?;
        if !meta.primary_key.is_empty() {
            return Err(DatabaseError::ConstraintViolation(
                "table already has a primary key".to_string(),
            ));
        }

        let col_idxs: Vec<usize> = columns
            .iter()
            .map(|c| {
                meta.find_column(c)
                    .ok_or_else(|| DatabaseError::ColumnNotFound(c.clone(), table.to_string()))
            })
            .collect::<DatabaseResult<_>>()?;

        // existing data must be unique and non-null on the key
        let schema = meta.to_schema();
        self.open_table(table)?;
        let mut seen = HashSet::new();
        for item in self.record_manager.scan_iter(table)? {
            let (_slot, payload) = item?;
            let row = decode_row(&payload, &schema)?;
            let mut parts = Vec::with_capacity(col_idxs.len());
            for idx in &col_idxs {
                if row[*idx].is_null() {
                    return Err(DatabaseError::ConstraintViolation(format!(
                        "column {} holds NULL",
                        meta.columns[*idx].name
                    )));
                }
                parts.push(format_value(&row[*idx]));
            }
            if !seen.insert(parts.join("|")) {
                return Err(DatabaseError::ConstraintViolation(
                    "duplicate primary key in existing data".to_string(),
                ));
            }
        }

        meta.primary_key = columns.clone();
        for col in &mut meta.columns {
            if columns.contains(&col.name) {
                col.not_null = true;
            }
        }

        // a single-column key gets its implicit index
        if let Some(pk_col) = meta.single_pk_column().map(str::to_string)
            && !meta.has_index(&pk_col)
        {
            self.rebuild_index(&meta, &pk_col)?;
            meta.indexes.push(pk_col);
        }

        *self.catalog.table_mut(table)? = meta;
        self.catalog.save_table(table)?;
        Ok(())
    }

    /// Dropping the primary key keeps its implicit index around; only an
    /// explicit DROP INDEX removes it.
    fn drop_primary_key(&mut self, table: &str) -> DatabaseResult<()> {
        let meta = self.catalog.table_mut(table)?;
        if meta.primary_key.is_empty() {
            return Err(DatabaseError::ConstraintViolation(
                "table has no primary key".to_string(),
            ));
        }
        meta.primary_key = Vec::new();
        self.catalog.save_table(table)?;
        Ok(())
    }

    fn add_foreign_key(
        &mut self,
        table: &str,
        name: Option<String>,
        columns: Vec<String>,
        ref_table: String,
        ref_columns: Vec<String>,
    ) -> DatabaseResult<()> {
        let mut meta = self.table_meta(table)?;
        let fk = ForeignKeyMeta {
            name: name.unwrap_or_else(|| format!("fk_{}", table)),
            columns,
            ref_table,
            ref_columns,
        };
        if meta.foreign_keys.iter().any(|existing| existing.name == fk.name) {
            return Err(DatabaseError::ForeignKeyExists(fk.name));
        }
        self.validate_foreign_key_shape(&meta, &fk)?;

        // every existing non-null combination must resolve to a parent
        let schema = meta.to_schema();
        let col_idxs: Vec<usize> = fk
            .columns
            .iter()
            .map(|c| {
                meta.find_column(c)
                    .ok_or_else(|| DatabaseError::ColumnNotFound(c.clone(), table.to_string()))
            })
            .collect::<DatabaseResult<_>>()?;
        self.open_table(table)?;
        let mut rows: Vec<Vec<Value>> = Vec::new();
        for item in self.record_manager.scan_iter(table)? {
            let (_slot, payload) = item?;
            rows.push(decode_row(&payload, &schema)?);
        }
        for row in rows {
            let values: Vec<Value> = col_idxs.iter().map(|idx| row[*idx].clone()).collect();
            if values.iter().any(Value::is_null) {
                continue;
            }
            if !self.fk_parent_exists(&fk, &values, false)? {
                return Err(DatabaseError::ConstraintViolation(format!(
                    "existing row ({}) has no parent in {}",
                    values.iter().map(format_value).collect::<Vec<_>>().join(", "),
                    fk.ref_table
                )));
            }
        }

        meta.foreign_keys.push(fk);
        *self.catalog.table_mut(table)? = meta;
        self.catalog.save_table(table)?;
        Ok(())
    }

    fn drop_foreign_key(&mut self, table: &str, name: &str) -> DatabaseResult<()> {
        let meta = self.catalog.table_mut(table)?;
        let at = meta
            .foreign_keys
            .iter()
            .position(|fk| fk.name == name)
            .ok_or_else(|| DatabaseError::ForeignKeyNotFound(name.to_string()))?;
        meta.foreign_keys.remove(at);
        self.catalog.save_table(table)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests;
