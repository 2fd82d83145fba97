use super::error::{RecordError, RecordResult};
use super::value::{DataType, Value};

/// Null bitmap width at the head of every row. Bit i covers column i;
/// columns 32 and beyond are never null.
pub const NULL_BITMAP_BYTES: usize = 4;

#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    pub not_null: bool,
    pub default_value: Value,
}

impl ColumnDef {
    pub fn new(name: String, data_type: DataType, not_null: bool, default_value: Value) -> Self {
        Self {
            name,
            data_type,
            not_null,
            default_value,
        }
    }

    pub fn size(&self) -> usize {
        self.data_type.size()
    }
}

/// Ordered column list of one table; row length is deterministic from it.
#[derive(Debug, Clone)]
pub struct TableSchema {
    table_name: String,
    pub columns: Vec<ColumnDef>,
    row_size: usize,
}

impl TableSchema {
    pub fn new(table_name: String, columns: Vec<ColumnDef>) -> Self {
        let row_size = NULL_BITMAP_BYTES + columns.iter().map(|c| c.size()).sum::<usize>();
        Self {
            table_name,
            columns,
            row_size,
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn find_column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Total encoded row length, null bitmap included.
    pub fn row_size(&self) -> usize {
        self.row_size
    }

    /// Check a row of values against column count, NOT NULL flags and types.
    pub fn validate_row(&self, values: &[Value]) -> RecordResult<()> {
        if values.len() != self.columns.len() {
            return Err(RecordError::SchemaMismatch(format!(
                "expected {} columns, got {}",
                self.columns.len(),
                values.len()
            )));
        }

        for (value, col) in values.iter().zip(&self.columns) {
            if col.not_null && value.is_null() {
                return Err(RecordError::NullViolation(col.name.clone()));
            }
            if !value.matches_type(&col.data_type) {
                return Err(RecordError::TypeMismatch {
                    expected: col.data_type.to_string(),
                    actual: format!("{:?}", value),
                });
            }
        }

        Ok(())
    }
}
