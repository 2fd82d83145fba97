//! Parsed statement forms consumed by the executor.

/// A literal as written in SQL text; coercion into column types happens in
/// the executor.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Integer(i64),
    Float(f64),
    String(String),
    Null,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnType {
    Int,
    Float,
    Varchar(usize),
}

/// Possibly table-qualified column reference.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub column: String,
}

impl ColumnRef {
    pub fn unqualified(column: &str) -> Self {
        Self {
            table: None,
            column: column.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(Literal),
    Column(ColumnRef),
}

/// One conjunct of a WHERE clause (AND is the only connective).
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare(ColumnRef, CompareOp, Operand),
    IsNull(ColumnRef),
    IsNotNull(ColumnRef),
    Like(ColumnRef, String),
    In(ColumnRef, Vec<Literal>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    Column(ColumnRef),
    CountAll,
    Count(ColumnRef),
    Sum(ColumnRef),
    Avg(ColumnRef),
    Min(ColumnRef),
    Max(ColumnRef),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectItems {
    All,
    List(Vec<SelectItem>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub items: SelectItems,
    pub tables: Vec<String>,
    pub conditions: Vec<Condition>,
    pub group_by: Option<ColumnRef>,
    /// Column and ascending flag.
    pub order_by: Option<(ColumnRef, bool)>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDecl {
    pub name: String,
    pub column_type: ColumnType,
    pub not_null: bool,
    pub default_value: Option<Literal>,
}

/// One element of a CREATE TABLE body.
#[derive(Debug, Clone, PartialEq)]
pub enum TableElement {
    Column(ColumnDecl),
    PrimaryKey(Vec<String>),
    ForeignKey {
        name: Option<String>,
        columns: Vec<String>,
        ref_table: String,
        ref_columns: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    CreateDatabase(String),
    DropDatabase(String),
    ShowDatabases,
    UseDatabase(String),
    ShowTables,
    ShowIndexes,

    CreateTable(String, Vec<TableElement>),
    DropTable(String),
    Describe(String),

    Insert(String, Vec<Vec<Literal>>),
    Delete(String, Vec<Condition>),
    Update(String, Vec<(String, Literal)>, Vec<Condition>),
    Select(SelectQuery),
    /// file path, table, field delimiter
    LoadData(String, String, char),

    AddIndex(String, Option<String>, Vec<String>),
    DropIndex(String, String),
    AddPrimaryKey(String, Vec<String>),
    DropPrimaryKey(String),
    AddForeignKey(String, Option<String>, Vec<String>, String, Vec<String>),
    DropForeignKey(String, String),
    AddUnique(String, Option<String>, Vec<String>),
}
