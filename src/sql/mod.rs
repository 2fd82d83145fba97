mod ast;
mod parser;

pub use ast::{
    ColumnDecl, ColumnRef, ColumnType, CompareOp, Condition, Literal, Operand, SelectItem,
    SelectItems, SelectQuery, Statement, TableElement,
};

use chumsky::Parser;

/// Strip `--` line comments; the grammar itself never sees them. A `--`
/// inside a quoted string is data, not a comment.
fn strip_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for line in input.lines() {
        let bytes = line.as_bytes();
        let mut in_string = false;
        let mut cut = line.len();
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'\'' => in_string = !in_string,
                b'-' if !in_string && i + 1 < bytes.len() && bytes[i + 1] == b'-' => {
                    cut = i;
                    break;
                }
                _ => {}
            }
            i += 1;
        }
        out.push_str(&line[..cut]);
        out.push('\n');
    }
    out
}

/// Parse a batch of `;`-terminated statements.
pub fn parse(input: &str) -> Result<Vec<Statement>, String> {
    let cleaned = strip_comments(input);
    parser::parser()
        .parse(cleaned.as_str())
        .into_result()
        .map_err(|errs| {
            let messages: Vec<String> = errs.iter().map(|e| e.to_string()).collect();
            messages.join("; ")
        })
}
