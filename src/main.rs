use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use reldb::catalog::TableMeta;
use reldb::database::{DatabaseManager, DatabaseResult, QueryResult, format_value};
use reldb::sql;

struct Options {
    batch: bool,
    database: Option<String>,
    load_file: Option<String>,
    load_table: Option<String>,
    data_dir: String,
    init_only: bool,
}

fn parse_args() -> Result<Options, String> {
    let mut options = Options {
        batch: false,
        database: None,
        load_file: None,
        load_table: None,
        data_dir: "./data".to_string(),
        init_only: false,
    };

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-b" => options.batch = true,
            "-d" => {
                options.database = Some(args.next().ok_or("-d needs a database name")?);
            }
            "-f" => {
                options.load_file = Some(args.next().ok_or("-f needs a file path")?);
            }
            "-t" => {
                options.load_table = Some(args.next().ok_or("-t needs a table name")?);
            }
            "--data" => {
                options.data_dir = args.next().ok_or("--data needs a directory")?;
            }
            "--init" => options.init_only = true,
            other => return Err(format!("unknown argument: {}", other)),
        }
    }
    Ok(options)
}

fn main() -> ExitCode {
    let options = match parse_args() {
        Ok(options) => options,
        Err(message) => {
            eprintln!("{}", message);
            eprintln!(
                "usage: reldb [-b] [-d <db>] [-f <path> -t <table>] [--data <dir>] [--init]"
            );
            return ExitCode::FAILURE;
        }
    };

    let mut db = match DatabaseManager::new(&options.data_dir) {
        Ok(db) => db,
        Err(err) => {
            eprintln!("Failed to open data directory: {}", err);
            return ExitCode::FAILURE;
        }
    };

    if let Some(name) = &options.database
        && let Err(err) = db.use_database(name)
    {
        eprintln!("Error: {}", err);
        return ExitCode::FAILURE;
    }

    // one-shot bulk load, then exit
    if let (Some(path), Some(table)) = (&options.load_file, &options.load_table) {
        match db.load_data(path, table, ',') {
            Ok(count) => println!("rows\n{}", count),
            Err(err) => {
                eprintln!("Error: {}", err);
                return ExitCode::FAILURE;
            }
        }
        let _ = db.flush();
        return ExitCode::SUCCESS;
    }

    if options.init_only {
        let _ = db.flush();
        return ExitCode::SUCCESS;
    }

    if options.batch {
        run_batch(&mut db);
    } else {
        run_interactive(&mut db);
    }

    if let Err(err) = db.flush() {
        eprintln!("Error flushing on shutdown: {}", err);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn run_batch(db: &mut DatabaseManager) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut pending = String::new();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };
        pending.push_str(&line);
        pending.push('\n');
        if !pending.trim_end().ends_with(';') {
            continue;
        }

        match sql::parse(&pending) {
            Ok(statements) => {
                for statement in statements {
                    let result = db.execute(statement);
                    print!("{}", format_batch(result));
                }
            }
            Err(message) => {
                print!("!ERROR\n{}\n@\n", message);
            }
        }
        pending.clear();
        let _ = stdout.flush();
    }
}

fn format_batch(result: DatabaseResult<QueryResult>) -> String {
    match result {
        Err(err) => format!("!ERROR\n{}\n@\n", err),
        Ok(QueryResult::Empty) => "@\n".to_string(),
        Ok(QueryResult::RowsAffected(count)) => format!("rows\n{}\n@\n", count),
        Ok(QueryResult::ResultSet(headers, rows)) => {
            let mut out = String::new();
            out.push_str(&headers.join(","));
            out.push('\n');
            for row in rows {
                out.push_str(&row.join(","));
                out.push('\n');
            }
            out.push_str("@\n");
            out
        }
        Ok(QueryResult::TableDescription(meta)) => format_desc_batch(&meta),
    }
}

fn describe_constraint_lines(meta: &TableMeta) -> String {
    let mut out = String::new();
    if !meta.primary_key.is_empty() {
        out.push_str(&format!("PRIMARY KEY ({});\n", meta.primary_key.join(", ")));
    }
    for fk in &meta.foreign_keys {
        out.push_str(&format!(
            "FOREIGN KEY {}({}) REFERENCES {}({});\n",
            fk.name,
            fk.columns.join(", "),
            fk.ref_table,
            fk.ref_columns.join(", ")
        ));
    }
    for idx in &meta.explicit_indexes {
        out.push_str(&format!("INDEX ({});\n", idx.columns.join(", ")));
    }
    out
}

fn format_desc_batch(meta: &TableMeta) -> String {
    let mut out = String::new();
    out.push_str("Field,Type,Null,Default\n");
    for col in &meta.columns {
        let default = col
            .default_value
            .as_ref()
            .map_or_else(|| "NULL".to_string(), format_value);
        out.push_str(&format!(
            "{},{},{},{}\n",
            col.name,
            col.data_type,
            if col.not_null { "NO" } else { "YES" },
            default
        ));
    }
    out.push('\n');
    out.push_str(&describe_constraint_lines(meta));
    out.push_str("@\n");
    out
}

fn run_interactive(db: &mut DatabaseManager) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(err) => {
            eprintln!("Failed to start line editor: {}", err);
            return;
        }
    };

    let mut pending = String::new();
    loop {
        let prompt = if pending.is_empty() { "reldb> " } else { "    -> " };
        match editor.readline(prompt) {
            Ok(line) => {
                pending.push_str(&line);
                pending.push('\n');
                if !pending.trim_end().ends_with(';') {
                    continue;
                }
                let _ = editor.add_history_entry(pending.trim());

                match sql::parse(&pending) {
                    Ok(statements) => {
                        for statement in statements {
                            match db.execute(statement) {
                                Ok(result) => print!("{}", format_interactive(result)),
                                Err(err) => println!("Error: {}", err),
                            }
                        }
                    }
                    Err(message) => println!("Parse error: {}", message),
                }
                pending.clear();
            }
            Err(ReadlineError::Interrupted) => {
                pending.clear();
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("Input error: {}", err);
                break;
            }
        }
    }
}

fn format_interactive(result: QueryResult) -> String {
    match result {
        QueryResult::Empty => "OK\n".to_string(),
        QueryResult::RowsAffected(count) => format!("{} row(s) affected\n", count),
        QueryResult::ResultSet(headers, rows) => {
            let count = rows.len();
            let mut out = render_table(&headers, &rows);
            out.push_str(&format!("{} row(s)\n", count));
            out
        }
        QueryResult::TableDescription(meta) => {
            let headers = vec![
                "Field".to_string(),
                "Type".to_string(),
                "Null".to_string(),
                "Default".to_string(),
            ];
            let rows: Vec<Vec<String>> = meta
                .columns
                .iter()
                .map(|col| {
                    vec![
                        col.name.clone(),
                        col.data_type.to_string(),
                        if col.not_null { "NO" } else { "YES" }.to_string(),
                        col.default_value
                            .as_ref()
                            .map_or_else(|| "NULL".to_string(), format_value),
                    ]
                })
                .collect();
            let mut out = render_table(&headers, &rows);
            out.push_str(&describe_constraint_lines(&meta));
            out
        }
    }
}

/// Box-drawing table for interactive results.
fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(String::len).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let separator = {
        let mut line = String::from("+");
        for width in &widths {
            line.push_str(&"-".repeat(width + 2));
            line.push('+');
        }
        line.push('\n');
        line
    };

    let render_row = |cells: &[String]| {
        let mut line = String::from("|");
        for (i, width) in widths.iter().enumerate() {
            let cell = cells.get(i).map(String::as_str).unwrap_or("");
            line.push_str(&format!(" {:<w$} |", cell, w = *width));
        }
        line.push('\n');
        line
    };

    let mut out = String::new();
    out.push_str(&separator);
    out.push_str(&render_row(headers));
    out.push_str(&separator);
    for row in rows {
        out.push_str(&render_row(row));
    }
    out.push_str(&separator);
    out
}
