//! Character-level combinator grammar for the SQL surface. Keywords are
//! uppercase, statements end with `;`.

use chumsky::{prelude::*, text::ascii::ident};

use super::ast::*;

type Err<'a> = extra::Err<Rich<'a, char>>;

fn name<'a>() -> impl Parser<'a, &'a str, String, Err<'a>> + Clone {
    ident().map(|s: &str| s.to_string()).padded()
}

fn name_list<'a>() -> impl Parser<'a, &'a str, Vec<String>, Err<'a>> + Clone {
    name()
        .separated_by(just(',').padded())
        .at_least(1)
        .collect()
        .delimited_by(just('(').padded(), just(')').padded())
}

fn unsigned<'a>() -> impl Parser<'a, &'a str, usize, Err<'a>> + Clone {
    text::int(10)
        .to_slice()
        .try_map(|s: &str, span| {
            s.parse::<usize>()
                .map_err(|_| Rich::custom(span, "number out of range"))
        })
        .padded()
}

fn literal<'a>() -> impl Parser<'a, &'a str, Literal, Err<'a>> + Clone {
    let number = just('-')
        .or_not()
        .then(text::int(10))
        .then(just('.').then(text::digits(10)).or_not())
        .to_slice()
        .try_map(|s: &str, span| {
            if s.contains('.') {
                s.parse::<f64>()
                    .map(Literal::Float)
                    .map_err(|_| Rich::custom(span, "bad float literal"))
            } else {
                s.parse::<i64>()
                    .map(Literal::Integer)
                    .map_err(|_| Rich::custom(span, "bad integer literal"))
            }
        });

    let string = none_of('\'')
        .repeated()
        .to_slice()
        .map(|s: &str| Literal::String(s.to_string()))
        .delimited_by(just('\''), just('\''));

    let null = just("NULL").to(Literal::Null);

    choice((number, string, null)).padded()
}

fn column_ref<'a>() -> impl Parser<'a, &'a str, ColumnRef, Err<'a>> + Clone {
    ident()
        .then(just('.').ignore_then(ident()).or_not())
        .map(|(first, second): (&str, Option<&str>)| match second {
            Some(column) => ColumnRef {
                table: Some(first.to_string()),
                column: column.to_string(),
            },
            None => ColumnRef {
                table: None,
                column: first.to_string(),
            },
        })
        .padded()
}

fn compare_op<'a>() -> impl Parser<'a, &'a str, CompareOp, Err<'a>> + Clone {
    choice((
        just("<>").to(CompareOp::Ne),
        just("<=").to(CompareOp::Le),
        just(">=").to(CompareOp::Ge),
        just('=').to(CompareOp::Eq),
        just('<').to(CompareOp::Lt),
        just('>').to(CompareOp::Gt),
    ))
    .padded()
}

fn condition<'a>() -> impl Parser<'a, &'a str, Condition, Err<'a>> + Clone {
    let is_check = column_ref()
        .then_ignore(just("IS").padded())
        .then(just("NOT").padded().or_not())
        .then_ignore(just("NULL").padded())
        .map(|(column, negated)| {
            if negated.is_some() {
                Condition::IsNotNull(column)
            } else {
                Condition::IsNull(column)
            }
        });

    let like = column_ref()
        .then_ignore(just("LIKE").padded())
        .then(
            none_of('\'')
                .repeated()
                .to_slice()
                .delimited_by(just('\''), just('\''))
                .padded(),
        )
        .map(|(column, pattern): (ColumnRef, &str)| Condition::Like(column, pattern.to_string()));

    let in_list = column_ref()
        .then_ignore(just("IN").padded())
        .then(
            literal()
                .separated_by(just(',').padded())
                .at_least(1)
                .collect()
                .delimited_by(just('(').padded(), just(')').padded()),
        )
        .map(|(column, values)| Condition::In(column, values));

    let compare = column_ref()
        .then(compare_op())
        .then(choice((
            literal().map(Operand::Literal),
            column_ref().map(Operand::Column),
        )))
        .map(|((column, op), rhs)| Condition::Compare(column, op, rhs));

    choice((is_check, like, in_list, compare))
}

fn where_clause<'a>() -> impl Parser<'a, &'a str, Vec<Condition>, Err<'a>> + Clone {
    just("WHERE")
        .padded()
        .ignore_then(
            condition()
                .separated_by(just("AND").padded())
                .at_least(1)
                .collect(),
        )
}

fn select_item<'a>() -> impl Parser<'a, &'a str, SelectItem, Err<'a>> + Clone {
    let col_in_parens = column_ref().delimited_by(just('(').padded(), just(')').padded());

    let count_all = just("COUNT")
        .padded()
        .ignore_then(just('*').padded().delimited_by(just('(').padded(), just(')').padded()))
        .to(SelectItem::CountAll);
    let count = just("COUNT")
        .padded()
        .ignore_then(col_in_parens.clone())
        .map(SelectItem::Count);
    let sum = just("SUM")
        .padded()
        .ignore_then(col_in_parens.clone())
        .map(SelectItem::Sum);
    let avg = just("AVG")
        .padded()
        .ignore_then(col_in_parens.clone())
        .map(SelectItem::Avg);
    let min = just("MIN")
        .padded()
        .ignore_then(col_in_parens.clone())
        .map(SelectItem::Min);
    let max = just("MAX")
        .padded()
        .ignore_then(col_in_parens)
        .map(SelectItem::Max);
    let column = column_ref().map(SelectItem::Column);

    choice((count_all, count, sum, avg, min, max, column))
}

fn select_query<'a>() -> impl Parser<'a, &'a str, SelectQuery, Err<'a>> + Clone {
    let items = choice((
        just('*').padded().to(SelectItems::All),
        select_item()
            .separated_by(just(',').padded())
            .at_least(1)
            .collect()
            .map(SelectItems::List),
    ));

    let group_by = just("GROUP")
        .padded()
        .ignore_then(just("BY").padded())
        .ignore_then(column_ref());

    let order_by = just("ORDER")
        .padded()
        .ignore_then(just("BY").padded())
        .ignore_then(column_ref())
        .then(
            choice((just("ASC").to(true), just("DESC").to(false)))
                .padded()
                .or_not(),
        )
        .map(|(column, direction)| (column, direction.unwrap_or(true)));

    let limit = just("LIMIT")
        .padded()
        .ignore_then(unsigned())
        .then(just("OFFSET").padded().ignore_then(unsigned()).or_not());

    just("SELECT")
        .padded()
        .ignore_then(items)
        .then_ignore(just("FROM").padded())
        .then(name().separated_by(just(',').padded()).at_least(1).collect())
        .then(where_clause().or_not())
        .then(group_by.or_not())
        .then(order_by.or_not())
        .then(limit.or_not())
        .map(|(((((items, tables), conditions), group_by), order_by), limit)| {
            let (limit, offset) = match limit {
                Some((n, offset)) => (Some(n), offset),
                None => (None, None),
            };
            SelectQuery {
                items,
                tables,
                conditions: conditions.unwrap_or_default(),
                group_by,
                order_by,
                limit,
                offset,
            }
        })
}

fn column_type<'a>() -> impl Parser<'a, &'a str, ColumnType, Err<'a>> + Clone {
    choice((
        just("INT").to(ColumnType::Int),
        just("FLOAT").to(ColumnType::Float),
        just("VARCHAR")
            .padded()
            .ignore_then(unsigned().delimited_by(just('(').padded(), just(')').padded()))
            .map(ColumnType::Varchar),
    ))
    .padded()
}

fn table_element<'a>() -> impl Parser<'a, &'a str, TableElement, Err<'a>> + Clone {
    let primary_key = just("PRIMARY")
        .padded()
        .ignore_then(just("KEY").padded())
        .ignore_then(name_list())
        .map(TableElement::PrimaryKey);

    let foreign_key = just("FOREIGN")
        .padded()
        .ignore_then(just("KEY").padded())
        .ignore_then(name().or_not())
        .then(name_list())
        .then_ignore(just("REFERENCES").padded())
        .then(name())
        .then(name_list())
        .map(|(((name, columns), ref_table), ref_columns)| TableElement::ForeignKey {
            name,
            columns,
            ref_table,
            ref_columns,
        });

    let column = name()
        .then(column_type())
        .then(just("NOT").padded().ignore_then(just("NULL").padded()).or_not())
        .then(just("DEFAULT").padded().ignore_then(literal()).or_not())
        .map(|(((name, column_type), not_null), default_value)| {
            TableElement::Column(ColumnDecl {
                name,
                column_type,
                not_null: not_null.is_some(),
                default_value,
            })
        });

    choice((primary_key, foreign_key, column))
}

fn quoted<'a>() -> impl Parser<'a, &'a str, String, Err<'a>> + Clone {
    none_of('\'')
        .repeated()
        .to_slice()
        .map(|s: &str| s.to_string())
        .delimited_by(just('\''), just('\''))
        .padded()
}

fn statement<'a>() -> impl Parser<'a, &'a str, Statement, Err<'a>> {
    let create_database = just("CREATE")
        .padded()
        .ignore_then(just("DATABASE").padded())
        .ignore_then(name())
        .map(Statement::CreateDatabase);

    let drop_database = just("DROP")
        .padded()
        .ignore_then(just("DATABASE").padded())
        .ignore_then(name())
        .map(Statement::DropDatabase);

    let show = choice((
        just("SHOW")
            .padded()
            .ignore_then(just("DATABASES").padded())
            .to(Statement::ShowDatabases),
        just("SHOW")
            .padded()
            .ignore_then(just("TABLES").padded())
            .to(Statement::ShowTables),
        just("SHOW")
            .padded()
            .ignore_then(just("INDEXES").padded())
            .to(Statement::ShowIndexes),
    ));

    let use_database = just("USE")
        .padded()
        .ignore_then(name())
        .map(Statement::UseDatabase);

    let create_table = just("CREATE")
        .padded()
        .ignore_then(just("TABLE").padded())
        .ignore_then(name())
        .then(
            table_element()
                .separated_by(just(',').padded())
                .at_least(1)
                .collect()
                .delimited_by(just('(').padded(), just(')').padded()),
        )
        .map(|(name, elements)| Statement::CreateTable(name, elements));

    let drop_table = just("DROP")
        .padded()
        .ignore_then(just("TABLE").padded())
        .ignore_then(name())
        .map(Statement::DropTable);

    let describe = just("DESC")
        .padded()
        .ignore_then(name())
        .map(Statement::Describe);

    let insert = just("INSERT")
        .padded()
        .ignore_then(just("INTO").padded())
        .ignore_then(name())
        .then_ignore(just("VALUES").padded())
        .then(
            literal()
                .separated_by(just(',').padded())
                .at_least(1)
                .collect::<Vec<Literal>>()
                .delimited_by(just('(').padded(), just(')').padded())
                .separated_by(just(',').padded())
                .at_least(1)
                .collect(),
        )
        .map(|(table, rows)| Statement::Insert(table, rows));

    let delete = just("DELETE")
        .padded()
        .ignore_then(just("FROM").padded())
        .ignore_then(name())
        .then(where_clause().or_not())
        .map(|(table, conditions)| Statement::Delete(table, conditions.unwrap_or_default()));

    let update = just("UPDATE")
        .padded()
        .ignore_then(name())
        .then_ignore(just("SET").padded())
        .then(
            name()
                .then_ignore(just('=').padded())
                .then(literal())
                .separated_by(just(',').padded())
                .at_least(1)
                .collect(),
        )
        .then(where_clause().or_not())
        .map(|((table, updates), conditions)| {
            Statement::Update(table, updates, conditions.unwrap_or_default())
        });

    let load_data = just("LOAD")
        .padded()
        .ignore_then(just("DATA").padded())
        .ignore_then(just("INFILE").padded())
        .ignore_then(quoted())
        .then_ignore(just("INTO").padded())
        .then_ignore(just("TABLE").padded())
        .then(name())
        .then_ignore(just("FIELDS").padded())
        .then_ignore(just("TERMINATED").padded())
        .then_ignore(just("BY").padded())
        .then(quoted())
        .try_map(|((path, table), delim), span| {
            let delimiter = delim
                .chars()
                .next()
                .ok_or_else(|| Rich::custom(span, "empty field delimiter"))?;
            Ok(Statement::LoadData(path, table, delimiter))
        });

    let alter_table = just("ALTER")
        .padded()
        .ignore_then(just("TABLE").padded())
        .ignore_then(name())
        .boxed();

    let add_index = alter_table
        .clone()
        .then_ignore(just("ADD").padded())
        .then_ignore(just("INDEX").padded())
        .then(name().or_not())
        .then(name_list())
        .map(|((table, index_name), columns)| Statement::AddIndex(table, index_name, columns));

    let drop_index = alter_table
        .clone()
        .then_ignore(just("DROP").padded())
        .then_ignore(just("INDEX").padded())
        .then(name())
        .map(|(table, index_name)| Statement::DropIndex(table, index_name));

    let add_primary_key = alter_table
        .clone()
        .then_ignore(just("ADD").padded())
        .then_ignore(just("PRIMARY").padded())
        .then_ignore(just("KEY").padded())
        .then(name_list())
        .map(|(table, columns)| Statement::AddPrimaryKey(table, columns));

    let drop_primary_key = alter_table
        .clone()
        .then_ignore(just("DROP").padded())
        .then_ignore(just("PRIMARY").padded())
        .then_ignore(just("KEY").padded())
        .then_ignore(name().or_not())
        .map(Statement::DropPrimaryKey);

    let add_foreign_key = alter_table
        .clone()
        .then_ignore(just("ADD").padded())
        .then_ignore(just("FOREIGN").padded())
        .then_ignore(just("KEY").padded())
        .then(name().or_not())
        .then(name_list())
        .then_ignore(just("REFERENCES").padded())
        .then(name())
        .then(name_list())
        .try_map(|((((table, fk_name), columns), ref_table), ref_columns), span| {
            if columns.len() != ref_columns.len() {
                return Err(Rich::custom(
                    span,
                    format!(
                        "foreign key has {} columns but references {}",
                        columns.len(),
                        ref_columns.len()
                    ),
                ));
            }
            Ok(Statement::AddForeignKey(
                table,
                fk_name,
                columns,
                ref_table,
                ref_columns,
            ))
        });

    let drop_foreign_key = alter_table
        .clone()
        .then_ignore(just("DROP").padded())
        .then_ignore(just("FOREIGN").padded())
        .then_ignore(just("KEY").padded())
        .then(name())
        .map(|(table, fk_name)| Statement::DropForeignKey(table, fk_name));

    let add_unique = alter_table
        .then_ignore(just("ADD").padded())
        .then_ignore(just("UNIQUE").padded())
        .then(name().or_not())
        .then(name_list())
        .map(|((table, index_name), columns)| Statement::AddUnique(table, index_name, columns));

    choice((
        create_database,
        create_table,
        drop_database,
        drop_table,
        show,
        use_database,
        describe,
        insert,
        delete,
        update,
        load_data,
        select_query().map(Statement::Select),
        add_index,
        drop_index,
        add_primary_key,
        drop_primary_key,
        add_foreign_key,
        drop_foreign_key,
        add_unique,
    ))
}

pub fn parser<'a>() -> impl Parser<'a, &'a str, Vec<Statement>, Err<'a>> {
    statement()
        .padded()
        .then_ignore(just(';').padded())
        .repeated()
        .collect()
        .then_ignore(end())
}
