use super::*;
use crate::sql;
use tempfile::TempDir;

fn setup() -> (TempDir, DatabaseManager) {
    let temp_dir = TempDir::new().unwrap();
    let manager = DatabaseManager::new(temp_dir.path().to_str().unwrap()).unwrap();
    (temp_dir, manager)
}

/// Run one statement of SQL text.
fn exec(db: &mut DatabaseManager, text: &str) -> DatabaseResult<QueryResult> {
    let mut statements = sql::parse(text).expect("statement should parse");
    assert_eq!(statements.len(), 1, "exec() takes a single statement");
    db.execute(statements.remove(0))
}

/// Run a script, asserting every statement succeeds.
fn exec_all(db: &mut DatabaseManager, text: &str) {
    for statement in sql::parse(text).expect("script should parse") {
        if let Err(err) = db.execute(statement) {
            panic!("statement failed: {}", err);
        }
    }
}

fn result_rows(result: QueryResult) -> Vec<Vec<String>> {
    match result {
        QueryResult::ResultSet(_, rows) => rows,
        other => panic!("expected a result set, got {:?}", other),
    }
}

fn single_cell(result: QueryResult) -> String {
    let rows = result_rows(result);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].len(), 1);
    rows[0][0].clone()
}

#[test]
fn test_database_lifecycle_and_errors() {
    let (_temp, mut db) = setup();

    assert!(matches!(
        exec(&mut db, "CREATE TABLE t (id INT);"),
        Err(DatabaseError::NoDatabaseSelected)
    ));

    exec_all(&mut db, "CREATE DATABASE d1; CREATE DATABASE d2;");
    assert!(matches!(
        exec(&mut db, "CREATE DATABASE d1;"),
        Err(DatabaseError::DatabaseExists(_))
    ));
    assert!(matches!(
        exec(&mut db, "USE nope;"),
        Err(DatabaseError::DatabaseNotFound(_))
    ));

    let rows = result_rows(exec(&mut db, "SHOW DATABASES;").unwrap());
    assert_eq!(rows, vec![vec!["d1".to_string()], vec!["d2".to_string()]]);

    exec_all(&mut db, "USE d1; DROP DATABASE d1;");
    assert_eq!(db.current_database(), None);
}

#[test]
fn test_tiny_lifecycle() {
    let (_temp, mut db) = setup();
    exec_all(
        &mut db,
        "CREATE DATABASE d; USE d;
         CREATE TABLE t (id INT NOT NULL, n VARCHAR(8), PRIMARY KEY (id));
         INSERT INTO t VALUES (1,'a'),(2,'b'),(3,'c');",
    );

    let rows = result_rows(exec(&mut db, "SELECT n FROM t WHERE id = 2;").unwrap());
    assert_eq!(rows, vec![vec!["b".to_string()]]);

    match exec(&mut db, "DELETE FROM t WHERE id = 2;").unwrap() {
        QueryResult::RowsAffected(n) => assert_eq!(n, 1),
        other => panic!("unexpected result {:?}", other),
    }
    assert_eq!(single_cell(exec(&mut db, "SELECT COUNT(*) FROM t;").unwrap()), "2");

    let rows = result_rows(exec(&mut db, "SELECT n FROM t WHERE id = 2;").unwrap());
    assert!(rows.is_empty());
}

#[test]
fn test_primary_key_duplicate_aborts_remaining_rows() {
    let (_temp, mut db) = setup();
    exec_all(
        &mut db,
        "CREATE DATABASE d; USE d; CREATE TABLE u (id INT, PRIMARY KEY (id));",
    );

    let result = exec(&mut db, "INSERT INTO u VALUES (1),(1);");
    assert!(matches!(result, Err(DatabaseError::ConstraintViolation(_))));

    // the first row stays inserted
    assert_eq!(single_cell(exec(&mut db, "SELECT COUNT(*) FROM u;").unwrap()), "1");

    assert!(matches!(
        exec(&mut db, "INSERT INTO u VALUES (1);"),
        Err(DatabaseError::ConstraintViolation(_))
    ));
    assert!(exec(&mut db, "INSERT INTO u VALUES (2);").is_ok());
}

#[test]
fn test_foreign_key_refusal() {
    let (_temp, mut db) = setup();
    exec_all(
        &mut db,
        "CREATE DATABASE d; USE d;
         CREATE TABLE p (id INT, PRIMARY KEY (id));
         CREATE TABLE c (id INT, pid INT, FOREIGN KEY (pid) REFERENCES p (id));
         INSERT INTO p VALUES (10);
         INSERT INTO c VALUES (1, 10);",
    );

    // deleting a referenced parent is refused and leaves both tables alone
    assert!(matches!(
        exec(&mut db, "DELETE FROM p WHERE id = 10;"),
        Err(DatabaseError::ConstraintViolation(_))
    ));
    assert_eq!(single_cell(exec(&mut db, "SELECT COUNT(*) FROM p;").unwrap()), "1");
    assert_eq!(single_cell(exec(&mut db, "SELECT COUNT(*) FROM c;").unwrap()), "1");

    // a child without a parent is refused
    assert!(matches!(
        exec(&mut db, "INSERT INTO c VALUES (2, 99);"),
        Err(DatabaseError::ConstraintViolation(_))
    ));

    // a null foreign key is exempt
    assert!(exec(&mut db, "INSERT INTO c VALUES (3, NULL);").is_ok());

    // once the child rows are gone the parent can go
    exec_all(&mut db, "DELETE FROM c; DELETE FROM p WHERE id = 10;");
    assert_eq!(single_cell(exec(&mut db, "SELECT COUNT(*) FROM p;").unwrap()), "0");
}

#[test]
fn test_range_scan_on_primary_key() {
    let (_temp, mut db) = setup();
    exec_all(
        &mut db,
        "CREATE DATABASE d; USE d; CREATE TABLE r (k INT, PRIMARY KEY (k));",
    );

    let rows: Vec<Vec<Literal>> = (1..=1000).map(|k| vec![Literal::Integer(k)]).collect();
    assert_eq!(db.insert("r", rows).unwrap(), 1000);

    assert_eq!(
        single_cell(exec(&mut db, "SELECT COUNT(*) FROM r WHERE k >= 100 AND k <= 200;").unwrap()),
        "101"
    );
    assert_eq!(
        single_cell(exec(&mut db, "SELECT COUNT(*) FROM r WHERE k > 990;").unwrap()),
        "9"
    );
    assert_eq!(
        single_cell(exec(&mut db, "SELECT COUNT(*) FROM r WHERE k = 500;").unwrap()),
        "1"
    );
    assert_eq!(
        single_cell(exec(&mut db, "SELECT COUNT(*) FROM r WHERE k < 1;").unwrap()),
        "0"
    );

    // point select through the probe returns the row itself
    let rows = result_rows(exec(&mut db, "SELECT k FROM r WHERE k = 77;").unwrap());
    assert_eq!(rows, vec![vec!["77".to_string()]]);
}

#[test]
fn test_aggregates_with_group_by() {
    let (_temp, mut db) = setup();
    exec_all(
        &mut db,
        "CREATE DATABASE d; USE d; CREATE TABLE s (g INT, v INT);
         INSERT INTO s VALUES (1,10),(1,20),(2,5),(2,NULL);",
    );

    let mut rows = result_rows(
        exec(&mut db, "SELECT g, SUM(v), COUNT(v) FROM s GROUP BY g;").unwrap(),
    );
    rows.sort();
    assert_eq!(
        rows,
        vec![
            vec!["1".to_string(), "30".to_string(), "2".to_string()],
            vec!["2".to_string(), "5".to_string(), "1".to_string()],
        ]
    );

    // COUNT(*) counts rows, COUNT(v) skips nulls
    let rows = result_rows(exec(&mut db, "SELECT COUNT(*), COUNT(v) FROM s;").unwrap());
    assert_eq!(rows, vec![vec!["4".to_string(), "3".to_string()]]);

    let rows = result_rows(
        exec(&mut db, "SELECT MIN(v), MAX(v), AVG(v) FROM s;").unwrap(),
    );
    assert_eq!(
        rows,
        vec![vec!["5".to_string(), "20".to_string(), "11.67".to_string()]]
    );

    // aggregates over an empty selection
    let rows = result_rows(
        exec(&mut db, "SELECT SUM(v), AVG(v), MIN(v), COUNT(v) FROM s WHERE g = 9;").unwrap(),
    );
    assert_eq!(
        rows,
        vec![vec![
            "NULL".to_string(),
            "NULL".to_string(),
            "NULL".to_string(),
            "0".to_string()
        ]]
    );
}

#[test]
fn test_count_star_matches_streamed_count() {
    let (_temp, mut db) = setup();
    exec_all(&mut db, "CREATE DATABASE d; USE d; CREATE TABLE t (a INT, b INT);");

    let rows: Vec<Vec<Literal>> = (0..500)
        .map(|i| vec![Literal::Integer(i), Literal::Integer(i % 7)])
        .collect();
    db.insert("t", rows).unwrap();
    exec(&mut db, "DELETE FROM t WHERE b = 3;").unwrap();

    let fast = single_cell(exec(&mut db, "SELECT COUNT(*) FROM t;").unwrap());
    let streamed = result_rows(exec(&mut db, "SELECT a FROM t;").unwrap()).len();
    assert_eq!(fast, streamed.to_string());
}

#[test]
fn test_sum_integer_stays_integral_and_float_formats() {
    let (_temp, mut db) = setup();
    exec_all(
        &mut db,
        "CREATE DATABASE d; USE d; CREATE TABLE m (i INT, f FLOAT);
         INSERT INTO m VALUES (1, 1.5), (2, 2.25);",
    );

    let rows = result_rows(exec(&mut db, "SELECT SUM(i), SUM(f) FROM m;").unwrap());
    assert_eq!(rows, vec![vec!["3".to_string(), "3.75".to_string()]]);

    // floats always render with two decimals
    let rows = result_rows(exec(&mut db, "SELECT f FROM m WHERE i = 1;").unwrap());
    assert_eq!(rows, vec![vec!["1.50".to_string()]]);

    // integer literals promote into FLOAT columns
    exec(&mut db, "INSERT INTO m VALUES (3, 4);").unwrap();
    let rows = result_rows(exec(&mut db, "SELECT f FROM m WHERE i = 3;").unwrap());
    assert_eq!(rows, vec![vec!["4.00".to_string()]]);

    // but a float literal does not squeeze into an INT column
    assert!(matches!(
        exec(&mut db, "INSERT INTO m VALUES (1.5, 1.0);"),
        Err(DatabaseError::SchemaMismatch(_))
    ));
}

#[test]
fn test_predicates_like_in_null() {
    let (_temp, mut db) = setup();
    exec_all(
        &mut db,
        "CREATE DATABASE d; USE d; CREATE TABLE w (id INT, name VARCHAR(16));
         INSERT INTO w VALUES (1,'Alice'),(2,'bob'),(3,'ALINA'),(4,NULL),(5,'carol');",
    );

    // LIKE is case-insensitive; % and _ are wildcards
    let rows = result_rows(exec(&mut db, "SELECT id FROM w WHERE name LIKE 'al%';").unwrap());
    assert_eq!(rows, vec![vec!["1".to_string()], vec!["3".to_string()]]);
    let rows = result_rows(exec(&mut db, "SELECT id FROM w WHERE name LIKE 'b_b';").unwrap());
    assert_eq!(rows, vec![vec!["2".to_string()]]);

    let rows = result_rows(exec(&mut db, "SELECT id FROM w WHERE id IN (2, 4, 9);").unwrap());
    assert_eq!(rows, vec![vec!["2".to_string()], vec!["4".to_string()]]);

    let rows = result_rows(exec(&mut db, "SELECT id FROM w WHERE name IS NULL;").unwrap());
    assert_eq!(rows, vec![vec!["4".to_string()]]);
    let rows = result_rows(exec(&mut db, "SELECT COUNT(*) FROM w WHERE name IS NOT NULL;").unwrap());
    assert_eq!(rows, vec![vec!["4".to_string()]]);

    // comparisons against null are false, not unknown
    let rows = result_rows(exec(&mut db, "SELECT id FROM w WHERE name = 'x';").unwrap());
    assert!(rows.is_empty());
}

#[test]
fn test_order_by_limit_offset() {
    let (_temp, mut db) = setup();
    exec_all(
        &mut db,
        "CREATE DATABASE d; USE d; CREATE TABLE o (id INT, v INT);
         INSERT INTO o VALUES (1, 30), (2, 10), (3, NULL), (4, 20);",
    );

    let rows = result_rows(exec(&mut db, "SELECT id FROM o ORDER BY v;").unwrap());
    // null sorts below every non-null value
    assert_eq!(
        rows,
        vec![
            vec!["3".to_string()],
            vec!["2".to_string()],
            vec!["4".to_string()],
            vec!["1".to_string()]
        ]
    );

    let rows = result_rows(
        exec(&mut db, "SELECT id FROM o ORDER BY v DESC LIMIT 2 OFFSET 1;").unwrap(),
    );
    assert_eq!(rows, vec![vec!["4".to_string()], vec!["2".to_string()]]);

    let rows = result_rows(exec(&mut db, "SELECT id FROM o ORDER BY v LIMIT 0;").unwrap());
    assert!(rows.is_empty());
}

#[test]
fn test_update_rows_and_indexes() {
    let (_temp, mut db) = setup();
    exec_all(
        &mut db,
        "CREATE DATABASE d; USE d;
         CREATE TABLE t (id INT, v VARCHAR(8), PRIMARY KEY (id));
         INSERT INTO t VALUES (1,'a'),(2,'b'),(3,'c');",
    );

    match exec(&mut db, "UPDATE t SET v = 'z' WHERE id >= 2;").unwrap() {
        QueryResult::RowsAffected(n) => assert_eq!(n, 2),
        other => panic!("unexpected result {:?}", other),
    }
    let rows = result_rows(exec(&mut db, "SELECT v FROM t WHERE id = 3;").unwrap());
    assert_eq!(rows, vec![vec!["z".to_string()]]);

    // moving a primary key re-points the index
    exec(&mut db, "UPDATE t SET id = 9 WHERE id = 1;").unwrap();
    let rows = result_rows(exec(&mut db, "SELECT v FROM t WHERE id = 9;").unwrap());
    assert_eq!(rows, vec![vec!["a".to_string()]]);
    assert!(result_rows(exec(&mut db, "SELECT v FROM t WHERE id = 1;").unwrap()).is_empty());

    // onto an existing key it is refused
    assert!(matches!(
        exec(&mut db, "UPDATE t SET id = 2 WHERE id = 9;"),
        Err(DatabaseError::ConstraintViolation(_))
    ));

    // updates that change a referenced parent key are refused
    exec_all(
        &mut db,
        "CREATE TABLE ch (pid INT, FOREIGN KEY (pid) REFERENCES t (id));
         INSERT INTO ch VALUES (2);",
    );
    assert!(matches!(
        exec(&mut db, "UPDATE t SET id = 5 WHERE id = 2;"),
        Err(DatabaseError::ConstraintViolation(_))
    ));

    // updating a child to a dangling parent is refused
    assert!(matches!(
        exec(&mut db, "UPDATE ch SET pid = 77 WHERE pid = 2;"),
        Err(DatabaseError::ConstraintViolation(_))
    ));
}

#[test]
fn test_not_null_enforced_on_insert_and_update() {
    let (_temp, mut db) = setup();
    exec_all(
        &mut db,
        "CREATE DATABASE d; USE d; CREATE TABLE t (id INT NOT NULL, v INT);
         INSERT INTO t VALUES (1, NULL);",
    );

    assert!(matches!(
        exec(&mut db, "INSERT INTO t VALUES (NULL, 5);"),
        Err(DatabaseError::ConstraintViolation(_))
    ));
    assert!(matches!(
        exec(&mut db, "UPDATE t SET id = NULL WHERE id = 1;"),
        Err(DatabaseError::ConstraintViolation(_))
    ));
}

#[test]
fn test_varchar_truncated_at_insert() {
    let (_temp, mut db) = setup();
    exec_all(
        &mut db,
        "CREATE DATABASE d; USE d; CREATE TABLE t (id INT, s VARCHAR(4));
         INSERT INTO t VALUES (1, 'abcdefgh');",
    );

    let rows = result_rows(exec(&mut db, "SELECT s FROM t;").unwrap());
    assert_eq!(rows, vec![vec!["abcd".to_string()]]);
}

#[test]
fn test_join_two_tables() {
    let (_temp, mut db) = setup();
    exec_all(
        &mut db,
        "CREATE DATABASE d; USE d;
         CREATE TABLE dept (did INT, dname VARCHAR(12), PRIMARY KEY (did));
         CREATE TABLE emp (eid INT, name VARCHAR(12), did INT, PRIMARY KEY (eid));
         INSERT INTO dept VALUES (1,'eng'),(2,'ops');
         INSERT INTO emp VALUES (10,'ann',1),(11,'ben',2),(12,'cal',1);",
    );

    let mut rows = result_rows(
        exec(
            &mut db,
            "SELECT name, dname FROM emp, dept WHERE emp.did = dept.did;",
        )
        .unwrap(),
    );
    rows.sort();
    assert_eq!(
        rows,
        vec![
            vec!["ann".to_string(), "eng".to_string()],
            vec!["ben".to_string(), "ops".to_string()],
            vec!["cal".to_string(), "eng".to_string()],
        ]
    );

    // unqualified column names resolve in FROM order
    let mut rows = result_rows(
        exec(
            &mut db,
            "SELECT eid FROM emp, dept WHERE emp.did = dept.did AND dname = 'eng';",
        )
        .unwrap(),
    );
    rows.sort();
    assert_eq!(rows, vec![vec!["10".to_string()], vec!["12".to_string()]]);

    // aggregates run over the materialized join output
    let mut rows = result_rows(
        exec(
            &mut db,
            "SELECT dname, COUNT(*) FROM emp, dept WHERE emp.did = dept.did GROUP BY dname;",
        )
        .unwrap(),
    );
    rows.sort();
    assert_eq!(
        rows,
        vec![
            vec!["eng".to_string(), "2".to_string()],
            vec!["ops".to_string(), "1".to_string()],
        ]
    );
}

#[test]
fn test_three_way_join() {
    let (_temp, mut db) = setup();
    exec_all(
        &mut db,
        "CREATE DATABASE d; USE d;
         CREATE TABLE a (x INT); CREATE TABLE b (y INT); CREATE TABLE c (z INT);
         INSERT INTO a VALUES (1),(2);
         INSERT INTO b VALUES (1),(2);
         INSERT INTO c VALUES (2);",
    );

    let rows = result_rows(
        exec(&mut db, "SELECT x, y, z FROM a, b, c WHERE x = y AND y = z;").unwrap(),
    );
    assert_eq!(
        rows,
        vec![vec!["2".to_string(), "2".to_string(), "2".to_string()]]
    );

    // an empty table collapses the product
    exec(&mut db, "DELETE FROM c;").unwrap();
    let rows = result_rows(exec(&mut db, "SELECT x FROM a, c;").unwrap());
    assert!(rows.is_empty());
}

#[test]
fn test_load_data_from_csv() {
    let (temp, mut db) = setup();
    exec_all(
        &mut db,
        "CREATE DATABASE d; USE d;
         CREATE TABLE t (id INT, name VARCHAR(8), score FLOAT, PRIMARY KEY (id));",
    );

    let csv_path = temp.path().join("rows.csv");
    std::fs::write(
        &csv_path,
        "1,ann,3.5\n2,NULL,1.25\n3,cal\n4,dee,oops\n",
    )
    .unwrap();

    let statement = format!(
        "LOAD DATA INFILE '{}' INTO TABLE t FIELDS TERMINATED BY ',';",
        csv_path.display()
    );
    match exec(&mut db, &statement).unwrap() {
        QueryResult::RowsAffected(n) => assert_eq!(n, 4),
        other => panic!("unexpected result {:?}", other),
    }

    // the literal NULL and a missing trailing field both load as null,
    // and an unparseable float does too
    assert_eq!(single_cell(exec(&mut db, "SELECT COUNT(*) FROM t;").unwrap()), "4");
    assert_eq!(
        single_cell(exec(&mut db, "SELECT COUNT(name) FROM t;").unwrap()),
        "3"
    );
    assert_eq!(
        single_cell(exec(&mut db, "SELECT COUNT(score) FROM t;").unwrap()),
        "2"
    );

    // loaded rows went through the normal insert path: the index works
    let rows = result_rows(exec(&mut db, "SELECT name FROM t WHERE id = 3;").unwrap());
    assert_eq!(rows, vec![vec!["cal".to_string()]]);

    // and primary-key checks applied: a duplicate id in a second load fails
    let dup_path = temp.path().join("dup.csv");
    std::fs::write(&dup_path, "9,zed,0.5\n1,bad,0.5\n").unwrap();
    let statement = format!(
        "LOAD DATA INFILE '{}' INTO TABLE t FIELDS TERMINATED BY ',';",
        dup_path.display()
    );
    assert!(matches!(
        exec(&mut db, &statement),
        Err(DatabaseError::ConstraintViolation(_))
    ));
    // rows before the failure stay
    assert_eq!(single_cell(exec(&mut db, "SELECT COUNT(*) FROM t;").unwrap()), "5");
}

#[test]
fn test_alter_index_lifecycle() {
    let (temp, mut db) = setup();
    exec_all(
        &mut db,
        "CREATE DATABASE d; USE d;
         CREATE TABLE t (id INT, v INT, PRIMARY KEY (id));
         INSERT INTO t VALUES (1, 100), (2, 200);",
    );

    exec(&mut db, "ALTER TABLE t ADD INDEX idx_v (v);").unwrap();
    assert!(temp.path().join("d/t_v.idx").exists());

    let rows = result_rows(exec(&mut db, "SHOW INDEXES;").unwrap());
    assert!(rows.contains(&vec!["t".to_string(), "v".to_string()]));
    assert!(rows.contains(&vec!["t".to_string(), "id".to_string()]));

    assert!(matches!(
        exec(&mut db, "ALTER TABLE t ADD INDEX idx_v (v);"),
        Err(DatabaseError::IndexExists(_))
    ));

    exec(&mut db, "ALTER TABLE t DROP INDEX idx_v;").unwrap();
    assert!(!temp.path().join("d/t_v.idx").exists());
    assert!(matches!(
        exec(&mut db, "ALTER TABLE t DROP INDEX idx_v;"),
        Err(DatabaseError::IndexNotFound(_))
    ));

    // the implicit primary-key index is not an explicit one to drop, and
    // dropping the primary key leaves its index file behind
    exec(&mut db, "ALTER TABLE t DROP PRIMARY KEY;").unwrap();
    assert!(temp.path().join("d/t_id.idx").exists());
    assert!(matches!(
        exec(&mut db, "ALTER TABLE t DROP PRIMARY KEY;"),
        Err(DatabaseError::ConstraintViolation(_))
    ));
}

#[test]
fn test_alter_add_primary_key_verifies_data() {
    let (_temp, mut db) = setup();
    exec_all(
        &mut db,
        "CREATE DATABASE d; USE d; CREATE TABLE t (id INT, v INT);
         INSERT INTO t VALUES (1, 1), (1, 2);",
    );

    assert!(matches!(
        exec(&mut db, "ALTER TABLE t ADD PRIMARY KEY (id);"),
        Err(DatabaseError::ConstraintViolation(_))
    ));

    exec(&mut db, "DELETE FROM t WHERE v = 2;").unwrap();
    exec(&mut db, "ALTER TABLE t ADD PRIMARY KEY (id);").unwrap();

    // the key is now enforced, backed by a fresh implicit index
    assert!(matches!(
        exec(&mut db, "INSERT INTO t VALUES (1, 3);"),
        Err(DatabaseError::ConstraintViolation(_))
    ));
    exec(&mut db, "INSERT INTO t VALUES (2, 3);").unwrap();
}

#[test]
fn test_alter_add_foreign_key_verifies_data() {
    let (_temp, mut db) = setup();
    exec_all(
        &mut db,
        "CREATE DATABASE d; USE d;
         CREATE TABLE p (id INT, PRIMARY KEY (id));
         CREATE TABLE c (pid INT);
         INSERT INTO p VALUES (1);
         INSERT INTO c VALUES (1), (2);",
    );

    // a dangling existing row blocks the constraint
    assert!(matches!(
        exec(&mut db, "ALTER TABLE c ADD FOREIGN KEY fk_cp (pid) REFERENCES p (id);"),
        Err(DatabaseError::ConstraintViolation(_))
    ));

    exec(&mut db, "DELETE FROM c WHERE pid = 2;").unwrap();
    exec(&mut db, "ALTER TABLE c ADD FOREIGN KEY fk_cp (pid) REFERENCES p (id);").unwrap();

    assert!(matches!(
        exec(&mut db, "INSERT INTO c VALUES (7);"),
        Err(DatabaseError::ConstraintViolation(_))
    ));

    exec(&mut db, "ALTER TABLE c DROP FOREIGN KEY fk_cp;").unwrap();
    exec(&mut db, "INSERT INTO c VALUES (7);").unwrap();
}

#[test]
fn test_alter_add_unique_enforced() {
    let (_temp, mut db) = setup();
    exec_all(
        &mut db,
        "CREATE DATABASE d; USE d; CREATE TABLE t (id INT, mail VARCHAR(24), PRIMARY KEY (id));
         INSERT INTO t VALUES (1,'a@x'),(2,'b@x'),(3,'a@x');",
    );

    // existing duplicates block the constraint
    assert!(matches!(
        exec(&mut db, "ALTER TABLE t ADD UNIQUE (mail);"),
        Err(DatabaseError::ConstraintViolation(_))
    ));

    exec(&mut db, "DELETE FROM t WHERE id = 3;").unwrap();
    exec(&mut db, "ALTER TABLE t ADD UNIQUE (mail);").unwrap();

    assert!(matches!(
        exec(&mut db, "INSERT INTO t VALUES (4,'a@x');"),
        Err(DatabaseError::ConstraintViolation(_))
    ));
    exec(&mut db, "INSERT INTO t VALUES (4,'c@x');").unwrap();
    assert!(matches!(
        exec(&mut db, "UPDATE t SET mail = 'b@x' WHERE id = 4;"),
        Err(DatabaseError::ConstraintViolation(_))
    ));
}

#[test]
fn test_schema_round_trip_across_switches() {
    let (_temp, mut db) = setup();
    exec_all(
        &mut db,
        "CREATE DATABASE main; CREATE DATABASE other; USE main;
         CREATE TABLE parent (pid INT, PRIMARY KEY (pid));
         CREATE TABLE t (
            id INT NOT NULL,
            label VARCHAR(20) DEFAULT 'none',
            score FLOAT,
            pid INT,
            PRIMARY KEY (id),
            FOREIGN KEY fk_parent (pid) REFERENCES parent (pid)
         );
         ALTER TABLE t ADD INDEX idx_score (score);
         ALTER TABLE t ADD INDEX idx_label (label);
         INSERT INTO parent VALUES (7);
         INSERT INTO t VALUES (1, 'x', 2.5, 7);",
    );

    // two switches force a flush and a reload from the .meta text
    exec_all(&mut db, "USE other; USE main;");

    let QueryResult::TableDescription(meta) = exec(&mut db, "DESC t;").unwrap() else {
        panic!("expected a table description");
    };
    assert_eq!(meta.columns.len(), 4);
    assert_eq!(meta.columns[0].name, "id");
    assert!(meta.columns[0].not_null);
    assert_eq!(meta.columns[1].data_type, DataType::Varchar(20));
    assert_eq!(
        meta.columns[1].default_value,
        Some(Value::String("none".to_string()))
    );
    assert_eq!(meta.columns[2].data_type, DataType::Float);
    assert_eq!(meta.primary_key, vec!["id".to_string()]);
    assert_eq!(meta.foreign_keys.len(), 1);
    assert_eq!(meta.foreign_keys[0].name, "fk_parent");
    assert_eq!(meta.foreign_keys[0].ref_table, "parent");
    assert_eq!(meta.explicit_indexes.len(), 2);
    assert_eq!(meta.record_count, 1);
    assert_eq!(meta.next_record_id, 2);
    let mut indexed = meta.indexes.clone();
    indexed.sort();
    assert_eq!(indexed, vec!["id", "label", "score"]);

    // data survived the switches and constraints still bind
    let rows = result_rows(exec(&mut db, "SELECT label FROM t WHERE id = 1;").unwrap());
    assert_eq!(rows, vec![vec!["x".to_string()]]);
    assert!(matches!(
        exec(&mut db, "INSERT INTO t VALUES (2, 'y', 0.0, 99);"),
        Err(DatabaseError::ConstraintViolation(_))
    ));
}

#[test]
fn test_data_survives_manager_restart() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().to_str().unwrap().to_string();

    {
        let mut db = DatabaseManager::new(&dir).unwrap();
        exec_all(
            &mut db,
            "CREATE DATABASE d; USE d;
             CREATE TABLE t (id INT, v VARCHAR(8), PRIMARY KEY (id));
             INSERT INTO t VALUES (1,'one'),(2,'two');",
        );
        db.flush().unwrap();
    }

    let mut db = DatabaseManager::new(&dir).unwrap();
    exec(&mut db, "USE d;").unwrap();
    let rows = result_rows(exec(&mut db, "SELECT v FROM t WHERE id = 2;").unwrap());
    assert_eq!(rows, vec![vec!["two".to_string()]]);
    assert_eq!(single_cell(exec(&mut db, "SELECT COUNT(*) FROM t;").unwrap()), "2");

    // the monotonic slot counter carried over: new inserts do not collide
    exec(&mut db, "INSERT INTO t VALUES (3,'three');").unwrap();
    assert_eq!(single_cell(exec(&mut db, "SELECT COUNT(*) FROM t;").unwrap()), "3");
}

#[test]
fn test_drop_table_removes_files() {
    let (temp, mut db) = setup();
    exec_all(
        &mut db,
        "CREATE DATABASE d; USE d; CREATE TABLE t (id INT, PRIMARY KEY (id));
         INSERT INTO t VALUES (1);",
    );
    assert!(temp.path().join("d/t.dat").exists());
    assert!(temp.path().join("d/t_id.idx").exists());
    assert!(temp.path().join("d/t.meta").exists());

    exec(&mut db, "DROP TABLE t;").unwrap();
    assert!(!temp.path().join("d/t.dat").exists());
    assert!(!temp.path().join("d/t_id.idx").exists());
    assert!(!temp.path().join("d/t.meta").exists());
    assert!(matches!(
        exec(&mut db, "SELECT * FROM t;"),
        Err(DatabaseError::TableNotFound(_))
    ));
}

#[test]
fn test_select_star_and_column_projection() {
    let (_temp, mut db) = setup();
    exec_all(
        &mut db,
        "CREATE DATABASE d; USE d; CREATE TABLE t (a INT, b VARCHAR(4), c FLOAT);
         INSERT INTO t VALUES (1,'x',0.5);",
    );

    match exec(&mut db, "SELECT * FROM t;").unwrap() {
        QueryResult::ResultSet(headers, rows) => {
            assert_eq!(headers, vec!["a", "b", "c"]);
            assert_eq!(
                rows,
                vec![vec!["1".to_string(), "x".to_string(), "0.50".to_string()]]
            );
        }
        other => panic!("unexpected result {:?}", other),
    }

    match exec(&mut db, "SELECT c, a FROM t;").unwrap() {
        QueryResult::ResultSet(headers, rows) => {
            assert_eq!(headers, vec!["c", "a"]);
            assert_eq!(rows, vec![vec!["0.50".to_string(), "1".to_string()]]);
        }
        other => panic!("unexpected result {:?}", other),
    }

    assert!(matches!(
        exec(&mut db, "SELECT nope FROM t;"),
        Err(DatabaseError::ColumnNotFound(..))
    ));
}

#[test]
fn test_duplicate_column_rejected() {
    let (_temp, mut db) = setup();
    exec_all(&mut db, "CREATE DATABASE d; USE d;");
    assert!(matches!(
        exec(&mut db, "CREATE TABLE t (a INT, a FLOAT);"),
        Err(DatabaseError::DuplicateColumn(_))
    ));
}

#[test]
fn test_varchar_primary_key_probe() {
    let (_temp, mut db) = setup();
    exec_all(
        &mut db,
        "CREATE DATABASE d; USE d;
         CREATE TABLE u (code VARCHAR(8), v INT, PRIMARY KEY (code));
         INSERT INTO u VALUES ('kk', 1), ('aa', 2), ('zz', 3);",
    );

    let rows = result_rows(exec(&mut db, "SELECT v FROM u WHERE code = 'aa';").unwrap());
    assert_eq!(rows, vec![vec!["2".to_string()]]);

    // byte-lexicographic range over the string key
    let rows = result_rows(
        exec(&mut db, "SELECT COUNT(*) FROM u WHERE code >= 'aa' AND code <= 'kk';").unwrap(),
    );
    assert_eq!(rows, vec![vec!["2".to_string()]]);

    assert!(matches!(
        exec(&mut db, "INSERT INTO u VALUES ('aa', 9);"),
        Err(DatabaseError::ConstraintViolation(_))
    ));
}
