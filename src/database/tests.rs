use super::*;
use crate::insert::InsertOption;
use crate::record::{ColumnConstraint, ColumnScheme, SqlValueType, Value};
use std::thread;
use tempfile::TempDir;

fn setup_test_db() -> (TempDir, Database) {
    setup_with(|_| {})
}

fn setup_with(configure: impl FnOnce(&mut EngineConfig)) -> (TempDir, Database) {
    let temp_dir = TempDir::new().unwrap();
    let mut config = EngineConfig::new(temp_dir.path(), "testdb");
    configure(&mut config);
    let db = Database::open(config).unwrap();
    (temp_dir, db)
}

fn create_people(db: &Database) {
    db.create_table(TableScheme::new(
        "people",
        vec![
            ColumnScheme::new(
                "id",
                SqlValueType::Integer,
                &[ColumnConstraint::PrimaryKey, ColumnConstraint::AutoIncrement],
            ),
            ColumnScheme::new("name", SqlValueType::String, &[ColumnConstraint::NotNull]),
            ColumnScheme::new("score", SqlValueType::Float, &[]),
        ],
    ))
    .unwrap();
}

fn create_letters(db: &Database) {
    db.create_table(TableScheme::new(
        "letters",
        vec![ColumnScheme::new("name", SqlValueType::String, &[])],
    ))
    .unwrap();
}

fn insert_person(db: &Database, name: &str, score: Option<&str>) -> InsertOutcome {
    db.insert("people", &["name", "score"], &[Some(name), score])
        .unwrap()
}

/// Write a `letters` page directly, one row per name
fn write_letters_page(db: &Database, sequence: u32, names: &[&str]) -> PageFile {
    let scheme = db.scheme("letters").unwrap();
    let dir = db.catalog.read().table_dir("letters");
    let page = PageFile::create(&dir, "letters", sequence).unwrap();

    let mut header = PageHeader::new(sequence);
    header.rows_count = names.len() as u32;
    let mut bytes = header.serialize();
    for (id, name) in names.iter().enumerate() {
        PageRow::new(id as u32, vec![Some(Value::String(name.to_string()))])
            .write_to(&mut bytes, &scheme, None)
            .unwrap();
    }
    std::fs::write(page.path(), bytes).unwrap();
    page
}

fn string_column(rows: &[PageRow], idx: usize) -> Vec<String> {
    rows.iter()
        .map(|r| r.values[idx].as_ref().map(|v| v.to_string()).unwrap_or_default())
        .collect()
}

#[test]
fn test_create_table_and_reopen() {
    let (temp, db) = setup_test_db();
    create_people(&db);
    assert_eq!(db.tables(), vec!["people"]);

    let err = db
        .create_table(TableScheme::new(
            "people",
            vec![ColumnScheme::new("x", SqlValueType::Integer, &[])],
        ))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TableAlreadyExists);

    insert_person(&db, "Ann", Some("1.5"));
    drop(db);

    let db = Database::open(EngineConfig::new(temp.path(), "testdb")).unwrap();
    let rows = db.scan(&ScanQuery::new("people")).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].values,
        vec![
            Some(Value::Integer(1)),
            Some(Value::String("Ann".into())),
            Some(Value::Float(1.5))
        ]
    );
}

#[test]
fn test_scan_ordering_across_pages() {
    // header (12) + two 14-byte rows per page
    let (_temp, db) = setup_with(|c| c.max_page_size = 40);
    create_letters(&db);

    let outcomes: Vec<InsertOutcome> = ["A", "B", "C", "D"]
        .iter()
        .map(|n| db.insert("letters", &["name"], &[Some(*n)]).unwrap())
        .collect();
    let options: Vec<InsertOption> = outcomes.iter().map(|o| o.option).collect();
    assert_eq!(
        options,
        vec![
            InsertOption::NewPage,
            InsertOption::Appended,
            InsertOption::NewPage,
            InsertOption::Appended
        ]
    );
    assert_eq!(outcomes[3].page, 1);
    assert_eq!(outcomes[3].row_id, 1);

    let headers = db.page_headers("letters").unwrap();
    assert_eq!(headers.len(), 2);
    assert!(headers[0].0.path().ends_with("letters.0000.record"));
    assert!(headers[1].0.path().ends_with("letters.0001.record"));

    let rows = db.scan(&ScanQuery::new("letters")).unwrap();
    assert_eq!(string_column(&rows, 0), vec!["A", "B", "C", "D"]);
}

#[test]
fn test_row_limit_pushdown() {
    let (_temp, db) = setup_test_db();
    create_letters(&db);
    write_letters_page(&db, 0, &["A", "B"]);
    write_letters_page(&db, 1, &["C", "D", "E", "F", "G"]);
    let last = write_letters_page(&db, 2, &["H"]);

    let rows = db.scan(&ScanQuery::new("letters").limit(3)).unwrap();
    assert_eq!(string_column(&rows, 0), vec!["A", "B", "C"]);
    assert!(!db.pool().is_open(last.path()));

    let rows = db.scan(&ScanQuery::new("letters").limit(100)).unwrap();
    assert_eq!(rows.len(), 8);

    assert!(db.scan(&ScanQuery::new("letters").limit(0)).unwrap().is_empty());
}

#[test]
fn test_free_slot_reuse() {
    let (_temp, db) = setup_test_db();
    create_people(&db);
    for name in ["A", "B", "C"] {
        insert_person(&db, name, None);
    }
    let page = db.page_headers("people").unwrap()[0].0.clone();
    let size_before_delete = page.size().unwrap();

    let condition: ConditionGroup = "name = 'B'".parse().unwrap();
    assert_eq!(db.delete("people", Some(&condition)).unwrap(), 1);

    let headers = db.page_headers("people").unwrap();
    let header = &headers[0].1;
    assert_eq!(header.rows_count, 2);
    assert_eq!(header.free_rows, vec![1]);
    assert_eq!(
        string_column(&db.scan(&ScanQuery::new("people")).unwrap(), 1),
        vec!["A", "C"]
    );

    // Too long for the freed slot: appended with a fresh id
    let outcome = insert_person(&db, "A much longer name", None);
    assert_eq!(outcome.option, InsertOption::Appended);
    assert_eq!(outcome.row_id, 3);

    let outcome = insert_person(&db, "Z", None);
    assert_eq!(outcome.option, InsertOption::Reused);
    assert_eq!(outcome.row_id, 1);

    let headers = db.page_headers("people").unwrap();
    let header = &headers[0].1;
    assert!(header.free_rows.is_empty());
    assert_eq!(header.rows_count, 4);

    let rows = db.scan(&ScanQuery::new("people")).unwrap();
    assert_eq!(
        string_column(&rows, 1),
        vec!["A", "Z", "C", "A much longer name"]
    );
    // auto increment continued from the live maximum
    assert_eq!(rows[1].values[0], Some(Value::Integer(5)));
    assert!(page.size().unwrap() > size_before_delete);
}

#[test]
fn test_reuse_keeps_file_size() {
    let (_temp, db) = setup_test_db();
    create_letters(&db);
    for name in ["one", "two", "six"] {
        db.insert("letters", &["name"], &[Some(name)]).unwrap();
    }
    let page = db.page_headers("letters").unwrap()[0].0.clone();
    let size = page.size().unwrap();

    let condition: ConditionGroup = "name = 'two'".parse().unwrap();
    db.delete("letters", Some(&condition)).unwrap();
    assert_eq!(page.size().unwrap(), size + 4);

    let outcome = db.insert("letters", &["name"], &[Some("ab")]).unwrap();
    assert_eq!(outcome.option, InsertOption::Reused);
    assert_eq!(page.size().unwrap(), size);

    let rows = db.scan(&ScanQuery::new("letters")).unwrap();
    assert_eq!(string_column(&rows, 0), vec!["one", "ab", "six"]);
}

#[test]
fn test_projection_and_predicate() {
    let (_temp, db) = setup_test_db();
    create_people(&db);
    insert_person(&db, "Ann", Some("90"));
    insert_person(&db, "Bob", Some("40"));
    insert_person(&db, "Cid", None);
    insert_person(&db, "Dee", Some("75.5"));

    let query = ScanQuery::new("people")
        .columns(["score", "name"])
        .filter("score >= 50".parse().unwrap());
    let rows = db.scan(&query).unwrap();
    assert_eq!(string_column(&rows, 1), vec!["Ann", "Dee"]);
    assert_eq!(rows[1].values[0], Some(Value::Float(75.5)));

    let query = ScanQuery::new("people")
        .columns(["name"])
        .filter("score < 50 OR name = 'Cid'".parse().unwrap());
    let rows = db.scan(&query).unwrap();
    assert_eq!(string_column(&rows, 0), vec!["Bob", "Cid"]);
}

#[test]
fn test_column_not_found() {
    let (_temp, db) = setup_test_db();
    create_people(&db);
    insert_person(&db, "Ann", None);

    let err = db
        .scan(&ScanQuery::new("people").columns(["name", "age"]))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ColumnDoesntExist);
    assert!(matches!(
        err,
        DatabaseError::Scan(ScanError::ColumnNotFound(ref name)) if name == "age"
    ));

    let err = db
        .scan(&ScanQuery::new("people").filter("age = 3".parse().unwrap()))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ColumnDoesntExist);
}

#[test]
fn test_error_kinds() {
    let (_temp, db) = setup_test_db();
    create_people(&db);
    insert_person(&db, "Ann", None);

    let err = db.scan(&ScanQuery::new("ghosts")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TableDoesntExist);

    let err = db
        .scan(&ScanQuery::new("people").filter("name > 3".parse().unwrap()))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOperandType);

    let malformed = ConditionGroup::new(Vec::new(), Vec::new());
    let err = db
        .scan(&ScanQuery::new("people").filter(malformed))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidCondition);

    let err = db.insert("people", &["age"], &[Some("3")]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ColumnDoesntExist);

    let err = db.insert("people", &["name", "score"], &[Some("x"), Some("high")]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidValue);
}

#[test]
fn test_insert_constraints() {
    let (_temp, db) = setup_test_db();
    create_people(&db);

    insert_person(&db, "Ann", None);
    insert_person(&db, "Bob", None);
    let ids: Vec<Option<Value>> = db
        .scan(&ScanQuery::new("people").columns(["id"]))
        .unwrap()
        .into_iter()
        .map(|r| r.values[0].clone())
        .collect();
    assert_eq!(ids, vec![Some(Value::Integer(1)), Some(Value::Integer(2))]);

    let err = db
        .insert("people", &["id", "name"], &[Some("2"), Some("Dup")])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConstraintViolation);

    let err = db.insert("people", &["score"], &[Some("1.0")]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConstraintViolation);

    let explicit = db
        .insert("people", &["id", "name"], &[Some("10"), Some("Ten")])
        .unwrap();
    assert_eq!(explicit.row_id, 2);
    insert_person(&db, "Eleven", None);

    let rows = db
        .scan(&ScanQuery::new("people").filter("name = 'Eleven'".parse().unwrap()))
        .unwrap();
    assert_eq!(rows[0].values[0], Some(Value::Integer(11)));
}

#[test]
fn test_no_page_available_without_allocation() {
    let (_temp, db) = setup_with(|c| c.allocate_pages = false);
    create_letters(&db);

    let err = db.insert("letters", &["name"], &[Some("A")]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoPageAvailable);

    write_letters_page(&db, 0, &[]);
    let outcome = db.insert("letters", &["name"], &[Some("A")]).unwrap();
    assert_eq!(outcome.option, InsertOption::Appended);
}

#[test]
fn test_page_cap() {
    let (_temp, db) = setup_with(|c| {
        c.max_page_size = 40;
        c.max_pages_per_table = Some(1);
    });
    create_letters(&db);

    db.insert("letters", &["name"], &[Some("A")]).unwrap();
    db.insert("letters", &["name"], &[Some("B")]).unwrap();
    let err = db.insert("letters", &["name"], &[Some("C")]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoPageAvailable);

    let err = db
        .insert("letters", &["name"], &[Some("far too long for a forty byte page")])
        .unwrap_err();
    assert!(matches!(
        err,
        DatabaseError::Insert(InsertError::RowTooLarge { .. })
    ));
}

#[test]
fn test_delete_all_and_refill() {
    let (_temp, db) = setup_test_db();
    create_letters(&db);
    for name in ["A", "B", "C"] {
        db.insert("letters", &["name"], &[Some(name)]).unwrap();
    }

    assert_eq!(db.delete("letters", None).unwrap(), 3);
    assert!(db.scan(&ScanQuery::new("letters")).unwrap().is_empty());
    assert_eq!(db.delete("letters", None).unwrap(), 0);

    let outcome = db.insert("letters", &["name"], &[Some("X")]).unwrap();
    assert_eq!(outcome.option, InsertOption::Reused);
    assert_eq!(outcome.row_id, 0);
    assert_eq!(
        string_column(&db.scan(&ScanQuery::new("letters")).unwrap(), 0),
        vec!["X"]
    );
}

#[test]
fn test_concurrent_scans() {
    let (_temp, db) = setup_with(|c| c.max_page_size = 40);
    create_letters(&db);
    for name in ["A", "B", "C", "D", "E", "F"] {
        db.insert("letters", &["name"], &[Some(name)]).unwrap();
    }

    let results: Vec<Vec<String>> = thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| s.spawn(|| string_column(&db.scan(&ScanQuery::new("letters")).unwrap(), 0)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for result in results {
        assert_eq!(result, vec!["A", "B", "C", "D", "E", "F"]);
    }
    assert_eq!(db.pool().open_file_count(), 3);
}

#[test]
fn test_concurrent_inserts_are_serialised() {
    let (_temp, db) = setup_test_db();
    create_people(&db);

    thread::scope(|s| {
        for t in 0..4 {
            let db = &db;
            s.spawn(move || {
                for i in 0..5 {
                    let name = format!("t{}-{}", t, i);
                    db.insert("people", &["name"], &[Some(name.as_str())]).unwrap();
                }
            });
        }
    });

    let rows = db.scan(&ScanQuery::new("people")).unwrap();
    assert_eq!(rows.len(), 20);
    let mut ids: Vec<i64> = rows
        .iter()
        .map(|r| r.get(0).and_then(Value::as_i64).unwrap())
        .collect();
    ids.sort();
    assert_eq!(ids, (1..=20).collect::<Vec<_>>());
}

#[test]
fn test_dispose_closes_handles() {
    let (_temp, db) = setup_test_db();
    create_letters(&db);
    db.insert("letters", &["name"], &[Some("A")]).unwrap();
    assert_eq!(db.pool().open_file_count(), 1);

    db.dispose();
    assert_eq!(db.pool().open_file_count(), 0);
    assert_eq!(db.scan(&ScanQuery::new("letters")).unwrap().len(), 1);
}

#[test]
fn test_more_pages_than_open_files() {
    // header plus one single-letter row fills a page
    let (_temp, db) = setup_with(|c| {
        c.max_page_size = 26;
        c.max_open_files = 4;
    });
    create_letters(&db);

    let names: Vec<String> = (0..12u8).map(|i| ((b'a' + i) as char).to_string()).collect();
    for name in &names {
        let outcome = db.insert("letters", &["name"], &[Some(name.as_str())]).unwrap();
        assert_eq!(outcome.option, InsertOption::NewPage);
    }

    assert_eq!(db.page_headers("letters").unwrap().len(), 12);
    assert!(db.pool().open_file_count() <= 4);

    let rows = db.scan(&ScanQuery::new("letters")).unwrap();
    assert_eq!(string_column(&rows, 0), names);
    assert!(db.pool().open_file_count() <= 4);
}

#[test]
fn test_update_in_place() {
    let (_temp, db) = setup_test_db();
    create_people(&db);
    insert_person(&db, "Ann", Some("90"));
    insert_person(&db, "Bob", Some("40"));
    insert_person(&db, "Cid", None);
    let page = db.page_headers("people").unwrap()[0].0.clone();
    let size = page.size().unwrap();

    let condition: ConditionGroup = "name = 'Bob'".parse().unwrap();
    let updated = db
        .update("people", &["score", "name"], &[Some("55"), Some("Bo")], Some(&condition))
        .unwrap();
    assert_eq!(updated, 1);
    assert_eq!(page.size().unwrap(), size);

    let rows = db.scan(&ScanQuery::new("people")).unwrap();
    assert_eq!(string_column(&rows, 1), vec!["Ann", "Bo", "Cid"]);
    assert_eq!(rows[1].row_id, 1);
    assert_eq!(rows[1].values[0], Some(Value::Integer(2)));
    assert_eq!(rows[1].values[2], Some(Value::Float(55.0)));

    // a value to null shrinks the row, the slot keeps its size
    assert_eq!(db.update("people", &["score"], &[None], None).unwrap(), 3);
    assert_eq!(page.size().unwrap(), size);
    let rows = db.scan(&ScanQuery::new("people")).unwrap();
    assert!(rows.iter().all(|r| r.values[2].is_none()));

    let nobody: ConditionGroup = "name = 'Zed'".parse().unwrap();
    assert_eq!(db.update("people", &["score"], &[Some("1")], Some(&nobody)).unwrap(), 0);
}

#[test]
fn test_update_outgrows_slot() {
    let (_temp, db) = setup_test_db();
    create_people(&db);
    insert_person(&db, "Ann", Some("90"));
    insert_person(&db, "Bob", Some("40"));
    insert_person(&db, "Cid", None);

    // Cid had no score, so the row no longer fits its slot
    let condition: ConditionGroup = "name = 'Cid'".parse().unwrap();
    assert_eq!(db.update("people", &["score"], &[Some("7.5")], Some(&condition)).unwrap(), 1);

    let headers = db.page_headers("people").unwrap();
    assert_eq!(headers.len(), 1);
    assert_eq!(headers[0].1.free_rows, vec![2]);
    assert_eq!(headers[0].1.rows_count, 3);

    let rows = db.scan(&ScanQuery::new("people")).unwrap();
    assert_eq!(string_column(&rows, 1), vec!["Ann", "Bob", "Cid"]);
    assert_eq!(rows[2].row_id, 3);
    assert_eq!(rows[2].values[0], Some(Value::Integer(3)));
    assert_eq!(rows[2].values[2], Some(Value::Float(7.5)));

    // the vacated slot takes the next small row
    let outcome = insert_person(&db, "Z", None);
    assert_eq!(outcome.option, InsertOption::Reused);
    assert_eq!(outcome.row_id, 2);
}

#[test]
fn test_update_moves_row_to_new_page() {
    // header plus two single-letter rows fill a page
    let (_temp, db) = setup_with(|c| c.max_page_size = 40);
    create_letters(&db);
    for name in ["a", "b"] {
        db.insert("letters", &["name"], &[Some(name)]).unwrap();
    }

    let condition: ConditionGroup = "name = 'a'".parse().unwrap();
    assert_eq!(db.update("letters", &["name"], &[Some("abc")], Some(&condition)).unwrap(), 1);

    let headers = db.page_headers("letters").unwrap();
    assert_eq!(headers.len(), 2);
    assert_eq!(headers[0].1.free_rows, vec![0]);
    assert_eq!(headers[1].1.rows_count, 1);
    assert_eq!(
        string_column(&db.scan(&ScanQuery::new("letters")).unwrap(), 0),
        vec!["b", "abc"]
    );
}

#[test]
fn test_update_constraints() {
    let (_temp, db) = setup_test_db();
    create_people(&db);
    insert_person(&db, "Ann", Some("90"));
    insert_person(&db, "Bob", Some("40"));
    let before = db.scan(&ScanQuery::new("people")).unwrap();
    let bob: ConditionGroup = "name = 'Bob'".parse().unwrap();

    let err = db.update("people", &["id"], &[Some("1")], Some(&bob)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConstraintViolation);

    // both rows would share one key
    let err = db.update("people", &["id"], &[Some("7")], None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConstraintViolation);

    let err = db.update("people", &["name"], &[None], Some(&bob)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConstraintViolation);

    let err = db.update("people", &["age"], &[Some("3")], None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ColumnDoesntExist);

    let err = db.update("people", &["score"], &[Some("high")], None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidValue);

    let err = db.update("missing", &["score"], &[Some("1")], None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TableDoesntExist);

    assert_eq!(db.scan(&ScanQuery::new("people")).unwrap(), before);

    // swapping a key to a value nobody else holds is fine
    assert_eq!(db.update("people", &["id"], &[Some("7")], Some(&bob)).unwrap(), 1);
}
