use serde_json::{json, Value};
use userdb::backend::ExecutionMode;
use userdb::config::schema::Import;
use userdb::error::{Error, ErrorKind};
use userdb::schema::Row;
use userdb::service::RowOperation;
use userdb::testutils::{in_memory_service, BackendCall};

use crate::fixtures::{alice, shop_with_orders};

fn row(value: Value) -> Row {
    match value {
        Value::Object(row) => row,
        _ => panic!("not an object"),
    }
}

fn orders_csv(rows: usize, poisoned: std::ops::Range<usize>) -> String {
    let mut csv = "qty,note\n".to_string();
    for i in 0..rows {
        let note = if poisoned.contains(&i) { "poison" } else { "ok" };
        csv.push_str(&format!("{i},{note}\n"));
    }
    csv
}

#[tokio::test]
async fn test_import_keeps_going_after_a_failing_chunk() {
    let (mut service, backend) = in_memory_service().await;
    service.import = Import {
        chunk_size: 100,
        max_retries: 2,
        max_rows: 1000,
    };
    let (_, table) = shop_with_orders(&service).await;
    backend.fail_statements_containing("'poison'");
    backend.clear();

    let csv = orders_csv(250, 100..200);
    let err = service
        .import_rows(&alice(), table.id, csv.as_bytes(), ExecutionMode::Test)
        .await
        .unwrap_err();

    let summary = match err {
        Error::PartialImportFailure(summary) => summary,
        other => panic!("unexpected error {other:?}"),
    };
    assert_eq!(summary.success, 150);
    assert_eq!(summary.failed, 100);
    let indices: Vec<usize> = summary.errors.iter().map(|f| f.index).collect();
    assert_eq!(indices, (100..200).collect::<Vec<_>>());

    // Every poisoned row was tried once and then retried twice
    assert_eq!(backend.dml_statements().len(), 100 + 100 * 3 + 50);
}

#[tokio::test]
async fn test_import_retries_transient_failures() {
    let (service, backend) = in_memory_service().await;
    let (_, table) = shop_with_orders(&service).await;
    backend.clear();
    backend.fail_next_dml(2);

    let summary = service
        .import_rows(
            &alice(),
            table.id,
            orders_csv(3, 0..0).as_bytes(),
            ExecutionMode::Prod,
        )
        .await
        .unwrap();
    assert_eq!(summary.success, 3);
    assert_eq!(summary.failed, 0);
    assert_eq!(backend.dml_statements().len(), 5);
}

#[tokio::test]
async fn test_import_rejects_bad_files() {
    let (service, _) = in_memory_service().await;
    let (_, table) = shop_with_orders(&service).await;

    let err = service
        .import_rows(&alice(), table.id, "qty,colour\n1,red\n".as_bytes(), ExecutionMode::Test)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownField);

    let err = service
        .import_rows(&alice(), table.id, "qty,note\n".as_bytes(), ExecutionMode::Test)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
}

#[tokio::test]
async fn test_operate_row() {
    let (service, backend) = in_memory_service().await;
    let (database, table) = shop_with_orders(&service).await;
    backend.clear();

    service
        .operate_row(
            &alice(),
            table.id,
            RowOperation::Insert,
            &row(json!({"qty": 3, "note": "it's fine"})),
            ExecutionMode::Prod,
        )
        .await
        .unwrap();
    assert_eq!(
        backend.calls(),
        vec![BackendCall::Dml {
            db_id: database.db_id,
            statement: "INSERT INTO \"orders\" (\"uid\", \"note\", \"qty\") VALUES ('alice', 'it''s fine', 3)"
                .to_string(),
            kind: userdb::backend::OperationKind::Insert,
            mode: ExecutionMode::Prod,
        }]
    );

    let err = service
        .operate_row(
            &alice(),
            table.id,
            RowOperation::Insert,
            &row(json!({"qty": null, "note": "no quantity"})),
            ExecutionMode::Test,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingRequiredField);

    let err = service
        .operate_row(
            &alice(),
            table.id,
            RowOperation::Delete,
            &row(json!({"id": "1; DROP TABLE orders"})),
            ExecutionMode::Test,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TypeMismatch);
}

#[tokio::test]
async fn test_select_rows() {
    let (service, backend) = in_memory_service().await;
    let (_, table) = shop_with_orders(&service).await;
    backend.set_rows(vec![
        row(json!({"id": "2", "qty": 5, "note": "b"})),
        row(json!({"id": "1", "qty": 4, "note": "a"})),
    ]);
    backend.clear();

    let page = service
        .select_rows(&alice(), table.id, 2, 10, ExecutionMode::Test)
        .await
        .unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.records.len(), 2);
    assert_eq!(
        backend.dml_statements(),
        vec![
            "SELECT COUNT(*) FROM \"orders\"".to_string(),
            "SELECT * FROM \"orders\" ORDER BY \"create_time\" DESC, \"id\" DESC LIMIT 10 OFFSET 10"
                .to_string(),
        ]
    );

    let err = service
        .select_rows(&alice(), table.id, 0, 10, ExecutionMode::Test)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
}

#[tokio::test]
async fn test_export_and_template() {
    let (service, backend) = in_memory_service().await;
    let (_, table) = shop_with_orders(&service).await;
    backend.set_rows(vec![
        row(json!({"id": "1", "uid": "alice", "qty": 4, "note": "a"})),
        row(json!({"id": "2", "uid": "alice", "qty": 5})),
    ]);
    backend.clear();

    let ids = vec![json!("1"), json!(2)];
    let mut output = Vec::new();
    let count = service
        .export_rows(&alice(), table.id, Some(ids.as_slice()), &mut output, ExecutionMode::Test)
        .await
        .unwrap();
    assert_eq!(count, 2);
    assert_eq!(String::from_utf8(output).unwrap(), "qty,note\n4,a\n5,\n");
    assert_eq!(
        backend.dml_statements(),
        vec!["SELECT * FROM \"orders\" WHERE \"id\" IN (1, 2)".to_string()]
    );

    let err = service
        .export_rows(
            &alice(),
            table.id,
            Some(&[json!("1 OR 1=1")][..]),
            Vec::new(),
            ExecutionMode::Test,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TypeMismatch);

    backend.clear();
    let mut output = Vec::new();
    let count = service
        .export_rows(&alice(), table.id, Some(&[][..]), &mut output, ExecutionMode::Test)
        .await
        .unwrap();
    assert_eq!(count, 2);
    assert_eq!(String::from_utf8(output).unwrap(), "qty,note\n4,a\n5,\n");
    assert_eq!(
        backend.dml_statements(),
        vec!["SELECT * FROM \"orders\" LIMIT 1000 OFFSET 0".to_string()]
    );

    let mut template = Vec::new();
    service
        .write_template(&alice(), table.id, &mut template)
        .await
        .unwrap();
    assert_eq!(String::from_utf8(template).unwrap(), "qty,note\n");
}
