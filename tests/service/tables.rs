use serde_json::json;
use userdb::error::ErrorKind;
use userdb::schema::TableSpec;
use userdb::service::AlterRequest;
use userdb::testutils::{in_memory_service, BackendCall};

use crate::fixtures::{alice, shop_with_orders};

#[tokio::test]
async fn test_table_lifecycle() {
    let (service, backend) = in_memory_service().await;
    let (database, table) = shop_with_orders(&service).await;

    let ddl = backend.ddl_statements();
    assert!(ddl[0].starts_with("CREATE TABLE \"orders\""));
    assert!(ddl[1..].iter().all(|s| s.starts_with("COMMENT ON")));

    // Rename the table, rename and retype `qty`, drop `note` and add `paid`
    let fields = service.list_fields(&alice(), table.id, 1, 20).await.unwrap();
    assert_eq!(fields.total, 5);
    let id_of = |name: &str| {
        fields
            .records
            .iter()
            .find(|f| f.spec.name == name)
            .unwrap()
            .id
    };

    let request: AlterRequest = serde_json::from_value(json!({
        "name": "purchases",
        "description": "Customer purchases",
        "changes": [
            {"operation": "update", "id": id_of("qty"), "name": "quantity", "type": "number", "required": true},
            {"operation": "delete", "id": id_of("note")},
            {"operation": "insert", "name": "paid", "type": "boolean"},
        ],
    }))
    .unwrap();
    backend.clear();
    let altered = service
        .alter_table(&alice(), table.id, request)
        .await
        .unwrap();
    assert_eq!(altered.name, "purchases");
    let ddl = backend.ddl_statements();
    assert_eq!(
        ddl.first().map(String::as_str),
        Some("ALTER TABLE \"orders\" RENAME TO \"purchases\"")
    );
    assert!(ddl.contains(&"ALTER TABLE \"purchases\" DROP COLUMN IF EXISTS \"note\"".to_string()));

    let tree = service.database_tree(&alice(), database.id).await.unwrap();
    assert_eq!(tree.tables.len(), 1);
    let names: Vec<&str> = tree.tables[0]
        .fields
        .iter()
        .filter(|f| !f.is_system)
        .map(|f| f.spec.name.as_str())
        .collect();
    assert_eq!(names, vec!["quantity", "paid"]);

    // Copy, then drop the original
    let copy = service.copy_table(&alice(), table.id).await.unwrap();
    assert_eq!(copy.name, "purchases_copy");
    service.drop_table(&alice(), table.id).await.unwrap();

    let tables = service.list_tables(&alice(), database.id).await.unwrap();
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].id, copy.id);
}

#[tokio::test]
async fn test_referenced_objects_cannot_be_dropped() {
    let (service, backend) = in_memory_service().await;
    let (database, table) = shop_with_orders(&service).await;

    service
        .add_flow_reference(&alice(), database.db_id, "orders", "flow-1")
        .await
        .unwrap();
    backend.clear();

    let err = service.drop_table(&alice(), table.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StillReferenced);
    let err = service
        .delete_database(&alice(), database.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StillReferenced);

    // Nothing reached the backend
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn test_copy_database_carries_tables() {
    let (service, backend) = in_memory_service().await;
    let (database, _) = shop_with_orders(&service).await;

    let copy = service.copy_database(&alice(), database.id).await.unwrap();
    assert_eq!(copy.name, "shop_copy");
    assert_eq!(
        backend.calls().last(),
        Some(&BackendCall::CloneDatabase {
            db_id: database.db_id,
            new_name: "shop_copy".to_string()
        })
    );

    let tree = service.database_tree(&alice(), copy.id).await.unwrap();
    assert_eq!(tree.tables.len(), 1);
    assert_eq!(tree.tables[0].table.name, "orders");
    assert_eq!(tree.tables[0].fields.len(), 5);
}

#[tokio::test]
async fn test_failed_ddl_leaves_catalog_untouched() {
    let (service, backend) = in_memory_service().await;
    let (database, table) = shop_with_orders(&service).await;
    backend.fail_statements_containing("DROP TABLE");

    let err = service.drop_table(&alice(), table.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BackendExecutionFailure);

    let tables = service.list_tables(&alice(), database.id).await.unwrap();
    assert_eq!(tables.len(), 1);
}

#[tokio::test]
async fn test_create_table_from_field_file() {
    let (service, backend) = in_memory_service().await;
    let database = service.create_database(&alice(), "shop", None).await.unwrap();
    backend.clear();

    let file = "Field name,Field type,Required,Default value,Description\n\
                title,string,true,,Book title\n\
                pages,integer,false,,\n\
                published,time,,,\n";
    let fields = service.import_field_specs(file.as_bytes()).unwrap();
    assert_eq!(fields.len(), 3);

    let table = service
        .create_table(
            &alice(),
            database.id,
            TableSpec {
                name: "books".to_string(),
                description: None,
                fields,
            },
        )
        .await
        .unwrap();

    let ddl = backend.ddl_statements();
    assert!(ddl[0].contains("\"title\" VARCHAR NOT NULL DEFAULT ''"));
    assert!(ddl[0].contains("\"pages\" BIGINT DEFAULT 0"));
    assert!(ddl[0].contains("\"published\" TIMESTAMP DEFAULT '"));
    assert_eq!(
        ddl.last().unwrap(),
        "COMMENT ON COLUMN \"books\".\"title\" IS 'Book title'"
    );

    let names: Vec<_> = service
        .list_fields(&alice(), table.id, 1, 20)
        .await
        .unwrap()
        .records
        .into_iter()
        .filter(|f| !f.is_system)
        .map(|f| f.spec.name)
        .collect();
    assert_eq!(names, vec!["title", "pages", "published"]);
}
