use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::cli::*;

#[test]
fn test_list_databases_on_empty_catalog() -> std::io::Result<()> {
    let temp_dir = setup_temp_config("http://localhost:1")?;

    let output = run_userdb(&temp_dir, &["list-databases"]);
    assert!(output.status.success());
    assert_eq!(stdout_json(&output), json!({"total": 0, "records": []}));
    Ok(())
}

#[test]
fn test_missing_config() {
    let temp_dir = tempfile::tempdir().unwrap();

    let output = std::process::Command::new(assert_cmd::cargo::cargo_bin("userdb"))
        .arg("--config")
        .arg(temp_dir.path().join("nope.toml"))
        .arg("list-databases")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_errors_are_reported_on_stderr() -> std::io::Result<()> {
    let temp_dir = setup_temp_config("http://localhost:1")?;

    let output = run_userdb(&temp_dir, &["list-databases", "--page-num", "0"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());

    let stderr = String::from_utf8_lossy(&output.stderr);
    let report: serde_json::Value = stderr
        .lines()
        .find_map(|line| serde_json::from_str(line).ok())
        .expect("error report on stderr");
    assert_eq!(report["error"], "InvalidRequest");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_create_then_list_database() -> Result<(), Box<dyn std::error::Error>> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/xingchen-db/v1/create_database"))
        .and(header("X-Consumer-Username", "tenant"))
        .and(body_partial_json(json!({"database_name": "shop", "uid": "alice"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "message": "ok",
            "data": {"database_id": 1001},
        })))
        .expect(1)
        .mount(&server)
        .await;

    let temp_dir = setup_temp_config(&server.uri())?;

    let output = run_userdb(
        &temp_dir,
        &["create-database", "shop", "--description", "demo shop"],
    );
    assert!(output.status.success());
    let created = stdout_json(&output);
    assert_eq!(created["name"], "shop");
    assert_eq!(created["db_id"], 1001);
    assert_eq!(created["app_id"], "app");

    // The catalog persists between invocations
    let output = run_userdb(&temp_dir, &["list-databases", "--search", "demo"]);
    assert!(output.status.success());
    let page = stdout_json(&output);
    assert_eq!(page["total"], 1);
    assert_eq!(page["records"][0]["name"], "shop");

    Ok(())
}

#[test]
fn test_import_fields() -> std::io::Result<()> {
    let temp_dir = setup_temp_config("http://localhost:1")?;
    let fields = temp_dir.path().join("fields.csv");
    std::fs::write(
        &fields,
        "name,type,required,default,description\nqty,integer,true,,Quantity\nnote,string,,,\n",
    )?;

    let output = run_userdb(&temp_dir, &["import-fields", fields.to_str().unwrap()]);
    assert!(output.status.success());
    assert_eq!(
        stdout_json(&output),
        json!([
            {"name": "qty", "type": "integer", "required": true, "default_value": null, "description": "Quantity"},
            {"name": "note", "type": "string", "required": false, "default_value": null, "description": null},
        ])
    );

    std::fs::write(&fields, "name,type\nuid,string\n")?;
    let output = run_userdb(&temp_dir, &["import-fields", fields.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
    Ok(())
}
