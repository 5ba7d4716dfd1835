use assert_cmd::prelude::*; // Add methods on commands
use std::fs::File;
use std::io::Write;
use std::process::{Command, Output}; // Run programs
use tempfile::{Builder, TempDir};

mod basic;

const TEST_CONFIG_FILE: &str = "userdb-test.toml";
const TEST_CATALOG_FILE: &str = "catalog.sqlite";

fn setup_temp_config(backend_url: &str) -> std::io::Result<TempDir> {
    let temp_dir = Builder::new()
        .prefix("userdb-test-dir")
        .rand_bytes(5)
        .tempdir()?;

    let dsn = temp_dir.path().join(TEST_CATALOG_FILE);
    let config_str = format!(
        r#"
[catalog]
type = "sqlite"
dsn = "{}"

[backend]
url = "{backend_url}"
tenant_id = "tenant"
app_id = "app"
timeout_secs = 5
"#,
        dsn.display().to_string().escape_default(),
    );

    let mut conf_file = File::create(temp_dir.path().join(TEST_CONFIG_FILE))?;
    write!(conf_file, "{config_str}")?;
    Ok(temp_dir)
}

fn run_userdb(temp_dir: &TempDir, args: &[&str]) -> Output {
    Command::cargo_bin("userdb")
        .expect("userdb bin exists")
        .arg("--config")
        .arg(temp_dir.path().join(TEST_CONFIG_FILE))
        .arg("--uid")
        .arg("alice")
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("userdb ran")
}

fn stdout_json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "stdout is not JSON ({e}): {}\nstderr: {}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        )
    })
}
