#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use odata_query::query::{Expr, QueryBuilder, Ty};
use serde_json::Value;
use tempfile::TempDir;

const MODEL: &str = r#"
[entity_sets]
Products = "Product"

[entity_types.Product]
keys = ["Id"]
properties = { Id = "int32", Name = "string", Price = "int32" }
"#;

struct Workspace {
    dir: TempDir,
    model: PathBuf,
    query: PathBuf,
}

impl Workspace {
    fn new(query: &Expr) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let model = dir.path().join("model.toml");
        fs::write(&model, MODEL).expect("write model");
        let query_path = dir.path().join("query.json");
        fs::write(&query_path, serde_json::to_string(query).expect("encode query"))
            .expect("write query");
        Self {
            dir,
            model,
            query: query_path,
        }
    }

    /// Config path that does not exist, so the user's own config is ignored.
    fn no_config(&self) -> PathBuf {
        self.dir.path().join("missing.toml")
    }

    fn write_config(&self, contents: &str) -> PathBuf {
        let path = self.dir.path().join("config.toml");
        fs::write(&path, contents).expect("write config");
        path
    }
}

fn path_arg(path: &Path) -> &str {
    path.to_str().expect("utf-8 temp path")
}

fn expensive_products() -> Expr {
    QueryBuilder::entity_set("Products", "Product")
        .filter(|p| p.member("Price", Ty::Int32).greater_than(Expr::constant(5)))
        .take(3)
        .build()
        .expect("query")
}

#[test]
fn compile_prints_method_and_uri() {
    let ws = Workspace::new(&expensive_products());
    let output = cargo_bin_cmd!("odataq")
        .args([
            "--config",
            path_arg(&ws.no_config()),
            "compile",
            "--model",
            path_arg(&ws.model),
            "--query",
            path_arg(&ws.query),
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf-8 stdout");
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("GET Products?$filter=Price gt 5&$top=3"));
    assert!(text.contains("  version=4.0"));
}

#[test]
fn compile_honours_base_uri_override_and_json_format() {
    let ws = Workspace::new(&expensive_products());
    let output = cargo_bin_cmd!("odataq")
        .args([
            "--config",
            path_arg(&ws.no_config()),
            "--format",
            "json",
            "compile",
            "--model",
            path_arg(&ws.model),
            "--query",
            path_arg(&ws.query),
            "--base-uri",
            "https://example.org/svc/",
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("json output");
    assert_eq!(
        json["uri"].as_str(),
        Some("https://example.org/svc/Products?$filter=Price gt 5&$top=3")
    );
    assert_eq!(json["http_method"].as_str(), Some("GET"));
}

#[test]
fn compile_errors_exit_nonzero_with_code() {
    let query = QueryBuilder::entity_set("Products", "Product")
        .take(2)
        .filter(|p| p.member("Price", Ty::Int32).greater_than(Expr::constant(1)))
        .build()
        .expect("query");
    let ws = Workspace::new(&query);
    let output = cargo_bin_cmd!("odataq")
        .args([
            "--config",
            path_arg(&ws.no_config()),
            "compile",
            "--model",
            path_arg(&ws.model),
            "--query",
            path_arg(&ws.query),
        ])
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8(output).expect("utf-8 stderr");
    assert!(stderr.contains("error: [MethodNotSupported]"), "{stderr}");
}

#[test]
fn show_config_reports_its_source() {
    let ws = Workspace::new(&expensive_products());
    let config = ws.write_config("[compiler]\nbase_uri = \"https://example.org/odata\"\n");
    let output = cargo_bin_cmd!("odataq")
        .args(["--config", path_arg(&config), "show-config"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf-8 stdout");
    assert!(text.starts_with("# loaded from "), "{text}");
    assert!(text.contains("base_uri = \"https://example.org/odata\""), "{text}");

    let output = cargo_bin_cmd!("odataq")
        .args(["--config", path_arg(&ws.no_config()), "show-config"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf-8 stdout");
    assert!(text.starts_with("# defaults\n"), "{text}");
    assert!(text.contains("max_protocol_version = \"4.01\""), "{text}");
}
