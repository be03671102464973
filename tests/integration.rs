use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn posa_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("posa");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    // Saved dashboard pages
    let pages_dir = root.join("pages");
    fs::create_dir_all(&pages_dir).unwrap();
    fs::write(
        pages_dir.join("inventory.html"),
        r#"<html><body>
<nav>Dashboard Products Inventory</nav>
<main data-ai-content>
  <pre>[{"name": "Cola", "stock": 0}, {"name": "Chips", "stock": 2}, {"name": "Milk", "stock": 9}]</pre>
</main>
<script>window.__STATE__ = {"stock": 0}</script>
</body></html>"#,
    )
    .unwrap();
    fs::write(
        pages_dir.join("sales.html"),
        r#"<html><body><main>
  <pre>[{"id": 1, "amount": 120}, {"id": 2, "amount": 30}]</pre>
</main></body></html>"#,
    )
    .unwrap();
    fs::write(pages_dir.join("index.html"), "<main>Welcome back, admin</main>").unwrap();

    // Nothing listens on port 9, so route scans fail fast
    let config_content = format!(
        r#"[db]
path = "{root}/data/posa.sqlite"

[scan]
base_url = "http://127.0.0.1:9"
routes = ["/inventory", "/sales"]
timeout_secs = 2

[scan.snapshots]
root = "{root}/pages"

[llm]
provider = "disabled"

[server]
bind = "127.0.0.1:7341"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("posa.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_posa(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = posa_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run posa binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn page_path(config_path: &Path, name: &str) -> String {
    config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("pages")
        .join(name)
        .display()
        .to_string()
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_posa(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));

    let (_, _, success) = run_posa(&config_path, &["init"]);
    assert!(success, "Second init failed (not idempotent)");
}

#[test]
fn test_scan_file_and_context() {
    let (_tmp, config_path) = setup_test_env();
    let file = page_path(&config_path, "inventory.html");

    let (stdout, stderr, success) = run_posa(
        &config_path,
        &["scan", "--file", &file, "--key", "/inventory"],
    );
    assert!(success, "scan failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("scanned: 1"));
    assert!(stdout.contains("changed: 1"));

    let (stdout, _, success) = run_posa(&config_path, &["context"]);
    assert!(success);
    assert!(stdout.starts_with("=== PAGE: /inventory ===\n"));
    assert!(stdout.contains(r#"{"name": "Cola", "stock": 0}"#));
    assert!(!stdout.contains("Dashboard Products"), "nav must not be indexed");
    assert!(!stdout.contains("__STATE__"), "scripts must not be indexed");

    // Rescanning the same page reports no change
    let (stdout, _, _) = run_posa(
        &config_path,
        &["scan", "--file", &file, "--key", "/inventory"],
    );
    assert!(stdout.contains("changed: 0"));
}

#[test]
fn test_scan_snapshots_and_pages() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_posa(&config_path, &["scan", "--snapshots"]);
    assert!(success, "scan failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("scanned: 3"));

    let (stdout, _, success) = run_posa(&config_path, &["pages"]);
    assert!(success);
    assert!(stdout.contains("/inventory"));
    assert!(stdout.contains("/sales"));
    assert!(stdout.contains("3 page(s)"));
}

#[test]
fn test_scan_unreachable_routes_is_not_fatal() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_posa(&config_path, &["scan"]);
    assert!(success, "scan failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("scanned: 0"));
    assert!(stdout.contains("failed: 2"));
    assert!(stdout.contains("/inventory"));
}

#[test]
fn test_ask_rule_based() {
    let (_tmp, config_path) = setup_test_env();
    run_posa(&config_path, &["scan", "--snapshots"]);

    let cases = [
        (
            "How many products are out of stock?",
            "There are 1 products that are out of stock.",
        ),
        ("Any low stock items?", "There are 1 products in low stock."),
        ("What is the total inventory?", "Total inventory items: 11."),
        ("What are total sales?", "Total sales amount is $150."),
    ];

    for (question, expected) in cases {
        let (stdout, stderr, success) = run_posa(&config_path, &["ask", question]);
        assert!(success, "ask failed: stdout={}, stderr={}", stdout, stderr);
        assert_eq!(stdout.trim(), expected, "question: {}", question);
    }
}

#[test]
fn test_ask_without_model() {
    let (_tmp, config_path) = setup_test_env();
    run_posa(&config_path, &["scan", "--snapshots"]);

    let (stdout, _, success) = run_posa(&config_path, &["ask", "Who is the store manager?"]);
    assert!(success);
    assert!(stdout.contains("Only simple queries are supported"));
}

#[test]
fn test_ask_with_empty_cache() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_posa(&config_path, &["ask", "How many customers?"]);
    assert!(success);
    assert_eq!(stdout.trim(), "Missing question or context");
}

#[test]
fn test_forget() {
    let (_tmp, config_path) = setup_test_env();
    run_posa(&config_path, &["scan", "--snapshots"]);

    let (stdout, _, success) = run_posa(&config_path, &["forget", "/sales"]);
    assert!(success);
    assert!(stdout.contains("removed 1 page(s)"));

    let (stdout, _, success) = run_posa(&config_path, &["forget", "--all"]);
    assert!(success);
    assert!(stdout.contains("removed 2 page(s)"));

    let (_, _, success) = run_posa(&config_path, &["forget"]);
    assert!(!success, "forget without a key or --all should fail");
}

#[test]
fn test_chat_session_flow() {
    let (_tmp, config_path) = setup_test_env();
    run_posa(&config_path, &["scan", "--snapshots"]);

    let (_, stderr, success) = run_posa(&config_path, &["chat", "send", "hello"]);
    assert!(!success, "send without a chat should fail");
    assert!(stderr.contains("no active chat"));

    let (stdout, _, success) = run_posa(&config_path, &["chat", "new"]);
    assert!(success);
    let id = stdout.trim().to_string();
    assert_eq!(id.len(), 36, "expected a UUID, got: {}", id);

    let (stdout, stderr, success) = run_posa(
        &config_path,
        &["chat", "send", "How many products are out of stock?"],
    );
    assert!(success, "send failed: stdout={}, stderr={}", stdout, stderr);
    assert_eq!(stdout.trim(), "There are 1 products that are out of stock.");

    let (stdout, _, success) = run_posa(&config_path, &["chat", "show"]);
    assert!(success);
    assert!(stdout.contains("# How many products are out of s ("));
    assert!(stdout.contains("user: How many products are out of stock?"));
    assert!(stdout.contains("bot: There are 1 products that are out of stock."));

    let (stdout, _, _) = run_posa(&config_path, &["chat", "list"]);
    assert!(stdout.contains(&format!("* {}", id)));
    assert!(stdout.contains("2 message(s)"));

    let (stdout, _, success) = run_posa(&config_path, &["chat", "delete", &id]);
    assert!(success);
    assert!(stdout.contains("deleted"));

    let (_, _, success) = run_posa(&config_path, &["chat", "select", &id]);
    assert!(!success, "selecting a deleted chat should fail");
}
