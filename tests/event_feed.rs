use std::{
    fs,
    io::Write as _,
    path::Path,
    process::{Command, Output, Stdio},
};

use tempfile::tempdir;

fn run_tabwatch_with_feed(args: &[&str], cwd: &Path, feed: &str) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_tabwatch"))
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("tabwatch should spawn");

    child
        .stdin
        .take()
        .expect("stdin should be piped")
        .write_all(feed.as_bytes())
        .expect("feed should be written");

    child
        .wait_with_output()
        .expect("tabwatch should run to completion")
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "expected success\nstdout:\n{}\nstderr:\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn run_prints_a_snapshot_for_each_observed_tab() {
    let sandbox = tempdir().expect("tempdir should be created");
    let config_path = sandbox.path().join("tabwatch.toml");
    fs::write(
        &config_path,
        r#"
[capture]
captured_request_types = ["fetch"]
include_patterns = ["/api/"]

[logging]
level = "off"
"#,
    )
    .expect("config should be written");

    let feed = concat!(
        r#"{"event":"request_will_start","request_id":"1","tab_id":5,"method":"GET","url":"https://x.com/api/users?x=1","resource_type":"fetch"}"#,
        "\n",
        r#"{"event":"headers_received","request_id":"1","response_headers":[["content-length","120"]]}"#,
        "\n",
        r#"{"event":"request_completed","request_id":"1","status_code":200}"#,
        "\n",
        r#"{"event":"request_will_start","request_id":"2","tab_id":7,"method":"POST","url":"https://x.com/api/orders","resource_type":"fetch"}"#,
        "\n",
        r#"{"event":"request_errored","request_id":"2"}"#,
        "\n",
    );

    let output = run_tabwatch_with_feed(
        &["run", "--config", config_path.to_str().expect("utf-8 path")],
        sandbox.path(),
        feed,
    );
    assert_success(&output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("GET https://x.com/api/users"),
        "stdout:\n{stdout}"
    );
    assert!(
        stdout.contains("POST https://x.com/api/orders"),
        "stdout:\n{stdout}"
    );
    assert!(stdout.contains("\"ERR\""), "stdout:\n{stdout}");
    assert!(stdout.contains("\"last_size\": 120"), "stdout:\n{stdout}");
}

#[test]
fn closed_tab_is_absent_from_the_output() {
    let sandbox = tempdir().expect("tempdir should be created");

    let feed = concat!(
        r#"{"event":"request_will_start","request_id":"1","tab_id":5,"method":"GET","url":"https://x.com/api/users","resource_type":"fetch"}"#,
        "\n",
        r#"{"event":"request_completed","request_id":"1","status_code":200}"#,
        "\n",
        r#"{"event":"tab_closed","tab_id":5}"#,
        "\n",
    );

    let output = run_tabwatch_with_feed(&["run", "--log-level", "off"], sandbox.path(), feed);
    assert_success(&output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        !stdout.contains("https://x.com/api/users"),
        "stdout:\n{stdout}"
    );
}

#[test]
fn malformed_lines_do_not_stop_the_feed() {
    let sandbox = tempdir().expect("tempdir should be created");

    let feed = concat!(
        "this is not json\n",
        r#"{"event":"request_will_start","request_id":"1","tab_id":5,"url":"https://x.com/api/users","resource_type":"fetch"}"#,
        "\n",
        r#"{"event":"request_completed","request_id":"1","status_code":204}"#,
        "\n",
    );

    let output = run_tabwatch_with_feed(&["run", "--log-level", "off"], sandbox.path(), feed);
    assert_success(&output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("GET https://x.com/api/users"),
        "stdout:\n{stdout}"
    );
}

#[test]
fn check_config_reports_invalid_patterns() {
    let sandbox = tempdir().expect("tempdir should be created");
    let config_path = sandbox.path().join("tabwatch.toml");
    fs::write(
        &config_path,
        r#"
[capture]
include_patterns = ["[unclosed", "/api/"]
"#,
    )
    .expect("config should be written");

    let output = Command::new(env!("CARGO_BIN_EXE_tabwatch"))
        .args([
            "check-config",
            "--config",
            config_path.to_str().expect("utf-8 path"),
        ])
        .current_dir(sandbox.path())
        .output()
        .expect("tabwatch should run");
    assert_success(&output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("dropped include pattern `[unclosed`"),
        "stdout:\n{stdout}"
    );
}
