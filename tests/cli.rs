use std::process::Command;

fn funny_binary() -> Command {
    Command::new(env!("CARGO_BIN_EXE_funny"))
}

fn fixture(name: &str) -> String {
    format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name)
}

#[test]
fn test_parser_dumps_json() {
    let output = funny_binary()
        .arg("parser")
        .arg(fixture("funny.fun"))
        .output()
        .expect("Failed to execute funny");

    assert!(output.status.success(), "parser subcommand should succeed");
    let stdout = String::from_utf8(output.stdout).unwrap();
    let json: serde_json::Value = serde_json::from_str(&stdout).expect("stdout should be JSON");

    let items = json.as_array().expect("top level should be an array");
    let kinds: Vec<&str> = items.iter().map(|item| item["type"].as_str().unwrap()).collect();
    assert_eq!(
        kinds,
        vec![
            "Assignment",
            "Assignment",
            "Assignment",
            "Expr",
            "Function",
            "Assignment",
            "If",
            "Return"
        ]
    );
    assert_eq!(items[4]["value"]["name"], "p");
    assert_eq!(items[4]["value"]["params"][1], "b");

    // indented output
    assert!(stdout.contains("\n  {"));
}

#[test]
fn test_parser_missing_file() {
    let output = funny_binary()
        .arg("parser")
        .arg("does/not/exist.fun")
        .output()
        .expect("Failed to execute funny");

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert_eq!(stdout, "file not found does/not/exist.fun\n");
}

#[test]
fn test_parser_requires_one_path() {
    let output = funny_binary()
        .arg("parser")
        .output()
        .expect("Failed to execute funny");

    assert!(!output.status.success());
}

#[test]
fn test_run_prints_output_and_result() {
    let output = funny_binary()
        .arg("run")
        .arg(fixture("funny.fun"))
        .output()
        .expect("Failed to execute funny");

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert_eq!(stdout, "3 ok d=3\n2\n");
}

#[test]
fn test_run_reports_stack_overflow() {
    let output = funny_binary()
        .arg("run")
        .arg(fixture("runaway.fun"))
        .arg("--max-depth")
        .arg("100")
        .output()
        .expect("Failed to execute funny");

    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("stack overflow"), "stderr was: {}", stderr);
}
