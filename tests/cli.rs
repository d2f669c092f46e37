use std::io::Write;
use std::process::{Command, Output, Stdio};

fn jsonvm() -> Command {
    Command::new(env!("CARGO_BIN_EXE_jsonvm"))
}

fn run_stdin(args: &[&str], input: &str) -> Output {
    let mut child = jsonvm()
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to run jsonvm");
    child
        .stdin
        .take()
        .expect("stdin is piped")
        .write_all(input.as_bytes())
        .expect("failed to write stdin");
    child.wait_with_output().expect("failed to wait for jsonvm")
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

// --- Encoding ---

#[test]
fn compacts_and_sorts_keys() {
    let out = run_stdin(&[], r#"{ "b": [1, 2.5, null], "a": "x" }"#);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(stdout(&out), "{\"a\":\"x\",\"b\":[1,2.5,null]}\n");
}

#[test]
fn escapes_html_unless_disabled() {
    let out = run_stdin(&[], r#""<b>""#);
    assert!(out.status.success());
    assert!(!stdout(&out).contains('<'), "got: {}", stdout(&out));

    let out = run_stdin(&["--no-html-escape"], r#""<b>""#);
    assert_eq!(stdout(&out), "\"<b>\"\n");
}

#[test]
fn indents_with_prefix() {
    let out = run_stdin(&["--indent", "  ", "--prefix", "#"], r#"{"a":[1]}"#);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(stdout(&out), "{\n#  \"a\": [\n#    1\n#  ]\n#}\n");
}

#[test]
fn reads_file_argument() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("in.json");
    std::fs::write(&path, "[true, false]").expect("write input");
    let out = jsonvm()
        .arg(&path)
        .output()
        .expect("failed to run jsonvm");
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(stdout(&out), "[true,false]\n");
}

#[test]
fn color_wraps_tokens_in_ansi() {
    let out = run_stdin(&["--color"], r#"{"k":1}"#);
    assert!(out.status.success());
    assert!(stdout(&out).contains("\x1b["), "got: {}", stdout(&out));
}

#[test]
fn options_file_is_overridden_by_flags() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("opts.json");
    std::fs::write(&path, r#"{"indent_unit": "\t", "escape_html": false}"#).expect("write options");
    let path = path.to_str().expect("utf-8 path");

    let out = run_stdin(&["--options", path], r#"["<"]"#);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(stdout(&out), "[\n\t\"<\"\n]\n");

    let out = run_stdin(&["--options", path, "--indent", " "], r#"["<"]"#);
    assert_eq!(stdout(&out), "[\n \"<\"\n]\n");
}

#[test]
fn field_query_from_options_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("opts.json");
    std::fs::write(&path, r#"{"field_query": {"fields": [{"name": "a"}]}}"#).expect("write options");
    let out = run_stdin(&["--options", path.to_str().expect("utf-8 path")], r#"{"a":1,"b":2}"#);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    // Queries select struct fields; map entries pass through.
    assert_eq!(stdout(&out), "{\"a\":1,\"b\":2}\n");
}

// --- Dump ---

#[test]
fn dump_prints_program() {
    let out = run_stdin(&["--dump"], r#"{"a":1}"#);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let text = stdout(&out);
    assert!(text.starts_with("program "), "got: {text}");
    assert!(text.contains("MAP_HEAD"));
    assert!(text.contains("INTERFACE"));
    assert!(text.contains("END"));
}

#[test]
fn dump_of_null_is_interface_program() {
    let out = run_stdin(&["--dump"], "null");
    assert!(out.status.success());
    assert!(stdout(&out).contains("INTERFACE"));
}

// --- Errors ---

#[test]
fn invalid_input_fails() {
    let out = run_stdin(&[], "{nope");
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.starts_with("jsonvm: invalid JSON input"), "stderr: {stderr}");
}

#[test]
fn missing_file_fails() {
    let out = jsonvm()
        .arg("/definitely/not/here.json")
        .output()
        .expect("failed to run jsonvm");
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("error reading"));
}

#[test]
fn bad_options_file_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("opts.json");
    std::fs::write(&path, "[]").expect("write options");
    let out = run_stdin(&["--options", path.to_str().expect("utf-8 path")], "1");
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("invalid options file"), "stderr: {stderr}");
    assert!(stderr.contains("expected a JSON object, found an array"), "stderr: {stderr}");
}

#[test]
fn non_object_options_files_fail() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("opts.json");
    for text in [r#"["\t", false]"#, "3", r#""x""#, "null"] {
        std::fs::write(&path, text).expect("write options");
        let out = run_stdin(&["--options", path.to_str().expect("utf-8 path")], "1");
        assert_eq!(out.status.code(), Some(1), "options {text} were accepted");
        assert!(stdout(&out).is_empty());
    }
}
