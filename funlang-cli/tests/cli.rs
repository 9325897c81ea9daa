use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn funlang() -> Command {
    Command::cargo_bin("funlang").expect("binary exists")
}

#[test]
fn runs_a_program() {
    let dir = tempdir().expect("tempdir");
    let input = dir.path().join("input.fl");
    fs::write(&input, "print(21 / 3); print(5 / 2)").expect("write input");

    funlang()
        .arg(&input)
        .assert()
        .success()
        .stdout("7\n2.5\n");
}

#[test]
fn reports_runtime_errors_with_position() {
    let dir = tempdir().expect("tempdir");
    let input = dir.path().join("input.fl");
    fs::write(&input, "var x = 1 / 0").expect("write input");

    funlang()
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Runtime Error: Division by zero"))
        .stderr(predicate::str::contains("line 1, column"));
}

#[test]
fn reports_syntax_errors() {
    let dir = tempdir().expect("tempdir");
    let input = dir.path().join("input.fl");
    fs::write(&input, "while 1 2").expect("write input");

    funlang()
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Illegal Syntax: Expected '{'"));
}

#[test]
fn emits_llvm_ir() {
    let dir = tempdir().expect("tempdir");
    let input = dir.path().join("input.fl");
    fs::write(&input, "print(1 + 2)").expect("write input");
    let output = dir.path().join("out.ll");

    funlang()
        .arg(&input)
        .arg("--emit")
        .arg("llvm")
        .arg("--output")
        .arg(&output)
        .assert()
        .success();

    let ir = fs::read_to_string(&output).expect("read ir");
    assert!(ir.contains("define i64 @main()"));
    assert!(ir.contains("@printf"));
}

#[test]
fn emit_defaults_to_the_source_path_with_ll_extension() {
    let dir = tempdir().expect("tempdir");
    let input = dir.path().join("program.fl");
    fs::write(&input, "1 + 1").expect("write input");

    funlang()
        .arg(&input)
        .arg("--emit")
        .arg("llvm")
        .assert()
        .success();

    assert!(dir.path().join("program.ll").exists());
}

#[test]
fn applies_spelling_configuration() {
    let dir = tempdir().expect("tempdir");
    let config = dir.path().join("lang.json");
    fs::write(
        &config,
        r#"{ "keywords": { "fun": "defn" }, "builtins": { "print": "say" } }"#,
    )
    .expect("write config");
    let input = dir.path().join("input.fl");
    fs::write(&input, "defn double(x) { return x * 2 }; say(double(21))")
        .expect("write input");

    funlang()
        .arg(&input)
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout("42\n");
}

#[test]
fn rejects_colliding_keyword_spellings() {
    let dir = tempdir().expect("tempdir");
    let config = dir.path().join("lang.json");
    fs::write(&config, r#"{ "keywords": { "fun": "while" } }"#).expect("write config");
    let input = dir.path().join("input.fl");
    fs::write(&input, "1").expect("write input");

    funlang()
        .arg(&input)
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Duplicate keyword: 'while'"));
}

#[test]
fn rejects_builtin_spellings_that_shadow_keywords() {
    let dir = tempdir().expect("tempdir");
    let config = dir.path().join("lang.json");
    fs::write(&config, r#"{ "builtins": { "print": "var" } }"#).expect("write config");
    let input = dir.path().join("input.fl");
    fs::write(&input, "1").expect("write input");

    funlang()
        .arg(&input)
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "Builtin function name conflicts with keyword: 'var'",
        ));
}

#[test]
fn rejects_unknown_internal_names() {
    let dir = tempdir().expect("tempdir");
    let config = dir.path().join("lang.json");
    fs::write(&config, r#"{ "keywords": { "loop": "repeat" } }"#).expect("write config");
    let input = dir.path().join("input.fl");
    fs::write(&input, "1").expect("write input");

    funlang()
        .arg(&input)
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown keyword: 'loop'"));
}

#[test]
fn shell_evaluates_lines_until_exit() {
    funlang()
        .write_stdin("var x = 40\nx + 2\nexit\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("funlang > "))
        .stdout(predicate::str::contains("42\n"));
}

#[test]
fn shell_reports_errors_and_continues() {
    funlang()
        .write_stdin("1 / 0\n2 + 2\nexit\n")
        .assert()
        .success()
        .stderr(predicate::str::contains("Runtime Error: Division by zero"))
        .stdout(predicate::str::contains("4\n"));
}
