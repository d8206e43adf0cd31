use std::fs::{read_to_string, write};
use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::{Builder, NamedTempFile, tempdir};


fn config_file(contents: &str) -> NamedTempFile {
    let mut config_file = NamedTempFile::new().unwrap();
    writeln!(config_file, "{}", contents).unwrap();
    config_file
}

fn source_file(contents: &str) -> NamedTempFile {
    let mut source = Builder::new().suffix(".sl").tempfile().unwrap();
    write!(source, "{}", contents).unwrap();
    source
}


#[test]
fn missing_source() {
    let config = config_file("backend = \"X86\"");

    let mut compiler_cmd = Command::cargo_bin("slatec").unwrap();
    let compiler_assert = compiler_cmd
        .arg("-c")
        .arg(config.path())
        .arg("./NONEXISTENT")
        .assert();
    compiler_assert
        .failure()
        .stderr(predicate::str::contains("could not read source file"));
}


#[test]
fn missing_config() {
    let mut compiler_cmd = Command::cargo_bin("slatec").unwrap();
    let compiler_assert = compiler_cmd
        .arg("-c")
        .arg("NONEXISTENT")
        .arg("../programs/fib.sl")
        .assert();
    compiler_assert
        .failure()
        .stderr(predicate::str::contains("could not read config file"));
}


#[test]
fn bad_config() {
    let config = config_file("bad config");

    let mut compiler_cmd = Command::cargo_bin("slatec").unwrap();
    let compiler_assert = compiler_cmd
        .arg("-c")
        .arg(config.path())
        .arg("../programs/fib.sl")
        .assert();
    compiler_assert
        .failure()
        .stderr(predicate::str::contains("incorrect configuration"));
}


#[test]
fn unknown_backend() {
    let config = config_file("backend = \"LLVM\"");

    Command::cargo_bin("slatec").unwrap()
        .arg("-c")
        .arg(config.path())
        .arg("../programs/fib.sl")
        .assert()
        .failure()
        .stderr(predicate::str::contains("incorrect configuration"));
}


#[test]
fn eval_flag() {
    Command::cargo_bin("slatec").unwrap()
        .arg("-e")
        .arg("../programs/counter.sl")
        .assert()
        .code(5);
}


#[test]
fn evaluator_backend_from_config() {
    let config = config_file("backend = \"Evaluator\"\nverbose = false");

    Command::cargo_bin("slatec").unwrap()
        .arg("-c")
        .arg(config.path())
        .arg("../programs/fact.sl")
        .assert()
        .code(120)
        .stdout("120\n");
}


#[test]
fn verbose_logs_passes() {
    Command::cargo_bin("slatec").unwrap()
        .arg("-v")
        .arg("-e")
        .arg("../programs/counter.sl")
        .env_remove("RUST_LOG")
        .assert()
        .code(5)
        .stderr(predicate::str::contains("type checked program"));
}


#[test]
fn compile_writes_assembly() {
    let dir = tempdir().unwrap();
    let asm_path = dir.path().join("counter.asm");

    Command::cargo_bin("slatec").unwrap()
        .arg("../programs/counter.sl")
        .arg("-o")
        .arg(&asm_path)
        .assert()
        .success();

    let asm = read_to_string(&asm_path).unwrap();
    assert!(asm.starts_with("global _start\n"));
    assert!(asm.contains("\nmain:\n"));
    assert!(asm.contains("main_while_start_0:"));
}


#[test]
fn default_output_path() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("answer.sl");
    write(&source, "i32 main() { return 42; }").unwrap();

    Command::cargo_bin("slatec").unwrap()
        .arg(&source)
        .assert()
        .success();

    let asm = read_to_string(dir.path().join("answer.asm")).unwrap();
    assert!(asm.contains("mov eax, 42\nret\n"));
}


#[test]
fn type_error_is_located() {
    let source = source_file("i32 main() {\n    return nope;\n}\n");

    Command::cargo_bin("slatec").unwrap()
        .arg(source.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("[error] Unknown variable")
            .and(predicate::str::contains(":2:12"))
            .and(predicate::str::contains("2 |     return nope;"))
            .and(predicate::str::contains("^^^^")));
}


#[test]
fn parse_error_is_reported() {
    let source = source_file("i32 main() {\n    return 1\n}\n");

    Command::cargo_bin("slatec").unwrap()
        .arg("-e")
        .arg(source.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("[error] expected ';', found \"}\""));
}


#[test]
fn unknown_builtin_fails_compilation() {
    let source = source_file("builtin void launch(n: i32);\ni32 main() { return 0; }\n");
    let dir = tempdir().unwrap();

    Command::cargo_bin("slatec").unwrap()
        .arg(source.path())
        .arg("-o")
        .arg(dir.path().join("out.asm"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown builtin launch"));
}


#[test]
fn deep_recursion_on_default_stack() {
    let source = source_file("\
i32 down(n: i32) { if (n == 0) { return 0; } return down(n - 1) + 1; }
i32 main() { return down(500); }
");

    Command::cargo_bin("slatec").unwrap()
        .arg("-e")
        .arg(source.path())
        .assert()
        .code(244);
}


#[test]
fn unbounded_recursion_is_reported() {
    let source = source_file("i32 down(n: i32) { return down(n + 1); }\ni32 main() { return down(0); }\n");

    Command::cargo_bin("slatec").unwrap()
        .arg("-e")
        .arg(source.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("[error] call depth exceeded 512"));
}
