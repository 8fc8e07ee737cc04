use anyhow::Result;
use embedded_hello::host::{self, HostError, ModuleSource, WasmEmbedding};
use embedded_hello::wasi::wasi_snapshot_preview1::File;
use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex};

fn capture() -> Arc<Mutex<File>> {
    Arc::new(Mutex::new(File::from_buffer(vec![])))
}

fn output(stdout: &Arc<Mutex<File>>) -> String {
    stdout.lock().unwrap().read_string().unwrap()
}

fn module(wat: &str) -> ModuleSource {
    ModuleSource::Bytes(wat::parse_str(wat).unwrap())
}

// Exports everything the host needs, but traps on three-byte names.
const PICKY: &str = r#"
(module
  (import "wasi_snapshot_preview1" "fd_write"
    (func $fd_write (param i32 i32 i32 i32) (result i32)))
  (memory (export "memory") 1)
  (func (export "alloc") (param i32) (result i32)
    (i32.const 1024))
  (func (export "say_hello_to") (param $name i32) (param $len i32)
    (if (i32.eq (local.get $len) (i32.const 3))
      (then (unreachable)))
    (i32.store (i32.const 0) (local.get $name))
    (i32.store (i32.const 4) (local.get $len))
    (drop (call $fd_write (i32.const 1) (i32.const 0) (i32.const 1) (i32.const 8))))
)
"#;

#[test]
fn greets_every_name_in_order() -> Result<()> {
    let stdout = capture();
    let mut embedding = WasmEmbedding::new().with_stdout(Arc::clone(&stdout));
    let report = host::run(&mut embedding, "hello", ["Alice", "Bob"])?;

    assert_eq!(report.calls, 2);
    assert!(report.is_success());
    insta::assert_snapshot!(output(&stdout).replace('\n', "|"), @"Hello Alice!|Hello Bob!|");
    Ok(())
}

#[test]
fn no_names_prints_nothing() -> Result<()> {
    let stdout = capture();
    let mut embedding = WasmEmbedding::new().with_stdout(Arc::clone(&stdout));
    let report = host::run(&mut embedding, "hello", Vec::<String>::new())?;

    assert_eq!(report.calls, 0);
    assert_eq!(report.code(), 0);
    assert_eq!(output(&stdout), "");
    Ok(())
}

#[test]
fn names_are_passed_through_verbatim() -> Result<()> {
    let stdout = capture();
    let mut embedding = WasmEmbedding::new().with_stdout(Arc::clone(&stdout));
    host::run(&mut embedding, "hello", ["", "世界", "-v", "a b"])?;

    assert_eq!(
        output(&stdout),
        "Hello !\nHello 世界!\nHello -v!\nHello a b!\n"
    );
    Ok(())
}

#[test]
fn long_name_grows_guest_memory() -> Result<()> {
    let name = "x".repeat(100_000);
    let stdout = capture();
    let mut embedding = WasmEmbedding::new().with_stdout(Arc::clone(&stdout));
    let report = host::run(&mut embedding, "hello", [name.as_str(), "Bob"])?;

    assert!(report.is_success());
    assert_eq!(output(&stdout), format!("Hello {name}!\nHello Bob!\n"));
    Ok(())
}

#[test]
fn failed_call_is_reported_and_the_rest_still_run() -> Result<()> {
    let stdout = capture();
    let mut embedding = WasmEmbedding::new()
        .with_module(module(PICKY))
        .with_stdout(Arc::clone(&stdout));
    let report = host::run(&mut embedding, "hello", ["Alice", "Bob", "Carol"])?;

    assert_eq!(report.calls, 3);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.code(), 2);
    match &report.failures[0] {
        HostError::Call { name, cause } => {
            assert_eq!(name, "Bob");
            assert!(format!("{cause:#}").contains("unreachable"));
        }
        other => panic!("unexpected failure: {other}"),
    }
    assert_eq!(output(&stdout), "AliceCarol");
    Ok(())
}

#[test]
fn module_without_say_hello_to_fails_to_initialize() {
    let mut embedding = WasmEmbedding::new().with_module(module(
        r#"
        (module
          (memory (export "memory") 1)
          (func (export "alloc") (param i32) (result i32) (i32.const 0)))
        "#,
    ));
    let err = host::run(&mut embedding, "hello", ["Alice"]).unwrap_err();

    assert!(matches!(err, HostError::Initialize(_)));
    assert!(err.to_string().contains("say_hello_to"));
}

#[test]
fn module_without_memory_fails_to_initialize() {
    let mut embedding = WasmEmbedding::new().with_module(module(
        r#"
        (module
          (func (export "alloc") (param i32) (result i32) (i32.const 0))
          (func (export "say_hello_to") (param i32 i32)))
        "#,
    ));
    let err = host::run(&mut embedding, "hello", ["Alice"]).unwrap_err();

    assert!(matches!(err, HostError::Initialize(_)));
    assert!(err.to_string().contains("memory"));
}

#[test]
fn invalid_module_fails_to_initialize() {
    let mut embedding =
        WasmEmbedding::new().with_module(ModuleSource::Bytes(b"not wasm".to_vec()));
    let err = host::run(&mut embedding, "hello", ["Alice"]).unwrap_err();

    assert!(matches!(err, HostError::Initialize(_)));
}

#[test]
fn missing_module_file_fails_to_initialize() {
    let mut embedding = WasmEmbedding::new()
        .with_module(ModuleSource::File("does/not/exist.wasm".into()));
    let err = host::run(&mut embedding, "hello", ["Alice"]).unwrap_err();

    assert!(matches!(err, HostError::Initialize(_)));
}

#[cfg(unix)]
#[test]
fn non_utf8_name_reaches_the_guest_unchanged() -> Result<()> {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let stdout = capture();
    let mut embedding = WasmEmbedding::new().with_stdout(Arc::clone(&stdout));
    let report = host::run(&mut embedding, "hello", [OsStr::from_bytes(b"Al\xffce")])?;

    assert!(report.is_success());
    let written = match &*stdout.lock().unwrap() {
        File::Buffer(buf) => buf.clone(),
        _ => panic!("stdout is not captured"),
    };
    assert_eq!(written, b"Hello Al\xffce!\n".to_vec());
    Ok(())
}
