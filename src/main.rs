use anyhow::Result;
use embedded_hello::host::{self, WasmEmbedding};
use std::env;
use std::process::ExitCode;

fn main() -> Result<ExitCode> {
    pretty_env_logger::init();

    // every argument after the program name is a name, verbatim
    let mut args = env::args_os();
    let program = args
        .next()
        .map(|program| program.to_string_lossy().into_owned())
        .unwrap_or_else(|| "hello".to_string());
    let names: Vec<_> = args.collect();

    let mut embedding = WasmEmbedding::new();
    let report = host::run(&mut embedding, &program, &names)?;
    Ok(report.exit_code())
}
