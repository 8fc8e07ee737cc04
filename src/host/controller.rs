use super::embedding::{Embedding, Session as _};
use super::error::HostError;
use log::{error, info, trace};
use std::ffi::OsStr;
use std::process::ExitCode;

pub const EXIT_STARTUP_FAILURE: u8 = 1;
pub const EXIT_CALL_FAILURE: u8 = 2;

/// Outcome of a run whose runtime came up.
#[derive(Debug, Default)]
pub struct Report {
    pub calls: usize,
    pub failures: Vec<HostError>,
}

impl Report {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn code(&self) -> u8 {
        if self.is_success() {
            0
        } else {
            EXIT_CALL_FAILURE
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }
}

/// Initializes the runtime, calls `say_hello_to` once per name in order,
/// then finalizes the runtime.
///
/// A failing call is logged and recorded in the [`Report`]; the remaining
/// names are still greeted. Only a failed initialization is returned as an
/// error, in which case no call is made.
pub fn run<E, I>(embedding: &mut E, program: &str, names: I) -> Result<Report, HostError>
where
    E: Embedding,
    I: IntoIterator,
    I::Item: AsRef<OsStr>,
{
    let mut session = embedding
        .initialize(program)
        .map_err(HostError::Initialize)?;

    let mut report = Report::default();
    for name in names {
        let name = name.as_ref();
        trace!("say_hello_to({name:?})");
        report.calls += 1;
        if let Err(cause) = session.say_hello_to(name) {
            let failure = HostError::Call {
                name: name.to_os_string(),
                cause,
            };
            error!("{failure}");
            report.failures.push(failure);
        }
    }

    drop(session);
    info!(
        "greeted {} of {} names",
        report.calls - report.failures.len(),
        report.calls
    );
    Ok(report)
}
