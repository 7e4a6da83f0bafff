use anyhow::{format_err, Context, Result};
use log::trace;
use std::ffi::OsStr;
use std::process::Output;
use tokio::process::Command;

/// Runs `program` with `args` and fails with both output streams if it exits non-zero.
pub(crate) async fn run<I, S>(program: &str, args: I) -> Result<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command.args(args);
    trace!("running {:?}", command);
    let output = command
        .output()
        .await
        .with_context(|| format!("Unable to start '{}'", program))?;
    check(program, &output)?;
    Ok(output)
}

/// The blocking form of [`run`], for use in `Drop`.
pub(crate) fn run_blocking<I, S>(program: &str, args: I) -> Result<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = std::process::Command::new(program)
        .args(args)
        .output()
        .with_context(|| format!("Unable to start '{}'", program))?;
    check(program, &output)?;
    Ok(output)
}

fn check(program: &str, output: &Output) -> Result<()> {
    if !output.status.success() {
        return Err(format_err!(
            "'{}' failed with exit status '{}'\n\n{}\n\n{}",
            program,
            output.status.code().unwrap_or(1),
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr),
        ));
    }
    Ok(())
}

#[tokio::test]
async fn failing_command_reports_its_output() {
    let err = run("sh", ["-c", "echo out; echo err >&2; exit 3"])
        .await
        .unwrap_err()
        .to_string();
    assert!(err.contains("exit status '3'"), "{}", err);
    assert!(err.contains("out"));
    assert!(err.contains("err"));
    assert!(run_blocking("sh", ["-c", "true"]).is_ok());
}
