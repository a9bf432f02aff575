//! Local stdout output.
//!
//! Before the event socket is connected there is nowhere else to send log
//! records, so they go to stdout as JSON lines. The host captures the
//! worker's stdout and shows it if startup fails.

use std::io::Write;

/// Write a line to stdout.
///
/// Writes the bytes followed by a single `\n` and flushes, holding the
/// stdout lock so concurrent callers never interleave.
///
/// # Errors
///
/// Returns IO error if write or flush fails.
pub fn write_stdout_line(line: &[u8]) -> std::io::Result<()> {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    handle.write_all(line)?;
    handle.write_all(b"\n")?;
    handle.flush()?;
    Ok(())
}

/// Write a JSON value to stdout as a single line.
///
/// # Errors
///
/// Returns error if serialization or write fails.
pub fn write_stdout_json<T: serde::Serialize + ?Sized>(value: &T) -> crate::error::Result<()> {
    let json = serde_json::to_vec(value)?;
    write_stdout_line(&json)?;
    Ok(())
}
