//! Container log framing.
//!
//! Kubernetes expects container logs as one line per `\n` the workload
//! writes, each prefixed with a timestamp and a stream name. The container
//! itself only sees the write end of a pipe; a background worker owns the
//! read end and the log file, framing bytes as they arrive. The worker's
//! only shutdown signal is write-end closure: once the runtime and the
//! child have both dropped their copies, the read loop observes EOF, frames
//! a final boundary line, and exits.

use std::fs::File;
use std::io::{self, pipe, BufWriter, PipeWriter, Read, Write};
use std::thread;

use crate::log_warn_globally;
use crate::timestamp::Iso8601Timestamp;

const READ_BUFFER_SIZE: usize = 4096;

/// Create the log pipe and launch the framing worker over `log_file`.
/// Returns the write end to hand to the container; dropping every copy of
/// it lets the worker drain and terminate.
pub fn spawn_log_writer(log_file: File) -> io::Result<PipeWriter> {
    let (read_end, write_end) = pipe()?;
    thread::Builder::new()
        .name(String::from("container-log"))
        .spawn(move || {
            if let Err(error) = frame(read_end, BufWriter::new(log_file)) {
                log_warn_globally!("Container log writer failed: {error}");
            }
        })?;
    Ok(write_end)
}

/// Frame everything `input` produces into `output`, in the format the
/// kubelet parses.
fn frame(mut input: impl Read, mut output: impl Write) -> io::Result<()> {
    writeln!(
        output,
        "{} stderr --- Logging started",
        Iso8601Timestamp::now()
    )?;
    output.flush()?;

    let mut line_start = true;
    let reason = loop {
        let mut buffer = [0u8; READ_BUFFER_SIZE];
        match input.read(&mut buffer) {
            Ok(0) => break String::from("Pipe closed by container"),
            Ok(length) => {
                // One timestamp per chunk, computed lazily and reused for
                // every line the chunk starts.
                let mut now: Option<Iso8601Timestamp> = None;
                for &byte in &buffer[..length] {
                    if line_start {
                        let now = now.get_or_insert_with(Iso8601Timestamp::now);
                        write!(output, "{now} stdout ")?;
                        line_start = false;
                    }
                    output.write_all(&[byte])?;
                    if byte == b'\n' {
                        line_start = true;
                    }
                }
                output.flush()?;
            }
            Err(error) => break error.to_string(),
        }
    };

    // If the pipe closed mid-line, complete the line.
    if !line_start {
        output.write_all(b"\n")?;
    }
    writeln!(
        output,
        "{} stderr --- Logging stopped: {reason}",
        Iso8601Timestamp::now()
    )?;
    output.flush()
}
