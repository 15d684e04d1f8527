//! Background line reader for a child's combined output stream.
//!
//! The supervision loop never reads the pipe itself: a dedicated thread does
//! the blocking `read_until` and pushes every line into an unbounded channel,
//! and the loop polls that channel with a bounded wait.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::io::{self, BufRead, BufReader, Read};
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinePoll {
    Line(String),
    /// Nothing arrived within the timeout; the stream is still open.
    Pending,
    /// The stream hit end-of-file and every queued line has been taken.
    Closed,
}

pub struct StreamDrainer {
    lines: Receiver<String>,
    reader: JoinHandle<()>,
}

impl StreamDrainer {
    /// Starts the reader thread right away. The thread owns the stream and
    /// exits on end-of-file or on a read error; a read blocked on a pipe only
    /// returns once the writing side closes, so the thread is never joined
    /// before that.
    pub fn spawn<R>(stream: R) -> io::Result<Self>
    where
        R: Read + Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::unbounded();
        let reader = thread::Builder::new()
            .name("pdal-output".to_string())
            .spawn(move || pump_lines(stream, tx))?;
        Ok(Self { lines: rx, reader })
    }

    pub fn take_line(&self, timeout: Duration) -> LinePoll {
        match self.lines.recv_timeout(timeout) {
            Ok(line) => LinePoll::Line(line),
            Err(RecvTimeoutError::Timeout) => LinePoll::Pending,
            Err(RecvTimeoutError::Disconnected) => LinePoll::Closed,
        }
    }

    /// Joins the reader thread. Only call this after `take_line` returned
    /// `Closed`: the sender is gone by then, so the thread is already
    /// returning. Dropping the drainer instead leaves the thread detached.
    pub fn finish(self) {
        if self.reader.join().is_err() {
            tracing::warn!("output reader thread panicked");
        }
    }
}

fn pump_lines<R: Read>(stream: R, tx: Sender<String>) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::with_capacity(256);
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(trim_line_end(&buf)).into_owned();
                if tx.send(line).is_err() {
                    break;
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                tracing::debug!("output stream read failed: {err}");
                break;
            }
        }
    }
}

fn trim_line_end(buf: &[u8]) -> &[u8] {
    let buf = buf.strip_suffix(b"\n").unwrap_or(buf);
    buf.strip_suffix(b"\r").unwrap_or(buf)
}
