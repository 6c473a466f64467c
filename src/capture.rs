//! Console capture for code under test.
//!
//! An [`OutputCapture`] collects everything written through its writers between
//! [`begin`](OutputCapture::begin) and [`end`](OutputCapture::end), can feed
//! canned input to readers, and enforces a hard byte limit so that runaway
//! output from a looping program stops with an error instead of filling memory.
//!
//! Student programs see the capture through a [`Console`], which bundles an
//! input reader with stdout/stderr writers. When nothing is being captured the
//! writers pass through to the real process streams.

use crate::core::error::Error;
use std::io::{self, BufRead, BufReader, Cursor, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct CaptureState {
    capturing: bool,
    also_stderr: bool,
    echo: bool,
    limit: usize,
    limit_hit: bool,
    closed: bool,
    buffer: Vec<u8>,
    input: Option<Cursor<Vec<u8>>>,
}

/// Shared capture buffer with optional echo, input redirection and byte limit.
#[derive(Debug, Clone, Default)]
pub struct OutputCapture {
    state: Arc<Mutex<CaptureState>>,
}

impl OutputCapture {
    /// Create a capture with no byte limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a capture that fails writes past `limit` bytes (0 disables the limit).
    pub fn with_limit(limit: usize) -> Self {
        let capture = Self::new();
        capture.set_output_limit(limit);
        capture
    }

    fn lock(&self) -> MutexGuard<'_, CaptureState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the byte limit for captured output; 0 disables it.
    pub fn set_output_limit(&self, limit: usize) {
        self.lock().limit = limit;
    }

    pub fn output_limit(&self) -> usize {
        self.lock().limit
    }

    /// Also copy captured bytes to the real terminal.
    pub fn set_echo(&self, echo: bool) {
        self.lock().echo = echo;
    }

    /// Start capturing stdout, and stderr too if `also_stderr`.
    pub fn begin(&self, also_stderr: bool) {
        let mut state = self.lock();
        state.capturing = true;
        state.also_stderr = also_stderr;
        state.limit_hit = false;
        state.buffer.clear();
    }

    /// Stop capturing and return everything captured since [`begin`](Self::begin).
    pub fn end(&self) -> String {
        let mut state = self.lock();
        state.capturing = false;
        let bytes = std::mem::take(&mut state.buffer);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    pub fn is_capturing(&self) -> bool {
        self.lock().capturing
    }

    /// Whether a write was rejected because of the byte limit.
    pub fn limit_exceeded(&self) -> bool {
        self.lock().limit_hit
    }

    /// Bytes captured so far.
    pub fn captured_len(&self) -> usize {
        self.lock().buffer.len()
    }

    /// Serve `input` to readers instead of the real stdin.
    pub fn redirect_input_begin(&self, input: &str) {
        self.lock().input = Some(Cursor::new(input.as_bytes().to_vec()));
    }

    /// Restore readers to the real stdin.
    pub fn redirect_input_end(&self) {
        self.lock().input = None;
    }

    /// Make every further write fail. Used when a test is abandoned.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.capturing = false;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Writer for the program's standard output.
    pub fn stdout(&self) -> CaptureWriter {
        CaptureWriter {
            capture: self.clone(),
            stream: Stream::Stdout,
        }
    }

    /// Writer for the program's standard error.
    pub fn stderr(&self) -> CaptureWriter {
        CaptureWriter {
            capture: self.clone(),
            stream: Stream::Stderr,
        }
    }

    /// Reader for the program's standard input.
    pub fn stdin(&self) -> CaptureReader {
        CaptureReader {
            capture: self.clone(),
        }
    }

    fn write_stream(&self, stream: Stream, data: &[u8]) -> io::Result<usize> {
        let mut state = self.lock();
        if state.closed {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "test was cancelled; output is closed",
            ));
        }

        let captured = state.capturing && (stream == Stream::Stdout || state.also_stderr);
        if !captured {
            drop(state);
            return stream.write_real(data);
        }

        if state.limit > 0 && state.buffer.len() + data.len() > state.limit {
            state.limit_hit = true;
            let limit = state.limit;
            tracing::debug!(limit, "captured output limit exceeded");
            return Err(io::Error::other(Error::OutputLimitExceeded { limit }));
        }

        state.buffer.extend_from_slice(data);
        if state.echo {
            drop(state);
            let _ = stream.write_real(data);
        }
        Ok(data.len())
    }

    fn read_input(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.lock();
        match state.input.as_mut() {
            Some(cursor) => cursor.read(buf),
            None => {
                drop(state);
                io::stdin().read(buf)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    fn write_real(self, data: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Stdout => io::stdout().write_all(data)?,
            Stream::Stderr => io::stderr().write_all(data)?,
        }
        Ok(data.len())
    }
}

/// [`Write`] handle into an [`OutputCapture`].
#[derive(Debug, Clone)]
pub struct CaptureWriter {
    capture: OutputCapture,
    stream: Stream,
}

impl Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.capture.write_stream(self.stream, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.stream {
            Stream::Stdout => io::stdout().flush(),
            Stream::Stderr => io::stderr().flush(),
        }
    }
}

/// [`Read`] handle serving redirected input, or the real stdin.
#[derive(Debug, Clone)]
pub struct CaptureReader {
    capture: OutputCapture,
}

impl Read for CaptureReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.capture.read_input(buf)
    }
}

/// The console handed to a student program's entry point.
pub struct Console {
    input: Box<dyn BufRead + Send>,
    out: Box<dyn Write + Send>,
    err: Box<dyn Write + Send>,
    echo_input: bool,
}

impl Console {
    /// A console bound to the real process streams.
    pub fn stdio() -> Self {
        Self {
            input: Box::new(BufReader::new(io::stdin())),
            out: Box::new(io::stdout()),
            err: Box::new(io::stderr()),
            echo_input: false,
        }
    }

    /// A console reading and writing through `capture`.
    ///
    /// Lines read are echoed into the output while a [`Lockdown`](crate::exit::Lockdown)
    /// is held.
    pub fn captured(capture: &OutputCapture) -> Self {
        Self {
            input: Box::new(BufReader::new(capture.stdin())),
            out: Box::new(capture.stdout()),
            err: Box::new(capture.stderr()),
            echo_input: crate::exit::is_echo_input(),
        }
    }

    /// A console over arbitrary streams.
    pub fn from_parts(
        input: impl BufRead + Send + 'static,
        out: impl Write + Send + 'static,
        err: impl Write + Send + 'static,
    ) -> Self {
        Self {
            input: Box::new(input),
            out: Box::new(out),
            err: Box::new(err),
            echo_input: false,
        }
    }

    /// Read one line without its trailing newline; `None` at end of input.
    pub fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        if self.echo_input {
            writeln!(self.out, "{line}")?;
        }
        Ok(Some(line))
    }

    pub fn input(&mut self) -> &mut dyn BufRead {
        &mut *self.input
    }

    pub fn out(&mut self) -> &mut dyn Write {
        &mut *self.out
    }

    pub fn err(&mut self) -> &mut dyn Write {
        &mut *self.err
    }
}

impl Write for Console {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.out.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// Run a program entry point with `input` on its stdin and its output captured.
///
/// Returns the program's status and everything it printed. Exceeding `limit`
/// bytes of output is an error even if the program swallowed the failed write.
pub fn run_and_capture<F>(
    main: F,
    input: &str,
    limit: usize,
    also_stderr: bool,
) -> crate::core::error::Result<(i32, String)>
where
    F: FnOnce(&mut Console) -> i32,
{
    let capture = OutputCapture::with_limit(limit);
    if !input.is_empty() {
        capture.redirect_input_begin(input);
    }
    capture.begin(also_stderr);
    let status = {
        let mut console = Console::captured(&capture);
        let status = main(&mut console);
        let _ = console.flush();
        status
    };
    let output = capture.end();
    capture.redirect_input_end();

    if capture.limit_exceeded() {
        return Err(Error::OutputLimitExceeded { limit });
    }
    tracing::debug!(status, bytes = output.len(), "captured program run finished");
    Ok((status, output))
}
