//! Purpose: Per-request output sinks that stand in for redirected stdout/stderr.
//! Exports: `OutputCapture`, `CapturedOutput`, `Stream`.
//! Role: Passed explicitly into evaluation so concurrent requests never share buffers.
//! Invariants: Contents are available after failures; `finish` never loses written text.
use std::sync::Mutex;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug, Default)]
pub struct OutputCapture {
    stdout: Mutex<String>,
    stderr: Mutex<String>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
}

impl OutputCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&self, stream: Stream, text: &str) {
        let sink = match stream {
            Stream::Stdout => &self.stdout,
            Stream::Stderr => &self.stderr,
        };
        sink.lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .push_str(text);
    }

    pub fn write_stdout(&self, text: &str) {
        self.write(Stream::Stdout, text);
    }

    pub fn write_stderr(&self, text: &str) {
        self.write(Stream::Stderr, text);
    }

    pub fn finish(self) -> CapturedOutput {
        CapturedOutput {
            stdout: self
                .stdout
                .into_inner()
                .unwrap_or_else(|poison| poison.into_inner()),
            stderr: self
                .stderr
                .into_inner()
                .unwrap_or_else(|poison| poison.into_inner()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{OutputCapture, Stream};

    #[test]
    fn streams_are_kept_apart() {
        let capture = OutputCapture::new();
        capture.write_stdout("hello\n");
        capture.write(Stream::Stderr, "warn\n");
        capture.write_stdout("again\n");
        let out = capture.finish();
        assert_eq!(out.stdout, "hello\nagain\n");
        assert_eq!(out.stderr, "warn\n");
    }

    #[test]
    fn empty_capture_yields_empty_strings() {
        let out = OutputCapture::new().finish();
        assert!(out.stdout.is_empty());
        assert!(out.stderr.is_empty());
    }
}
