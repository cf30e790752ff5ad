//! Incremental line decoding for streaming provider bodies.
//!
//! Both cloud providers stream server-sent events; the self-hosted provider
//! streams newline-delimited JSON. Chunk boundaries fall anywhere, so bytes
//! are buffered until a full line is available.

/// Buffers incoming bytes and yields complete lines.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: String,
}

impl LineBuffer {
    /// Feeds a chunk and returns every line completed by it, without the
    /// trailing newline.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.push_str(&String::from_utf8_lossy(chunk));

        let mut lines = Vec::new();
        while let Some(newline) = self.pending.find('\n') {
            let line = self.pending[..newline].trim_end_matches('\r').to_string();
            self.pending.drain(..=newline);
            lines.push(line);
        }
        lines
    }
}

/// Extracts the payload of an SSE `data:` line; `None` for comments, event
/// names, and blank separators.
pub(crate) fn sse_data(line: &str) -> Option<&str> {
    let data = line.strip_prefix("data:")?;
    Some(data.strip_prefix(' ').unwrap_or(data))
}
