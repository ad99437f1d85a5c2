/// Unterminated output kept per stream before it is force-flushed.
pub const MAX_BUFFER_BYTES: usize = 1024 * 1024;

/// Splits a byte stream arriving in arbitrary chunks into `\n`-terminated lines.
#[derive(Debug)]
pub struct LineBuffer {
    pending: Vec<u8>,
    limit: usize,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::with_limit(MAX_BUFFER_BYTES)
    }

    pub fn with_limit(limit: usize) -> Self {
        LineBuffer {
            pending: Vec::new(),
            limit,
        }
    }

    /// Append `chunk` and hand every completed line (without its `\n`) to `emit`.
    ///
    /// If the leftover partial line is then longer than the limit, it is emitted
    /// as-is and the buffer is cleared.
    pub fn push(&mut self, chunk: &[u8], mut emit: impl FnMut(&[u8])) {
        // Bytes already pending never contain a newline.
        let mut scan_from = self.pending.len();
        self.pending.extend_from_slice(chunk);

        let mut start = 0;
        while let Some(offset) = self.pending[scan_from..].iter().position(|&b| b == b'\n') {
            let end = scan_from + offset;
            emit(&self.pending[start..end]);
            start = end + 1;
            scan_from = start;
        }
        self.pending.drain(..start);

        if self.pending.len() > self.limit {
            emit(&self.pending);
            self.pending.clear();
        }
    }

    /// Take whatever partial line is left.
    pub fn take_remaining(&mut self) -> Option<Vec<u8>> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
