/// Response Interception
///
/// Sub-request replies are buffered in memory instead of being streamed to the
/// client, so post-processing hooks can read the body that was written and
/// batch replies can be stitched into a single JSON array on flush.

/// An in-memory response: a status override plus the bytes written so far.
#[derive(Debug, Default)]
pub struct BufferedResponse {
    status: Option<u16>,
    buf: Vec<u8>,
}

impl BufferedResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn set_status(&mut self, status: u16) {
        self.status = Some(status);
    }

    /// Effective status. An unset status with a body means an implicit 200,
    /// matching how an HTTP response writer behaves.
    pub fn status(&self) -> u16 {
        self.status.unwrap_or(200)
    }

    #[allow(dead_code)] // Status predicate - paired with set_status for completeness
    pub fn is_ok(&self) -> bool {
        self.status == Some(200) || (self.status.is_none() && !self.buf.is_empty())
    }

    pub fn body(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_body(self) -> Vec<u8> {
        self.buf
    }
}

/// Collector for batch replies. Holds one buffered response per sub-request,
/// in input order; `flush` emits `[b0,b1,...,bn-1]`.
#[derive(Debug, Default)]
pub struct BatchBuffer {
    parts: Vec<BufferedResponse>,
}

impl BatchBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, part: BufferedResponse) {
        self.parts.push(part);
    }

    pub fn flush(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.parts.iter().map(|p| p.body().len() + 1).sum::<usize>() + 2);
        out.push(b'[');
        for (i, part) in self.parts.iter().enumerate() {
            if i != 0 {
                out.push(b',');
            }
            out.extend_from_slice(part.body());
        }
        out.push(b']');
        out
    }
}
