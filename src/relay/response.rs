//! Response length accounting.

/// Declared length of a backend response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseLength {
    /// Not declared; the response ends when the backend closes the stream.
    Unknown,
    /// Exact body byte count; nothing beyond it belongs to this response.
    Known(u64),
}

impl ResponseLength {
    /// Wire-style length, with `-1` standing for "not declared".
    pub fn as_declared(&self) -> i64 {
        match self {
            ResponseLength::Unknown => -1,
            ResponseLength::Known(n) => i64::try_from(*n).unwrap_or(i64::MAX),
        }
    }
}

/// Tracks how much of the current response has reached the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseTracker {
    length: ResponseLength,
    relayed: u64,
    backend_closed_by_peer: bool,
}

impl ResponseTracker {
    pub fn new(length: ResponseLength) -> Self {
        Self {
            length,
            relayed: 0,
            backend_closed_by_peer: false,
        }
    }

    pub fn length(&self) -> ResponseLength {
        self.length
    }

    pub fn relayed(&self) -> u64 {
        self.relayed
    }

    pub fn backend_closed_by_peer(&self) -> bool {
        self.backend_closed_by_peer
    }

    /// Whether another backend read is needed to finish this response.
    pub fn wants_more(&self) -> bool {
        if self.backend_closed_by_peer {
            return false;
        }
        match self.length {
            ResponseLength::Unknown => true,
            ResponseLength::Known(total) => self.relayed < total,
        }
    }

    /// Largest read that cannot overshoot the declared length.
    pub fn next_read_len(&self, capacity: usize) -> usize {
        match self.length {
            ResponseLength::Unknown => capacity,
            ResponseLength::Known(total) => {
                let remaining = total.saturating_sub(self.relayed);
                usize::try_from(remaining).map_or(capacity, |r| r.min(capacity))
            }
        }
    }

    /// Account for `n` bytes forwarded to the client.
    pub fn record(&mut self, n: usize) {
        self.relayed += n as u64;
        if let ResponseLength::Known(total) = self.length {
            debug_assert!(self.relayed <= total, "relayed {} of {}", self.relayed, total);
        }
    }

    /// The backend ended its stream gracefully.
    pub fn mark_backend_closed(&mut self) {
        self.backend_closed_by_peer = true;
    }
}

impl Default for ResponseTracker {
    fn default() -> Self {
        Self::new(ResponseLength::Known(0))
    }
}
