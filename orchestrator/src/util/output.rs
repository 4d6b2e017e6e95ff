use std::fmt::Write;

use bytes::BytesMut;

/// A byte buffer that silently drops everything past `size_limit`.
pub struct SizeConstraintBytesMut {
    size_limit: usize,
    bytes: BytesMut,
}

impl SizeConstraintBytesMut {
    pub fn new(size_limit: usize) -> Self {
        SizeConstraintBytesMut {
            size_limit,
            bytes: BytesMut::new(),
        }
    }

    pub fn append(&mut self, bytes: &[u8]) {
        if self.bytes.len() >= self.size_limit {
            // do nothing
        } else if self.bytes.len() + bytes.len() > self.size_limit {
            let cut_at = self.size_limit - self.bytes.len();
            self.bytes.extend_from_slice(&bytes[0..cut_at]);
        } else {
            self.bytes.extend_from_slice(bytes);
        }
    }

    pub fn is_oversized(&self) -> bool {
        self.bytes.len() >= self.size_limit
    }

    pub fn into_string(self) -> String {
        let oversized = self.is_oversized();
        let mut s = String::from_utf8_lossy(&self.bytes).into_owned();
        if oversized {
            let _ = writeln!(s);
            let _ = writeln!(
                s,
                "--- output buffer capped out at {} bytes ---",
                self.size_limit
            );
        }
        s
    }
}
