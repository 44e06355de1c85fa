use std::ops::Deref;

/// Growable query buffer. Consumed bytes are skipped by moving `start`
/// forward; the live region is compacted only when appending runs out of room.
#[derive(Debug)]
pub struct Buffer {
    data: Vec<u8>,
    start: usize,
    end: usize,
}

impl Buffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            start: 0,
            end: 0,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn append(&mut self, bytes: &[u8]) {
        let needed = bytes.len();
        if self.end + needed > self.data.len() {
            self.make_room(needed);
        }
        self.data[self.end..self.end + needed].copy_from_slice(bytes);
        self.end += needed;
    }

    /// Drops `n` bytes from the front. O(1).
    pub fn consume(&mut self, n: usize) {
        assert!(n <= self.len(), "cannot consume more bytes than available");
        self.start += n;
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
    }

    /// Offset of the first `\r\n` in the live region.
    pub fn find_crlf(&self) -> Option<usize> {
        self.data().windows(2).position(|w| w == b"\r\n")
    }

    fn make_room(&mut self, needed: usize) {
        let live = self.len();
        if self.start > 0 {
            self.data.copy_within(self.start..self.end, 0);
            self.start = 0;
            self.end = live;
        }
        if live + needed > self.data.len() {
            let grown = (self.data.len() * 2).max(live + needed);
            self.data.resize(grown, 0);
        }
    }
}

impl Deref for Buffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}
