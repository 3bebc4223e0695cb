use std::fmt::Write as _;

const INITIAL_CAPACITY: usize = 128;

/// A growable byte vector that doubles capacity on overflow, starting at
/// [`INITIAL_CAPACITY`] bytes. Thin enough to be a near-transparent wrapper
/// over `Vec<u8>`, kept as a distinct type because call sites reason about
/// it in terms of a `put`/`write`/`printf` contract rather than the full
/// `Vec` API surface.
#[derive(Debug, Clone, Default)]
pub struct Buffer {
    data: Vec<u8>,
}

impl Buffer {
    pub fn new() -> Self {
        Self {
            data: Vec::with_capacity(INITIAL_CAPACITY),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn grow_for(&mut self, additional: usize) {
        let needed = self.data.len() + additional;
        if needed <= self.data.capacity() {
            return;
        }
        let mut new_cap = self.data.capacity().max(INITIAL_CAPACITY);
        while new_cap < needed {
            new_cap *= 2;
        }
        self.data.reserve(new_cap - self.data.len());
    }

    pub fn put(&mut self, byte: u8) {
        self.grow_for(1);
        self.data.push(byte);
    }

    pub fn write(&mut self, bytes: &[u8]) {
        self.grow_for(bytes.len());
        self.data.extend_from_slice(bytes);
    }

    /// Formats `args` and appends the result. Does not null-terminate.
    pub fn printf(&mut self, args: std::fmt::Arguments<'_>) {
        let mut scratch = String::new();
        let _ = scratch.write_fmt(args);
        self.write(scratch.as_bytes());
    }

    pub fn reset(&mut self) {
        self.data.clear();
    }
}

#[macro_export]
macro_rules! buffer_printf {
    ($buf:expr, $($arg:tt)*) => {
        $buf.printf(format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_and_write_accumulate() {
        let mut buf = Buffer::new();
        buf.put(b'a');
        buf.write(b"bc");
        assert_eq!(buf.as_slice(), b"abc");
    }

    #[test]
    fn printf_does_not_null_terminate() {
        let mut buf = Buffer::new();
        buffer_printf!(buf, "{}-{}", 1, 2);
        assert_eq!(buf.as_slice(), b"1-2");
    }

    #[test]
    fn reset_clears_without_deallocating() {
        let mut buf = Buffer::new();
        buf.write(&[0u8; 512]);
        let cap_before = buf.data.capacity();
        buf.reset();
        assert!(buf.is_empty());
        assert_eq!(buf.data.capacity(), cap_before);
    }

    #[test]
    fn grows_past_initial_capacity() {
        let mut buf = Buffer::new();
        buf.write(&vec![0u8; INITIAL_CAPACITY * 4]);
        assert_eq!(buf.len(), INITIAL_CAPACITY * 4);
    }
}
