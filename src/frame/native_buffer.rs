use std::sync::{Mutex, MutexGuard};

/// Opaque raw byte blob with a scoped lock/unlock discipline.
///
/// Access goes through [`NativeBuffer::lock`], which returns a guard that
/// releases the lock when dropped, on every exit path.
#[derive(Debug)]
pub struct NativeBuffer {
    bytes: Mutex<Vec<u8>>,
    len: usize,
}

impl NativeBuffer {
    pub fn new(bytes: Vec<u8>) -> Self {
        let len = bytes.len();
        Self {
            bytes: Mutex::new(bytes),
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Acquire scoped access to the underlying bytes.
    pub fn lock(&self) -> BufferGuard<'_> {
        BufferGuard {
            guard: self.bytes.lock().unwrap_or_else(|e| e.into_inner()),
        }
    }
}

/// Scoped accessor for a [`NativeBuffer`]. Unlocks on drop.
pub struct BufferGuard<'a> {
    guard: MutexGuard<'a, Vec<u8>>,
}

impl BufferGuard<'_> {
    pub fn bytes(&self) -> &[u8] {
        &self.guard
    }
}

impl std::ops::Deref for BufferGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}
