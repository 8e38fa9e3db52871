//! Fetched buffers and the registry that owns them.
//!
//! A [`Buffer`] is the single owning handle of one key's data. Renderers get
//! [`BufferView`]s, which share the allocation read-only; the allocation is
//! freed when the last handle of either kind drops.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use log::{debug, warn};

use crate::schema::VariableKey;

/// Dimensions of a buffer: `[frames]` or `[frames, cells]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferShape {
    pub frames: usize,
    pub cells: Option<usize>,
}

impl BufferShape {
    pub fn scalar(frames: usize) -> Self {
        Self {
            frames,
            cells: None,
        }
    }

    pub fn grid(frames: usize, cells: usize) -> Self {
        Self {
            frames,
            cells: Some(cells),
        }
    }

    /// Values per frame.
    #[inline]
    pub fn frame_len(&self) -> usize {
        self.cells.unwrap_or(1)
    }

    /// Total number of values.
    #[inline]
    pub fn len(&self) -> usize {
        self.frames * self.frame_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for BufferShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cells {
            Some(cells) => write!(f, "({}, {})", self.frames, cells),
            None => write!(f, "({},)", self.frames),
        }
    }
}

struct BufferBlock {
    key: VariableKey,
    shape: BufferShape,
    data: Vec<f64>,
}

impl Drop for BufferBlock {
    fn drop(&mut self) {
        debug!(
            "Freed buffer {} {} ({:.1} MiB)",
            self.key,
            self.shape,
            (self.data.len() * std::mem::size_of::<f64>()) as f64 / (1024.0 * 1024.0)
        );
    }
}

/// Owning handle of one key's data. Not cloneable: the registry holds it.
pub struct Buffer {
    block: Arc<BufferBlock>,
}

impl Buffer {
    /// Wrap fully written data. `data.len()` must match the shape.
    pub fn new(key: VariableKey, shape: BufferShape, data: Vec<f64>) -> Result<Self, RegistryError> {
        if data.len() != shape.len() {
            return Err(RegistryError::ShapeMismatch {
                key,
                expected: shape.len(),
                actual: data.len(),
            });
        }
        Ok(Self {
            block: Arc::new(BufferBlock { key, shape, data }),
        })
    }

    pub fn key(&self) -> VariableKey {
        self.block.key
    }

    pub fn shape(&self) -> BufferShape {
        self.block.shape
    }

    /// A read-only view sharing this buffer's allocation.
    pub fn view(&self) -> BufferView {
        BufferView {
            block: Arc::clone(&self.block),
        }
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("key", &self.block.key)
            .field("shape", &self.block.shape)
            .finish()
    }
}

/// Read-only view onto a buffer.
#[derive(Clone)]
pub struct BufferView {
    block: Arc<BufferBlock>,
}

impl BufferView {
    pub fn key(&self) -> VariableKey {
        self.block.key
    }

    pub fn shape(&self) -> BufferShape {
        self.block.shape
    }

    #[inline]
    pub fn frame_count(&self) -> usize {
        self.block.shape.frames
    }

    /// Values of frame `index` (relative to the start frame).
    #[inline]
    pub fn frame(&self, index: usize) -> &[f64] {
        let len = self.block.shape.frame_len();
        &self.block.data[index * len..(index + 1) * len]
    }

    /// First value of frame `index`; the whole frame for scalar buffers.
    #[inline]
    pub fn scalar(&self, index: usize) -> f64 {
        self.frame(index)[0]
    }

    /// Every frame, in order.
    pub fn frames(&self) -> impl Iterator<Item = &[f64]> {
        self.block.data.chunks_exact(self.block.shape.frame_len())
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.block.data
    }
}

impl fmt::Debug for BufferView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferView")
            .field("key", &self.block.key)
            .field("shape", &self.block.shape)
            .finish()
    }
}

/// Registry errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("buffer for {0} is already registered")]
    AlreadyRegistered(VariableKey),
    #[error("no buffer registered for {0}")]
    NotFound(VariableKey),
    #[error("buffer for {0} was already released")]
    AlreadyReleased(VariableKey),
    #[error("buffer for {key} has {actual} values, shape needs {expected}")]
    ShapeMismatch {
        key: VariableKey,
        expected: usize,
        actual: usize,
    },
}

/// Live buffers by key. At most one live buffer per key. Nothing is
/// released implicitly except on drop.
#[derive(Debug, Default)]
pub struct BufferRegistry {
    live: BTreeMap<VariableKey, Buffer>,
    released: BTreeSet<VariableKey>,
}

impl BufferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, buffer: Buffer) -> Result<(), RegistryError> {
        let key = buffer.key();
        if self.live.contains_key(&key) {
            return Err(RegistryError::AlreadyRegistered(key));
        }
        debug!("Registered buffer {} {}", key, buffer.shape());
        self.released.remove(&key);
        self.live.insert(key, buffer);
        Ok(())
    }

    pub fn lookup(&self, key: VariableKey) -> Result<BufferView, RegistryError> {
        self.live
            .get(&key)
            .map(Buffer::view)
            .ok_or(RegistryError::NotFound(key))
    }

    pub fn contains(&self, key: VariableKey) -> bool {
        self.live.contains_key(&key)
    }

    /// Release one key. A second release reports `AlreadyReleased` and
    /// leaves every other buffer untouched.
    pub fn release_one(&mut self, key: VariableKey) -> Result<(), RegistryError> {
        match self.live.remove(&key) {
            Some(buffer) => {
                debug!("Released {} (views outstanding: {})", key, Arc::strong_count(&buffer.block) - 1);
                self.released.insert(key);
                Ok(())
            }
            None if self.released.contains(&key) => Err(RegistryError::AlreadyReleased(key)),
            None => Err(RegistryError::NotFound(key)),
        }
    }

    /// Release several keys, warning about any that were not live.
    /// Returns how many were released.
    pub fn release(&mut self, keys: impl IntoIterator<Item = VariableKey>) -> usize {
        let mut count = 0;
        for key in keys {
            match self.release_one(key) {
                Ok(()) => count += 1,
                Err(e) => warn!("Ignoring release: {e}"),
            }
        }
        count
    }

    /// Release every live buffer.
    pub fn release_all(&mut self) -> usize {
        let keys: Vec<VariableKey> = self.live.keys().copied().collect();
        self.release(keys)
    }

    pub fn live_keys(&self) -> impl Iterator<Item = VariableKey> + '_ {
        self.live.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}
