use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use crate::id::Id;

const BLOCK_SIZE: usize = 32;

/// A resource pool keyed by generational [`Id`]s, laid out as a
/// chunked block-of-blocks so the backing storage for live resources never
/// moves once allocated — grounded in `wgpu-core::registry::Storage`'s
/// `blocks: [.. ; 256]` array of fixed-size `StorageBlock`s. Unlike that
/// implementation (which threads raw `UnsafeCell`s through to avoid any
/// locking on the hot path), this pool uses one `RwLock` per block: every
/// resource pool in this system is mutated at allocation/free time only,
/// never per-draw, so the lock is never on a hot path worth the
/// unsafe-cell bookkeeping.
pub struct ChunkedSparsePool<T> {
    blocks: RwLock<Vec<Box<[Slot<T>]>>>,
    free_list: Mutex<Vec<u32>>,
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            generation: 0,
            value: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("resource slot {0} is vacant")]
    Vacant(u32),
    #[error("resource slot {index} has generation {current}, caller held generation {requested}")]
    StaleGeneration {
        index: u32,
        current: u32,
        requested: u32,
    },
}

impl<T> ChunkedSparsePool<T> {
    pub fn new() -> Self {
        Self {
            blocks: RwLock::new(Vec::new()),
            free_list: Mutex::new(Vec::new()),
        }
    }

    /// Insert `value`, reusing a freed slot (bumping its generation) when
    /// one is available, else growing the block list.
    pub fn insert<M>(&self, value: T) -> Id<M> {
        let reused_index = self.free_list.lock().pop();
        let mut blocks = self.blocks.write();

        if let Some(index) = reused_index {
            let (block, offset) = Self::locate(index);
            let slot = &mut blocks[block][offset];
            debug_assert!(slot.value.is_none(), "free-list index still occupied");
            slot.value = Some(value);
            return Id::new(index, slot.generation);
        }

        let total_slots = blocks.len() * BLOCK_SIZE;
        let needs_new_block = blocks
            .last()
            .map(|_| total_slots == 0 || total_slots % BLOCK_SIZE == 0)
            .unwrap_or(true);
        if needs_new_block || blocks.is_empty() {
            let new_block: Vec<Slot<T>> = (0..BLOCK_SIZE).map(|_| Slot::default()).collect();
            blocks.push(new_block.into_boxed_slice());
        }
        let block_index = blocks.len() - 1;
        let block = &mut blocks[block_index];
        let offset = block
            .iter()
            .position(|slot| slot.value.is_none())
            .expect("freshly allocated block has a free slot");
        block[offset].value = Some(value);
        let index = (block_index * BLOCK_SIZE + offset) as u32;
        Id::new(index, block[offset].generation)
    }

    fn locate(index: u32) -> (usize, usize) {
        (
            index as usize / BLOCK_SIZE,
            index as usize % BLOCK_SIZE,
        )
    }

    pub fn get<M>(&self, id: Id<M>) -> Result<T, PoolError>
    where
        T: Clone,
    {
        self.with(id, |value| value.clone())
    }

    /// Run `f` against the live value for `id` without cloning it.
    pub fn with<M, R>(&self, id: Id<M>, f: impl FnOnce(&T) -> R) -> Result<R, PoolError> {
        let (block, offset) = Self::locate(id.index());
        let blocks = self.blocks.read();
        let slot = blocks
            .get(block)
            .and_then(|b| b.get(offset))
            .ok_or(PoolError::Vacant(id.index()))?;
        if slot.generation != id.generation() {
            return Err(PoolError::StaleGeneration {
                index: id.index(),
                current: slot.generation,
                requested: id.generation(),
            });
        }
        match &slot.value {
            Some(value) => Ok(f(value)),
            None => Err(PoolError::Vacant(id.index())),
        }
    }

    pub fn with_mut<M, R>(&self, id: Id<M>, f: impl FnOnce(&mut T) -> R) -> Result<R, PoolError> {
        let (block, offset) = Self::locate(id.index());
        let mut blocks = self.blocks.write();
        let slot = blocks
            .get_mut(block)
            .and_then(|b| b.get_mut(offset))
            .ok_or(PoolError::Vacant(id.index()))?;
        if slot.generation != id.generation() {
            return Err(PoolError::StaleGeneration {
                index: id.index(),
                current: slot.generation,
                requested: id.generation(),
            });
        }
        match &mut slot.value {
            Some(value) => Ok(f(value)),
            None => Err(PoolError::Vacant(id.index())),
        }
    }

    pub fn contains<M>(&self, id: Id<M>) -> bool {
        let (block, offset) = Self::locate(id.index());
        let blocks = self.blocks.read();
        blocks
            .get(block)
            .and_then(|b| b.get(offset))
            .map(|slot| slot.generation == id.generation() && slot.value.is_some())
            .unwrap_or(false)
    }

    /// Remove and return the value for `id`, bumping its slot's generation
    /// so any handle the caller still holds is detected as stale.
    pub fn remove<M>(&self, id: Id<M>) -> Result<T, PoolError> {
        let (block, offset) = Self::locate(id.index());
        let mut blocks = self.blocks.write();
        let slot = blocks
            .get_mut(block)
            .and_then(|b| b.get_mut(offset))
            .ok_or(PoolError::Vacant(id.index()))?;
        if slot.generation != id.generation() {
            return Err(PoolError::StaleGeneration {
                index: id.index(),
                current: slot.generation,
                requested: id.generation(),
            });
        }
        let value = slot.value.take().ok_or(PoolError::Vacant(id.index()))?;
        slot.generation = slot.generation.wrapping_add(1);
        drop(blocks);
        self.free_list.lock().push(id.index());
        Ok(value)
    }

    pub fn len(&self) -> usize {
        self.blocks
            .read()
            .iter()
            .flat_map(|block| block.iter())
            .filter(|slot| slot.value.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for ChunkedSparsePool<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    enum Marker {}

    #[test]
    fn insert_then_get_roundtrips() {
        let pool: ChunkedSparsePool<u32> = ChunkedSparsePool::new();
        let id: Id<Marker> = pool.insert(42);
        assert_eq!(pool.get(id).unwrap(), 42);
    }

    #[test]
    fn remove_then_get_is_vacant() {
        let pool: ChunkedSparsePool<u32> = ChunkedSparsePool::new();
        let id: Id<Marker> = pool.insert(1);
        pool.remove(id).unwrap();
        assert!(matches!(pool.get(id), Err(PoolError::StaleGeneration { .. })));
    }

    #[test]
    fn reused_slot_detects_stale_handle() {
        let pool: ChunkedSparsePool<u32> = ChunkedSparsePool::new();
        let first: Id<Marker> = pool.insert(1);
        pool.remove(first).unwrap();
        let second: Id<Marker> = pool.insert(2);
        assert_eq!(first.index(), second.index());
        assert_ne!(first.generation(), second.generation());
        assert!(pool.get(first).is_err());
        assert_eq!(pool.get(second).unwrap(), 2);
    }

    #[test]
    fn grows_past_one_block() {
        let pool: ChunkedSparsePool<u32> = ChunkedSparsePool::new();
        let ids: Vec<Id<Marker>> = (0..BLOCK_SIZE as u32 * 3)
            .map(|i| pool.insert(i))
            .collect();
        assert_eq!(pool.len(), ids.len());
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(pool.get(*id).unwrap(), i as u32);
        }
    }
}
