//! Mark-sweep heap.
//!
//! Blocks live in a slot arena and are addressed by generational
//! [`Handle`]s. A freed slot is reused with its generation bumped, so a
//! stale handle never resolves to a newer block.
//!
//! Liveness is root-only: `collect` marks exactly the blocks named in the
//! root set and never looks inside a payload for further handles.

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    #[error("allocation failure: cannot reserve {requested} bytes")]
    OutOfMemory { requested: usize },
    #[error("allocation failure: heap handle space exhausted")]
    TooManyObjects,
}

/// Object type tag stored alongside each block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ObjType {
    String = 1,
    Array = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    pub fn index(self) -> u32 {
        self.index
    }
}

/// What a single `collect` call reclaimed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectStats {
    pub freed_objects: usize,
    pub freed_bytes: usize,
}

#[derive(Debug)]
struct Block {
    payload: Vec<u8>,
    ty: ObjType,
    marked: bool,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    block: Option<Block>,
}

#[derive(Debug, Default)]
pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    bytes: usize,
    objects: usize,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every block and zero the counters.
    pub fn reset(&mut self) {
        // Keep generations so handles from before the reset stay dead.
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.block.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(i as u32);
            }
        }
        self.bytes = 0;
        self.objects = 0;
    }

    pub fn alloc(&mut self, size: usize, ty: ObjType) -> Result<Handle, AllocError> {
        let mut payload = Vec::new();
        payload
            .try_reserve_exact(size)
            .map_err(|_| AllocError::OutOfMemory { requested: size })?;
        payload.resize(size, 0);
        let block = Block { payload, ty, marked: false };

        let index = match self.free.pop() {
            Some(i) => i,
            None => {
                let i = u32::try_from(self.slots.len()).map_err(|_| AllocError::TooManyObjects)?;
                self.slots.push(Slot::default());
                i
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.block = Some(block);

        self.bytes += size;
        self.objects += 1;
        tracing::trace!(index, size, ?ty, "heap alloc");
        Ok(Handle { index, generation: slot.generation })
    }

    /// Mark every root, then free whatever was left unmarked.
    ///
    /// Only the roots themselves are marked. A handle stored inside a live
    /// block's payload is not followed, so anything reachable solely through
    /// another heap object is reclaimed. No object type holds references
    /// today; a container type would need a tracing mark phase here.
    pub fn collect(&mut self, roots: &[Handle]) -> CollectStats {
        for &root in roots {
            if let Some(block) = self.block_mut(root) {
                block.marked = true;
            }
        }

        let mut stats = CollectStats::default();
        for (i, slot) in self.slots.iter_mut().enumerate() {
            let Some(block) = slot.block.as_mut() else { continue };
            if block.marked {
                block.marked = false;
                continue;
            }
            stats.freed_bytes += block.payload.len();
            stats.freed_objects += 1;
            slot.block = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(i as u32);
        }
        self.bytes -= stats.freed_bytes;
        self.objects -= stats.freed_objects;
        stats
    }

    /// Live payload bytes.
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Live block count.
    pub fn object_count(&self) -> usize {
        self.objects
    }

    pub fn is_live(&self, h: Handle) -> bool {
        self.block(h).is_some()
    }

    pub fn object_type(&self, h: Handle) -> Option<ObjType> {
        self.block(h).map(|b| b.ty)
    }

    pub fn payload(&self, h: Handle) -> Option<&[u8]> {
        self.block(h).map(|b| b.payload.as_slice())
    }

    pub fn payload_mut(&mut self, h: Handle) -> Option<&mut [u8]> {
        self.block_mut(h).map(|b| b.payload.as_mut_slice())
    }

    fn block(&self, h: Handle) -> Option<&Block> {
        let slot = self.slots.get(h.index as usize)?;
        if slot.generation != h.generation {
            return None;
        }
        slot.block.as_ref()
    }

    fn block_mut(&mut self, h: Handle) -> Option<&mut Block> {
        let slot = self.slots.get_mut(h.index as usize)?;
        if slot.generation != h.generation {
            return None;
        }
        slot.block.as_mut()
    }
}
