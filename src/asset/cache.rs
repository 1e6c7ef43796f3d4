use super::Handle;

/// Slot table of resources addressed by [`Handle`].
///
/// Removed slots stay vacant: handles are never reused, so a handle to a
/// released resource resolves to `None` instead of aliasing a newer one.
#[derive(Debug)]
pub struct AssetCache<T> {
    slots: Vec<Option<T>>,
    live: usize,
}

impl<T> AssetCache<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            live: 0,
        }
    }

    pub fn insert(&mut self, item: T) -> Handle<T> {
        let handle = Handle::new(self.slots.len());
        self.slots.push(Some(item));
        self.live += 1;
        handle
    }

    pub fn remove(&mut self, handle: Handle<T>) -> Option<T> {
        let item = self.slots.get_mut(handle.index())?.take()?;
        self.live -= 1;
        Some(item)
    }

    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.get(handle).is_some()
    }

    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        self.slots.get(handle.index())?.as_ref()
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        self.slots.get_mut(handle.index())?.as_mut()
    }

    /// Number of resources currently held.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}

impl<T> Default for AssetCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
