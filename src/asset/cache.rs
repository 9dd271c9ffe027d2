use super::Handle;

/// Append-only storage addressed by [`Handle`].
pub struct AssetCache<T> {
    items: Vec<T>,
}

impl<T> AssetCache<T> {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn insert(&mut self, item: T) -> Handle<T> {
        let index = self.items.len();
        self.items.push(item);
        Handle::new(index)
    }

    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        self.items.get(handle.index())
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        self.items.get_mut(handle.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.items
            .iter()
            .enumerate()
            .map(|(index, item)| (Handle::new(index), item))
    }

    /// Removes every item; all outstanding handles are invalidated.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.items.drain(..)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T> Default for AssetCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_returns_sequential_handles() {
        let mut cache = AssetCache::new();
        let a = cache.insert("a");
        let b = cache.insert("b");

        assert_ne!(a, b);
        assert_eq!(cache.get(a), Some(&"a"));
        assert_eq!(cache.get(b), Some(&"b"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn drain_empties_the_cache() {
        let mut cache = AssetCache::new();
        let handle = cache.insert(1);
        cache.insert(2);

        let drained: Vec<i32> = cache.drain().collect();
        assert_eq!(drained, vec![1, 2]);
        assert!(cache.is_empty());
        assert_eq!(cache.get(handle), None);
    }
}
