/// Generation-checked key into a [`Slab`].
///
/// A key stays valid until the value it points to is removed. Removing a
/// value bumps the generation of its slot, so a stale key never aliases a
/// value inserted later at the same index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct Key {
    index: u32,
    generation: u32,
}

impl Key {
    /// Packs the key into a poller token.
    pub(crate) fn to_token(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    /// Inverse of [`Key::to_token`].
    pub(crate) fn from_token(token: u64) -> Self {
        Self {
            index: token as u32,
            generation: (token >> 32) as u32,
        }
    }

    pub(crate) fn index(self) -> u32 {
        self.index
    }

    pub(crate) fn generation(self) -> u32 {
        self.generation
    }
}

enum Entry<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32 },
}

/// A slab allocator with generation-checked keys.
///
/// A `Slab` stores values of type `T` in a contiguous array and hands out
/// small, reusable [`Key`]s. It backs every arena of the crate: tasks,
/// timers, fd watchers, idle and signal watchers.
///
/// # Examples
///
/// ```rust,ignore
/// let mut slab = Slab::new();
/// let key = slab.insert("a");
/// assert_eq!(slab.remove(key), Some("a"));
/// assert_eq!(slab.get(key), None);
/// ```
pub(crate) struct Slab<T> {
    /// Storage for values; vacant slots remember their generation.
    entries: Vec<Entry<T>>,
    /// Stack of free indices that can be reused.
    free: Vec<u32>,
    /// Number of occupied slots.
    len: usize,
}

impl<T> Slab<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Inserts a value into the slab and returns its key.
    ///
    /// If a free slot is available, it is reused with a new generation.
    pub(crate) fn insert(&mut self, value: T) -> Key {
        self.len += 1;

        if let Some(index) = self.free.pop() {
            let slot = &mut self.entries[index as usize];
            let generation = match slot {
                Entry::Vacant { generation } => *generation,
                Entry::Occupied { .. } => unreachable!("free list points at an occupied slot"),
            };
            *slot = Entry::Occupied { generation, value };
            return Key { index, generation };
        }

        let index = self.entries.len() as u32;
        self.entries.push(Entry::Occupied {
            generation: 0,
            value,
        });

        Key {
            index,
            generation: 0,
        }
    }

    /// Removes and returns the value stored under `key`.
    ///
    /// Returns `None` if the key is stale or was never issued.
    pub(crate) fn remove(&mut self, key: Key) -> Option<T> {
        let slot = self.entries.get_mut(key.index as usize)?;

        match slot {
            Entry::Occupied { generation, .. } if *generation == key.generation => {}
            _ => return None,
        }

        let next = Entry::Vacant {
            generation: key.generation.wrapping_add(1),
        };

        match std::mem::replace(slot, next) {
            Entry::Occupied { value, .. } => {
                self.free.push(key.index);
                self.len -= 1;
                Some(value)
            }
            Entry::Vacant { .. } => None,
        }
    }

    pub(crate) fn get(&self, key: Key) -> Option<&T> {
        match self.entries.get(key.index as usize)? {
            Entry::Occupied { generation, value } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    pub(crate) fn get_mut(&mut self, key: Key) -> Option<&mut T> {
        match self.entries.get_mut(key.index as usize)? {
            Entry::Occupied { generation, value } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    pub(crate) fn contains(&self, key: Key) -> bool {
        self.get(key).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Iterates over occupied slots.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (Key, &T)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| match entry {
                Entry::Occupied { generation, value } => Some((
                    Key {
                        index: index as u32,
                        generation: *generation,
                    },
                    value,
                )),
                Entry::Vacant { .. } => None,
            })
    }

    /// Iterates mutably over occupied slots.
    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (Key, &mut T)> {
        self.entries
            .iter_mut()
            .enumerate()
            .filter_map(|(index, entry)| match entry {
                Entry::Occupied { generation, value } => Some((
                    Key {
                        index: index as u32,
                        generation: *generation,
                    },
                    value,
                )),
                Entry::Vacant { .. } => None,
            })
    }

    /// Removes every value, returning them in index order.
    ///
    /// Keys issued before the drain stay stale forever.
    pub(crate) fn drain(&mut self) -> Vec<T> {
        let keys: Vec<Key> = self.iter().map(|(key, _)| key).collect();
        keys.into_iter().filter_map(|key| self.remove(key)).collect()
    }
}

impl<T> Default for Slab<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let mut slab = Slab::new();
        let a = slab.insert(1);
        let b = slab.insert(2);

        assert_eq!(slab.len(), 2);
        assert_eq!(slab.get(a), Some(&1));
        assert_eq!(slab.remove(b), Some(2));
        assert_eq!(slab.get(b), None);
        assert_eq!(slab.len(), 1);
    }

    #[test]
    fn test_stale_key_after_reuse() {
        let mut slab = Slab::new();
        let old = slab.insert("old");
        slab.remove(old);

        let new = slab.insert("new");
        assert_eq!(old.index(), new.index());
        assert_ne!(old.generation(), new.generation());

        assert_eq!(slab.get(old), None);
        assert_eq!(slab.remove(old), None);
        assert_eq!(slab.get(new), Some(&"new"));
    }

    #[test]
    fn test_token_round_trip() {
        let mut slab = Slab::new();
        for i in 0..5 {
            let key = slab.insert(i);
            slab.remove(key);
        }
        let key = slab.insert(99);
        assert_eq!(Key::from_token(key.to_token()), key);
    }

    #[test]
    fn test_drain_empties() {
        let mut slab = Slab::new();
        let keys: Vec<_> = (0..4).map(|i| slab.insert(i)).collect();
        slab.remove(keys[1]);

        assert_eq!(slab.drain(), vec![0, 2, 3]);
        assert_eq!(slab.len(), 0);
        assert!(keys.iter().all(|k| !slab.contains(*k)));
    }
}
