use std::hash::Hash;
use std::marker::PhantomData;

/// Generational index into a [`Pool`].
///
/// A handle stays comparable after its slot is released; lookups through a
/// stale handle return `None` instead of aliasing whatever reused the slot.
pub struct Handle<T> {
    pub slot: u16,
    pub generation: u32,
    phantom: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub fn new(slot: u16, generation: u32) -> Self {
        Self {
            slot,
            generation,
            phantom: PhantomData,
        }
    }

    /// Packs slot and generation into one integer, handy for logging and
    /// for tracker keys that must not carry the type parameter.
    pub fn raw(&self) -> u64 {
        ((self.generation as u64) << 16) | self.slot as u64
    }
}

impl<T> std::fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handle({}v{})", self.slot, self.generation)
    }
}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.slot == other.slot && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.slot.hash(state);
        self.generation.hash(state);
    }
}

impl<T> Default for Handle<T> {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

pub struct Pool<T> {
    items: Vec<Option<T>>,
    empty: Vec<usize>,
    generation: Vec<u32>,
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Self::new(64)
    }
}

impl<T> Pool<T> {
    pub fn new(initial_size: usize) -> Self {
        let mut p = Pool {
            items: Vec::with_capacity(initial_size),
            empty: Vec::with_capacity(initial_size),
            generation: vec![0; initial_size],
        };

        // Lowest slots are handed out first.
        p.empty = (0..initial_size).rev().collect();
        p.items.resize_with(initial_size, || None);

        p
    }

    /// Stores `item` and returns its handle. Fails only once every one of the
    /// `u16::MAX` addressable slots is occupied.
    pub fn insert(&mut self, item: T) -> Option<Handle<T>> {
        let slot = match self.empty.pop() {
            Some(slot) => slot,
            None => {
                let slot = self.items.len();
                if slot > u16::MAX as usize {
                    return None;
                }
                self.items.push(None);
                self.generation.push(0);
                slot
            }
        };

        self.items[slot] = Some(item);

        Some(Handle::new(slot as u16, self.generation[slot]))
    }

    /// Removes the item behind `item`. The slot's generation is bumped so any
    /// copy of the handle becomes stale.
    pub fn release(&mut self, item: Handle<T>) -> Option<T> {
        let slot = item.slot as usize;
        if !self.is_live(item) {
            return None;
        }

        let value = self.items[slot].take();
        self.vacate(slot);
        value
    }

    /// Bumps the slot's generation so older handles go stale. A slot whose
    /// generation is exhausted is retired instead of wrapping back to a
    /// value an old handle may still carry.
    fn vacate(&mut self, slot: usize) {
        match self.generation[slot].checked_add(1) {
            Some(next) => {
                self.generation[slot] = next;
                self.empty.push(slot);
            }
            None => log::warn!("pool slot {} retired, its generation is exhausted", slot),
        }
    }

    pub fn is_live(&self, item: Handle<T>) -> bool {
        let slot = item.slot as usize;
        slot < self.items.len()
            && self.generation[slot] == item.generation
            && self.items[slot].is_some()
    }

    pub fn get_ref(&self, item: Handle<T>) -> Option<&T> {
        let slot = item.slot as usize;
        if self.generation.get(slot).copied() == Some(item.generation) {
            self.items[slot].as_ref()
        } else {
            None
        }
    }

    pub fn get_mut_ref(&mut self, item: Handle<T>) -> Option<&mut T> {
        let slot = item.slot as usize;
        if self.generation.get(slot).copied() == Some(item.generation) {
            self.items[slot].as_mut()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.items.iter().filter(|i| i.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates live entries together with their current handles.
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.items
            .iter()
            .enumerate()
            .filter_map(move |(slot, item)| {
                item.as_ref()
                    .map(|v| (Handle::new(slot as u16, self.generation[slot]), v))
            })
    }

    /// Empties the pool, handing every remaining item to `f`.
    pub fn drain_with(&mut self, mut f: impl FnMut(T)) {
        for slot in 0..self.items.len() {
            if let Some(item) = self.items[slot].take() {
                self.vacate(slot);
                f(item);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_handles_go_stale() {
        let mut pool: Pool<u32> = Pool::new(2);
        let a = pool.insert(7).unwrap();
        assert_eq!(pool.get_ref(a), Some(&7));

        assert_eq!(pool.release(a), Some(7));
        assert!(pool.get_ref(a).is_none());
        assert!(pool.release(a).is_none());

        let b = pool.insert(9).unwrap();
        assert_eq!(a.slot, b.slot);
        assert_ne!(a, b);
        assert_eq!(pool.get_ref(b), Some(&9));
    }

    #[test]
    fn pool_grows_past_initial_size() {
        let mut pool: Pool<usize> = Pool::new(1);
        let handles: Vec<_> = (0..5).map(|i| pool.insert(i).unwrap()).collect();
        assert_eq!(pool.len(), 5);
        for (i, h) in handles.iter().enumerate() {
            assert_eq!(pool.get_ref(*h), Some(&i));
        }

        let mut seen = Vec::new();
        pool.drain_with(|v| seen.push(v));
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert!(pool.is_empty());
    }

    #[test]
    fn heavily_reused_slot_never_revives_an_old_handle() {
        let mut pool: Pool<u32> = Pool::new(1);
        let first = pool.insert(0).unwrap();
        pool.release(first);

        for i in 1..=70_000 {
            let h = pool.insert(i).unwrap();
            assert_eq!(h.slot, first.slot);
            assert!(pool.get_ref(first).is_none());
            pool.release(h);
        }
    }

    #[test]
    fn exhausted_slots_are_retired() {
        let mut pool: Pool<u32> = Pool::new(1);
        pool.generation[0] = u32::MAX;
        let last = pool.insert(1).unwrap();
        assert_eq!(pool.release(last), Some(1));

        let next = pool.insert(2).unwrap();
        assert_ne!(next.slot, last.slot);
        assert!(pool.get_ref(last).is_none());
        assert_eq!(pool.get_ref(next), Some(&2));
    }
}
