//! Index map using typed unsigned integer ids to index
//! into vector of T. Pushing new values returns their
//! id. Removing elements does not change existing ids,
//! freed slots are reused by later pushes.

use std::{
    marker::PhantomData,
    ops::{Index, IndexMut},
};

pub trait SlabId: Copy + From<usize> + Into<usize> {}

#[derive(Debug)]
pub struct Slab<Id: SlabId, T> {
    values: Vec<Option<T>>,
    empty: Vec<usize>,
    _id: PhantomData<Id>,
}

impl<Id: SlabId, T> Default for Slab<Id, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Id: SlabId, T> Slab<Id, T> {
    pub const fn new() -> Self {
        Self { values: Vec::new(), empty: Vec::new(), _id: PhantomData }
    }

    pub fn push(&mut self, value: T) -> Id {
        if let Some(idx) = self.empty.pop() {
            self.values[idx] = Some(value);
            Id::from(idx)
        } else {
            self.values.push(Some(value));
            Id::from(self.values.len() - 1)
        }
    }

    pub fn remove(&mut self, id: Id) -> Option<T> {
        let idx: usize = id.into();
        let value = self.values.get_mut(idx)?.take();
        if value.is_some() {
            self.empty.push(idx);
        }
        value
    }

    pub fn get(&self, id: Id) -> Option<&T> {
        self.values.get(id.into())?.as_ref()
    }

    pub fn len(&self) -> usize {
        self.values.len() - self.empty.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every element, returning them in id order
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.empty.clear();
        self.values.drain(..).flatten()
    }
}

impl<Id: SlabId, T> Index<Id> for Slab<Id, T> {
    type Output = T;

    #[track_caller]
    fn index(&self, index: Id) -> &Self::Output {
        let idx: usize = index.into();
        self.values[idx].as_ref().expect("Index into removed slab element")
    }
}

impl<Id: SlabId, T> IndexMut<Id> for Slab<Id, T> {
    #[track_caller]
    fn index_mut(&mut self, index: Id) -> &mut Self::Output {
        let idx: usize = index.into();
        self.values[idx].as_mut().expect("Index into removed slab element")
    }
}

#[cfg(test)]
mod tests {
    use super::{Slab, SlabId};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct TestId(u32);

    impl From<usize> for TestId {
        fn from(value: usize) -> Self {
            TestId(u32::try_from(value).unwrap())
        }
    }

    impl From<TestId> for usize {
        fn from(value: TestId) -> Self {
            value.0 as usize
        }
    }

    impl SlabId for TestId {}

    #[test]
    fn reuse_removed_slot() {
        let mut slab: Slab<TestId, &str> = Slab::new();
        let x = slab.push("x");
        let y = slab.push("y");
        assert_eq!(slab.len(), 2);
        assert_eq!(slab.remove(x), Some("x"));
        assert_eq!(slab.remove(x), None);
        assert_eq!(slab[y], "y");
        let z = slab.push("z");
        assert_eq!(z, x);
        assert_eq!(slab.drain().collect::<Vec<_>>(), vec!["z", "y"]);
        assert!(slab.is_empty());
    }
}
