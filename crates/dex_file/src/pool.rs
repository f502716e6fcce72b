use std::{borrow::Borrow, collections::HashMap, hash::Hash, ops::Index};

pub trait PoolIndex: Copy {
    fn from_raw(raw: u32) -> Self;
    fn raw(self) -> u32;
}

macro_rules! pool_indices {
    ($($name:ident),* $(,)?) => {$(
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl PoolIndex for $name {
            fn from_raw(raw: u32) -> Self {
                $name(raw)
            }

            fn raw(self) -> u32 {
                self.0
            }
        }
    )*};
}

pool_indices!(StringIdx, TypeIdx, TypeListIdx, ProtoIdx, FieldIdx, MethodIdx);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtoId {
    pub return_type: TypeIdx,
    pub parameters: TypeListIdx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldId {
    pub class: TypeIdx,
    pub field_type: TypeIdx,
    pub name: StringIdx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodId {
    pub class: TypeIdx,
    pub proto: ProtoIdx,
    pub name: StringIdx,
}

/// Interned table addressed by position. Entries are never removed in place.
#[derive(Debug, Clone)]
pub struct Pool<I, T> {
    entries: Vec<T>,
    lookup: HashMap<T, I>,
}

impl<I, T> Default for Pool<I, T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            lookup: HashMap::new(),
        }
    }
}

impl<I: PoolIndex, T: Clone + Eq + Hash> Pool<I, T> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: I) -> Option<&T> {
        self.entries.get(index.raw() as usize)
    }

    pub fn contains_index(&self, index: I) -> bool {
        (index.raw() as usize) < self.entries.len()
    }

    pub fn find<Q>(&self, value: &Q) -> Option<I>
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lookup.get(value).copied()
    }

    pub fn intern(&mut self, value: T) -> I {
        if let Some(index) = self.lookup.get(&value) {
            return *index;
        }
        self.push(value)
    }

    /// Appends without deduplication; lookups keep resolving to the first copy.
    pub fn push(&mut self, value: T) -> I {
        let index = I::from_raw(self.entries.len() as u32);
        self.lookup.entry(value.clone()).or_insert(index);
        self.entries.push(value);
        index
    }

    /// Overwrites an entry in place, returning the old value and whether the
    /// new value now appears more than once.
    pub fn set(&mut self, index: I, value: T) -> Option<(T, bool)> {
        let slot = self.entries.get_mut(index.raw() as usize)?;
        let old = std::mem::replace(slot, value.clone());

        if self.lookup.get(&old).map(|i| i.raw()) == Some(index.raw()) {
            self.lookup.remove(&old);
            if let Some(other) = self.entries.iter().position(|e| *e == old) {
                self.lookup.insert(old.clone(), I::from_raw(other as u32));
            }
        }

        let collides = match self.lookup.get(&value) {
            Some(existing) => existing.raw() != index.raw(),
            None => {
                self.lookup.insert(value, index);
                false
            }
        };
        Some((old, collides))
    }

    pub fn iter(&self) -> impl Iterator<Item = (I, &T)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| (I::from_raw(i as u32), e))
    }
}

impl<I: PoolIndex, T> Index<I> for Pool<I, T> {
    type Output = T;

    fn index(&self, index: I) -> &Self::Output {
        &self.entries[index.raw() as usize]
    }
}

impl<'a, I, T> IntoIterator for &'a Pool<I, T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod pool_tests {
    use super::*;

    #[test]
    fn it_should_intern_equal_values_once() {
        let mut pool = Pool::<StringIdx, String>::default();
        let a = pool.intern("a".into());
        let b = pool.intern("b".into());

        assert_eq!(a, pool.intern("a".into()));
        assert_ne!(a, b);
        assert_eq!(2, pool.len());
    }

    #[test]
    fn it_should_follow_renamed_values_in_lookups() {
        let mut pool = Pool::<StringIdx, String>::default();
        let a = pool.intern("La/A;".into());

        let (old, collides) = pool.set(a, "La/B;".into()).unwrap();

        assert_eq!("La/A;", old);
        assert!(!collides);
        assert_eq!(None, pool.find("La/A;"));
        assert_eq!(Some(a), pool.find("La/B;"));
    }

    #[test]
    fn it_should_report_collisions_when_renaming_onto_an_existing_value() {
        let mut pool = Pool::<StringIdx, String>::default();
        let a = pool.intern("a".into());
        let b = pool.intern("b".into());

        let (_, collides) = pool.set(b, "a".into()).unwrap();

        assert!(collides);
        assert_eq!(Some(a), pool.find("a"));
        assert_eq!(None, pool.find("b"));
    }

    #[test]
    fn it_should_keep_the_first_copy_when_pushing_duplicates() {
        let mut pool = Pool::<StringIdx, String>::default();
        let first = pool.push("x".into());
        pool.push("x".into());

        assert_eq!(Some(first), pool.find("x"));
        assert_eq!(2, pool.len());
    }
}
