use serde::{Deserialize, Serialize};

/// Unique identifier with generation tracking to prevent stale references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct GenerationalId {
    pub index: usize,
    pub generation: u32,
}

impl GenerationalId {
    pub fn new(index: usize, generation: u32) -> Self {
        Self { index, generation }
    }
}

/// Handle used for bodies and manifolds owned by the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct EntityId(pub GenerationalId);

impl EntityId {
    pub fn new(index: usize, generation: u32) -> Self {
        Self(GenerationalId::new(index, generation))
    }

    pub fn from_index(index: u32) -> Self {
        Self::new(index as usize, 0)
    }

    pub fn index(&self) -> usize {
        self.0.index
    }

    pub fn generation(&self) -> u32 {
        self.0.generation
    }

    pub fn is_null(&self) -> bool {
        self.0.index == usize::MAX
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.index(), self.generation())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self(GenerationalId::new(usize::MAX, 0))
    }
}

#[derive(Debug, Clone)]
enum Slot<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32, next_free: Option<usize> },
}

impl<T> Slot<T> {
    fn generation(&self) -> u32 {
        match self {
            Slot::Occupied { generation, .. } | Slot::Vacant { generation, .. } => *generation,
        }
    }
}

/// Generational slab. Slot indices are dense and stable for the lifetime of
/// an entry, so they double as union-find element indices for islands.
#[derive(Debug, Clone)]
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<usize>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            len: 0,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free_head: None,
            len: 0,
        }
    }

    pub fn insert(&mut self, value: T) -> EntityId {
        self.len += 1;
        if let Some(index) = self.free_head {
            let generation = self.slots[index].generation();
            if let Slot::Vacant { next_free, .. } = self.slots[index] {
                self.free_head = next_free;
            }
            self.slots[index] = Slot::Occupied { generation, value };
            return EntityId::new(index, generation);
        }

        let index = self.slots.len();
        self.slots.push(Slot::Occupied {
            generation: 0,
            value,
        });
        EntityId::new(index, 0)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        matches!(
            self.slots.get(id.index()),
            Some(Slot::Occupied { generation, .. }) if *generation == id.generation()
        )
    }

    pub fn get(&self, id: EntityId) -> Option<&T> {
        match self.slots.get(id.index()) {
            Some(Slot::Occupied { generation, value }) if *generation == id.generation() => {
                Some(value)
            }
            _ => None,
        }
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut T> {
        match self.slots.get_mut(id.index()) {
            Some(Slot::Occupied { generation, value }) if *generation == id.generation() => {
                Some(value)
            }
            _ => None,
        }
    }

    /// Looks up an entry by raw slot index, ignoring generations.
    pub fn get_by_index(&self, index: usize) -> Option<(EntityId, &T)> {
        match self.slots.get(index) {
            Some(Slot::Occupied { generation, value }) => {
                Some((EntityId::new(index, *generation), value))
            }
            _ => None,
        }
    }

    pub fn get2_mut(&mut self, id_a: EntityId, id_b: EntityId) -> Option<(&mut T, &mut T)> {
        if id_a.index() == id_b.index() || !self.contains(id_a) || !self.contains(id_b) {
            return None;
        }

        let (low, high, flipped) = if id_a.index() < id_b.index() {
            (id_a.index(), id_b.index(), false)
        } else {
            (id_b.index(), id_a.index(), true)
        };

        let (left, right) = self.slots.split_at_mut(high);
        let first = match &mut left[low] {
            Slot::Occupied { value, .. } => value,
            Slot::Vacant { .. } => return None,
        };
        let second = match &mut right[0] {
            Slot::Occupied { value, .. } => value,
            Slot::Vacant { .. } => return None,
        };

        if flipped {
            Some((second, first))
        } else {
            Some((first, second))
        }
    }

    pub fn remove(&mut self, id: EntityId) -> Option<T> {
        if !self.contains(id) {
            return None;
        }
        let index = id.index();
        let vacant = Slot::Vacant {
            generation: id.generation().wrapping_add(1),
            next_free: self.free_head,
        };
        let previous = std::mem::replace(&mut self.slots[index], vacant);
        self.free_head = Some(index);
        self.len -= 1;
        match previous {
            Slot::Occupied { value, .. } => Some(value),
            Slot::Vacant { .. } => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &T)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Occupied { generation, value } => {
                    Some((EntityId::new(index, *generation), value))
                }
                Slot::Vacant { .. } => None,
            })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (EntityId, &mut T)> + '_ {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Occupied { generation, value } => {
                    Some((EntityId::new(index, *generation), value))
                }
                Slot::Vacant { .. } => None,
            })
    }

    pub fn values(&self) -> impl Iterator<Item = &T> + '_ {
        self.iter().map(|(_, value)| value)
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut T> + '_ {
        self.iter_mut().map(|(_, value)| value)
    }

    pub fn ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.iter().map(|(id, _)| id)
    }

    /// Number of slots ever allocated, live or vacant.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removed_handles_go_stale() {
        let mut arena = Arena::new();
        let a = arena.insert(1);
        let b = arena.insert(2);
        assert_eq!(arena.remove(a), Some(1));
        assert!(arena.get(a).is_none());

        let c = arena.insert(3);
        assert_eq!(c.index(), a.index(), "vacant slot should be reused");
        assert_ne!(c.generation(), a.generation());
        assert_eq!(arena.get(b), Some(&2));
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn get2_mut_returns_in_argument_order() {
        let mut arena = Arena::new();
        let a = arena.insert(10);
        let b = arena.insert(20);
        let (vb, va) = arena.get2_mut(b, a).expect("distinct live ids");
        assert_eq!((*vb, *va), (20, 10));
        *vb += 1;
        assert_eq!(arena.get(b), Some(&21));
        assert!(arena.get2_mut(a, a).is_none());
    }

    #[test]
    fn iter_skips_vacant_slots() {
        let mut arena = Arena::new();
        let ids: Vec<_> = (0..4).map(|i| arena.insert(i)).collect();
        arena.remove(ids[1]);
        let seen: Vec<_> = arena.values().copied().collect();
        assert_eq!(seen, vec![0, 2, 3]);
        assert_eq!(arena.slot_count(), 4);
    }
}
