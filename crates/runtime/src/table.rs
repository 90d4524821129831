//! Open-addressed tables over heap strings.
//!
//! Linear probing with power-of-two capacities and a hard 80% load bound.
//! Keys are string objects; lookup compares cached hashes before bytes.
//! Table storage lives inside the owning heap object, so the collector
//! traces entries without extra bookkeeping.

use crate::gc::Heap;
use crate::object::{Obj, ObjRef, StrObj, TableEntry, TableObj, str_hash};

pub const TABLE_CAPACITY_MIN: usize = 8;
pub const TABLE_LOAD_MAX: u32 = 80;
pub const TABLE_SCALE_FACTOR: usize = 2;

/// Result of a table insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insert {
    Inserted,
    /// The key already existed; its value was replaced and the count is
    /// unchanged.
    Overwrote,
}

impl Heap {
    pub fn alloc_table(&mut self) -> ObjRef {
        self.alloc(Obj::Table(TableObj::default()))
    }

    fn str_obj(&self, r: ObjRef) -> &StrObj {
        match self.get(r) {
            Obj::Str(s) => s,
            _ => panic!("table key is not a string"),
        }
    }

    /// Probe for a key's slot: either its occupied entry or the first
    /// empty slot on its chain.
    fn table_find_slot(
        &self,
        entries: &[Option<TableEntry>],
        hash: u32,
        bytes: &[u8],
    ) -> usize {
        let capacity = entries.len();
        let mut index = (hash as usize) & (capacity - 1);

        loop {
            match &entries[index] {
                None => return index,
                Some(entry) => {
                    let key = self.str_obj(entry.key);

                    if key.hash == hash && key.bytes == bytes {
                        return index;
                    }
                }
            }
            index = (index + 1) & (capacity - 1);
        }
    }

    fn table_needs_resize(table: &TableObj) -> bool {
        if table.capacity() == 0 {
            return true;
        }
        (table.count as u64 + 1) * 100 > table.capacity() as u64 * TABLE_LOAD_MAX as u64
    }

    fn table_resize(&self, table: &mut TableObj) {
        let capacity = if table.capacity() < TABLE_CAPACITY_MIN {
            TABLE_CAPACITY_MIN
        } else {
            table.capacity() * TABLE_SCALE_FACTOR
        };
        let mut entries: Vec<Option<TableEntry>> = vec![None; capacity];
        let mut count = 0;

        for entry in table.entries.iter().flatten() {
            let key = self.str_obj(entry.key);
            let slot = self.table_find_slot(&entries, key.hash, &key.bytes);

            entries[slot] = Some(*entry);
            count += 1;
        }

        table.entries = entries;
        table.count = count;
    }

    /// Insert or replace. The key must be a string object.
    pub fn table_insert(&mut self, table: ObjRef, key: ObjRef, value: ObjRef) -> Insert {
        let mut inner = match self.get_mut(table) {
            Obj::Table(inner) => std::mem::take(inner),
            _ => panic!("insert into a non-table"),
        };

        if Self::table_needs_resize(&inner) {
            self.table_resize(&mut inner);
        }

        let (hash, bytes) = {
            let key_obj = self.str_obj(key);
            (key_obj.hash, key_obj.bytes.clone())
        };
        let slot = self.table_find_slot(&inner.entries, hash, &bytes);
        let result = match &inner.entries[slot] {
            None => {
                inner.entries[slot] = Some(TableEntry { key, value });
                inner.count += 1;
                Insert::Inserted
            }
            Some(existing) => {
                // Keep the first-inserted key object.
                inner.entries[slot] = Some(TableEntry {
                    key: existing.key,
                    value,
                });
                Insert::Overwrote
            }
        };

        *self.get_mut(table) = Obj::Table(inner);
        result
    }

    /// Look up by raw name bytes.
    pub fn table_get_str(&self, table: ObjRef, name: &str) -> Option<ObjRef> {
        let inner = match self.get(table) {
            Obj::Table(inner) => inner,
            _ => return None,
        };

        if inner.count == 0 || inner.capacity() == 0 {
            return None;
        }

        let bytes = name.as_bytes();
        let slot = self.table_find_slot(&inner.entries, str_hash(bytes), bytes);
        inner.entries[slot].map(|entry| entry.value)
    }

    /// Look up by a string-object key.
    pub fn table_get(&self, table: ObjRef, key: ObjRef) -> Option<ObjRef> {
        let name = self.str_obj(key).as_str().to_string();
        self.table_get_str(table, &name)
    }

    pub fn table_len(&self, table: ObjRef) -> usize {
        match self.get(table) {
            Obj::Table(inner) => inner.count as usize,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap() -> Heap {
        Heap::new(false, false, false)
    }

    #[test]
    fn insert_then_lookup() {
        let mut heap = heap();
        let table = heap.alloc_table();
        let key = heap.alloc_str("gold");
        let value = heap.alloc(Obj::Number(12.0));

        assert_eq!(heap.table_insert(table, key, value), Insert::Inserted);
        assert_eq!(heap.table_get_str(table, "gold"), Some(value));
        assert_eq!(heap.table_get_str(table, "silver"), None);
    }

    #[test]
    fn double_insert_overwrites_without_growing() {
        let mut heap = heap();
        let table = heap.alloc_table();
        let key = heap.alloc_str("k");
        let value = heap.alloc(Obj::Number(1.0));

        assert_eq!(heap.table_insert(table, key, value), Insert::Inserted);
        assert_eq!(heap.table_len(table), 1);

        assert_eq!(heap.table_insert(table, key, value), Insert::Overwrote);
        assert_eq!(heap.table_len(table), 1);
        assert_eq!(heap.table_get_str(table, "k"), Some(value));
    }

    #[test]
    fn distinct_key_objects_with_equal_bytes_collide() {
        let mut heap = heap();
        let table = heap.alloc_table();
        let key_a = heap.alloc_str("name");
        let key_b = heap.alloc_str("name");
        let first = heap.alloc(Obj::Number(1.0));
        let second = heap.alloc(Obj::Number(2.0));

        assert_eq!(heap.table_insert(table, key_a, first), Insert::Inserted);
        assert_eq!(heap.table_insert(table, key_b, second), Insert::Overwrote);
        assert_eq!(heap.table_get_str(table, "name"), Some(second));
        assert_eq!(heap.table_len(table), 1);
    }

    #[test]
    fn grows_past_load_factor_and_keeps_entries() {
        let mut heap = heap();
        let table = heap.alloc_table();
        let mut pairs = Vec::new();

        for i in 0..100 {
            let key = heap.alloc_str(&format!("key-{}", i));
            let value = heap.alloc(Obj::Number(i as f64));

            heap.table_insert(table, key, value);
            pairs.push((format!("key-{}", i), value));
        }

        assert_eq!(heap.table_len(table), 100);
        for (name, value) in pairs {
            assert_eq!(heap.table_get_str(table, &name), Some(value));
        }

        // Capacity stays a power of two and under the load bound.
        match heap.get(table) {
            Obj::Table(inner) => {
                assert!(inner.capacity().is_power_of_two());
                assert!(
                    (inner.count as u64) * 100
                        <= (inner.capacity() as u64) * TABLE_LOAD_MAX as u64
                );
            }
            _ => unreachable!(),
        }
    }
}
