//! Heap and tracing collector.
//!
//! Objects live in a slot array and are addressed by index, so handles
//! stay stable across collections and the sweep simply walks the recorded
//! slots. Collection is mark-and-sweep with a gray worklist: roots are
//! marked by the story (which owns the root set), children are blackened
//! here, and unmarked slots are freed and recycled through a free list.
//!
//! The heap never triggers collection on its own; the story decides when
//! to collect, before allocating, so that every live object is reachable
//! from its roots.

use tracing::trace;

use crate::object::{Obj, ObjRef, StrObj};

/// Collection floor for the growth threshold.
pub const HEAP_SIZE_MIN: usize = 64 * 1024;

/// Heap growth percentage applied after each collection.
pub const HEAP_GROWTH_PERCENT: usize = 50;

#[derive(Debug)]
struct Slot {
    marked: bool,
    obj: Option<Obj>,
}

/// Slot-allocator heap with mark-and-sweep collection.
#[derive(Debug)]
pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    gray: Vec<ObjRef>,
    owned: Vec<ObjRef>,
    pub allocated: usize,
    pub threshold: usize,
    pub enabled: bool,
    pub stress: bool,
    pub tracing: bool,
}

impl Heap {
    pub fn new(enabled: bool, stress: bool, tracing: bool) -> Heap {
        Heap {
            slots: Vec::new(),
            free: Vec::new(),
            gray: Vec::new(),
            owned: Vec::new(),
            allocated: 0,
            threshold: HEAP_SIZE_MIN,
            enabled,
            stress,
            tracing,
        }
    }

    /// True when the caller should collect before the next allocation.
    pub fn wants_collect(&self) -> bool {
        self.enabled && (self.stress || self.allocated > self.threshold)
    }

    /// Allocate an object. Never collects; the story collects first.
    pub fn alloc(&mut self, obj: Obj) -> ObjRef {
        self.allocated += obj.size();

        match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Slot {
                    marked: false,
                    obj: Some(obj),
                };
                ObjRef(index)
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    marked: false,
                    obj: Some(obj),
                });
                ObjRef(index)
            }
        }
    }

    pub fn get(&self, r: ObjRef) -> &Obj {
        self.slots[r.0 as usize]
            .obj
            .as_ref()
            .expect("use of freed object")
    }

    pub fn get_mut(&mut self, r: ObjRef) -> &mut Obj {
        self.slots[r.0 as usize]
            .obj
            .as_mut()
            .expect("use of freed object")
    }

    pub fn is_live(&self, r: ObjRef) -> bool {
        self.slots
            .get(r.0 as usize)
            .map(|slot| slot.obj.is_some())
            .unwrap_or(false)
    }

    /// Number of live objects, for tests and traces.
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.obj.is_some()).count()
    }

    // ------------------------------------------------------------------
    // Pinning
    // ------------------------------------------------------------------

    /// Pin an object as an external root.
    pub fn own(&mut self, r: ObjRef) {
        self.owned.push(r);
    }

    /// Release a pinned object.
    pub fn disown(&mut self, r: ObjRef) {
        if let Some(at) = self.owned.iter().rposition(|&o| o == r) {
            self.owned.swap_remove(at);
        }
    }

    // ------------------------------------------------------------------
    // Collection
    // ------------------------------------------------------------------

    /// Reset accounting at the start of a cycle.
    pub fn begin_collect(&mut self) {
        self.allocated = 0;
        self.gray.clear();
    }

    /// Mark a root gray.
    pub fn mark(&mut self, r: ObjRef) {
        let slot = &mut self.slots[r.0 as usize];

        if slot.obj.is_none() || slot.marked {
            return;
        }
        slot.marked = true;

        if self.tracing {
            trace!(target: "ink_gc", object = r.0, "marked");
        }
        self.gray.push(r);
    }

    /// Mark the pinned set.
    pub fn mark_owned(&mut self) {
        let owned = self.owned.clone();

        for r in owned {
            self.mark(r);
        }
    }

    /// Drain the gray worklist, blackening each object: account its size
    /// and mark its children.
    pub fn trace_refs(&mut self) {
        while let Some(r) = self.gray.pop() {
            let (size, children) = {
                let obj = self.get(r);
                let mut children = Vec::new();

                match obj {
                    Obj::Bool(_) | Obj::Number(_) | Obj::Str(_) => {}
                    Obj::Table(table) => {
                        for entry in table.entries.iter().flatten() {
                            children.push(entry.key);
                            children.push(entry.value);
                        }
                    }
                    Obj::Path(path) => {
                        children.push(path.name);
                        children.extend(path.consts.iter().copied());
                    }
                }
                (obj.size(), children)
            };

            self.allocated += size;
            if self.tracing {
                trace!(target: "ink_gc", object = r.0, size, "blackened");
            }

            for child in children {
                self.mark(child);
            }
        }
    }

    /// Free every unmarked object, clear marks on survivors, and set the
    /// next collection threshold. Returns the number of objects freed.
    pub fn sweep(&mut self) -> usize {
        let mut freed = 0;

        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.obj.is_none() {
                continue;
            }

            if slot.marked {
                slot.marked = false;
            } else {
                if self.tracing {
                    trace!(target: "ink_gc", object = index, "freed");
                }
                slot.obj = None;
                self.free.push(index as u32);
                freed += 1;
            }
        }

        self.threshold =
            (self.allocated + self.allocated * HEAP_GROWTH_PERCENT / 100).max(HEAP_SIZE_MIN);
        freed
    }

    // ------------------------------------------------------------------
    // Typed accessors
    // ------------------------------------------------------------------

    pub fn str_text(&self, r: ObjRef) -> &str {
        match self.get(r) {
            Obj::Str(s) => s.as_str(),
            _ => "",
        }
    }

    pub fn number_value(&self, r: ObjRef) -> Option<f64> {
        crate::object::as_number(self.get(r))
    }

    pub fn is_falsey(&self, r: ObjRef) -> bool {
        crate::object::is_falsey(self.get(r))
    }

    /// Structural equality. Cross-kind comparison is false; numbers
    /// compare by value, strings by bytes, tables and paths by identity.
    pub fn value_eq(&self, a: ObjRef, b: ObjRef) -> bool {
        if a == b {
            return true;
        }

        match (self.get(a), self.get(b)) {
            (Obj::Bool(x), Obj::Bool(y)) => x == y,
            (Obj::Number(x), Obj::Number(y)) => x == y,
            (Obj::Str(x), Obj::Str(y)) => x.hash == y.hash && x.bytes == y.bytes,
            _ => false,
        }
    }

    /// Printable form, as produced by `CONTENT_PUSH`.
    pub fn display_value(&self, r: ObjRef) -> String {
        match self.get(r) {
            Obj::Bool(value) => value.to_string(),
            Obj::Number(value) => crate::object::format_number(*value),
            Obj::Str(s) => s.as_str().to_string(),
            Obj::Table(table) => format!("<table entries={}>", table.count),
            Obj::Path(path) => format!("<path {}>", self.str_text(path.name)),
        }
    }

    /// Allocate a string object. Callers root the result before the next
    /// allocation.
    pub fn alloc_str(&mut self, text: &str) -> ObjRef {
        self.alloc(Obj::Str(StrObj::new(text.as_bytes().to_vec())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::TableObj;

    fn full_cycle(heap: &mut Heap, roots: &[ObjRef]) -> usize {
        heap.begin_collect();
        for &root in roots {
            heap.mark(root);
        }
        heap.mark_owned();
        heap.trace_refs();
        heap.sweep()
    }

    #[test]
    fn unreachable_objects_are_swept() {
        let mut heap = Heap::new(true, false, false);
        let keep = heap.alloc(Obj::Number(1.0));
        let _drop = heap.alloc(Obj::Number(2.0));

        let freed = full_cycle(&mut heap, &[keep]);
        assert_eq!(freed, 1);
        assert!(heap.is_live(keep));
        assert_eq!(heap.live_count(), 1);
    }

    #[test]
    fn slots_are_recycled() {
        let mut heap = Heap::new(true, false, false);
        let a = heap.alloc(Obj::Number(1.0));

        full_cycle(&mut heap, &[]);
        assert!(!heap.is_live(a));

        let b = heap.alloc(Obj::Number(2.0));
        assert_eq!(a, b);
    }

    #[test]
    fn tables_keep_entries_alive() {
        let mut heap = Heap::new(true, false, false);
        let key = heap.alloc_str("k");
        let value = heap.alloc(Obj::Number(9.0));
        let table = heap.alloc(Obj::Table(TableObj {
            count: 1,
            entries: vec![Some(crate::object::TableEntry { key, value })],
        }));

        let freed = full_cycle(&mut heap, &[table]);
        assert_eq!(freed, 0);
        assert!(heap.is_live(key));
        assert!(heap.is_live(value));
    }

    #[test]
    fn owned_set_pins_objects() {
        let mut heap = Heap::new(true, false, false);
        let pinned = heap.alloc(Obj::Number(5.0));

        heap.own(pinned);
        assert_eq!(full_cycle(&mut heap, &[]), 0);
        assert!(heap.is_live(pinned));

        heap.disown(pinned);
        assert_eq!(full_cycle(&mut heap, &[]), 1);
        assert!(!heap.is_live(pinned));
    }

    #[test]
    fn threshold_grows_with_live_set() {
        let mut heap = Heap::new(true, false, false);
        let mut roots = Vec::new();

        for i in 0..1000 {
            roots.push(heap.alloc_str(&format!("string number {}", i)));
        }
        full_cycle(&mut heap, &roots);
        assert!(heap.threshold >= HEAP_SIZE_MIN);
        assert!(heap.allocated > 0);
    }
}
