//! Reachability queries
//!
//! The object graph only stores forward edges, so "who references X" is
//! answered by enumerating every object reachable from the roots and
//! recording each edge that lands on X. Cost is proportional to the live
//! heap, not to the size of the answer. Nothing is cached: the heap may
//! change between queries.
//!
//! Only strong edges (instance fields and array elements) count. Roots are
//! never reported as referrers; [`roots_holding`] lists them separately.

use crate::gc::{Heap, RootId, RootSet};
use crate::identity::ObjectHandle;
use crate::object::EdgeSlot;
use crate::EngineResult;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use tracing::debug;

/// One edge landing on the queried object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Referrer {
    /// Object holding the reference
    pub holder: ObjectHandle,
    /// Slot in the holder
    pub slot: EdgeSlot,
}

/// Direct referrers of one object, in discovery order
///
/// A holder with several edges to the target appears once; [`edges`]
/// keeps every edge.
///
/// [`edges`]: ReferrerSet::edges
#[derive(Debug, Clone, Serialize)]
pub struct ReferrerSet {
    target: ObjectHandle,
    holders: Vec<ObjectHandle>,
    edges: Vec<Referrer>,
    #[serde(skip)]
    seen: FxHashSet<ObjectHandle>,
}

impl ReferrerSet {
    fn new(target: ObjectHandle) -> Self {
        Self {
            target,
            holders: Vec::new(),
            edges: Vec::new(),
            seen: FxHashSet::default(),
        }
    }

    fn record(&mut self, holder: ObjectHandle, slot: EdgeSlot) {
        if self.seen.insert(holder) {
            self.holders.push(holder);
        }
        self.edges.push(Referrer { holder, slot });
    }

    /// Queried object
    pub fn target(&self) -> ObjectHandle {
        self.target
    }

    /// Distinct holders in discovery order
    pub fn holders(&self) -> &[ObjectHandle] {
        &self.holders
    }

    /// Every edge, in discovery order
    pub fn edges(&self) -> &[Referrer] {
        &self.edges
    }

    /// Iterate distinct holders
    pub fn iter(&self) -> std::slice::Iter<'_, ObjectHandle> {
        self.holders.iter()
    }

    /// Check whether `holder` references the target
    pub fn contains(&self, holder: ObjectHandle) -> bool {
        self.holders.contains(&holder)
    }

    /// Number of distinct holders
    pub fn len(&self) -> usize {
        self.holders.len()
    }

    /// Check if nothing references the target
    pub fn is_empty(&self) -> bool {
        self.holders.is_empty()
    }
}

impl<'a> IntoIterator for &'a ReferrerSet {
    type Item = &'a ObjectHandle;
    type IntoIter = std::slice::Iter<'a, ObjectHandle>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Live set computed from the roots, leaving GC mark bits untouched
#[derive(Debug)]
pub struct ReachabilityScan {
    order: Vec<ObjectHandle>,
    live: FxHashSet<ObjectHandle>,
}

impl ReachabilityScan {
    /// Enumerate every object reachable from `roots`
    pub fn run(heap: &Heap, roots: &RootSet) -> Self {
        let mut order = Vec::new();
        let mut live = FxHashSet::default();
        let mut worklist: Vec<ObjectHandle> = roots.references().map(|(_, h)| h).collect();
        worklist.reverse();

        while let Some(handle) = worklist.pop() {
            if !heap.identity().is_live(handle) || !live.insert(handle) {
                continue;
            }
            order.push(handle);

            if let Ok(object) = heap.get(handle) {
                let start = worklist.len();
                worklist.extend(object.references().map(|(_, target)| target));
                worklist[start..].reverse();
            }
        }

        Self { order, live }
    }

    /// Reachable objects in discovery order
    pub fn objects(&self) -> &[ObjectHandle] {
        &self.order
    }

    /// Check whether an object is reachable from the roots
    pub fn is_reachable(&self, handle: ObjectHandle) -> bool {
        self.live.contains(&handle)
    }

    /// Number of reachable objects
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Check if nothing is reachable
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Referrers of one object among the reachable set
    pub fn referrers_of(&self, heap: &Heap, target: ObjectHandle) -> ReferrerSet {
        let mut set = ReferrerSet::new(target);
        for &holder in &self.order {
            let Ok(object) = heap.get(holder) else { continue };
            for (slot, to) in object.references() {
                if to == target {
                    set.record(holder, slot);
                }
            }
        }
        set
    }

    /// Referrers of many objects in a single pass
    pub fn referrers_of_all(
        &self,
        heap: &Heap,
        targets: &[ObjectHandle],
    ) -> FxHashMap<ObjectHandle, ReferrerSet> {
        let mut sets: FxHashMap<ObjectHandle, ReferrerSet> = targets
            .iter()
            .map(|&t| (t, ReferrerSet::new(t)))
            .collect();

        for &holder in &self.order {
            let Ok(object) = heap.get(holder) else { continue };
            for (slot, to) in object.references() {
                if let Some(set) = sets.get_mut(&to) {
                    set.record(holder, slot);
                }
            }
        }
        sets
    }
}

/// Find every live object holding a strong reference to `target`
///
/// Fails with `HandleExpired` if `target` was reclaimed. A live object that
/// only roots reference yields an empty set.
pub fn references_to(heap: &Heap, roots: &RootSet, target: ObjectHandle) -> EngineResult<ReferrerSet> {
    heap.identity().class_of(target)?;

    let scan = ReachabilityScan::run(heap, roots);
    let set = scan.referrers_of(heap, target);

    debug!(%target, scanned = scan.len(), referrers = set.len(), "reference query");
    Ok(set)
}

/// Roots whose slot holds `target`
pub fn roots_holding(roots: &RootSet, target: ObjectHandle) -> Vec<RootId> {
    roots
        .references()
        .filter(|(_, h)| *h == target)
        .map(|(id, _)| id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::GcHeader;
    use crate::object::{Array, ClassRef, HeapObject, Object};
    use crate::value::Value;
    use crate::EngineError;

    fn alloc(heap: &mut Heap, fields: usize) -> ObjectHandle {
        heap.allocate(
            HeapObject::Object(Object::new(ClassRef::new(0), fields)),
            GcHeader::default(),
        )
        .unwrap()
    }

    fn link(heap: &mut Heap, from: ObjectHandle, field: usize, to: ObjectHandle) {
        heap.get_mut(from)
            .unwrap()
            .set_slot(EdgeSlot::Field(field), Value::reference(to));
    }

    #[test]
    fn test_referrers_include_holder_exclude_others() {
        let mut heap = Heap::new();
        let mut roots = RootSet::new();
        let a = alloc(&mut heap, 0);
        let b = alloc(&mut heap, 1);
        let c = alloc(&mut heap, 1);
        link(&mut heap, b, 0, a);
        roots.add_global_root(Value::reference(b));
        roots.add_global_root(Value::reference(c));

        let set = references_to(&heap, &roots, a).unwrap();
        assert!(set.contains(b));
        assert!(!set.contains(c));
        assert_eq!(set.edges(), &[Referrer { holder: b, slot: EdgeSlot::Field(0) }]);
    }

    #[test]
    fn test_root_only_object_has_no_referrers() {
        let mut heap = Heap::new();
        let mut roots = RootSet::new();
        let a = alloc(&mut heap, 0);
        let root = roots.add_stack_root(Value::reference(a));

        let set = references_to(&heap, &roots, a).unwrap();
        assert!(set.is_empty());
        assert_eq!(roots_holding(&roots, a), vec![root]);
    }

    #[test]
    fn test_unreachable_holder_not_reported() {
        let mut heap = Heap::new();
        let mut roots = RootSet::new();
        let a = alloc(&mut heap, 0);
        let garbage = alloc(&mut heap, 1);
        link(&mut heap, garbage, 0, a);
        roots.add_global_root(Value::reference(a));

        assert!(references_to(&heap, &roots, a).unwrap().is_empty());
    }

    #[test]
    fn test_holder_listed_once() {
        let mut heap = Heap::new();
        let mut roots = RootSet::new();
        let a = alloc(&mut heap, 0);
        let list = heap
            .allocate(
                HeapObject::Array(Array::new(ClassRef::new(1), 3)),
                GcHeader::default(),
            )
            .unwrap();
        for i in [0, 2] {
            heap.get_mut(list)
                .unwrap()
                .set_slot(EdgeSlot::Element(i), Value::reference(a));
        }
        roots.add_global_root(Value::reference(list));

        let set = references_to(&heap, &roots, a).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.edges().len(), 2);
    }

    #[test]
    fn test_cycles_terminate() {
        let mut heap = Heap::new();
        let mut roots = RootSet::new();
        let a = alloc(&mut heap, 1);
        let b = alloc(&mut heap, 1);
        link(&mut heap, a, 0, b);
        link(&mut heap, b, 0, a);
        roots.add_global_root(Value::reference(a));

        let scan = ReachabilityScan::run(&heap, &roots);
        assert_eq!(scan.objects(), &[a, b]);
        assert!(references_to(&heap, &roots, a).unwrap().contains(b));
    }

    #[test]
    fn test_expired_target() {
        let mut heap = Heap::new();
        let roots = RootSet::new();
        let a = alloc(&mut heap, 0);
        heap.free(a).unwrap();

        assert!(matches!(
            references_to(&heap, &roots, a),
            Err(EngineError::HandleExpired(_))
        ));
    }

    #[test]
    fn test_referrers_of_all() {
        let mut heap = Heap::new();
        let mut roots = RootSet::new();
        let a = alloc(&mut heap, 0);
        let b = alloc(&mut heap, 0);
        let holder = alloc(&mut heap, 2);
        link(&mut heap, holder, 0, a);
        link(&mut heap, holder, 1, b);
        roots.add_global_root(Value::reference(holder));

        let scan = ReachabilityScan::run(&heap, &roots);
        let sets = scan.referrers_of_all(&heap, &[a, b]);
        assert!(sets[&a].contains(holder));
        assert!(sets[&b].contains(holder));
    }
}
