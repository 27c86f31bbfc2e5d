//! Mark-sweep garbage collector with stale-reference scanning
//!
//! A collection runs in four phases:
//!
//! 1. **Mark** from the root set. With scanning enabled this phase runs in
//!    [`ScanMode::Inclusive`]: every edge landing on a stale object is queued
//!    for reset and not traced.
//! 2. **Finalization.** Unreachable finalizable objects are queued for
//!    finalization and traced in [`ScanMode::Exclusive`]: stale edges met
//!    here are traced and removed from the reset queue, and a rescan is
//!    requested for the next collection.
//! 3. **Reset** every queued stale edge to null.
//! 4. **Sweep** unmarked objects.
//!
//! An object is stale when its class belongs to an uninstalled bundle with
//! correction enabled. Bridge objects are never stale.

use super::header::GcHeader;
use super::heap::Heap;
use super::roots::{RootId, RootSet};
use crate::config::{DiagnosticsConfig, GcConfig};
use crate::identity::ObjectHandle;
use crate::object::{ClassRef, EdgeSlot, HeapObject};
use crate::value::Value;
use crate::EngineResult;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How the tracer treats references to stale objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    /// Stale references are traced like any other
    Disabled,
    /// Stale references are queued for reset and not traced
    Inclusive,
    /// Stale references are traced and kept; a rescan is requested
    Exclusive,
}

/// A slot holding a reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RefSlot {
    Root(RootId),
    Heap(ObjectHandle, EdgeSlot),
}

/// Result of one collection
#[derive(Debug, Clone, Default, Serialize)]
pub struct CollectionOutcome {
    /// Objects marked reachable
    pub marked: usize,
    /// Objects freed
    pub freed: usize,
    /// Stale references reset to null
    pub stale_reset: usize,
    /// Stale references kept because a finalizable object reaches them
    pub stale_excluded: usize,
    /// Objects queued for finalization
    pub finalized: usize,
    /// Live instances per class after the sweep
    #[serde(skip)]
    pub live_instances: FxHashMap<ClassRef, usize>,
}

/// Garbage collector statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct GcStats {
    /// Total number of collections
    pub collections: usize,

    /// Total objects freed
    pub objects_freed: usize,

    /// Total stale references reset
    pub stale_references_reset: usize,

    /// Total stale references excluded through finalizable objects
    pub stale_references_excluded: usize,

    /// Total objects queued for finalization
    pub objects_finalized: usize,

    /// Total pause time across all collections
    pub total_pause_time: Duration,

    /// Last collection duration
    pub last_pause_time: Duration,

    /// Maximum pause time
    pub max_pause_time: Duration,

    /// Objects marked in last collection
    pub last_marked_count: usize,

    /// Objects freed in last collection
    pub last_freed_count: usize,

    /// Live objects after last collection
    pub live_objects: usize,
}

impl GcStats {
    /// Update statistics after a collection
    fn update(&mut self, pause_time: Duration, outcome: &CollectionOutcome, live_objects: usize) {
        self.collections += 1;
        self.objects_freed += outcome.freed;
        self.stale_references_reset += outcome.stale_reset;
        self.stale_references_excluded += outcome.stale_excluded;
        self.objects_finalized += outcome.finalized;
        self.total_pause_time += pause_time;
        self.last_pause_time = pause_time;
        self.max_pause_time = self.max_pause_time.max(pause_time);
        self.last_marked_count = outcome.marked;
        self.last_freed_count = outcome.freed;
        self.live_objects = live_objects;
    }

    /// Average pause time
    pub fn avg_pause_time(&self) -> Duration {
        if self.collections == 0 {
            return Duration::ZERO;
        }
        self.total_pause_time / self.collections as u32
    }

    /// Get survival rate (0.0 to 1.0)
    pub fn survival_rate(&self) -> f64 {
        let before = self.live_objects + self.last_freed_count;
        if before == 0 {
            return 0.0;
        }
        self.live_objects as f64 / before as f64
    }
}

/// Per-collection tracer state
struct Tracer<'a> {
    stale_classes: &'a FxHashSet<ClassRef>,
    queued: FxHashMap<RefSlot, ObjectHandle>,
    excluded: usize,
    verbose: bool,
}

impl Tracer<'_> {
    /// Decide whether a reference from `slot` to `target` should be traced
    fn scan(&mut self, heap: &Heap, mode: ScanMode, slot: RefSlot, target: ObjectHandle) -> bool {
        if mode == ScanMode::Disabled || !self.is_stale(heap, target) {
            return true;
        }

        match mode {
            ScanMode::Inclusive => {
                if self.verbose {
                    info!(?slot, %target, "stale reference");
                }
                self.queued.insert(slot, target);
                false
            }
            ScanMode::Exclusive => {
                let removed = self.queued.remove(&slot).is_some();
                self.excluded += 1;
                if self.verbose {
                    info!(?slot, %target, removed, "stale reference excluded through finalizable object");
                }
                true
            }
            ScanMode::Disabled => true,
        }
    }

    fn is_stale(&self, heap: &Heap, target: ObjectHandle) -> bool {
        let Ok(class) = heap.identity().class_of(target) else {
            return false;
        };
        if !self.stale_classes.contains(&class) {
            return false;
        }
        match heap.header(target) {
            Ok(header) if header.is_bridge() => {
                warn!(%target, %class, "stale bridge object is not reset");
                false
            }
            Ok(_) => true,
            Err(_) => false,
        }
    }
}

/// Mark-sweep garbage collector
#[derive(Debug)]
pub struct GarbageCollector {
    /// Managed heap
    heap: Heap,

    /// Root set
    roots: RootSet,

    /// Allocations that trigger the next collection
    threshold: usize,

    /// Configured minimum threshold
    base_threshold: usize,

    /// Statistics
    stats: GcStats,

    /// Run the next collection in inclusive mode
    scan_requested: bool,

    /// Log every stale reference
    verbose: bool,
}

impl GarbageCollector {
    /// Create a collector from configuration
    pub fn new(gc: &GcConfig, diagnostics: &DiagnosticsConfig) -> Self {
        let mut heap = Heap::new();
        heap.set_max_objects(gc.max_objects);
        Self {
            heap,
            roots: RootSet::new(),
            threshold: gc.threshold_objects,
            base_threshold: gc.threshold_objects,
            stats: GcStats::default(),
            scan_requested: false,
            verbose: diagnostics.verbose_stale_refs,
        }
    }

    /// Set GC threshold (allocations between collections)
    pub fn set_threshold(&mut self, objects: usize) {
        self.threshold = objects.max(1);
        self.base_threshold = self.threshold;
    }

    /// Allocate an object without collecting
    pub fn allocate(&mut self, object: HeapObject, header: GcHeader) -> EngineResult<ObjectHandle> {
        self.heap.allocate(object, header)
    }

    /// Check if we should collect before the next allocation
    pub fn should_collect(&self) -> bool {
        self.heap.allocations_since_gc() >= self.threshold || self.heap.is_full()
    }

    /// Request stale-reference scanning for the next collection
    pub fn enable_stale_scanning(&mut self) {
        self.scan_requested = true;
    }

    /// Whether the next collection scans for stale references
    pub fn is_scanning_enabled(&self) -> bool {
        self.scan_requested
    }

    /// Run garbage collection
    ///
    /// `stale_classes` lists the classes whose instances are stale.
    pub fn collect(&mut self, stale_classes: &FxHashSet<ClassRef>) -> CollectionOutcome {
        let start = Instant::now();
        let scanning = self.scan_requested && !stale_classes.is_empty();
        let mut tracer = Tracer {
            stale_classes,
            queued: FxHashMap::default(),
            excluded: 0,
            verbose: self.verbose,
        };
        let mut outcome = CollectionOutcome::default();

        // Mark phase
        self.heap.unmark_all();
        let mode = if scanning { ScanMode::Inclusive } else { ScanMode::Disabled };
        let mut worklist = Vec::new();
        let roots: Vec<(RootId, ObjectHandle)> = self.roots.references().collect();
        for (root, target) in roots {
            if tracer.scan(&self.heap, mode, RefSlot::Root(root), target) {
                worklist.push(target);
            }
        }
        outcome.marked += self.trace(&mut tracer, mode, worklist);

        // Finalization phase
        let pending: Vec<ObjectHandle> = self
            .heap
            .iter()
            .filter(|(_, header, _)| !header.is_marked() && header.is_finalizable())
            .map(|(handle, _, _)| handle)
            .collect();
        for handle in &pending {
            if let Ok(header) = self.heap.header_mut(*handle) {
                header.clear_finalizable();
            }
        }
        outcome.finalized = pending.len();
        let mode = if scanning { ScanMode::Exclusive } else { ScanMode::Disabled };
        outcome.marked += self.trace(&mut tracer, mode, pending);

        // Reset phase
        for (slot, target) in std::mem::take(&mut tracer.queued) {
            if self.reset(slot) {
                outcome.stale_reset += 1;
                debug!(?slot, %target, "stale reference reset");
            }
        }
        outcome.stale_excluded = tracer.excluded;

        // Sweep phase
        outcome.freed = self.heap.sweep().len();
        for (_, _, object) in self.heap.iter() {
            *outcome.live_instances.entry(object.class()).or_insert(0) += 1;
        }

        let live = self.heap.len();
        self.stats.update(start.elapsed(), &outcome, live);
        self.heap.reset_allocation_counter();
        self.threshold = live.max(self.base_threshold);

        if scanning {
            // Finalizable objects kept some stale references alive
            self.scan_requested = outcome.stale_excluded > 0;
            if self.scan_requested {
                warn!(
                    excluded = outcome.stale_excluded,
                    "stale references kept by finalizable objects, another collection is needed"
                );
            }
        }

        debug!(
            freed = outcome.freed,
            marked = outcome.marked,
            stale_reset = outcome.stale_reset,
            finalized = outcome.finalized,
            live,
            "collection finished"
        );
        outcome
    }

    /// Trace from `worklist`, returning the number of objects newly marked
    fn trace(
        &mut self,
        tracer: &mut Tracer<'_>,
        mode: ScanMode,
        mut worklist: Vec<ObjectHandle>,
    ) -> usize {
        let mut marked = 0;

        while let Some(handle) = worklist.pop() {
            let newly_marked = match self.heap.header_mut(handle) {
                Ok(header) => header.mark(),
                Err(_) => false,
            };
            if !newly_marked {
                continue;
            }
            marked += 1;

            let edges: Vec<(EdgeSlot, ObjectHandle)> = match self.heap.get(handle) {
                Ok(object) => object.references().collect(),
                Err(_) => continue,
            };
            for (slot, target) in edges {
                if tracer.scan(&self.heap, mode, RefSlot::Heap(handle, slot), target) {
                    worklist.push(target);
                }
            }
        }

        marked
    }

    fn reset(&mut self, slot: RefSlot) -> bool {
        match slot {
            RefSlot::Root(root) => self.roots.set(root, Value::null()).is_ok(),
            RefSlot::Heap(holder, edge) => match self.heap.get_mut(holder) {
                Ok(object) => object.set_slot(edge, Value::null()),
                Err(_) => false,
            },
        }
    }

    /// Get GC statistics
    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    /// Current collection threshold
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Heap (read-only)
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Heap (mutable)
    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// Root set (read-only)
    pub fn roots(&self) -> &RootSet {
        &self.roots
    }

    /// Root set (mutable)
    pub fn roots_mut(&mut self) -> &mut RootSet {
        &mut self.roots
    }
}

impl Default for GarbageCollector {
    fn default() -> Self {
        Self::new(&GcConfig::default(), &DiagnosticsConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Object;

    const A: ClassRef = ClassRef::new(0);
    const STALE: ClassRef = ClassRef::new(1);

    fn alloc(gc: &mut GarbageCollector, class: ClassRef, fields: usize) -> ObjectHandle {
        gc.allocate(HeapObject::Object(Object::new(class, fields)), GcHeader::default())
            .unwrap()
    }

    fn link(gc: &mut GarbageCollector, from: ObjectHandle, field: usize, to: ObjectHandle) {
        gc.heap_mut()
            .get_mut(from)
            .unwrap()
            .set_slot(EdgeSlot::Field(field), Value::reference(to));
    }

    fn stale_set() -> FxHashSet<ClassRef> {
        let mut set = FxHashSet::default();
        set.insert(STALE);
        set
    }

    #[test]
    fn test_gc_creation() {
        let gc = GarbageCollector::default();
        assert!(gc.heap().is_empty());
        assert_eq!(gc.stats().collections, 0);
        assert!(!gc.is_scanning_enabled());
    }

    #[test]
    fn test_gc_collect_unreachable() {
        let mut gc = GarbageCollector::default();
        let root = alloc(&mut gc, A, 1);
        let child = alloc(&mut gc, A, 0);
        let garbage = alloc(&mut gc, A, 0);
        link(&mut gc, root, 0, child);
        gc.roots_mut().add_global_root(Value::reference(root));

        let outcome = gc.collect(&FxHashSet::default());

        assert_eq!(outcome.freed, 1);
        assert_eq!(outcome.marked, 2);
        assert!(gc.heap().identity().is_live(child));
        assert!(!gc.heap().identity().is_live(garbage));
        assert_eq!(outcome.live_instances.get(&A), Some(&2));
        assert_eq!(gc.stats().collections, 1);
    }

    #[test]
    fn test_gc_cycle_is_collected() {
        let mut gc = GarbageCollector::default();
        let a = alloc(&mut gc, A, 1);
        let b = alloc(&mut gc, A, 1);
        link(&mut gc, a, 0, b);
        link(&mut gc, b, 0, a);

        assert_eq!(gc.collect(&FxHashSet::default()).freed, 2);
    }

    #[test]
    fn test_gc_threshold() {
        let mut gc = GarbageCollector::default();
        gc.set_threshold(2);
        alloc(&mut gc, A, 0);
        assert!(!gc.should_collect());
        alloc(&mut gc, A, 0);
        assert!(gc.should_collect());

        gc.collect(&FxHashSet::default());
        assert!(!gc.should_collect());
    }

    #[test]
    fn test_stale_reference_kept_without_scanning() {
        let mut gc = GarbageCollector::default();
        let holder = alloc(&mut gc, A, 1);
        let stale = alloc(&mut gc, STALE, 0);
        link(&mut gc, holder, 0, stale);
        gc.roots_mut().add_global_root(Value::reference(holder));

        let outcome = gc.collect(&stale_set());
        assert_eq!(outcome.stale_reset, 0);
        assert!(gc.heap().identity().is_live(stale));
    }

    #[test]
    fn test_stale_reference_reset() {
        let mut gc = GarbageCollector::default();
        let holder = alloc(&mut gc, A, 1);
        let stale = alloc(&mut gc, STALE, 0);
        link(&mut gc, holder, 0, stale);
        gc.roots_mut().add_global_root(Value::reference(holder));
        gc.enable_stale_scanning();

        let outcome = gc.collect(&stale_set());

        assert_eq!(outcome.stale_reset, 1);
        assert_eq!(outcome.freed, 1);
        assert!(!gc.heap().identity().is_live(stale));
        assert_eq!(
            gc.heap().get(holder).unwrap().slot(EdgeSlot::Field(0)),
            Some(Value::null())
        );
        assert!(!gc.is_scanning_enabled());
    }

    #[test]
    fn test_stale_root_reset() {
        let mut gc = GarbageCollector::default();
        let stale = alloc(&mut gc, STALE, 0);
        let root = gc.roots_mut().add_stack_root(Value::reference(stale));
        gc.enable_stale_scanning();

        gc.collect(&stale_set());
        assert_eq!(gc.roots().get(root).unwrap(), Value::null());
        assert!(!gc.heap().identity().is_live(stale));
    }

    #[test]
    fn test_bridge_object_not_reset() {
        let mut gc = GarbageCollector::default();
        let holder = alloc(&mut gc, A, 1);
        let bridge = gc
            .allocate(HeapObject::Object(Object::new(STALE, 0)), GcHeader::new(false, true))
            .unwrap();
        link(&mut gc, holder, 0, bridge);
        gc.roots_mut().add_global_root(Value::reference(holder));
        gc.enable_stale_scanning();

        let outcome = gc.collect(&stale_set());
        assert_eq!(outcome.stale_reset, 0);
        assert!(gc.heap().identity().is_live(bridge));
    }

    #[test]
    fn test_finalizable_object_survives_one_collection() {
        let mut gc = GarbageCollector::default();
        let obj = gc
            .allocate(HeapObject::Object(Object::new(A, 0)), GcHeader::new(true, false))
            .unwrap();

        let first = gc.collect(&FxHashSet::default());
        assert_eq!(first.finalized, 1);
        assert_eq!(first.freed, 0);
        assert!(gc.heap().identity().is_live(obj));

        let second = gc.collect(&FxHashSet::default());
        assert_eq!(second.finalized, 0);
        assert_eq!(second.freed, 1);
        assert!(!gc.heap().identity().is_live(obj));
    }

    #[test]
    fn test_finalizable_holder_excludes_stale_reference() {
        let mut gc = GarbageCollector::default();
        let finalizable = gc
            .allocate(HeapObject::Object(Object::new(A, 1)), GcHeader::new(true, false))
            .unwrap();
        let stale = alloc(&mut gc, STALE, 0);
        link(&mut gc, finalizable, 0, stale);
        gc.enable_stale_scanning();

        let outcome = gc.collect(&stale_set());
        assert_eq!(outcome.stale_excluded, 1);
        assert_eq!(outcome.stale_reset, 0);
        assert!(gc.heap().identity().is_live(stale));
        assert!(gc.is_scanning_enabled());

        // The finalizer has run; the next collection frees both
        let outcome = gc.collect(&stale_set());
        assert_eq!(outcome.freed, 2);
        assert!(!gc.is_scanning_enabled());
    }
}
