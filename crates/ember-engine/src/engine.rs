//! Engine service object
//!
//! [`Engine`] owns every piece of process-wide state: the class registry,
//! the bundle registry with its class-to-bundle index, and the collector
//! with its heap and roots. Tests construct as many isolated engines as
//! they like.
//!
//! Locks are always taken in the order classes, bundles, heap. The heap
//! write lock doubles as the stop-the-world for collections; reference
//! queries hold the heap read lock for the length of one scan.

use crate::bundle::{BundleId, BundleRecord, BundleRegistry, BundleSnapshot, BundleState};
use crate::class_registry::ClassRegistry;
use crate::config::EngineConfig;
use crate::dump;
use crate::gc::{CollectionOutcome, GarbageCollector, GcHeader, GcStats, RootId};
use crate::identity::ObjectHandle;
use crate::object::{Array, Class, ClassDef, ClassKind, ClassRef, EdgeSlot, HeapObject, Object};
use crate::reach::{self, ReferrerSet};
use crate::uninstall::{SweepReport, UninstallCoordinator};
use crate::value::Value;
use crate::{EngineError, EngineResult};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::io;
use tracing::{debug, info};

/// Result of [`Engine::update_bundle`]
#[derive(Debug, Clone, Serialize)]
pub struct BundleUpdate {
    /// Replacement bundle
    pub new_bundle: BundleId,
    /// Sweep report for the replaced bundle
    pub report: SweepReport,
}

/// Stale-reference engine
pub struct Engine {
    /// Configuration
    config: EngineConfig,

    /// Loaded classes (mostly read, written on class definition)
    classes: RwLock<ClassRegistry>,

    /// Bundle records and class ownership (single mutual-exclusion domain)
    bundles: Mutex<BundleRegistry>,

    /// Collector, heap and roots
    heap: RwLock<GarbageCollector>,

    /// Uninstall state machine
    coordinator: UninstallCoordinator,

    /// Report of the most recent uninstall
    last_sweep: Mutex<Option<SweepReport>>,
}

impl Engine {
    /// Create an engine
    pub fn new(config: EngineConfig) -> Self {
        let gc = GarbageCollector::new(&config.gc, &config.diagnostics);
        let coordinator = UninstallCoordinator::new(config.uninstall.clone());
        Self {
            config,
            classes: RwLock::new(ClassRegistry::new()),
            bundles: Mutex::new(BundleRegistry::new()),
            heap: RwLock::new(gc),
            coordinator,
            last_sweep: Mutex::new(None),
        }
    }

    /// Configuration the engine was built with
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ===== Bundles =====

    /// Register a bundle under an externally chosen id
    pub fn install_bundle(&self, id: BundleId) -> EngineResult<BundleId> {
        Ok(self.bundles.lock().install(id)?.id)
    }

    /// Register a bundle under a freshly allocated id
    pub fn install_next_bundle(&self) -> EngineResult<BundleId> {
        Ok(self.bundles.lock().install_next()?.id)
    }

    /// Record that `class` was defined by `bundle`
    pub fn associate_bundle_class(&self, bundle: BundleId, class: ClassRef) -> EngineResult<()> {
        let classes = self.classes.read();
        classes.require(class)?;
        self.bundles.lock().associate_class(bundle, class)
    }

    /// Handle a bundle uninstall and return the advisory sweep report
    ///
    /// The bundle record survives with its classes; the correction flag is
    /// left as it was.
    pub fn notify_bundle_uninstalled(&self, bundle: BundleId) -> EngineResult<SweepReport> {
        let classes = self.classes.read();
        let mut bundles = self.bundles.lock();
        let report = self.uninstall_locked(&classes, &mut bundles, bundle)?;
        drop(bundles);

        *self.last_sweep.lock() = Some(report.clone());
        Ok(report)
    }

    /// Replace an active bundle with a new one
    ///
    /// The new bundle inherits the correction flag; the old one is
    /// uninstalled. Classes are not transferred.
    pub fn update_bundle(&self, bundle: BundleId) -> EngineResult<BundleUpdate> {
        let classes = self.classes.read();
        let mut bundles = self.bundles.lock();
        let new_bundle = bundles.install_update(bundle)?.id;
        let report = self.uninstall_locked(&classes, &mut bundles, bundle)?;
        drop(bundles);

        *self.last_sweep.lock() = Some(report.clone());
        Ok(BundleUpdate { new_bundle, report })
    }

    fn uninstall_locked(
        &self,
        classes: &ClassRegistry,
        bundles: &mut BundleRegistry,
        bundle: BundleId,
    ) -> EngineResult<SweepReport> {
        let defined = self.coordinator.begin(bundles, bundle)?;
        let corrected = bundles.is_corrected(bundle)?;

        let report = {
            let gc = self.heap.read();
            self.coordinator.sweep(
                bundle,
                defined,
                corrected,
                gc.heap(),
                gc.roots(),
                bundles.owners(),
                classes,
            )
        };
        self.coordinator.finish(bundles, bundle)?;

        let mut gc = self.heap.write();
        gc.enable_stale_scanning();
        if self.coordinator.collect_after_uninstall() {
            Self::collect_locked(bundles, &mut gc);
        }

        Ok(report)
    }

    /// Drop an uninstalled bundle's record; its id is never reused
    pub fn purge_bundle(&self, bundle: BundleId) -> EngineResult<BundleRecord> {
        self.bundles.lock().purge(bundle)
    }

    /// Copy of a bundle record
    pub fn bundle(&self, bundle: BundleId) -> EngineResult<BundleRecord> {
        self.bundles.lock().get(bundle).cloned()
    }

    /// Lifecycle state of a bundle
    pub fn bundle_state(&self, bundle: BundleId) -> EngineResult<BundleState> {
        self.bundles.lock().state(bundle)
    }

    /// Snapshot of every bundle record, ascending by id
    pub fn dump_all(&self) -> BundleSnapshot {
        self.bundles.lock().dump_all()
    }

    /// Enable or disable stale-reference correction for a bundle
    pub fn set_bundle_stale_reference_corrected(
        &self,
        bundle: BundleId,
        corrected: bool,
    ) -> EngineResult<()> {
        self.bundles.lock().set_corrected(bundle, corrected)
    }

    /// Read the stale-reference correction flag
    pub fn is_bundle_stale_reference_corrected(&self, bundle: BundleId) -> EngineResult<bool> {
        self.bundles.lock().is_corrected(bundle)
    }

    /// Report of the most recent uninstall or update
    pub fn last_sweep_report(&self) -> Option<SweepReport> {
        self.last_sweep.lock().clone()
    }

    // ===== Classes =====

    /// Define a class that belongs to no bundle
    pub fn define_class(&self, def: ClassDef) -> ClassRef {
        let class = self.classes.write().define(def);
        debug!(%class, "bootstrap class defined");
        class
    }

    /// Define a class and associate it with `bundle`
    ///
    /// Nothing is defined if the bundle is unknown or not active.
    pub fn define_bundle_class(&self, bundle: BundleId, def: ClassDef) -> EngineResult<ClassRef> {
        let mut classes = self.classes.write();
        let mut bundles = self.bundles.lock();

        let state = bundles.state(bundle)?;
        if !state.is_active() {
            return Err(EngineError::BundleNotActive { bundle, state });
        }

        let class = classes.define(def);
        bundles.associate_class(bundle, class)?;
        Ok(class)
    }

    /// Copy of a class definition
    pub fn class(&self, class: ClassRef) -> EngineResult<Class> {
        self.classes.read().require(class).cloned()
    }

    /// Owning bundle of a class, `None` for bootstrap classes
    pub fn class_owner(&self, class: ClassRef) -> EngineResult<Option<BundleId>> {
        let classes = self.classes.read();
        classes.require(class)?;
        Ok(self.bundles.lock().class_owner(class))
    }

    /// Owning bundle of a class, failing for bootstrap classes
    pub fn require_class_owner(&self, class: ClassRef) -> EngineResult<BundleId> {
        self.class_owner(class)?
            .ok_or(EngineError::UnassociatedClass(class))
    }

    // ===== Objects =====

    /// Stable handle for the object a value refers to
    pub fn identify(&self, value: Value) -> EngineResult<ObjectHandle> {
        self.heap.read().heap().identity().identify(value)
    }

    /// Class of a live object
    pub fn class_of(&self, handle: ObjectHandle) -> EngineResult<ClassRef> {
        self.heap.read().heap().identity().class_of(handle)
    }

    /// Check whether a handle still names a live object
    pub fn is_live(&self, handle: ObjectHandle) -> bool {
        self.heap.read().heap().identity().is_live(handle)
    }

    /// Allocate an instance with null fields
    ///
    /// Instances of array classes start empty.
    pub fn new_object(&self, class: ClassRef) -> EngineResult<ObjectHandle> {
        self.allocate(class, |c| match c.kind {
            ClassKind::Array => HeapObject::Array(Array::new(c.id, 0)),
            _ => HeapObject::Object(Object::new(c.id, c.field_count())),
        })
    }

    /// Allocate an array of `length` nulls
    pub fn new_array(&self, class: ClassRef, length: usize) -> EngineResult<ObjectHandle> {
        self.allocate(class, |c| HeapObject::Array(Array::new(c.id, length)))
    }

    fn allocate(
        &self,
        class: ClassRef,
        build: impl FnOnce(&Class) -> HeapObject,
    ) -> EngineResult<ObjectHandle> {
        let classes = self.classes.read();
        let class = classes.require(class)?;
        let header = GcHeader::new(class.finalizable, class.kind.is_vm_bridge());
        let object = build(class);

        let mut bundles = self.bundles.lock();
        let mut gc = self.heap.write();
        if gc.should_collect() {
            Self::collect_locked(&mut bundles, &mut gc);
        }
        gc.allocate(object, header)
    }

    /// Read an instance field
    pub fn get_field(&self, handle: ObjectHandle, index: usize) -> EngineResult<Value> {
        let gc = self.heap.read();
        match gc.heap().get(handle)? {
            HeapObject::Object(obj) => obj.get_field(index).ok_or(EngineError::SlotOutOfBounds {
                handle,
                index,
                len: obj.field_count(),
            }),
            HeapObject::Array(_) => Err(EngineError::WrongObjectKind {
                handle,
                expected: "object",
            }),
        }
    }

    /// Write an instance field
    pub fn set_field(&self, handle: ObjectHandle, index: usize, value: Value) -> EngineResult<()> {
        self.write_slot(handle, EdgeSlot::Field(index), value)
    }

    /// Read an array element
    pub fn get_element(&self, handle: ObjectHandle, index: usize) -> EngineResult<Value> {
        let gc = self.heap.read();
        match gc.heap().get(handle)? {
            HeapObject::Array(arr) => arr.get(index).ok_or(EngineError::SlotOutOfBounds {
                handle,
                index,
                len: arr.len(),
            }),
            HeapObject::Object(_) => Err(EngineError::WrongObjectKind {
                handle,
                expected: "array",
            }),
        }
    }

    /// Write an array element
    pub fn set_element(&self, handle: ObjectHandle, index: usize, value: Value) -> EngineResult<()> {
        self.write_slot(handle, EdgeSlot::Element(index), value)
    }

    /// Append to an array, returning the new length
    pub fn push_element(&self, handle: ObjectHandle, value: Value) -> EngineResult<usize> {
        let mut gc = self.heap.write();
        Self::check_reference(&gc, value)?;
        match gc.heap_mut().get_mut(handle)? {
            HeapObject::Array(arr) => Ok(arr.push(value)),
            HeapObject::Object(_) => Err(EngineError::WrongObjectKind {
                handle,
                expected: "array",
            }),
        }
    }

    /// Length of an array
    pub fn array_len(&self, handle: ObjectHandle) -> EngineResult<usize> {
        let gc = self.heap.read();
        match gc.heap().get(handle)? {
            HeapObject::Array(arr) => Ok(arr.len()),
            HeapObject::Object(_) => Err(EngineError::WrongObjectKind {
                handle,
                expected: "array",
            }),
        }
    }

    fn write_slot(&self, handle: ObjectHandle, slot: EdgeSlot, value: Value) -> EngineResult<()> {
        let mut gc = self.heap.write();
        Self::check_reference(&gc, value)?;

        let object = gc.heap_mut().get_mut(handle)?;
        let len = match (&*object, slot) {
            (HeapObject::Object(obj), EdgeSlot::Field(_)) => obj.field_count(),
            (HeapObject::Array(arr), EdgeSlot::Element(_)) => arr.len(),
            (_, EdgeSlot::Field(_)) => {
                return Err(EngineError::WrongObjectKind { handle, expected: "object" })
            }
            (_, EdgeSlot::Element(_)) => {
                return Err(EngineError::WrongObjectKind { handle, expected: "array" })
            }
        };

        if object.set_slot(slot, value) {
            Ok(())
        } else {
            let index = match slot {
                EdgeSlot::Field(i) | EdgeSlot::Element(i) => i,
            };
            Err(EngineError::SlotOutOfBounds { handle, index, len })
        }
    }

    /// Stored references must name live objects
    fn check_reference(gc: &GarbageCollector, value: Value) -> EngineResult<()> {
        if let Some(target) = value.as_handle() {
            gc.heap().identity().class_of(target)?;
        }
        Ok(())
    }

    // ===== Roots =====

    /// Add a runtime-held global root
    pub fn add_global_root(&self, value: Value) -> EngineResult<RootId> {
        let mut gc = self.heap.write();
        Self::check_reference(&gc, value)?;
        Ok(gc.roots_mut().add_global_root(value))
    }

    /// Add a stack root
    pub fn add_stack_root(&self, value: Value) -> EngineResult<RootId> {
        let mut gc = self.heap.write();
        Self::check_reference(&gc, value)?;
        Ok(gc.roots_mut().add_stack_root(value))
    }

    /// Add a static-field root of `class`
    pub fn add_static_root(&self, class: ClassRef, value: Value) -> EngineResult<RootId> {
        let classes = self.classes.read();
        classes.require(class)?;
        let mut gc = self.heap.write();
        Self::check_reference(&gc, value)?;
        Ok(gc.roots_mut().add_static_root(class, value))
    }

    /// Read a root slot
    pub fn get_root(&self, root: RootId) -> EngineResult<Value> {
        self.heap.read().roots().get(root)
    }

    /// Overwrite a root slot, returning the previous value
    pub fn set_root(&self, root: RootId, value: Value) -> EngineResult<Value> {
        let mut gc = self.heap.write();
        Self::check_reference(&gc, value)?;
        gc.roots_mut().set(root, value)
    }

    /// Remove a root slot
    pub fn remove_root(&self, root: RootId) -> EngineResult<Value> {
        self.heap.write().roots_mut().remove(root)
    }

    /// Drop every stack root
    pub fn clear_stack_roots(&self) {
        self.heap.write().roots_mut().clear_stack_roots();
    }

    // ===== Queries and dumps =====

    /// Live objects holding a direct strong reference to `handle`
    ///
    /// Expensive: one full enumeration of the reachable heap per call.
    pub fn get_references_to_object(&self, handle: ObjectHandle) -> EngineResult<ReferrerSet> {
        let gc = self.heap.read();
        reach::references_to(gc.heap(), gc.roots(), handle)
    }

    /// Text rendering of an object's class and slots
    pub fn dump_object(&self, handle: ObjectHandle) -> EngineResult<String> {
        let classes = self.classes.read();
        let bundles = self.bundles.lock();
        let gc = self.heap.read();
        dump::render_object(handle, gc.heap(), &classes, &bundles)
    }

    /// Text rendering of the bundle table
    pub fn dump_class_loader_bundles(&self) -> String {
        let classes = self.classes.read();
        let snapshot = self.bundles.lock().dump_all();
        dump::render_bundles(&snapshot, &classes)
    }

    /// Write the bundle table to a sink
    pub fn write_class_loader_bundles(&self, out: &mut impl io::Write) -> io::Result<()> {
        out.write_all(self.dump_class_loader_bundles().as_bytes())
    }

    // ===== Collection =====

    /// Run a collection now
    pub fn collect(&self) -> CollectionOutcome {
        let mut bundles = self.bundles.lock();
        let mut gc = self.heap.write();
        Self::collect_locked(&mut bundles, &mut gc)
    }

    /// Enable stale-reference scanning and collect immediately
    pub fn force_stale_reference_scanning(&self) -> CollectionOutcome {
        let mut bundles = self.bundles.lock();
        let mut gc = self.heap.write();
        gc.enable_stale_scanning();
        Self::collect_locked(&mut bundles, &mut gc)
    }

    fn collect_locked(bundles: &mut BundleRegistry, gc: &mut GarbageCollector) -> CollectionOutcome {
        let stale = bundles.corrected_stale_classes();
        let outcome = gc.collect(&stale);
        let reclaimed = bundles.mark_reclaimed(&outcome.live_instances);
        if !reclaimed.is_empty() {
            info!(?reclaimed, "bundles reclaimed");
        }
        outcome
    }

    /// Collector statistics
    pub fn gc_stats(&self) -> GcStats {
        self.heap.read().stats().clone()
    }

    /// Number of live objects
    pub fn live_objects(&self) -> usize {
        self.heap.read().heap().len()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
