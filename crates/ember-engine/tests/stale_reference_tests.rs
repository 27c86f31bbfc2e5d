//! Stale Reference Tests
//!
//! End-to-end checks of the engine's public surface:
//! - Class ownership and bundle ids
//! - Correction flag bookkeeping
//! - Handle liveness
//! - Reachability queries
//! - Uninstall of a bundle whose objects are still referenced
//! - Diagnostic dumps
//!
//! # Running Tests
//! ```bash
//! cargo test --test stale_reference_tests
//! ```

use ember_engine::{
    BundleId, BundleState, ClassDef, ClassRef, Engine, EngineConfig, EngineError, ObjectHandle,
    SweepOutcome, Value,
};
use std::time::{Duration, Instant};

/// Bundle P defines `B`; bundle Q defines a holder that keeps a list
struct Scenario {
    engine: Engine,
    provider: BundleId,
    consumer: BundleId,
    b_class: ClassRef,
    b: ObjectHandle,
    list: ObjectHandle,
    holder: ObjectHandle,
}

fn stale_scenario() -> Scenario {
    let engine = Engine::default();
    let list_class = engine.define_class(ClassDef::array("java.util.ArrayList"));

    let provider = engine.install_next_bundle().unwrap();
    let b_class = engine
        .define_bundle_class(provider, ClassDef::new("ijvm.tests.BImpl").fields(["name"]))
        .unwrap();

    let consumer = engine.install_next_bundle().unwrap();
    let holder_class = engine
        .define_bundle_class(
            consumer,
            ClassDef::new("ijvm.tests.CImpl.Activator").fields(["list"]),
        )
        .unwrap();

    let b = engine.new_object(b_class).unwrap();
    let list = engine.new_object(list_class).unwrap();
    let holder = engine.new_object(holder_class).unwrap();
    engine.push_element(list, b.into()).unwrap();
    engine.set_field(holder, 0, list.into()).unwrap();
    engine.add_static_root(holder_class, holder.into()).unwrap();

    Scenario {
        engine,
        provider,
        consumer,
        b_class,
        b,
        list,
        holder,
    }
}

// ===== Ownership Tests =====

#[test]
fn test_ownership_uniqueness() {
    let engine = Engine::default();
    let p = engine.install_next_bundle().unwrap();
    let q = engine.install_next_bundle().unwrap();
    let class = engine.define_bundle_class(p, ClassDef::new("Shared")).unwrap();

    let err = engine.associate_bundle_class(q, class).unwrap_err();
    assert!(matches!(err, EngineError::ClassAlreadyOwned { owner, requested, .. } if owner == p && requested == q));

    let owners: Vec<_> = engine
        .dump_all()
        .iter()
        .filter(|r| r.defined_classes.contains(&class))
        .map(|r| r.id)
        .collect();
    assert_eq!(owners, vec![p]);
}

#[test]
fn test_reassociation_after_uninstall() {
    let engine = Engine::default();
    let p = engine.install_next_bundle().unwrap();
    let class = engine.define_bundle_class(p, ClassDef::new("Moved")).unwrap();
    engine.notify_bundle_uninstalled(p).unwrap();

    let q = engine.install_next_bundle().unwrap();
    engine.associate_bundle_class(q, class).unwrap();

    assert_eq!(engine.class_owner(class).unwrap(), Some(q));
    assert!(engine.bundle(p).unwrap().defined_classes.is_empty());
}

#[test]
fn test_monotonic_bundle_ids() {
    let engine = Engine::default();
    let ids: Vec<BundleId> = (0..50).map(|_| engine.install_next_bundle().unwrap()).collect();

    for pair in ids.windows(2) {
        assert!(pair[0] < pair[1], "{} should be below {}", pair[0], pair[1]);
    }

    engine.notify_bundle_uninstalled(ids[10]).unwrap();
    engine.purge_bundle(ids[10]).unwrap();
    let next = engine.install_next_bundle().unwrap();
    assert!(next > ids[49]);
    assert!(matches!(
        engine.install_bundle(ids[10]),
        Err(EngineError::DuplicateBundle(_))
    ));
}

#[test]
fn test_duplicate_install() {
    let engine = Engine::default();
    engine.install_bundle(BundleId::new(7)).unwrap();
    assert!(matches!(
        engine.install_bundle(BundleId::new(7)),
        Err(EngineError::DuplicateBundle(_))
    ));
}

// ===== Correction Flag Tests =====

#[test]
fn test_correction_flag_round_trip() {
    let engine = Engine::default();
    let id = engine.install_next_bundle().unwrap();
    assert!(!engine.is_bundle_stale_reference_corrected(id).unwrap());

    engine.set_bundle_stale_reference_corrected(id, true).unwrap();
    assert!(engine.is_bundle_stale_reference_corrected(id).unwrap());

    engine.set_bundle_stale_reference_corrected(id, false).unwrap();
    assert!(!engine.is_bundle_stale_reference_corrected(id).unwrap());
}

#[test]
fn test_queries_do_not_touch_correction_flag() {
    let s = stale_scenario();
    s.engine.notify_bundle_uninstalled(s.provider).unwrap();

    s.engine.get_references_to_object(s.b).unwrap();
    s.engine.dump_object(s.b).unwrap();
    s.engine.dump_class_loader_bundles();
    s.engine.collect();

    assert!(!s.engine.is_bundle_stale_reference_corrected(s.provider).unwrap());
}

// ===== Handle Tests =====

#[test]
fn test_identify_is_idempotent() {
    let s = stale_scenario();
    let value = Value::reference(s.b);
    assert_eq!(s.engine.identify(value).unwrap(), s.engine.identify(value).unwrap());
    assert!(matches!(
        s.engine.identify(Value::i32(1)),
        Err(EngineError::NotAReference(_))
    ));
}

#[test]
fn test_dead_handle_rejection() {
    let engine = Engine::default();
    let class = engine.define_class(ClassDef::new("Temp").fields(["x"]));
    let obj = engine.new_object(class).unwrap();
    assert_eq!(engine.class_of(obj).unwrap(), class);

    engine.collect();

    assert!(matches!(engine.class_of(obj), Err(EngineError::HandleExpired(h)) if h == obj));
    assert!(matches!(engine.dump_object(obj), Err(EngineError::HandleExpired(_))));
    assert!(matches!(
        engine.get_references_to_object(obj),
        Err(EngineError::HandleExpired(_))
    ));
}

#[test]
fn test_handles_survive_relocation() {
    let engine = Engine::default();
    let class = engine.define_class(ClassDef::new("Node").fields(["id"]));

    let mut kept = Vec::new();
    for i in 0..20 {
        let obj = engine.new_object(class).unwrap();
        engine.set_field(obj, 0, Value::i32(i)).unwrap();
        if i % 3 == 0 {
            engine.add_global_root(obj.into()).unwrap();
            kept.push((obj, i));
        }
    }

    let outcome = engine.collect();
    assert_eq!(outcome.freed, 20 - kept.len());

    for (obj, i) in kept {
        assert_eq!(engine.get_field(obj, 0).unwrap(), Value::i32(i));
    }
}

// ===== Reachability Tests =====

#[test]
fn test_reachability_completeness() {
    let engine = Engine::default();
    let class = engine.define_class(ClassDef::new("Obj").fields(["ref"]));
    let a = engine.new_object(class).unwrap();
    let b = engine.new_object(class).unwrap();
    let c = engine.new_object(class).unwrap();
    engine.set_field(b, 0, a.into()).unwrap();
    engine.add_global_root(b.into()).unwrap();
    engine.add_global_root(c.into()).unwrap();

    let set = engine
        .get_references_to_object(engine.identify(a.into()).unwrap())
        .unwrap();
    assert!(set.contains(engine.identify(b.into()).unwrap()));
    assert!(!set.contains(engine.identify(c.into()).unwrap()));
}

#[test]
fn test_root_only_object_has_empty_referrer_set() {
    let engine = Engine::default();
    let class = engine.define_class(ClassDef::new("Obj"));
    let a = engine.new_object(class).unwrap();
    engine.add_stack_root(a.into()).unwrap();

    assert!(engine.get_references_to_object(a).unwrap().is_empty());
}

#[test]
fn test_referrer_set_reflects_heap_changes() {
    let s = stale_scenario();
    assert!(s.engine.get_references_to_object(s.b).unwrap().contains(s.list));

    s.engine.set_element(s.list, 0, Value::null()).unwrap();
    assert!(s.engine.get_references_to_object(s.b).unwrap().is_empty());
}

/// Time one query for a target held by `holders` objects
fn time_wide_query(holders: usize) -> Duration {
    let mut config = EngineConfig::default();
    config.gc.threshold_objects = holders * 2;
    let engine = Engine::new(config);
    let class = engine.define_class(ClassDef::new("Holder").fields(["target"]));
    let list_class = engine.define_class(ClassDef::array("java.util.ArrayList"));

    let target = engine.new_object(class).unwrap();
    let list = engine.new_array(list_class, holders).unwrap();
    engine.add_global_root(list.into()).unwrap();
    for i in 0..holders {
        let holder = engine.new_object(class).unwrap();
        engine.set_field(holder, 0, target.into()).unwrap();
        engine.set_element(list, i, holder.into()).unwrap();
    }

    let start = Instant::now();
    let set = engine.get_references_to_object(target).unwrap();
    let elapsed = start.elapsed();
    assert_eq!(set.len(), holders);
    assert_eq!(set.edges().len(), holders);
    elapsed
}

#[test]
fn test_wide_query_scales_with_heap_size() {
    let small = (0..3).map(|_| time_wide_query(10_000)).min().unwrap();
    let large = (0..3).map(|_| time_wide_query(80_000)).min().unwrap();

    // 8x the holders; a quadratic scan would be around 64x slower
    let ratio = large.as_secs_f64() / small.as_secs_f64().max(1e-6);
    assert!(ratio < 32.0, "8x holders took {:.1}x longer", ratio);
}

// ===== Uninstall Tests =====

#[test]
fn test_stale_reference_scenario() {
    let s = stale_scenario();

    let report = s.engine.notify_bundle_uninstalled(s.provider).unwrap();
    assert_eq!(s.engine.bundle_state(s.provider).unwrap(), BundleState::Uninstalled);

    // The consumer's list still holds b
    let referrers = s.engine.get_references_to_object(s.b).unwrap();
    assert!(referrers.contains(s.list));
    assert!(!s.engine.is_bundle_stale_reference_corrected(s.provider).unwrap());

    // The sweep found it too
    assert_eq!(report.retained().len(), 1);
    let retained = &report.retained()[0];
    assert_eq!(retained.object, s.b);
    assert_eq!(retained.class, s.b_class);
    assert_eq!(retained.referrers[0].holder, s.list);
    assert!(retained.roots.is_empty());

    // Without correction, collections keep b alive
    s.engine.collect();
    assert!(s.engine.is_live(s.b));

    s.engine
        .set_bundle_stale_reference_corrected(s.provider, true)
        .unwrap();
    assert!(s.engine.is_bundle_stale_reference_corrected(s.provider).unwrap());
}

#[test]
fn test_sweep_report_names_holder_bundle() {
    let s = stale_scenario();

    // The list class has no bundle; a cache owned by Q also holds b
    let holder_class = s.engine.class_of(s.holder).unwrap();
    let direct_class = s
        .engine
        .define_bundle_class(s.consumer, ClassDef::new("ijvm.tests.CImpl.Cache").fields(["b"]))
        .unwrap();
    let cache = s.engine.new_object(direct_class).unwrap();
    s.engine.set_field(cache, 0, s.b.into()).unwrap();
    s.engine.add_static_root(holder_class, cache.into()).unwrap();

    let report = s.engine.notify_bundle_uninstalled(s.provider).unwrap();
    assert_eq!(report.retained()[0].holder_bundles, vec![s.consumer]);
}

#[test]
fn test_uninstall_twice_rejected() {
    let s = stale_scenario();
    s.engine.notify_bundle_uninstalled(s.provider).unwrap();
    assert!(matches!(
        s.engine.notify_bundle_uninstalled(s.provider),
        Err(EngineError::BundleNotActive { state: BundleState::Uninstalled, .. })
    ));
}

#[test]
fn test_uninstalled_bundle_rejects_new_classes() {
    let s = stale_scenario();
    s.engine.notify_bundle_uninstalled(s.provider).unwrap();
    assert!(matches!(
        s.engine.define_bundle_class(s.provider, ClassDef::new("Late")),
        Err(EngineError::BundleNotActive { .. })
    ));
}

#[test]
fn test_clean_uninstall() {
    let engine = Engine::default();
    let p = engine.install_next_bundle().unwrap();
    let class = engine.define_bundle_class(p, ClassDef::new("Short")).unwrap();
    engine.new_object(class).unwrap();

    let report = engine.notify_bundle_uninstalled(p).unwrap();
    assert!(report.is_clean());
    assert!(matches!(report.outcome, SweepOutcome::Completed { .. }));
    assert_eq!(engine.last_sweep_report().unwrap().bundle, p);
}

// ===== Dump Tests =====

#[test]
fn test_dump_before_and_after_uninstall() {
    let s = stale_scenario();

    let before = s.engine.dump_all();
    s.engine.notify_bundle_uninstalled(s.provider).unwrap();
    let after = s.engine.dump_all();

    let old = before.get(s.provider).unwrap();
    let new = after.get(s.provider).unwrap();
    assert_eq!(old.state, BundleState::Active);
    assert_eq!(new.state, BundleState::Uninstalled);
    assert_eq!(old.defined_classes, new.defined_classes);

    let text = s.engine.dump_class_loader_bundles();
    assert!(text.contains(&format!("bundle={} state=uninstalled", s.provider)));
    assert!(text.contains(&format!("stale bundle={} corrected=false", s.provider)));
    assert!(text.contains("ijvm.tests.BImpl"));
}

#[test]
fn test_dump_object() {
    let s = stale_scenario();
    s.engine.set_field(s.b, 0, Value::i32(5)).unwrap();

    let text = s.engine.dump_object(s.b).unwrap();
    assert!(text.contains("ijvm.tests.BImpl"));
    assert!(text.contains(&format!("bundle={} active", s.provider)));
    assert!(text.contains("name = 5"));

    let list = s.engine.dump_object(s.list).unwrap();
    assert!(list.contains("bundle=none"));
    assert!(list.contains(&format!("[0] = [object {}] ijvm.tests.BImpl", s.b)));
}

#[test]
fn test_write_class_loader_bundles() {
    let s = stale_scenario();
    let mut sink = Vec::new();
    s.engine.write_class_loader_bundles(&mut sink).unwrap();

    assert_eq!(String::from_utf8(sink).unwrap(), s.engine.dump_class_loader_bundles());
}

// ===== Unknown Bundle Tests =====

#[test]
fn test_unknown_bundle_guard() {
    let engine = Engine::default();
    let class = engine.define_class(ClassDef::new("Any"));
    let ghost = BundleId::new(12345);

    let unknown = |r: Result<(), EngineError>| matches!(r, Err(EngineError::UnknownBundle(id)) if id == ghost);

    assert!(unknown(engine.associate_bundle_class(ghost, class)));
    assert!(unknown(engine.notify_bundle_uninstalled(ghost).map(|_| ())));
    assert!(unknown(engine.set_bundle_stale_reference_corrected(ghost, true)));
    assert!(unknown(engine.is_bundle_stale_reference_corrected(ghost).map(|_| ())));
    assert!(unknown(engine.update_bundle(ghost).map(|_| ())));
    assert!(unknown(engine.purge_bundle(ghost).map(|_| ())));
    assert!(unknown(engine.bundle_state(ghost).map(|_| ())));
}
