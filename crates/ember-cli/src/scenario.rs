//! Service-tracker scenario
//!
//! Three bundles, each with an activator:
//!
//! - `BImpl` registers a `B` service
//! - `CImpl` tracks `B` services in a list and registers `C`
//! - `DImpl` tracks `C` services in a list and registers `D`
//!
//! The trackers never drop what they collected, so stopping and
//! uninstalling `BImpl` leaves a stale reference in `CImpl`'s list.

use anyhow::{Context, Result};
use ember_engine::{
    BundleId, BundleSnapshot, ClassDef, ClassRef, CollectionOutcome, Engine, GcStats,
    ObjectHandle, RootId, SweepReport,
};
use serde::Serialize;
use tracing::info;

/// Events delivered to service listeners
#[derive(Debug, Clone, Copy)]
pub enum ServiceEvent {
    /// A service was registered
    Registered(ObjectHandle),
    /// A service is about to go away
    Unregistering(ObjectHandle),
}

/// A started bundle: its activator object and the service it provides
struct Activator {
    name: &'static str,
    bundle: BundleId,
    /// Activator instance, held by the framework through a static root
    root: RootId,
    /// Services tracked by this activator (`None` if it tracks nothing)
    tracked: Option<(ClassRef, ObjectHandle)>,
    /// Provided service and its registry root
    service: (ObjectHandle, RootId),
}

impl Activator {
    fn start(
        engine: &Engine,
        name: &'static str,
        service_name: &str,
        tracks: Option<ClassRef>,
        list_class: ClassRef,
    ) -> Result<(Self, ClassRef)> {
        let bundle = engine.install_next_bundle()?;
        let activator_class = engine.define_bundle_class(
            bundle,
            ClassDef::new(format!("ijvm.tests.{}.Activator", name)).fields(["tracked", "service"]),
        )?;
        let service_class = engine.define_bundle_class(bundle, ClassDef::new(service_name))?;

        let activator = engine.new_object(activator_class)?;
        let root = engine.add_static_root(activator_class, activator.into())?;

        let tracked = match tracks {
            Some(class) => {
                let list = engine.new_object(list_class)?;
                engine.set_field(activator, 0, list.into())?;
                Some((class, list))
            }
            None => None,
        };

        let service = engine.new_object(service_class)?;
        engine.set_field(activator, 1, service.into())?;
        let registration = engine.add_global_root(service.into())?;

        info!(bundle = %bundle, "{} exports and provides {}", name, service_name);
        Ok((
            Self {
                name,
                bundle,
                root,
                tracked,
                service: (service, registration),
            },
            service_class,
        ))
    }

    fn service_changed(&self, engine: &Engine, event: ServiceEvent) -> Result<()> {
        let Some((class, list)) = self.tracked else {
            return Ok(());
        };

        match event {
            ServiceEvent::Registered(service) => {
                if engine.class_of(service)? == class {
                    info!("{} got {}", self.name, engine.class(class)?.name);
                    engine.push_element(list, service.into())?;
                }
            }
            ServiceEvent::Unregistering(service) => {
                if engine.class_of(service)? == class {
                    info!(
                        "{} lost {} but keeps a stale reference to it",
                        self.name,
                        engine.class(class)?.name
                    );
                }
            }
        }
        Ok(())
    }

    fn stop(&self, engine: &Engine) -> Result<()> {
        engine.remove_root(self.service.1)?;
        engine.remove_root(self.root)?;
        info!("{} no more provides its service", self.name);
        Ok(())
    }
}

/// Everything the scenario observed
#[derive(Debug, Serialize)]
pub struct ScenarioOutcome {
    /// Uninstalled provider bundle
    pub provider: BundleId,
    /// The provider's service object
    pub service: ObjectHandle,
    /// Sweep report for the provider
    pub report: SweepReport,
    /// Collection run after enabling correction
    pub correction: Option<CollectionOutcome>,
    /// Whether the service object is still alive at the end
    pub service_live: bool,
    /// Bundle table at the end
    pub bundles: BundleSnapshot,
    /// Collector statistics
    pub gc: GcStats,
}

/// Run the scenario on `engine`
pub fn run(engine: &Engine, correct: bool) -> Result<ScenarioOutcome> {
    let list_class = engine.define_class(ClassDef::array("java.util.ArrayList"));

    let (b_impl, b_class) =
        Activator::start(engine, "BImpl", "ijvm.tests.BImpl.BImpl", None, list_class)?;
    let (c_impl, c_class) =
        Activator::start(engine, "CImpl", "ijvm.tests.CImpl.CImpl", Some(b_class), list_class)?;
    let (d_impl, _) =
        Activator::start(engine, "DImpl", "ijvm.tests.DImpl.DImpl", Some(c_class), list_class)?;

    let listeners = [&b_impl, &c_impl, &d_impl];
    for provider in listeners {
        for listener in listeners {
            listener.service_changed(engine, ServiceEvent::Registered(provider.service.0))?;
        }
    }

    // Stop and uninstall BImpl
    let service = b_impl.service.0;
    for listener in listeners {
        listener.service_changed(engine, ServiceEvent::Unregistering(service))?;
    }
    b_impl.stop(engine)?;

    let report = engine
        .notify_bundle_uninstalled(b_impl.bundle)
        .context("uninstalling BImpl")?;
    let referrers = engine.get_references_to_object(service)?;
    info!(referrers = referrers.len(), "references to the B service after uninstall");

    let correction = if correct {
        engine.set_bundle_stale_reference_corrected(b_impl.bundle, true)?;
        Some(engine.force_stale_reference_scanning())
    } else {
        None
    };

    Ok(ScenarioOutcome {
        provider: b_impl.bundle,
        service,
        report,
        correction,
        service_live: engine.is_live(service),
        bundles: engine.dump_all(),
        gc: engine.gc_stats(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_leaks_without_correction() {
        let engine = Engine::default();
        let outcome = run(&engine, false).unwrap();

        assert!(outcome.service_live);
        assert_eq!(outcome.report.retained().len(), 1);
        assert!(outcome.correction.is_none());
        assert!(!engine.is_bundle_stale_reference_corrected(outcome.provider).unwrap());
    }

    #[test]
    fn test_scenario_correction_frees_service() {
        let engine = Engine::default();
        let outcome = run(&engine, true).unwrap();

        assert!(!outcome.service_live);
        assert_eq!(outcome.correction.as_ref().unwrap().stale_reset, 1);
        assert!(outcome.bundles.get(outcome.provider).unwrap().reclaimed);
    }
}
