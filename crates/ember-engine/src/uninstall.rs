//! Uninstall coordination
//!
//! `Active -> Uninstalling -> Uninstalled`. Between the two transitions the
//! coordinator may run an advisory reachability sweep over the bundle's
//! classes. The sweep only produces a [`SweepReport`]; it never blocks the
//! transition and never touches the correction flag.

use crate::bundle::{BundleId, BundleRegistry, ClassOwnerIndex};
use crate::class_registry::ClassRegistry;
use crate::config::UninstallConfig;
use crate::gc::{Heap, RootId, RootSet};
use crate::identity::ObjectHandle;
use crate::object::ClassRef;
use crate::reach::{roots_holding, ReachabilityScan, Referrer};
use crate::EngineResult;
use rustc_hash::FxHashSet;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// A reachable instance of an uninstalled bundle's class
#[derive(Debug, Clone, Serialize)]
pub struct RetainedInstance {
    /// The retained object
    pub object: ObjectHandle,
    /// Its class
    pub class: ClassRef,
    /// Class name
    pub class_name: String,
    /// Heap edges landing on the object
    pub referrers: Vec<Referrer>,
    /// Roots holding the object directly
    pub roots: Vec<RootId>,
    /// Bundles owning the holders' classes, ascending
    pub holder_bundles: Vec<BundleId>,
}

/// What the advisory sweep did
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum SweepOutcome {
    /// Every reachable instance of the bundle's classes
    Completed {
        /// Retained instances in discovery order
        retained: Vec<RetainedInstance>,
    },
    /// Heap too large for the configured limit
    Skipped {
        /// Live objects at uninstall time
        live_objects: usize,
        /// `uninstall.max_sweep_objects`
        limit: usize,
    },
    /// Sweeping is turned off
    Disabled,
}

/// Diagnostic report produced by an uninstall
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    /// Uninstalled bundle
    pub bundle: BundleId,
    /// Its defined classes
    pub classes: Vec<ClassRef>,
    /// Correction flag at uninstall time
    pub corrected: bool,
    /// Sweep result
    pub outcome: SweepOutcome,
}

impl SweepReport {
    /// Retained instances; empty unless the sweep completed
    pub fn retained(&self) -> &[RetainedInstance] {
        match &self.outcome {
            SweepOutcome::Completed { retained } => retained,
            _ => &[],
        }
    }

    /// Whether the sweep ran and found nothing
    pub fn is_clean(&self) -> bool {
        matches!(&self.outcome, SweepOutcome::Completed { retained } if retained.is_empty())
    }
}

/// Drives the uninstall state machine
#[derive(Debug, Clone)]
pub struct UninstallCoordinator {
    config: UninstallConfig,
}

impl UninstallCoordinator {
    /// Create a coordinator
    pub fn new(config: UninstallConfig) -> Self {
        Self { config }
    }

    /// Whether a collection should follow each uninstall
    pub fn collect_after_uninstall(&self) -> bool {
        self.config.collect
    }

    /// `Active -> Uninstalling`; returns the bundle's classes
    pub fn begin(&self, bundles: &mut BundleRegistry, bundle: BundleId) -> EngineResult<Vec<ClassRef>> {
        bundles.mark_uninstalled(bundle)
    }

    /// `Uninstalling -> Uninstalled`
    pub fn finish(&self, bundles: &mut BundleRegistry, bundle: BundleId) -> EngineResult<()> {
        bundles.finish_uninstall(bundle)
    }

    /// Run the advisory sweep for `classes`
    #[allow(clippy::too_many_arguments)]
    pub fn sweep(
        &self,
        bundle: BundleId,
        classes: Vec<ClassRef>,
        corrected: bool,
        heap: &Heap,
        roots: &RootSet,
        owners: &ClassOwnerIndex,
        registry: &ClassRegistry,
    ) -> SweepReport {
        let outcome = if !self.config.sweep {
            SweepOutcome::Disabled
        } else if self.config.max_sweep_objects != 0 && heap.len() > self.config.max_sweep_objects {
            warn!(
                %bundle,
                live_objects = heap.len(),
                limit = self.config.max_sweep_objects,
                "uninstall sweep skipped"
            );
            SweepOutcome::Skipped {
                live_objects: heap.len(),
                limit: self.config.max_sweep_objects,
            }
        } else {
            SweepOutcome::Completed {
                retained: retained_instances(&classes, heap, roots, owners, registry),
            }
        };

        let report = SweepReport {
            bundle,
            classes,
            corrected,
            outcome,
        };

        if !report.retained().is_empty() {
            info!(
                %bundle,
                retained = report.retained().len(),
                corrected,
                "uninstalled bundle still has reachable instances"
            );
        } else {
            debug!(%bundle, "uninstall sweep done");
        }
        report
    }
}

fn retained_instances(
    classes: &[ClassRef],
    heap: &Heap,
    roots: &RootSet,
    owners: &ClassOwnerIndex,
    registry: &ClassRegistry,
) -> Vec<RetainedInstance> {
    let wanted: FxHashSet<ClassRef> = classes.iter().copied().collect();
    let scan = ReachabilityScan::run(heap, roots);

    let targets: Vec<ObjectHandle> = scan
        .objects()
        .iter()
        .copied()
        .filter(|h| {
            heap.identity()
                .class_of(*h)
                .map(|c| wanted.contains(&c))
                .unwrap_or(false)
        })
        .collect();
    let mut referrers = scan.referrers_of_all(heap, &targets);

    targets
        .into_iter()
        .filter_map(|object| {
            let class = heap.identity().class_of(object).ok()?;
            let edges = referrers
                .remove(&object)
                .map(|set| set.edges().to_vec())
                .unwrap_or_default();
            let holder_bundles: BTreeSet<BundleId> = edges
                .iter()
                .filter_map(|r| heap.identity().class_of(r.holder).ok())
                .filter_map(|c| owners.owner(c))
                .collect();

            Some(RetainedInstance {
                object,
                class,
                class_name: registry.name_of(class).to_string(),
                referrers: edges,
                roots: roots_holding(roots, object),
                holder_bundles: holder_bundles.into_iter().collect(),
            })
        })
        .collect()
}
