//! `ember scenario`: run the service-tracker scenario and report what an
//! uninstall leaves behind.

use crate::output::{self, StyledOutput};
use crate::scenario::{self, ScenarioOutcome};
use ember_engine::{Engine, EngineConfig, RetainedInstance, SweepOutcome};

/// Arguments for the scenario command.
pub struct ScenarioArgs {
    pub config: EngineConfig,
    pub correct: bool,
    pub json: bool,
    pub color: String,
}

pub fn execute(args: ScenarioArgs) -> anyhow::Result<()> {
    let engine = Engine::new(args.config);
    let outcome = scenario::run(&engine, args.correct)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    let mut out = StyledOutput::new(output::resolve_color_choice(Some(&args.color)));
    print_outcome(&mut out, &engine, &outcome)?;
    Ok(())
}

fn print_outcome(
    out: &mut StyledOutput,
    engine: &Engine,
    outcome: &ScenarioOutcome,
) -> anyhow::Result<()> {
    out.bold(&format!("Uninstalled bundle {}", outcome.provider));
    out.newline();

    match &outcome.report.outcome {
        SweepOutcome::Completed { retained } if retained.is_empty() => {
            out.success("  no stale references");
            out.newline();
        }
        SweepOutcome::Completed { retained } => {
            out.warning(&format!("  {} stale instance(s) retained", retained.len()));
            out.newline();
            for instance in retained {
                print_instance(out, engine, instance)?;
            }
        }
        SweepOutcome::Skipped {
            live_objects,
            limit,
        } => {
            out.warning(&format!(
                "  sweep skipped: {} live objects, limit {}",
                live_objects, limit
            ));
            out.newline();
        }
        SweepOutcome::Disabled => {
            out.info("  sweep disabled");
            out.newline();
        }
    }

    if let Some(correction) = &outcome.correction {
        out.newline();
        out.bold("Correction");
        out.newline();
        out.plain(&format!(
            "  reset {} reference(s), freed {} object(s)",
            correction.stale_reset, correction.freed
        ));
        out.newline();
    }

    out.newline();
    if outcome.service_live {
        out.warning(&format!("service {} is still alive", outcome.service));
    } else {
        out.success(&format!("service {} was reclaimed", outcome.service));
    }
    out.newline();

    out.newline();
    out.bold("Bundles");
    out.newline();
    out.plain(&engine.dump_class_loader_bundles());
    out.flush();
    Ok(())
}

fn print_instance(
    out: &mut StyledOutput,
    engine: &Engine,
    instance: &RetainedInstance,
) -> anyhow::Result<()> {
    for line in engine.dump_object(instance.object)?.lines() {
        out.plain(&format!("    {}", line));
        out.newline();
    }
    for referrer in &instance.referrers {
        let holder = engine.dump_object(referrer.holder)?;
        let header = holder.lines().next().unwrap_or_default();
        out.info(&format!("      <- {} {}", referrer.slot, header));
        out.newline();
    }
    for root in &instance.roots {
        out.info(&format!("      <- {}", root));
        out.newline();
    }
    Ok(())
}
