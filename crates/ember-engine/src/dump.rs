//! Diagnostic dumps
//!
//! Output is meant for people, not parsers. The format is stable within a
//! release but may change between releases.

use crate::bundle::{BundleRegistry, BundleSnapshot};
use crate::class_registry::ClassRegistry;
use crate::gc::Heap;
use crate::identity::ObjectHandle;
use crate::object::HeapObject;
use crate::value::Value;
use crate::EngineResult;
use std::fmt::Write;

/// Render one object: header line, then one line per slot
///
/// ```text
/// object #3:0 ijvm.tests.BImpl (class#2) bundle=1 uninstalled
///   name = 5
///   next = [object #4:0] ijvm.tests.Node
/// ```
pub fn render_object(
    handle: ObjectHandle,
    heap: &Heap,
    classes: &ClassRegistry,
    bundles: &BundleRegistry,
) -> EngineResult<String> {
    let object = heap.get(handle)?;
    let class_ref = object.class();
    let mut out = String::new();

    let _ = write!(out, "object {} {} ({})", handle, classes.name_of(class_ref), class_ref);
    match bundles.class_owner(class_ref) {
        Some(owner) => {
            let state = bundles.state(owner)?;
            let _ = write!(out, " bundle={} {}", owner, state);
        }
        None => out.push_str(" bundle=none"),
    }
    out.push('\n');

    match object {
        HeapObject::Object(obj) => {
            let class = classes.get(class_ref);
            for (i, value) in obj.fields.iter().enumerate() {
                let name = class.and_then(|c| c.field_name(i)).unwrap_or("?");
                let _ = writeln!(out, "  {} = {}", name, render_value(*value, heap, classes));
            }
        }
        HeapObject::Array(arr) => {
            let _ = writeln!(out, "  length = {}", arr.len());
            for (i, value) in arr.elements.iter().enumerate() {
                let _ = writeln!(out, "  [{}] = {}", i, render_value(*value, heap, classes));
            }
        }
    }

    Ok(out)
}

fn render_value(value: Value, heap: &Heap, classes: &ClassRegistry) -> String {
    match value.as_handle() {
        Some(handle) => match heap.identity().class_of(handle) {
            Ok(class) => format!("{} {}", value, classes.name_of(class)),
            Err(_) => format!("{} <expired>", value),
        },
        None => value.to_string(),
    }
}

/// Render every bundle record, then the stale bundles
///
/// ```text
/// bundle=1 state=uninstalled corrected=false classes=1
///   class#2 ijvm.tests.BImpl
/// stale bundle=1 corrected=false
/// ```
pub fn render_bundles(snapshot: &BundleSnapshot, classes: &ClassRegistry) -> String {
    let mut out = String::new();

    for record in snapshot {
        let _ = write!(
            out,
            "bundle={} state={} corrected={} classes={}",
            record.id,
            record.state,
            record.stale_reference_corrected,
            record.defined_classes.len()
        );
        if let Some(previous) = record.previous {
            let _ = write!(out, " previous={}", previous);
        }
        if record.reclaimed {
            out.push_str(" reclaimed");
        }
        out.push('\n');

        for class in &record.defined_classes {
            let _ = writeln!(out, "  {} {}", class, classes.name_of(*class));
        }
    }

    for record in snapshot.iter().filter(|r| r.is_stale()) {
        let _ = writeln!(
            out,
            "stale bundle={} corrected={}",
            record.id, record.stale_reference_corrected
        );
    }

    out
}
