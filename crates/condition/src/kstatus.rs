//! Generic readiness for arbitrary object shapes.
//!
//! Built-in kinds with well-known status fields get dedicated rules; anything
//! else is judged by the conventional `Ready`, `Reconciling` and `Stalled`
//! conditions. An object that offers no evidence of being unready is
//! considered current.

use serde_json::Value;

use kawait_core::{ResourceSnapshot, Status, StatusComputer, StatusResult};

use crate::stale_generation;

#[derive(Debug, Clone, Copy, Default)]
pub struct KStatus;

impl StatusComputer for KStatus {
    fn compute(&self, obj: &ResourceSnapshot) -> StatusResult { compute(obj) }
}

pub fn compute(obj: &ResourceSnapshot) -> StatusResult {
    if obj.deletion_timestamp().is_some() {
        return StatusResult::new(Status::Terminating, "Resource scheduled for deletion");
    }
    if let Some(msg) = stale_generation(obj, obj.get_i64(&["status", "observedGeneration"])) {
        return StatusResult::new(Status::InProgress, msg);
    }

    let gvk = obj.gvk();
    match (gvk.group.as_str(), gvk.kind.as_str()) {
        ("", "PersistentVolumeClaim") => pvc(obj),
        ("", "Pod") => pod(obj),
        ("apiextensions.k8s.io", "CustomResourceDefinition") => crd(obj),
        ("apps", "Deployment") => deployment(obj),
        ("batch", "Job") => job(obj),
        _ => generic(obj),
    }
}

fn conditions(obj: &ResourceSnapshot) -> &[Value] {
    obj.get(&["status", "conditions"]).and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[])
}

/// Status and message of condition `kind`, matched exactly.
fn condition<'a>(obj: &'a ResourceSnapshot, kind: &str) -> Option<(&'a str, &'a str)> {
    conditions(obj).iter().find(|c| c.get("type").and_then(Value::as_str) == Some(kind)).map(|c| {
        let status = c.get("status").and_then(Value::as_str).unwrap_or("");
        let message = c.get("message").and_then(Value::as_str).unwrap_or("");
        (status, message)
    })
}

fn is_true(obj: &ResourceSnapshot, kind: &str) -> bool { condition(obj, kind).is_some_and(|(s, _)| s == "True") }

fn current(msg: impl Into<String>) -> StatusResult { StatusResult::new(Status::Current, msg) }

fn in_progress(msg: impl Into<String>) -> StatusResult { StatusResult::new(Status::InProgress, msg) }

fn failed(msg: impl Into<String>) -> StatusResult { StatusResult::new(Status::Failed, msg) }

fn pvc(obj: &ResourceSnapshot) -> StatusResult {
    match obj.get_str(&["status", "phase"]) {
        Some("Bound") => current("PVC is Bound"),
        phase => in_progress(format!("PVC is not Bound. phase: {}", phase.unwrap_or(""))),
    }
}

fn pod(obj: &ResourceSnapshot) -> StatusResult {
    match obj.get_str(&["status", "phase"]) {
        Some("Succeeded") => current("Pod has completed successfully"),
        Some("Failed") => failed("Pod has completed, but not successfully"),
        Some("Running") if is_true(obj, "Ready") => current("Pod is Ready"),
        Some(phase) => in_progress(format!("Pod phase is {}", phase)),
        None => in_progress("Pod phase not available"),
    }
}

fn crd(obj: &ResourceSnapshot) -> StatusResult {
    if is_true(obj, "Established") {
        return current("CRD is established");
    }
    match condition(obj, "NamesAccepted") {
        Some(("False", msg)) => failed(format!("CRD names have not been accepted: {}", msg)),
        _ => in_progress("Install in progress"),
    }
}

fn deployment(obj: &ResourceSnapshot) -> StatusResult {
    if let Some(("False", _)) = condition(obj, "Progressing") {
        let reason = conditions(obj)
            .iter()
            .find(|c| c.get("type").and_then(Value::as_str) == Some("Progressing"))
            .and_then(|c| c.get("reason").and_then(Value::as_str));
        if reason == Some("ProgressDeadlineExceeded") {
            return failed("Progress deadline exceeded");
        }
    }
    let want = obj.get_i64(&["spec", "replicas"]).unwrap_or(1);
    let field = |name: &str| obj.get_i64(&["status", name]).unwrap_or(0);
    let (updated, ready, available, total) =
        (field("updatedReplicas"), field("readyReplicas"), field("availableReplicas"), field("replicas"));
    if updated < want {
        return in_progress(format!("Updated: {}/{}", updated, want));
    }
    if total > updated {
        return in_progress(format!("Pending termination: {}", total - updated));
    }
    if available < want {
        return in_progress(format!("Available: {}/{}", available, want));
    }
    if ready < want {
        return in_progress(format!("Ready: {}/{}", ready, want));
    }
    current(format!("Deployment is available. Replicas: {}", total))
}

fn job(obj: &ResourceSnapshot) -> StatusResult {
    if is_true(obj, "Complete") {
        return current("Job Completed");
    }
    if is_true(obj, "Failed") {
        return failed("Job Failed");
    }
    in_progress("Job in progress")
}

fn generic(obj: &ResourceSnapshot) -> StatusResult {
    if let Some(("True", msg)) = condition(obj, "Stalled") {
        return failed(msg);
    }
    if let Some(("True", msg)) = condition(obj, "Reconciling") {
        return in_progress(msg);
    }
    match condition(obj, "Ready") {
        Some(("False", msg)) | Some(("Unknown", msg)) => {
            let msg = if msg.is_empty() { "Resource not Ready" } else { msg };
            in_progress(msg)
        }
        _ => current(""),
    }
}
