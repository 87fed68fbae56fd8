//! Batched status writes.
//!
//! Syncs enqueue the status they computed per object; `flush` writes each
//! object at most once and skips writes that would not change anything.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use pkg_types::meta::set_condition;
use pkg_types::route::{RouteParentStatus, RouteStatus};
use pkg_types::{Condition, Kind, NamespacedName, Object};
use tracing::{debug, warn};

/// New status for one object.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusPatch {
    /// Conditions of a GatewayClass or Gateway.
    Conditions(Vec<Condition>),
    /// Parent statuses a route gets from one controller.
    Parents {
        controller_name: String,
        parents: Vec<RouteParentStatus>,
    },
}

fn same_conditions(a: &[Condition], b: &[Condition]) -> bool {
    a.len() == b.len()
        && a.iter().all(|c| {
            b.iter()
                .any(|o| o.same_state(c) && o.message == c.message)
        })
}

fn same_parents(a: &[RouteParentStatus], b: &[RouteParentStatus]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(x, y)| {
            x.parent_ref == y.parent_ref
                && x.controller_name == y.controller_name
                && same_conditions(&x.conditions, &y.conditions)
        })
}

fn merge_conditions(existing: &mut Vec<Condition>, conditions: &[Condition]) -> bool {
    let mut changed = false;
    for condition in conditions {
        changed |= set_condition(existing, condition.clone());
    }
    changed
}

fn merge_parents(
    status: &mut RouteStatus,
    controller_name: &str,
    parents: &[RouteParentStatus],
) -> bool {
    let before = status.parents.clone();
    let mut merged: Vec<RouteParentStatus> = status
        .parents
        .iter()
        .filter(|p| p.controller_name != controller_name)
        .cloned()
        .collect();
    for parent in parents {
        let mut conditions = before
            .iter()
            .find(|p| p.controller_name == controller_name && p.parent_ref == parent.parent_ref)
            .map(|p| p.conditions.clone())
            .unwrap_or_default();
        merge_conditions(&mut conditions, &parent.conditions);
        merged.push(RouteParentStatus {
            parent_ref: parent.parent_ref.clone(),
            controller_name: controller_name.to_string(),
            conditions,
        });
    }
    status.parents = merged;
    status.parents != before
}

/// Whether every wanted condition is already present.
pub fn conditions_current(existing: &[Condition], wanted: &[Condition]) -> bool {
    wanted.iter().all(|w| contains(existing, w))
}

/// Whether the parents `controller_name` wrote on a route equal `wanted`.
pub fn parents_current(
    status: &RouteStatus,
    controller_name: &str,
    wanted: &[RouteParentStatus],
) -> bool {
    let ours: Vec<RouteParentStatus> = status
        .parents
        .iter()
        .filter(|p| p.controller_name == controller_name)
        .cloned()
        .collect();
    same_parents(&ours, wanted)
}

impl StatusPatch {
    /// Whether `object` already carries this status.
    pub fn is_current(&self, object: &Object) -> bool {
        match (self, object) {
            (StatusPatch::Conditions(c), Object::GatewayClass(o)) => {
                conditions_current(&o.status.conditions, c)
            }
            (StatusPatch::Conditions(c), Object::Gateway(o)) => {
                conditions_current(&o.status.conditions, c)
            }
            (StatusPatch::Parents { controller_name, parents }, obj) => {
                route_status(obj)
                    .is_some_and(|status| parents_current(status, controller_name, parents))
            }
            _ => false,
        }
    }

    /// Merge into the object's status, keeping transition times of
    /// conditions whose status did not flip. Returns true on change.
    pub fn apply_to(&self, object: &mut Object) -> bool {
        match (self, object) {
            (StatusPatch::Conditions(c), Object::GatewayClass(o)) => {
                merge_conditions(&mut o.status.conditions, c)
            }
            (StatusPatch::Conditions(c), Object::Gateway(o)) => {
                merge_conditions(&mut o.status.conditions, c)
            }
            (StatusPatch::Parents { controller_name, parents }, obj) => match route_status_mut(obj) {
                Some(status) => merge_parents(status, controller_name, parents),
                None => false,
            },
            _ => false,
        }
    }

    fn same_state(&self, other: &StatusPatch) -> bool {
        match (self, other) {
            (StatusPatch::Conditions(a), StatusPatch::Conditions(b)) => same_conditions(a, b),
            (
                StatusPatch::Parents {
                    controller_name: ca,
                    parents: a,
                },
                StatusPatch::Parents {
                    controller_name: cb,
                    parents: b,
                },
            ) => ca == cb && same_parents(a, b),
            _ => false,
        }
    }
}

fn contains(conditions: &[Condition], wanted: &Condition) -> bool {
    conditions
        .iter()
        .any(|c| c.same_state(wanted) && c.message == wanted.message)
}

fn route_status(object: &Object) -> Option<&RouteStatus> {
    match object {
        Object::HTTPRoute(r) => Some(&r.status),
        Object::GRPCRoute(r) => Some(&r.status),
        Object::TLSRoute(r) => Some(&r.status),
        Object::TCPRoute(r) => Some(&r.status),
        _ => None,
    }
}

fn route_status_mut(object: &mut Object) -> Option<&mut RouteStatus> {
    match object {
        Object::HTTPRoute(r) => Some(&mut r.status),
        Object::GRPCRoute(r) => Some(&mut r.status),
        Object::TLSRoute(r) => Some(&mut r.status),
        Object::TCPRoute(r) => Some(&mut r.status),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub kind: Kind,
    pub key: NamespacedName,
    pub patch: StatusPatch,
}

impl StatusUpdate {
    pub fn reference(&self) -> String {
        format!("{}/{}", self.kind, self.key)
    }
}

/// Where status writes go: the API server, or the in-memory source.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn write_status(&self, update: &StatusUpdate) -> anyhow::Result<()>;
}

type ObjectKey = (Kind, NamespacedName);

#[derive(Default)]
pub struct StatusWriter {
    pending: Mutex<BTreeMap<ObjectKey, StatusPatch>>,
    written: Mutex<BTreeMap<ObjectKey, StatusPatch>>,
}

impl StatusWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a status. A later update for the same object replaces it.
    pub fn enqueue(&self, update: StatusUpdate) {
        self.pending
            .lock()
            .insert((update.kind, update.key), update.patch);
    }

    /// Drop what is queued or remembered for a deleted object, so a
    /// re-created one under the same name is written afresh.
    pub fn forget(&self, kind: Kind, key: &NamespacedName) {
        let object = (kind, key.clone());
        self.pending.lock().remove(&object);
        self.written.lock().remove(&object);
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Write everything queued. Failed writes are logged and dropped; the
    /// next sync recomputes them. Returns the number of writes issued.
    pub async fn flush(&self, sink: &dyn StatusSink) -> usize {
        let pending = std::mem::take(&mut *self.pending.lock());
        let mut writes = 0;
        for ((kind, key), patch) in pending {
            let unchanged = self
                .written
                .lock()
                .get(&(kind, key.clone()))
                .is_some_and(|last| last.same_state(&patch));
            if unchanged {
                continue;
            }
            let update = StatusUpdate { kind, key, patch };
            writes += 1;
            match sink.write_status(&update).await {
                Ok(()) => {
                    debug!("Updated status of {}", update.reference());
                    self.written
                        .lock()
                        .insert((update.kind, update.key), update.patch);
                }
                Err(e) => warn!("Failed to update status of {}: {}", update.reference(), e),
            }
        }
        writes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_types::gateway::{Gateway, GatewaySpec};
    use pkg_types::route::{HTTPRoute, ParentReference};
    use pkg_types::{ConditionStatus, ObjectMeta};

    #[derive(Default)]
    struct RecordingSink {
        updates: Mutex<Vec<StatusUpdate>>,
    }

    #[async_trait]
    impl StatusSink for RecordingSink {
        async fn write_status(&self, update: &StatusUpdate) -> anyhow::Result<()> {
            self.updates.lock().push(update.clone());
            Ok(())
        }
    }

    fn make_accepted(status: ConditionStatus) -> StatusUpdate {
        StatusUpdate {
            kind: Kind::Gateway,
            key: NamespacedName::new("ns1", "gw"),
            patch: StatusPatch::Conditions(vec![Condition::new(
                "Accepted",
                status,
                "Accepted",
                "",
                1,
            )]),
        }
    }

    #[tokio::test]
    async fn one_write_per_object_and_no_duplicates() {
        let writer = StatusWriter::new();
        let sink = RecordingSink::default();

        writer.enqueue(make_accepted(ConditionStatus::False));
        writer.enqueue(make_accepted(ConditionStatus::True));
        assert_eq!(writer.pending(), 1);
        assert_eq!(writer.flush(&sink).await, 1);

        writer.enqueue(make_accepted(ConditionStatus::True));
        assert_eq!(writer.flush(&sink).await, 0);

        let updates = sink.updates.lock();
        assert_eq!(updates.len(), 1);
        let StatusPatch::Conditions(conditions) = &updates[0].patch else {
            panic!("expected conditions");
        };
        assert_eq!(conditions[0].status, ConditionStatus::True);
    }

    #[tokio::test]
    async fn forgotten_objects_are_written_again() {
        let writer = StatusWriter::new();
        let sink = RecordingSink::default();

        writer.enqueue(make_accepted(ConditionStatus::True));
        assert_eq!(writer.flush(&sink).await, 1);

        writer.forget(Kind::Gateway, &NamespacedName::new("ns1", "gw"));
        writer.enqueue(make_accepted(ConditionStatus::True));
        assert_eq!(writer.flush(&sink).await, 1);
        assert_eq!(sink.updates.lock().len(), 2);
    }

    #[test]
    fn patch_merges_into_objects() {
        let mut gateway = Object::Gateway(Gateway {
            metadata: ObjectMeta {
                name: "gw".to_string(),
                namespace: "ns1".to_string(),
                ..Default::default()
            },
            spec: GatewaySpec::default(),
            status: Default::default(),
        });
        let patch = make_accepted(ConditionStatus::True).patch;
        assert!(!patch.is_current(&gateway));
        assert!(patch.apply_to(&mut gateway));
        assert!(patch.is_current(&gateway));
        assert!(!patch.apply_to(&mut gateway));
    }

    #[test]
    fn route_parents_of_other_controllers_are_kept() {
        let foreign = RouteParentStatus {
            parent_ref: ParentReference {
                name: "other-gw".to_string(),
                ..Default::default()
            },
            controller_name: "example.com/other".to_string(),
            conditions: Vec::new(),
        };
        let mut route = HTTPRoute::default();
        route.status.parents.push(foreign.clone());
        let mut object = Object::HTTPRoute(route);

        let ours = RouteParentStatus {
            parent_ref: ParentReference {
                name: "gw".to_string(),
                ..Default::default()
            },
            controller_name: "fleetgate.io/gateway-controller".to_string(),
            conditions: vec![Condition::new("Accepted", ConditionStatus::True, "Accepted", "", 0)],
        };
        let patch = StatusPatch::Parents {
            controller_name: "fleetgate.io/gateway-controller".to_string(),
            parents: vec![ours],
        };
        assert!(patch.apply_to(&mut object));
        assert!(patch.is_current(&object));

        let Object::HTTPRoute(route) = object else {
            panic!("expected an HTTPRoute");
        };
        assert_eq!(route.status.parents.len(), 2);
        assert_eq!(route.status.parents[0], foreign);
    }
}
