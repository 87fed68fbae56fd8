//! Status conditions for GatewayClasses, Gateways and route parents.

use std::collections::{BTreeMap, BTreeSet};

use pkg_constants::gateway::{
    CONDITION_ACCEPTED, CONDITION_ACTIVE, CONDITION_RESOLVED_REFS, GATEWAY_API_GROUP,
    REASON_ACCEPTED, REASON_ACTIVE, REASON_BACKEND_NOT_FOUND, REASON_INACTIVE,
    REASON_NO_MATCHING_LISTENER_HOSTNAME, REASON_NO_MATCHING_PARENT, REASON_RESOLVED_REFS,
    REASON_UNACCEPTED,
};
use pkg_types::gateway::{Gateway, GatewayClass};
use pkg_types::meta::is_condition_true;
use pkg_types::route::{ParentReference, RouteBackends, RouteParentStatus};
use pkg_types::secret::Secret;
use pkg_types::{Condition, ConditionStatus, NamespacedName};

use crate::gateway::{GatewayRoute, ValidListener, allowed_listeners, validate_listeners};
use crate::hostname::valid_hostnames;

/// A class is effective when this controller owns it and it carries both
/// `Accepted` and `Active`.
pub fn is_effective_class(class: &GatewayClass, controller_name: &str) -> bool {
    class.spec.controller_name == controller_name
        && is_condition_true(&class.status.conditions, CONDITION_ACCEPTED)
        && is_condition_true(&class.status.conditions, CONDITION_ACTIVE)
}

/// Conditions for every class owned by this controller: the oldest (then
/// lexicographically first) is active, the rest are not.
pub fn gateway_class_conditions(
    classes: &[GatewayClass],
    controller_name: &str,
) -> Vec<(String, Vec<Condition>)> {
    let mut owned: Vec<&GatewayClass> = classes
        .iter()
        .filter(|c| c.spec.controller_name == controller_name)
        .collect();
    owned.sort_by(|a, b| {
        (a.metadata.creation_timestamp, &a.metadata.name)
            .cmp(&(b.metadata.creation_timestamp, &b.metadata.name))
    });

    owned
        .into_iter()
        .enumerate()
        .map(|(i, class)| {
            let generation = class.metadata.generation;
            let accepted = Condition::new(
                CONDITION_ACCEPTED,
                ConditionStatus::True,
                REASON_ACCEPTED,
                format!("GatewayClass is accepted by {}", controller_name),
                generation,
            );
            let active = if i == 0 {
                Condition::new(
                    CONDITION_ACTIVE,
                    ConditionStatus::True,
                    REASON_ACTIVE,
                    "GatewayClass is active",
                    generation,
                )
            } else {
                Condition::new(
                    CONDITION_ACTIVE,
                    ConditionStatus::False,
                    REASON_INACTIVE,
                    "an older GatewayClass of this controller is active",
                    generation,
                )
            };
            (class.metadata.name.clone(), vec![accepted, active])
        })
        .collect()
}

/// The Gateway that wins its namespace: oldest first, ties by name.
pub fn select_active<'a>(gateways: impl IntoIterator<Item = &'a Gateway>) -> Option<&'a Gateway> {
    gateways.into_iter().min_by(|a, b| {
        (a.metadata.creation_timestamp, &a.metadata.name)
            .cmp(&(b.metadata.creation_timestamp, &b.metadata.name))
    })
}

pub fn gateway_accepted_condition(accepted: bool, generation: i64) -> Condition {
    if accepted {
        Condition::new(
            CONDITION_ACCEPTED,
            ConditionStatus::True,
            REASON_ACCEPTED,
            "Gateway is active in its namespace",
            generation,
        )
    } else {
        Condition::new(
            CONDITION_ACCEPTED,
            ConditionStatus::False,
            REASON_UNACCEPTED,
            "another Gateway is active in this namespace",
            generation,
        )
    }
}

/// An accepted Gateway with its validated listeners.
#[derive(Debug, Clone)]
pub struct ActiveGateway {
    pub gateway: Gateway,
    pub listeners: Vec<ValidListener>,
}

impl ActiveGateway {
    pub fn new(gateway: Gateway, secrets: &BTreeMap<NamespacedName, Secret>) -> Self {
        let (listeners, _) = validate_listeners(&gateway, secrets);
        Self { gateway, listeners }
    }
}

/// What route parent status is evaluated against.
pub struct ParentContext<'a> {
    pub controller_name: &'a str,
    /// Active gateway per namespace.
    pub active: &'a BTreeMap<String, ActiveGateway>,
    /// Every Gateway of an effective class, active or not.
    pub managed: &'a BTreeSet<NamespacedName>,
    pub namespace_labels: &'a BTreeMap<String, BTreeMap<String, String>>,
    pub services: &'a BTreeSet<NamespacedName>,
}

fn gateway_key(parent: &ParentReference, route_ns: &str) -> Option<NamespacedName> {
    let is_gateway = parent.group.as_deref().unwrap_or(GATEWAY_API_GROUP) == GATEWAY_API_GROUP
        && parent.kind.as_deref().unwrap_or("Gateway") == "Gateway";
    is_gateway.then(|| {
        NamespacedName::new(
            parent.namespace.as_deref().unwrap_or(route_ns),
            parent.name.clone(),
        )
    })
}

fn accepted_condition<T: GatewayRoute>(
    ctx: &ParentContext<'_>,
    route: &T,
    parent: &ParentReference,
    gateway: &NamespacedName,
) -> Condition {
    let generation = route.meta().generation;
    let rejected = |reason: &str, message: String| {
        Condition::new(CONDITION_ACCEPTED, ConditionStatus::False, reason, message, generation)
    };

    let Some(active) = ctx
        .active
        .get(&gateway.namespace)
        .filter(|a| a.gateway.metadata.name == gateway.name)
    else {
        return rejected(
            REASON_NO_MATCHING_PARENT,
            format!("Gateway {} is not active", gateway),
        );
    };

    let route_ns = &route.meta().namespace;
    let listeners = match allowed_listeners(
        parent,
        T::KIND,
        route_ns,
        &gateway.namespace,
        &active.listeners,
        ctx.namespace_labels,
    ) {
        Ok(listeners) => listeners,
        Err(reason) => {
            return rejected(
                reason,
                format!("no listener of Gateway {} accepts this route", gateway),
            );
        }
    };

    if T::KIND.has_hostnames()
        && listeners.iter().all(|&i| {
            valid_hostnames(active.listeners[i].hostname(), route.hostnames()).is_empty()
        })
    {
        return rejected(
            REASON_NO_MATCHING_LISTENER_HOSTNAME,
            "no route hostname intersects a listener hostname".to_string(),
        );
    }

    Condition::new(
        CONDITION_ACCEPTED,
        ConditionStatus::True,
        REASON_ACCEPTED,
        "route is accepted",
        generation,
    )
}

fn resolved_refs_condition<T: GatewayRoute + RouteBackends>(
    ctx: &ParentContext<'_>,
    route: &T,
) -> Condition {
    let route_ns = &route.meta().namespace;
    let missing: Vec<String> = route
        .backend_objects()
        .into_iter()
        .filter(|b| {
            !b.is_service()
                || !ctx
                    .services
                    .contains(&NamespacedName::new(b.namespace_or(route_ns), b.name.clone()))
        })
        .map(|b| format!("{}/{}", b.namespace_or(route_ns), b.name))
        .collect();
    let generation = route.meta().generation;
    if missing.is_empty() {
        Condition::new(
            CONDITION_RESOLVED_REFS,
            ConditionStatus::True,
            REASON_RESOLVED_REFS,
            "all backend references resolved",
            generation,
        )
    } else {
        Condition::new(
            CONDITION_RESOLVED_REFS,
            ConditionStatus::False,
            REASON_BACKEND_NOT_FOUND,
            format!("backends not found: {}", missing.join(", ")),
            generation,
        )
    }
}

/// Parent status of `route` for every parentRef naming a Gateway this
/// controller manages. Other parents are left to their own controllers.
pub fn route_parent_statuses<T: GatewayRoute + RouteBackends>(
    ctx: &ParentContext<'_>,
    route: &T,
) -> Vec<RouteParentStatus> {
    let route_ns = &route.meta().namespace;
    let mut statuses = Vec::new();
    for parent in route.parent_refs() {
        let Some(gateway) = gateway_key(parent, route_ns) else {
            continue;
        };
        if !ctx.managed.contains(&gateway) {
            continue;
        }
        statuses.push(RouteParentStatus {
            parent_ref: parent.clone(),
            controller_name: ctx.controller_name.to_string(),
            conditions: vec![
                accepted_condition(ctx, route, parent, &gateway),
                resolved_refs_condition(ctx, route),
            ],
        });
    }
    statuses
}
