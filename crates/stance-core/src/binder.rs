use std::fmt;

use contracts::{Domain, EntityId, ProbeTier, StanceConfig};
use tracing::{debug, info};

use crate::binding::{AdapterBinding, FlagAccessor, Hook, Resolution, ScalarAccessor, StanceHooks};
use crate::diagnostics::{ComponentInventory, DiagnosticReport, RootInventory};
use crate::graph::{ComponentHandle, MemberInfo, NodeId, ObjectGraph};
use crate::probe::{
    default_probes, first_named, is_driver_field, locate_value, plausible_value, CapabilityProbe,
    ACTIVE_FLAG_CANDIDATES, CORRUPTED_FLAG_CANDIDATES, ENTER_HOOKS, EXIT_HOOKS,
    MAX_THRESHOLD_CANDIDATES, MIN_THRESHOLD_CANDIDATES, REQUEST_HOOKS, SET_ACTIVE_HOOKS,
    TRY_ENTER_HOOKS, TRY_EXIT_HOOKS,
};

/// Finds the component implementing stance behavior under an entity's roots.
pub struct CapabilityBinder {
    probes: Vec<Box<dyn CapabilityProbe>>,
}

impl fmt::Debug for CapabilityBinder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityBinder")
            .field(
                "probes",
                &self.probes.iter().map(|probe| probe.tier()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl CapabilityBinder {
    pub fn new(config: &StanceConfig) -> Self {
        Self::with_probes(default_probes(&config.controller_type_name))
    }

    /// Probes are tried in the given order; the first one with a bindable
    /// candidate wins.
    pub fn with_probes(probes: Vec<Box<dyn CapabilityProbe>>) -> Self {
        Self { probes }
    }

    pub fn resolve(&self, graph: &ObjectGraph, roots: &[NodeId]) -> Resolution {
        let candidates = graph.components_under(roots);
        for probe in &self.probes {
            for handle in &candidates {
                let Some(component) = graph.component(*handle) else {
                    continue;
                };
                if !probe.matches(component) {
                    continue;
                }
                match build_binding(graph, *handle, probe.tier()) {
                    Some(binding) => {
                        info!(
                            tier = %binding.tier,
                            target = %binding.target_type,
                            path = %binding.target_path,
                            value = %binding.value.member(),
                            domain = ?binding.domain,
                            drivers = binding.driver_fields.len(),
                            hooks = binding.hooks.available(),
                            "bound stance controller"
                        );
                        return Resolution::Bound(binding);
                    }
                    None => debug!(
                        tier = %probe.tier(),
                        target = %component.type_name(),
                        "candidate exposes no usable value member"
                    ),
                }
            }
        }
        Resolution::Unresolved {
            scanned: candidates.len(),
        }
    }

    /// Lists every component under each root with the probes it satisfies.
    pub fn inventory(
        &self,
        entity: EntityId,
        graph: &ObjectGraph,
        roots: &[NodeId],
    ) -> DiagnosticReport {
        let roots = roots
            .iter()
            .map(|root| RootInventory {
                path: graph.path_of(*root),
                components: graph
                    .components_under(&[*root])
                    .into_iter()
                    .filter_map(|handle| {
                        let component = graph.component(handle)?;
                        let matched = self
                            .probes
                            .iter()
                            .filter(|probe| probe.matches(component))
                            .map(|probe| match probe.tier() {
                                ProbeTier::ValueHeuristic => match plausible_value(component) {
                                    Some((accessor, _)) => {
                                        format!("{} via {}", probe.label(), accessor.member())
                                    }
                                    None => probe.label(),
                                },
                                _ => probe.label(),
                            })
                            .collect();
                        Some(ComponentInventory {
                            path: graph.path_of(handle.node),
                            type_name: component.type_name().to_string(),
                            matched,
                        })
                    })
                    .collect(),
            })
            .collect();
        DiagnosticReport { entity, roots }
    }
}

fn hook(members: &[MemberInfo], names: &[&str], arity: u8) -> Option<Hook> {
    first_named(members, names, |m| m.method_arity() == Some(arity)).map(Hook::new)
}

/// Builds the full accessor bundle for one component. `None` when the
/// component has no value member to lock.
pub fn build_binding(
    graph: &ObjectGraph,
    handle: ComponentHandle,
    tier: ProbeTier,
) -> Option<AdapterBinding> {
    let component = graph.component(handle)?;
    let members = component.members();
    let value = locate_value(component)?;

    let thresholds = MIN_THRESHOLD_CANDIDATES
        .iter()
        .chain(MAX_THRESHOLD_CANDIDATES)
        .filter_map(|name| {
            members
                .iter()
                .find(|m| m.is_scalar_field() && m.name_matches(name))
        })
        .map(ScalarAccessor::new)
        .collect();

    let driver_fields = members
        .iter()
        .filter(|m| m.is_scalar_field() && is_driver_field(&m.name, value.member()))
        .map(ScalarAccessor::new)
        .collect();

    let domain = value
        .read(component)
        .map(Domain::infer)
        .unwrap_or_default();

    Some(AdapterBinding {
        target: handle,
        target_type: component.type_name().to_string(),
        target_path: graph.path_of(handle.node),
        tier,
        is_at_max: first_named(&members, CORRUPTED_FLAG_CANDIDATES, MemberInfo::is_flag)
            .map(FlagAccessor::new),
        is_active: first_named(&members, ACTIVE_FLAG_CANDIDATES, MemberInfo::is_flag)
            .map(FlagAccessor::new),
        hooks: StanceHooks {
            enter: hook(&members, ENTER_HOOKS, 0),
            exit: hook(&members, EXIT_HOOKS, 0),
            set_active: hook(&members, SET_ACTIVE_HOOKS, 1),
            try_enter: hook(&members, TRY_ENTER_HOOKS, 0),
            try_exit: hook(&members, TRY_EXIT_HOOKS, 0),
            request: hook(&members, REQUEST_HOOKS, 1),
        },
        driver_fields,
        thresholds,
        domain,
        value,
    })
}
