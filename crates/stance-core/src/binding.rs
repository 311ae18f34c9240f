//! Typed accessor bundle for a bound external component.

use contracts::{Domain, ProbeTier};
use tracing::debug;

use crate::graph::{AccessError, ComponentHandle, ExternalComponent, MemberInfo, ObjectGraph};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalarAccessor {
    member: String,
}

impl ScalarAccessor {
    pub fn new(member: &MemberInfo) -> Self {
        Self {
            member: member.name.clone(),
        }
    }

    pub fn member(&self) -> &str {
        &self.member
    }

    pub fn read(&self, component: &dyn ExternalComponent) -> Result<f32, AccessError> {
        component.read_scalar(&self.member)
    }

    pub fn write(
        &self,
        component: &mut dyn ExternalComponent,
        value: f32,
    ) -> Result<(), AccessError> {
        component.write_scalar(&self.member, value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagAccessor {
    member: String,
}

impl FlagAccessor {
    pub fn new(member: &MemberInfo) -> Self {
        Self {
            member: member.name.clone(),
        }
    }

    pub fn member(&self) -> &str {
        &self.member
    }
}

/// A zero- or one-argument transition method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hook {
    method: String,
    takes_flag: bool,
}

impl Hook {
    pub fn new(member: &MemberInfo) -> Self {
        Self {
            method: member.name.clone(),
            takes_flag: member.method_arity() == Some(1),
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Calls the hook and swallows any internal failure.
    pub fn invoke_best_effort(&self, component: &mut dyn ExternalComponent, flag: bool) -> bool {
        let arg = self.takes_flag.then_some(flag);
        match component.invoke(&self.method, arg) {
            Ok(()) => true,
            Err(err) => {
                debug!(method = %self.method, error = %err, "hook invocation failed");
                false
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StanceHooks {
    pub enter: Option<Hook>,
    pub exit: Option<Hook>,
    pub set_active: Option<Hook>,
    pub try_enter: Option<Hook>,
    pub try_exit: Option<Hook>,
    pub request: Option<Hook>,
}

impl StanceHooks {
    pub fn available(&self) -> usize {
        [
            &self.enter,
            &self.exit,
            &self.set_active,
            &self.try_enter,
            &self.try_exit,
            &self.request,
        ]
        .iter()
        .filter(|hook| hook.is_some())
        .count()
    }
}

fn invoke_optional(hook: Option<&Hook>, component: &mut dyn ExternalComponent, flag: bool) -> bool {
    hook.is_some_and(|hook| hook.invoke_best_effort(component, flag))
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdapterBinding {
    pub target: ComponentHandle,
    pub target_type: String,
    pub target_path: String,
    pub tier: ProbeTier,
    pub value: ScalarAccessor,
    pub is_at_max: Option<FlagAccessor>,
    pub is_active: Option<FlagAccessor>,
    pub hooks: StanceHooks,
    pub driver_fields: Vec<ScalarAccessor>,
    /// Threshold members seen on the target. Reported, never written.
    pub thresholds: Vec<ScalarAccessor>,
    pub domain: Domain,
}

/// Outcome of a resolve pass.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Bound(AdapterBinding),
    Unresolved { scanned: usize },
}

impl AdapterBinding {
    pub fn is_valid(&self, graph: &ObjectGraph) -> bool {
        graph.contains(self.target)
    }

    fn target<'g>(&self, graph: &'g ObjectGraph) -> Result<&'g dyn ExternalComponent, AccessError> {
        graph.component(self.target).ok_or(AccessError::TargetGone)
    }

    fn target_mut<'g>(
        &self,
        graph: &'g mut ObjectGraph,
    ) -> Result<&'g mut (dyn ExternalComponent + 'static), AccessError> {
        graph.component_mut(self.target).ok_or(AccessError::TargetGone)
    }

    pub fn read_value(&self, graph: &ObjectGraph) -> Option<f32> {
        self.target(graph)
            .and_then(|component| self.value.read(component))
            .map_err(|err| debug!(member = %self.value.member(), error = %err, "value read failed"))
            .ok()
    }

    pub fn write_value(&self, graph: &mut ObjectGraph, value: f32) -> bool {
        self.target_mut(graph)
            .and_then(|component| self.value.write(component, value))
            .map_err(|err| {
                debug!(member = %self.value.member(), error = %err, "value write failed")
            })
            .is_ok()
    }

    pub fn read_is_at_max(&self, graph: &ObjectGraph) -> Option<bool> {
        let flag = self.is_at_max.as_ref()?;
        self.target(graph)
            .and_then(|component| component.read_flag(flag.member()))
            .ok()
    }

    pub fn write_is_at_max(&self, graph: &mut ObjectGraph, value: bool) -> bool {
        self.write_flag(graph, self.is_at_max.as_ref(), value)
    }

    pub fn write_is_active(&self, graph: &mut ObjectGraph, value: bool) -> bool {
        self.write_flag(graph, self.is_active.as_ref(), value)
    }

    fn write_flag(
        &self,
        graph: &mut ObjectGraph,
        flag: Option<&FlagAccessor>,
        value: bool,
    ) -> bool {
        let Some(flag) = flag else {
            return false;
        };
        self.target_mut(graph)
            .and_then(|component| component.write_flag(flag.member(), value))
            .map_err(|err| debug!(member = %flag.member(), error = %err, "flag write failed"))
            .is_ok()
    }

    /// Runs every hook relevant to entering `corrupted`, each independently.
    /// Returns how many hooks completed.
    pub fn invoke_transition(&self, graph: &mut ObjectGraph, corrupted: bool) -> usize {
        let Ok(component) = self.target_mut(graph) else {
            return 0;
        };
        let hooks = &self.hooks;
        let (direct, attempt) = if corrupted {
            (hooks.enter.as_ref(), hooks.try_enter.as_ref())
        } else {
            (hooks.exit.as_ref(), hooks.try_exit.as_ref())
        };

        [
            invoke_optional(hooks.set_active.as_ref(), component, false),
            invoke_optional(direct, component, false),
            invoke_optional(attempt, component, false),
            invoke_optional(hooks.request.as_ref(), component, corrupted),
        ]
        .into_iter()
        .filter(|done| *done)
        .count()
    }

    pub fn suppress_activity(&self, graph: &mut ObjectGraph) {
        if let Ok(component) = self.target_mut(graph) {
            invoke_optional(self.hooks.set_active.as_ref(), component, false);
        }
        self.write_is_active(graph, false);
    }

    /// Zeroes every driver field; returns how many writes succeeded.
    pub fn zero_drivers(&self, graph: &mut ObjectGraph) -> usize {
        let Ok(component) = self.target_mut(graph) else {
            return 0;
        };
        let mut zeroed = 0;
        for driver in &self.driver_fields {
            match driver.write(component, 0.0) {
                Ok(()) => zeroed += 1,
                Err(err) => debug!(member = %driver.member(), error = %err, "driver write failed"),
            }
        }
        zeroed
    }

    pub fn driver_names(&self) -> Vec<String> {
        self.driver_fields
            .iter()
            .map(|driver| driver.member().to_string())
            .collect()
    }
}
