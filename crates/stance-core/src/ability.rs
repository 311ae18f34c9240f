//! Ability registration and per-entity ability slots.
//!
//! The content registry itself is owned by the host; [`AbilityRegistry`] is
//! the narrow surface this crate needs from it, and [`ContentCatalog`] is the
//! in-process implementation used by sessions and tests.

use std::collections::{BTreeMap, BTreeSet};

use contracts::StanceConfig;
use tracing::info;

use crate::activity::{InterruptPriority, STANCE_TOGGLE_ACTIVITY};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AbilityHandle(u32);

#[derive(Debug, Clone, PartialEq)]
pub struct AbilityDescriptor {
    pub name: String,
    pub name_token: String,
    pub description_token: String,
    pub activation_activity: String,
    pub activation_machine: String,
    pub base_recharge_secs: f32,
    pub stock: u32,
    pub interrupt_priority: InterruptPriority,
    pub must_key_press: bool,
    pub cancelled_by_sprint: bool,
}

impl AbilityDescriptor {
    pub fn stance_toggle(config: &StanceConfig) -> Self {
        Self {
            name: config.toggle_ability_name.clone(),
            name_token: format!("{}_NAME", config.toggle_ability_name),
            description_token: format!("{}_DESC", config.toggle_ability_name),
            activation_activity: STANCE_TOGGLE_ACTIVITY.to_string(),
            activation_machine: "Weapon".to_string(),
            base_recharge_secs: 2.0,
            stock: 1,
            interrupt_priority: InterruptPriority::Any,
            must_key_press: true,
            cancelled_by_sprint: false,
        }
    }
}

pub trait AbilityRegistry {
    /// Registers a descriptor; registering the same name twice returns the
    /// original handle.
    fn register_ability(&mut self, descriptor: AbilityDescriptor) -> AbilityHandle;

    fn register_state(&mut self, name: &str);

    /// Appends `ability` to `family` unless it is already a variant. Returns
    /// whether the family changed.
    fn add_family_variant(&mut self, family: &str, ability: AbilityHandle) -> bool;

    fn family_variants(&self, family: &str) -> Vec<AbilityHandle>;
}

#[derive(Debug, Default)]
pub struct ContentCatalog {
    abilities: Vec<AbilityDescriptor>,
    states: BTreeSet<String>,
    families: BTreeMap<String, Vec<AbilityHandle>>,
}

impl ContentCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn descriptor(&self, handle: AbilityHandle) -> Option<&AbilityDescriptor> {
        self.abilities.get(handle.0 as usize)
    }

    pub fn has_state(&self, name: &str) -> bool {
        self.states.contains(name)
    }

    /// Seeds a family with the host's own default variant.
    pub fn register_family(
        &mut self,
        family: &str,
        default_variant: AbilityDescriptor,
    ) -> AbilityHandle {
        let handle = self.register_ability(default_variant);
        self.add_family_variant(family, handle);
        handle
    }
}

impl AbilityRegistry for ContentCatalog {
    fn register_ability(&mut self, descriptor: AbilityDescriptor) -> AbilityHandle {
        if let Some(index) = self.abilities.iter().position(|d| d.name == descriptor.name) {
            return AbilityHandle(index as u32);
        }
        self.abilities.push(descriptor);
        AbilityHandle((self.abilities.len() - 1) as u32)
    }

    fn register_state(&mut self, name: &str) {
        self.states.insert(name.to_string());
    }

    fn add_family_variant(&mut self, family: &str, ability: AbilityHandle) -> bool {
        let variants = self.families.entry(family.to_string()).or_default();
        if variants.contains(&ability) {
            return false;
        }
        variants.push(ability);
        true
    }

    fn family_variants(&self, family: &str) -> Vec<AbilityHandle> {
        self.families.get(family).cloned().unwrap_or_default()
    }
}

/// Registers the toggle activity and ability and appends it to the survivor's
/// ability family. Safe to call more than once.
pub fn install_stance_toggle(
    registry: &mut dyn AbilityRegistry,
    config: &StanceConfig,
) -> AbilityHandle {
    registry.register_state(STANCE_TOGGLE_ACTIVITY);
    let handle = registry.register_ability(AbilityDescriptor::stance_toggle(config));
    if registry.add_family_variant(&config.ability_family, handle) {
        info!(
            family = %config.ability_family,
            ability = %config.toggle_ability_name,
            "added stance toggle to ability family"
        );
    }
    handle
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OverridePriority {
    Default,
    Loadout,
    Contextual,
    Replacement,
}

/// One ability slot on an entity: the loadout choice plus any overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct AbilitySlot {
    variants: Vec<AbilityHandle>,
    selected: AbilityHandle,
    overrides: Vec<(AbilityHandle, OverridePriority)>,
}

impl AbilitySlot {
    pub fn new(variants: Vec<AbilityHandle>, selected: AbilityHandle) -> Self {
        Self {
            variants,
            selected,
            overrides: Vec::new(),
        }
    }

    pub fn selected(&self) -> AbilityHandle {
        self.selected
    }

    pub fn select(&mut self, ability: AbilityHandle) {
        self.selected = ability;
    }

    /// The highest-priority override, or the loadout choice.
    pub fn equipped(&self) -> AbilityHandle {
        self.overrides
            .iter()
            .max_by_key(|(_, priority)| *priority)
            .map(|(ability, _)| *ability)
            .unwrap_or(self.selected)
    }

    pub fn family_contains(&self, ability: AbilityHandle) -> bool {
        self.variants.contains(&ability)
    }

    pub fn has_override(&self, ability: AbilityHandle, priority: OverridePriority) -> bool {
        self.overrides.contains(&(ability, priority))
    }

    pub fn set_override(&mut self, ability: AbilityHandle, priority: OverridePriority) {
        if !self.has_override(ability, priority) {
            self.overrides.push((ability, priority));
        }
    }

    pub fn unset_override(&mut self, ability: AbilityHandle, priority: OverridePriority) {
        self.overrides.retain(|entry| *entry != (ability, priority));
    }

    /// Host-side rebuild of the slot; overrides are dropped without notice.
    pub fn rebuild(&mut self) {
        self.overrides.clear();
    }
}
