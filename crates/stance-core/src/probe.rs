//! Capability probes.
//!
//! A probe decides whether a component can stand in for the survivor's
//! corruption controller. Probes are tried in priority order by the binder:
//! exact type name, then method shape, then a plausible value member. The
//! vocabulary below is the known surface of the controller across versions.

use contracts::ProbeTier;

use crate::binding::ScalarAccessor;
use crate::graph::{ExternalComponent, MemberInfo};

pub const DOMAIN_KEYWORD: &str = "corrupt";

pub const TRANSITION_METHODS: &[&str] = &[
    "EnterCorruption",
    "EnterCorrupted",
    "StartCorruption",
    "ExitCorruption",
    "ExitCorrupted",
    "StopCorruption",
    "SetCorruptionActive",
    "TryTransformToCorrupted",
    "TryTransformToBase",
    "RequestTransformation",
];

pub const VALUE_FIELD_CANDIDATES: &[&str] = &[
    "corruption",
    "corruptionFrac",
    "corruptionFraction",
    "corruptionPercent",
    "corruptionValue",
];

pub const VALUE_PROPERTY_CANDIDATES: &[&str] =
    &["Corruption", "CorruptionFraction", "CorruptionPercent", "Value"];

pub const CORRUPTED_FLAG_CANDIDATES: &[&str] =
    &["isCorrupted", "isCorruption", "corrupted", "isInCorruptedMode"];

pub const ACTIVE_FLAG_CANDIDATES: &[&str] =
    &["corruptionActive", "isCorruptionActive", "isCorruptionOn"];

pub const MIN_THRESHOLD_CANDIDATES: &[&str] = &[
    "minCorruptionToTransform",
    "minCorruptionToActivate",
    "minCorruption",
];

pub const MAX_THRESHOLD_CANDIDATES: &[&str] = &[
    "maxCorruptionToRevert",
    "maxCorruptionToDeactivate",
    "maxCorruption",
];

pub const ENTER_HOOKS: &[&str] = &["EnterCorruption", "EnterCorrupted", "StartCorruption"];
pub const EXIT_HOOKS: &[&str] = &["ExitCorruption", "ExitCorrupted", "StopCorruption"];
pub const SET_ACTIVE_HOOKS: &[&str] = &["SetCorruptionActive", "SetCorrupted"];
pub const TRY_ENTER_HOOKS: &[&str] = &["TryTransformToCorrupted", "TryEnterCorruption"];
pub const TRY_EXIT_HOOKS: &[&str] = &["TryTransformToBase", "TryExitCorruption"];
pub const REQUEST_HOOKS: &[&str] = &["RequestTransformation", "RequestCorruption"];

const RATE_KEYWORDS: &[&str] = &[
    "rate", "drift", "delta", "speed", "gain", "loss", "regen", "persecond", "pertick",
];
const LIMIT_KEYWORDS: &[&str] = &["min", "max", "threshold", "limit", "bound"];
const TARGET_KEYWORDS: &[&str] = &["toactivate", "totransform"];
const STATE_SUFFIXES: &[&str] = &["percent", "fraction", "value"];

pub trait CapabilityProbe: Send + Sync {
    fn tier(&self) -> ProbeTier;

    fn matches(&self, component: &dyn ExternalComponent) -> bool;

    /// Short label used in diagnostic dumps.
    fn label(&self) -> String;
}

#[derive(Debug, Clone)]
pub struct ExactTypeProbe {
    type_name: String,
}

impl ExactTypeProbe {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
        }
    }
}

impl CapabilityProbe for ExactTypeProbe {
    fn tier(&self) -> ProbeTier {
        ProbeTier::ExactName
    }

    fn matches(&self, component: &dyn ExternalComponent) -> bool {
        component.type_name().eq_ignore_ascii_case(&self.type_name)
    }

    fn label(&self) -> String {
        format!("type is {}", self.type_name)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ShapeProbe;

impl CapabilityProbe for ShapeProbe {
    fn tier(&self) -> ProbeTier {
        ProbeTier::Shape
    }

    fn matches(&self, component: &dyn ExternalComponent) -> bool {
        component.members().iter().any(|member| {
            member.method_arity().is_some()
                && TRANSITION_METHODS
                    .iter()
                    .any(|candidate| member.name_matches(candidate))
        })
    }

    fn label(&self) -> String {
        "has corruption methods".to_string()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ValueRangeProbe;

impl CapabilityProbe for ValueRangeProbe {
    fn tier(&self) -> ProbeTier {
        ProbeTier::ValueHeuristic
    }

    fn matches(&self, component: &dyn ExternalComponent) -> bool {
        plausible_value(component).is_some()
    }

    fn label(&self) -> String {
        "has corruption value".to_string()
    }
}

pub fn default_probes(controller_type_name: &str) -> Vec<Box<dyn CapabilityProbe>> {
    vec![
        Box::new(ExactTypeProbe::new(controller_type_name)),
        Box::new(ShapeProbe),
        Box::new(ValueRangeProbe),
    ]
}

pub fn in_plausible_range(value: f32) -> bool {
    value.is_finite() && (0.0..=100.0).contains(&value)
}

/// Locates the primary value member: a named scalar field, then a guessed
/// field, then a named read/write property.
pub fn locate_value(component: &dyn ExternalComponent) -> Option<ScalarAccessor> {
    let members = component.members();
    first_named(&members, VALUE_FIELD_CANDIDATES, MemberInfo::is_scalar_field)
        .or_else(|| guess_value_field(component, &members))
        .or_else(|| {
            first_named(
                &members,
                VALUE_PROPERTY_CANDIDATES,
                MemberInfo::is_read_write_scalar_property,
            )
        })
        .map(ScalarAccessor::new)
}

/// The located value member together with its current reading, when that
/// reading lies in a plausible range.
pub fn plausible_value(component: &dyn ExternalComponent) -> Option<(ScalarAccessor, f32)> {
    let accessor = locate_value(component)?;
    let value = accessor.read(component).ok()?;
    in_plausible_range(value).then_some((accessor, value))
}

fn guess_value_field<'a>(
    component: &dyn ExternalComponent,
    members: &'a [MemberInfo],
) -> Option<&'a MemberInfo> {
    let fields: Vec<&MemberInfo> = members.iter().filter(|m| m.is_scalar_field()).collect();
    let keyed: Vec<&MemberInfo> = fields
        .iter()
        .copied()
        .filter(|m| contains_keyword(&m.name, DOMAIN_KEYWORD))
        .collect();
    let pool = if keyed.is_empty() { fields } else { keyed };

    pool.into_iter().find(|member| {
        component
            .read_scalar(&member.name)
            .map(in_plausible_range)
            .unwrap_or(false)
    })
}

/// First member, in candidate order, whose name matches and which satisfies
/// `accept`.
pub fn first_named<'a>(
    members: &'a [MemberInfo],
    candidates: &[&str],
    accept: impl Fn(&MemberInfo) -> bool,
) -> Option<&'a MemberInfo> {
    candidates.iter().find_map(|candidate| {
        members
            .iter()
            .find(|member| member.name_matches(candidate) && accept(member))
    })
}

fn contains_keyword(name: &str, keyword: &str) -> bool {
    name.to_ascii_lowercase().contains(keyword)
}

/// Whether a scalar member drives the primary value over time and may be
/// zeroed while the stance is locked.
pub fn is_driver_field(name: &str, primary: &str) -> bool {
    if name.eq_ignore_ascii_case(primary) {
        return false;
    }
    let lowered = name.to_ascii_lowercase();
    if !lowered.contains(DOMAIN_KEYWORD) {
        return false;
    }
    if LIMIT_KEYWORDS.iter().any(|k| lowered.contains(k))
        || TARGET_KEYWORDS.iter().any(|k| lowered.contains(k))
        || STATE_SUFFIXES.iter().any(|s| lowered.ends_with(s))
    {
        return false;
    }
    RATE_KEYWORDS.iter().any(|k| lowered.contains(k))
}

pub fn is_limit_named(name: &str) -> bool {
    let lowered = name.to_ascii_lowercase();
    LIMIT_KEYWORDS.iter().any(|k| lowered.contains(k))
}
