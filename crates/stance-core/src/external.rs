//! Concrete external components.
//!
//! [`CorruptionController`] models the survivor's own corruption logic: the
//! scalar drifts every tick and the controller flips its mode on its own when
//! a threshold is crossed. [`RecordComponent`] is a record-backed component
//! whose members are declared at runtime, used to present arbitrary shapes to
//! the binder.

use std::any::Any;
use std::collections::BTreeMap;

use crate::graph::{AccessError, ExternalComponent, MemberInfo, MemberKind, Storage};

#[derive(Debug, Clone)]
pub struct CorruptionController {
    corruption: f32,
    per_second_in_combat: f32,
    delta_while_corrupted: f32,
    min_to_transform: f32,
    max_to_revert: f32,
    is_corrupted: bool,
    corruption_active: bool,
    transforms: u32,
    calls: BTreeMap<&'static str, u32>,
}

impl CorruptionController {
    pub const TYPE_NAME: &'static str = "VoidSurvivorController";

    pub fn new(corruption: f32) -> Self {
        Self {
            corruption,
            per_second_in_combat: 3.0,
            delta_while_corrupted: -10.0,
            min_to_transform: 100.0,
            max_to_revert: 0.0,
            is_corrupted: false,
            corruption_active: true,
            transforms: 0,
            calls: BTreeMap::new(),
        }
    }

    pub fn with_rates(mut self, per_second_in_combat: f32, delta_while_corrupted: f32) -> Self {
        self.per_second_in_combat = per_second_in_combat;
        self.delta_while_corrupted = delta_while_corrupted;
        self
    }

    pub fn corrupted(mut self) -> Self {
        self.is_corrupted = true;
        self
    }

    pub fn corruption(&self) -> f32 {
        self.corruption
    }

    pub fn is_corrupted(&self) -> bool {
        self.is_corrupted
    }

    pub fn is_active(&self) -> bool {
        self.corruption_active
    }

    /// Mode flips performed by the controller's own threshold logic.
    pub fn automatic_transforms(&self) -> u32 {
        self.transforms
    }

    pub fn calls(&self, method: &str) -> u32 {
        self.calls.get(method).copied().unwrap_or(0)
    }

    fn record_call(&mut self, method: &'static str) {
        *self.calls.entry(method).or_default() += 1;
    }
}

impl ExternalComponent for CorruptionController {
    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn members(&self) -> Vec<MemberInfo> {
        vec![
            MemberInfo::scalar_field("corruption"),
            MemberInfo::scalar_field("corruptionPerSecondInCombat"),
            MemberInfo::scalar_field("corruptionDeltaWhileCorrupted"),
            MemberInfo::scalar_field("minCorruptionToTransform"),
            MemberInfo::scalar_field("maxCorruptionToRevert"),
            MemberInfo::flag_field("isCorrupted"),
            MemberInfo::flag_field("corruptionActive"),
            MemberInfo::method("EnterCorruption", 0),
            MemberInfo::method("ExitCorruption", 0),
            MemberInfo::method("SetCorruptionActive", 1),
            MemberInfo::method("RequestTransformation", 1),
        ]
    }

    fn read_scalar(&self, member: &str) -> Result<f32, AccessError> {
        match member {
            "corruption" => Ok(self.corruption),
            "corruptionPerSecondInCombat" => Ok(self.per_second_in_combat),
            "corruptionDeltaWhileCorrupted" => Ok(self.delta_while_corrupted),
            "minCorruptionToTransform" => Ok(self.min_to_transform),
            "maxCorruptionToRevert" => Ok(self.max_to_revert),
            other => Err(AccessError::MemberNotFound(other.to_string())),
        }
    }

    fn write_scalar(&mut self, member: &str, value: f32) -> Result<(), AccessError> {
        let slot = match member {
            "corruption" => &mut self.corruption,
            "corruptionPerSecondInCombat" => &mut self.per_second_in_combat,
            "corruptionDeltaWhileCorrupted" => &mut self.delta_while_corrupted,
            "minCorruptionToTransform" => &mut self.min_to_transform,
            "maxCorruptionToRevert" => &mut self.max_to_revert,
            other => return Err(AccessError::MemberNotFound(other.to_string())),
        };
        *slot = value;
        Ok(())
    }

    fn read_flag(&self, member: &str) -> Result<bool, AccessError> {
        match member {
            "isCorrupted" => Ok(self.is_corrupted),
            "corruptionActive" => Ok(self.corruption_active),
            other => Err(AccessError::MemberNotFound(other.to_string())),
        }
    }

    fn write_flag(&mut self, member: &str, value: bool) -> Result<(), AccessError> {
        match member {
            "isCorrupted" => self.is_corrupted = value,
            "corruptionActive" => self.corruption_active = value,
            other => return Err(AccessError::MemberNotFound(other.to_string())),
        }
        Ok(())
    }

    fn invoke(&mut self, method: &str, arg: Option<bool>) -> Result<(), AccessError> {
        match (method, arg) {
            ("EnterCorruption", None) => {
                self.record_call("EnterCorruption");
                self.is_corrupted = true;
            }
            ("ExitCorruption", None) => {
                self.record_call("ExitCorruption");
                self.is_corrupted = false;
            }
            ("SetCorruptionActive", Some(active)) => {
                self.record_call("SetCorruptionActive");
                self.corruption_active = active;
            }
            ("RequestTransformation", Some(corrupted)) => {
                self.record_call("RequestTransformation");
                self.is_corrupted = corrupted;
            }
            ("EnterCorruption" | "ExitCorruption", Some(_))
            | ("SetCorruptionActive" | "RequestTransformation", None) => {
                return Err(AccessError::TypeMismatch {
                    member: method.to_string(),
                    expected: "matching arity",
                })
            }
            (other, _) => return Err(AccessError::MemberNotFound(other.to_string())),
        }
        Ok(())
    }

    fn advance(&mut self, dt: f32) {
        if self.corruption_active {
            if !self.is_corrupted && self.corruption >= self.min_to_transform {
                self.is_corrupted = true;
                self.transforms += 1;
            } else if self.is_corrupted && self.corruption <= self.max_to_revert {
                self.is_corrupted = false;
                self.transforms += 1;
            }
        }

        let rate = if self.is_corrupted {
            self.delta_while_corrupted
        } else {
            self.per_second_in_combat
        };
        self.corruption = (self.corruption + rate * dt).clamp(0.0, 100.0);

        // native logic re-arms itself every update
        self.corruption_active = true;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
enum RecordValue {
    Scalar(f32),
    Flag(bool),
    Method {
        arity: u8,
        calls: Vec<Option<bool>>,
        faults: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct RecordMember {
    name: String,
    storage: Storage,
    value: RecordValue,
    faults_on_write: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordComponent {
    type_name: String,
    members: Vec<RecordMember>,
    drifts: Vec<(String, String)>,
}

impl RecordComponent {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            members: Vec::new(),
            drifts: Vec::new(),
        }
    }

    fn push(mut self, name: impl Into<String>, storage: Storage, value: RecordValue) -> Self {
        self.members.push(RecordMember {
            name: name.into(),
            storage,
            value,
            faults_on_write: false,
        });
        self
    }

    pub fn with_scalar(self, name: impl Into<String>, value: f32) -> Self {
        self.push(name, Storage::Field, RecordValue::Scalar(value))
    }

    pub fn with_property(self, name: impl Into<String>, value: f32, writable: bool) -> Self {
        self.push(
            name,
            Storage::Property { writable },
            RecordValue::Scalar(value),
        )
    }

    pub fn with_flag(self, name: impl Into<String>, value: bool) -> Self {
        self.push(name, Storage::Field, RecordValue::Flag(value))
    }

    pub fn with_method(self, name: impl Into<String>, arity: u8) -> Self {
        self.push(
            name,
            Storage::Field,
            RecordValue::Method {
                arity,
                calls: Vec::new(),
                faults: false,
            },
        )
    }

    /// A method that records the call and then fails internally.
    pub fn with_faulting_method(self, name: impl Into<String>, arity: u8) -> Self {
        self.push(
            name,
            Storage::Field,
            RecordValue::Method {
                arity,
                calls: Vec::new(),
                faults: true,
            },
        )
    }

    pub fn with_faulting_write(mut self, name: &str) -> Self {
        if let Some(member) = self.members.iter_mut().find(|m| m.name == name) {
            member.faults_on_write = true;
        }
        self
    }

    /// Adds `rate` (read from the `rate_member` scalar) to `target` every second.
    pub fn with_drift(mut self, target: impl Into<String>, rate_member: impl Into<String>) -> Self {
        self.drifts.push((target.into(), rate_member.into()));
        self
    }

    pub fn scalar(&self, name: &str) -> Option<f32> {
        match self.member(name)?.value {
            RecordValue::Scalar(value) => Some(value),
            _ => None,
        }
    }

    pub fn flag(&self, name: &str) -> Option<bool> {
        match self.member(name)?.value {
            RecordValue::Flag(value) => Some(value),
            _ => None,
        }
    }

    pub fn calls(&self, name: &str) -> usize {
        self.call_args(name).len()
    }

    pub fn call_args(&self, name: &str) -> &[Option<bool>] {
        match self.member(name).map(|m| &m.value) {
            Some(RecordValue::Method { calls, .. }) => calls,
            _ => &[],
        }
    }

    fn member(&self, name: &str) -> Option<&RecordMember> {
        self.members.iter().find(|m| m.name == name)
    }

    fn member_mut(&mut self, name: &str) -> Result<&mut RecordMember, AccessError> {
        self.members
            .iter_mut()
            .find(|m| m.name == name)
            .ok_or_else(|| AccessError::MemberNotFound(name.to_string()))
    }

    fn check_writable(member: &RecordMember) -> Result<(), AccessError> {
        if member.storage == (Storage::Property { writable: false }) {
            return Err(AccessError::ReadOnly(member.name.clone()));
        }
        if member.faults_on_write {
            return Err(AccessError::Faulted {
                member: member.name.clone(),
                reason: "setter threw".to_string(),
            });
        }
        Ok(())
    }
}

impl ExternalComponent for RecordComponent {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn members(&self) -> Vec<MemberInfo> {
        self.members
            .iter()
            .map(|member| MemberInfo {
                name: member.name.clone(),
                kind: match member.value {
                    RecordValue::Scalar(_) => MemberKind::Scalar(member.storage),
                    RecordValue::Flag(_) => MemberKind::Flag(member.storage),
                    RecordValue::Method { arity, .. } => MemberKind::Method { arity },
                },
            })
            .collect()
    }

    fn read_scalar(&self, member: &str) -> Result<f32, AccessError> {
        match self.member(member).map(|m| &m.value) {
            Some(RecordValue::Scalar(value)) => Ok(*value),
            Some(_) => Err(AccessError::TypeMismatch {
                member: member.to_string(),
                expected: "scalar",
            }),
            None => Err(AccessError::MemberNotFound(member.to_string())),
        }
    }

    fn write_scalar(&mut self, member: &str, value: f32) -> Result<(), AccessError> {
        let entry = self.member_mut(member)?;
        Self::check_writable(entry)?;
        match &mut entry.value {
            RecordValue::Scalar(slot) => {
                *slot = value;
                Ok(())
            }
            _ => Err(AccessError::TypeMismatch {
                member: member.to_string(),
                expected: "scalar",
            }),
        }
    }

    fn read_flag(&self, member: &str) -> Result<bool, AccessError> {
        match self.member(member).map(|m| &m.value) {
            Some(RecordValue::Flag(value)) => Ok(*value),
            Some(_) => Err(AccessError::TypeMismatch {
                member: member.to_string(),
                expected: "flag",
            }),
            None => Err(AccessError::MemberNotFound(member.to_string())),
        }
    }

    fn write_flag(&mut self, member: &str, value: bool) -> Result<(), AccessError> {
        let entry = self.member_mut(member)?;
        Self::check_writable(entry)?;
        match &mut entry.value {
            RecordValue::Flag(slot) => {
                *slot = value;
                Ok(())
            }
            _ => Err(AccessError::TypeMismatch {
                member: member.to_string(),
                expected: "flag",
            }),
        }
    }

    fn invoke(&mut self, method: &str, arg: Option<bool>) -> Result<(), AccessError> {
        let entry = self.member_mut(method)?;
        let RecordValue::Method {
            arity,
            calls,
            faults,
        } = &mut entry.value
        else {
            return Err(AccessError::TypeMismatch {
                member: method.to_string(),
                expected: "method",
            });
        };
        if usize::from(*arity) != usize::from(arg.is_some()) {
            return Err(AccessError::TypeMismatch {
                member: method.to_string(),
                expected: "matching arity",
            });
        }
        calls.push(arg);
        if *faults {
            return Err(AccessError::Faulted {
                member: method.to_string(),
                reason: "method threw".to_string(),
            });
        }
        Ok(())
    }

    fn advance(&mut self, dt: f32) {
        for index in 0..self.drifts.len() {
            let (target, rate_member) = self.drifts[index].clone();
            let Some(rate) = self.scalar(&rate_member) else {
                continue;
            };
            if let Some(RecordValue::Scalar(value)) =
                self.members.iter_mut().find(|m| m.name == target).map(|m| &mut m.value)
            {
                *value += rate * dt;
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
