//! Object graph of an entity as seen from outside the external system.
//!
//! Nodes form a parent/child hierarchy; each node carries zero or more
//! external components. Components are only reachable through the
//! [`ExternalComponent`] surface: a type name, a list of member descriptors,
//! and name-addressed reads, writes and method invocations. Nothing about a
//! component's concrete layout is known at compile time by the binder.

use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// Identity of one attached component instance. Replacing a component on a
/// node always yields a fresh instance id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentHandle {
    pub node: NodeId,
    pub instance: InstanceId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    Field,
    Property { writable: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Scalar(Storage),
    Flag(Storage),
    Method { arity: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub name: String,
    pub kind: MemberKind,
}

impl MemberInfo {
    pub fn scalar_field(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: MemberKind::Scalar(Storage::Field),
        }
    }

    pub fn scalar_property(name: impl Into<String>, writable: bool) -> Self {
        Self {
            name: name.into(),
            kind: MemberKind::Scalar(Storage::Property { writable }),
        }
    }

    pub fn flag_field(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: MemberKind::Flag(Storage::Field),
        }
    }

    pub fn method(name: impl Into<String>, arity: u8) -> Self {
        Self {
            name: name.into(),
            kind: MemberKind::Method { arity },
        }
    }

    pub fn is_scalar_field(&self) -> bool {
        matches!(self.kind, MemberKind::Scalar(Storage::Field))
    }

    pub fn is_read_write_scalar_property(&self) -> bool {
        matches!(
            self.kind,
            MemberKind::Scalar(Storage::Property { writable: true })
        )
    }

    pub fn is_flag(&self) -> bool {
        matches!(
            self.kind,
            MemberKind::Flag(Storage::Field)
                | MemberKind::Flag(Storage::Property { writable: true })
        )
    }

    pub fn method_arity(&self) -> Option<u8> {
        match self.kind {
            MemberKind::Method { arity } => Some(arity),
            _ => None,
        }
    }

    pub fn name_matches(&self, candidate: &str) -> bool {
        self.name.eq_ignore_ascii_case(candidate)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    #[error("member `{0}` not found")]
    MemberNotFound(String),
    #[error("member `{member}` is not a {expected}")]
    TypeMismatch {
        member: String,
        expected: &'static str,
    },
    #[error("member `{0}` is read-only")]
    ReadOnly(String),
    #[error("bound component no longer exists")]
    TargetGone,
    #[error("`{member}` faulted: {reason}")]
    Faulted { member: String, reason: String },
}

/// Introspection surface of a component owned by the external system.
pub trait ExternalComponent: Any + Send + fmt::Debug {
    fn type_name(&self) -> &str;

    /// Declared members in declaration order.
    fn members(&self) -> Vec<MemberInfo>;

    fn read_scalar(&self, member: &str) -> Result<f32, AccessError>;

    fn write_scalar(&mut self, member: &str, value: f32) -> Result<(), AccessError>;

    fn read_flag(&self, member: &str) -> Result<bool, AccessError>;

    fn write_flag(&mut self, member: &str, value: bool) -> Result<(), AccessError>;

    /// Invokes a zero- or one-argument method.
    fn invoke(&mut self, method: &str, arg: Option<bool>) -> Result<(), AccessError>;

    /// The external system's own per-tick update (passive drift, automatic
    /// transitions). Runs before the stance engine in every fixed tick.
    fn advance(&mut self, _dt: f32) {}

    fn as_any(&self) -> &dyn Any;
}

#[derive(Debug)]
struct ComponentSlot {
    instance: InstanceId,
    component: Box<dyn ExternalComponent>,
}

#[derive(Debug)]
struct Node {
    name: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    components: Vec<ComponentSlot>,
}

#[derive(Debug, Default)]
pub struct ObjectGraph {
    nodes: Vec<Node>,
    next_instance: u64,
}

impl ObjectGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_root(&mut self, name: impl Into<String>) -> NodeId {
        self.push_node(name.into(), None)
    }

    pub fn add_child(&mut self, parent: NodeId, name: impl Into<String>) -> NodeId {
        let id = self.push_node(name.into(), Some(parent));
        if let Some(node) = self.nodes.get_mut(parent.0) {
            node.children.push(id);
        }
        id
    }

    fn push_node(&mut self, name: String, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            name,
            parent,
            children: Vec::new(),
            components: Vec::new(),
        });
        id
    }

    pub fn attach(
        &mut self,
        node: NodeId,
        component: Box<dyn ExternalComponent>,
    ) -> Option<ComponentHandle> {
        let instance = self.allocate_instance();
        let slot = self.nodes.get_mut(node.0)?;
        slot.components.push(ComponentSlot {
            instance,
            component,
        });
        Some(ComponentHandle { node, instance })
    }

    pub fn detach(&mut self, handle: ComponentHandle) -> Option<Box<dyn ExternalComponent>> {
        let node = self.nodes.get_mut(handle.node.0)?;
        let index = node
            .components
            .iter()
            .position(|slot| slot.instance == handle.instance)?;
        Some(node.components.remove(index).component)
    }

    /// Swaps the component behind `handle` for a new instance in the same slot.
    pub fn replace(
        &mut self,
        handle: ComponentHandle,
        component: Box<dyn ExternalComponent>,
    ) -> Option<ComponentHandle> {
        let instance = self.allocate_instance();
        let node = self.nodes.get_mut(handle.node.0)?;
        let slot = node
            .components
            .iter_mut()
            .find(|slot| slot.instance == handle.instance)?;
        slot.instance = instance;
        slot.component = component;
        Some(ComponentHandle {
            node: handle.node,
            instance,
        })
    }

    fn allocate_instance(&mut self) -> InstanceId {
        self.next_instance += 1;
        InstanceId(self.next_instance)
    }

    pub fn contains(&self, handle: ComponentHandle) -> bool {
        self.component(handle).is_some()
    }

    pub fn component(&self, handle: ComponentHandle) -> Option<&dyn ExternalComponent> {
        self.nodes
            .get(handle.node.0)?
            .components
            .iter()
            .find(|slot| slot.instance == handle.instance)
            .map(|slot| slot.component.as_ref())
    }

    pub fn component_mut(
        &mut self,
        handle: ComponentHandle,
    ) -> Option<&mut (dyn ExternalComponent + 'static)> {
        self.nodes
            .get_mut(handle.node.0)?
            .components
            .iter_mut()
            .find(|slot| slot.instance == handle.instance)
            .map(|slot| slot.component.as_mut())
    }

    pub fn downcast<T: ExternalComponent>(&self, handle: ComponentHandle) -> Option<&T> {
        self.component(handle)?.as_any().downcast_ref::<T>()
    }

    pub fn node_name(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(node.0).map(|entry| entry.name.as_str())
    }

    /// Slash-joined names from the topmost ancestor down to `node`.
    pub fn path_of(&self, node: NodeId) -> String {
        let mut names = Vec::new();
        let mut cursor = Some(node);
        while let Some(id) = cursor {
            let Some(entry) = self.nodes.get(id.0) else {
                break;
            };
            names.push(entry.name.as_str());
            cursor = entry.parent;
        }
        if names.is_empty() {
            return "<null>".to_string();
        }
        names.reverse();
        names.join("/")
    }

    /// `root` followed by all of its descendants, depth first.
    pub fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        if root.0 >= self.nodes.len() {
            return out;
        }
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            out.push(id);
            if let Some(node) = self.nodes.get(id.0) {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    /// Every component under any of `roots`, each listed once, in scan order.
    pub fn components_under(&self, roots: &[NodeId]) -> Vec<ComponentHandle> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for root in roots {
            for node in self.descendants(*root) {
                for slot in &self.nodes[node.0].components {
                    let handle = ComponentHandle {
                        node,
                        instance: slot.instance,
                    };
                    if seen.insert(handle) {
                        out.push(handle);
                    }
                }
            }
        }
        out
    }

    /// Runs the external system's own update on every component.
    pub fn advance_all(&mut self, dt: f32) {
        for node in &mut self.nodes {
            for slot in &mut node.components {
                slot.component.advance(dt);
            }
        }
    }
}
