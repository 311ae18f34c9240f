//! Body blueprints: the object layout a spawned survivor presents.

use contracts::StanceConfig;

use crate::external::{CorruptionController, RecordComponent};
use crate::graph::{ComponentHandle, NodeId, ObjectGraph};

#[derive(Debug, Clone, PartialEq)]
pub struct BodyBlueprint {
    pub object_name: String,
    pub base_name_token: String,
    pub master_name: String,
    pub initial_corruption: f32,
    pub starts_corrupted: bool,
    pub with_controller: bool,
}

impl BodyBlueprint {
    pub fn void_survivor() -> Self {
        Self {
            object_name: "VoidSurvivorBody(Clone)".to_string(),
            base_name_token: "VOID_SURVIVOR_BODY_NAME".to_string(),
            master_name: "VoidSurvivorMaster(Clone)".to_string(),
            initial_corruption: 20.0,
            starts_corrupted: false,
            with_controller: true,
        }
    }

    /// A body that is not the stance-capable survivor.
    pub fn other(object_name: impl Into<String>, base_name_token: impl Into<String>) -> Self {
        Self {
            object_name: object_name.into(),
            base_name_token: base_name_token.into(),
            master_name: "PlayerMaster(Clone)".to_string(),
            initial_corruption: 0.0,
            starts_corrupted: false,
            with_controller: false,
        }
    }

    pub fn with_corruption(mut self, value: f32) -> Self {
        self.initial_corruption = value;
        self
    }

    pub fn corrupted(mut self) -> Self {
        self.starts_corrupted = true;
        self
    }

    pub fn without_controller(mut self) -> Self {
        self.with_controller = false;
        self
    }

    /// Whether controllers should be attached to this body at all.
    pub fn is_stance_capable(&self, config: &StanceConfig) -> bool {
        let object_name = self.object_name.to_ascii_lowercase();
        config
            .body_name_markers
            .iter()
            .any(|marker| object_name.contains(&marker.to_ascii_lowercase()))
            || self.base_name_token.contains(&config.body_token_marker)
    }

    pub fn build(&self) -> BodyInstance {
        let mut graph = ObjectGraph::new();
        let body = graph.add_root(self.object_name.clone());
        let model_base = graph.add_child(body, "ModelBase");
        let model = graph.add_child(model_base, "mdlVoidSurvivor");
        let master = graph.add_root(self.master_name.clone());

        graph.attach(
            body,
            Box::new(
                RecordComponent::new("CharacterBody")
                    .with_scalar("baseMaxHealth", 110.0)
                    .with_flag("isSprinting", false),
            ),
        );
        graph.attach(model, Box::new(RecordComponent::new("Animator")));
        graph.attach(
            master,
            Box::new(RecordComponent::new("CharacterMaster").with_method("Respawn", 0)),
        );

        let controller = if self.with_controller {
            let mut controller = CorruptionController::new(self.initial_corruption);
            if self.starts_corrupted {
                controller = controller.corrupted();
            }
            graph.attach(body, Box::new(controller))
        } else {
            None
        };

        BodyInstance {
            object_name: self.object_name.clone(),
            graph,
            roots: vec![body, model_base, master],
            controller,
        }
    }
}

/// A built body: its object graph, the roots the binder scans and the
/// controller handle when one was attached.
#[derive(Debug)]
pub struct BodyInstance {
    pub object_name: String,
    pub graph: ObjectGraph,
    pub roots: Vec<NodeId>,
    pub controller: Option<ComponentHandle>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn survivor_markers_match_name_or_token() {
        let config = StanceConfig::default();
        assert!(BodyBlueprint::void_survivor().is_stance_capable(&config));
        assert!(BodyBlueprint::other("Custom(Clone)", "VOID_SURVIVOR_ALT_NAME")
            .is_stance_capable(&config));
        assert!(!BodyBlueprint::other("CommandoBody(Clone)", "COMMANDO_BODY_NAME")
            .is_stance_capable(&config));
    }

    #[test]
    fn survivor_body_carries_controller_on_body_root() {
        let instance = BodyBlueprint::void_survivor().with_corruption(45.0).build();
        let handle = instance.controller.expect("controller");
        let controller = instance
            .graph
            .downcast::<CorruptionController>(handle)
            .expect("downcast");
        assert_eq!(controller.corruption(), 45.0);
        assert_eq!(instance.graph.path_of(handle.node), "VoidSurvivorBody(Clone)");
        assert_eq!(instance.roots.len(), 3);
    }
}
