//! Per-entity activity machine with the short stance-toggle activity.

use contracts::FeedbackProfile;
use tracing::debug;

use crate::bridge::{Outbox, ReplicationBridge, ToggleDispatch};
use crate::engine::{EngineContext, StanceLockEngine};

pub const STANCE_TOGGLE_ACTIVITY: &str = "StanceToggle";

/// Ordered lowest to highest. An activity can be replaced by anything at or
/// above its minimum interrupt priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InterruptPriority {
    Any,
    Skill,
    PrioritySkill,
    Pain,
    Stun,
    Frozen,
    Vehicle,
    Death,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Activity {
    Idle,
    StanceToggle { age: f32 },
    Stunned { remaining: f32 },
}

impl Activity {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::StanceToggle { .. } => STANCE_TOGGLE_ACTIVITY,
            Self::Stunned { .. } => "Stunned",
        }
    }

    pub fn min_interrupt_priority(&self) -> InterruptPriority {
        match self {
            Self::Idle => InterruptPriority::Any,
            Self::StanceToggle { .. } => InterruptPriority::Skill,
            // a fresh stun replaces the remaining time of a running one
            Self::Stunned { .. } => InterruptPriority::Stun,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackCue {
    pub layer: &'static str,
    pub animation: &'static str,
    pub playback_param: &'static str,
    pub crossfade_secs: f32,
    pub aim_timer_secs: f32,
}

impl FeedbackCue {
    pub fn for_profile(profile: FeedbackProfile) -> Self {
        Self {
            layer: "Gesture, Additive",
            animation: profile.animation(),
            playback_param: profile.playback_param(),
            crossfade_secs: profile.crossfade_secs(),
            aim_timer_secs: profile.aim_timer_secs(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActivityMachine {
    current: Activity,
    toggle_duration: f32,
    feedback: FeedbackProfile,
    last_cue: Option<FeedbackCue>,
    cues_played: u32,
}

impl ActivityMachine {
    pub fn new(toggle_duration: f32, feedback: FeedbackProfile) -> Self {
        Self {
            current: Activity::Idle,
            toggle_duration,
            feedback,
            last_cue: None,
            cues_played: 0,
        }
    }

    pub fn current(&self) -> Activity {
        self.current
    }

    pub fn last_cue(&self) -> Option<&FeedbackCue> {
        self.last_cue.as_ref()
    }

    pub fn cues_played(&self) -> u32 {
        self.cues_played
    }

    pub fn can_interrupt(&self, incoming: InterruptPriority) -> bool {
        incoming >= self.current.min_interrupt_priority()
    }

    /// Enters the toggle activity if the toggle is the equipped ability and
    /// `incoming` may replace the current activity, plays the feedback cue
    /// and dispatches the toggle.
    pub fn activate_toggle(
        &mut self,
        incoming: InterruptPriority,
        engine: &mut StanceLockEngine,
        bridge: &mut ReplicationBridge,
        ctx: &mut EngineContext<'_>,
        outbox: &mut dyn Outbox,
    ) -> Option<ToggleDispatch> {
        if ctx.slot.equipped() != engine.toggle_ability() {
            debug!(entity = %engine.entity(), "toggle activation ignored: ability not equipped");
            return None;
        }
        if !self.can_interrupt(incoming) {
            debug!(
                entity = %engine.entity(),
                current = self.current.name(),
                ?incoming,
                "toggle activation blocked"
            );
            return None;
        }

        self.current = Activity::StanceToggle { age: 0.0 };
        self.last_cue = Some(FeedbackCue::for_profile(self.feedback));
        self.cues_played += 1;

        let dispatch = if engine.role().is_authority() {
            ToggleDispatch::Applied(engine.toggle(ctx))
        } else {
            bridge.request_toggle(engine, ctx, outbox)
        };
        Some(dispatch)
    }

    /// Pre-empts the current activity with a stun when allowed.
    pub fn stun(&mut self, duration: f32) -> bool {
        if !self.can_interrupt(InterruptPriority::Stun) {
            return false;
        }
        self.current = Activity::Stunned {
            remaining: duration,
        };
        true
    }

    pub fn fixed_update(&mut self, dt: f32) {
        let finished = match &mut self.current {
            Activity::Idle => false,
            Activity::StanceToggle { age } => {
                *age += dt;
                *age >= self.toggle_duration
            }
            Activity::Stunned { remaining } => {
                *remaining -= dt;
                *remaining <= 0.0
            }
        };
        if finished {
            self.current = Activity::Idle;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_activity_is_skill_tier() {
        let toggle = Activity::StanceToggle { age: 0.0 };
        assert_eq!(toggle.min_interrupt_priority(), InterruptPriority::Skill);
        assert!(InterruptPriority::Any < InterruptPriority::Skill);
        assert!(InterruptPriority::Stun > InterruptPriority::Skill);
    }

    #[test]
    fn stun_preempts_toggle_but_not_the_reverse() {
        let mut machine = ActivityMachine::new(0.2, FeedbackProfile::Short);
        machine.current = Activity::StanceToggle { age: 0.05 };
        assert!(!machine.can_interrupt(InterruptPriority::Any));
        assert!(machine.stun(1.0));
        assert_eq!(machine.current().name(), "Stunned");
        assert!(!machine.can_interrupt(InterruptPriority::Any));
    }

    #[test]
    fn toggle_returns_to_idle_after_fixed_duration() {
        let mut machine = ActivityMachine::new(0.2, FeedbackProfile::Long);
        machine.current = Activity::StanceToggle { age: 0.0 };
        for _ in 0..11 {
            machine.fixed_update(1.0 / 60.0);
        }
        assert_eq!(machine.current().name(), STANCE_TOGGLE_ACTIVITY);
        for _ in 0..2 {
            machine.fixed_update(1.0 / 60.0);
        }
        assert_eq!(machine.current(), Activity::Idle);
    }

    #[test]
    fn second_stun_refreshes_remaining_time() {
        let mut machine = ActivityMachine::new(0.2, FeedbackProfile::Short);
        assert!(machine.stun(0.5));
        machine.fixed_update(0.4);
        assert!(machine.stun(0.5));
        machine.fixed_update(0.4);
        assert_eq!(machine.current().name(), "Stunned");
        machine.fixed_update(0.2);
        assert_eq!(machine.current(), Activity::Idle);
    }
}
