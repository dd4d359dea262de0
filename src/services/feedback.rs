//! services/feedback.rs
//! Turns delayed resolution events into reward-weighted agent updates.

use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::events::ComplaintResolved;
use crate::services::agent::{QLearningAgent, StateVector};
use crate::services::audit::AuditLog;
use crate::services::reward::{ResolutionOutcome, resolution_reward};

pub struct FeedbackProcessor {
    agent: Arc<QLearningAgent>,
    audit: Arc<AuditLog>,
    save_every: usize,
    updates: AtomicUsize,
}

impl FeedbackProcessor {
    pub fn new(agent: Arc<QLearningAgent>, audit: Arc<AuditLog>, save_every: usize) -> Self {
        Self {
            agent,
            audit,
            save_every: save_every.max(1),
            updates: AtomicUsize::new(0),
        }
    }

    /// Apply one resolution outcome to the agent.
    ///
    /// The event must carry the state the agent acted on and the action it
    /// took, both recorded at decision time; without them there is nothing
    /// to learn from and the event is dropped with a log line. There is no
    /// true continuation state for a resolved complaint, so the update is a
    /// self-transition (`next_state = state`), treating each complaint as a
    /// one-decision episode.
    pub fn process(&self, ev: &ComplaintResolved) {
        let (Some(snapshot), Some(action)) = (&ev.original_state, ev.action_taken) else {
            tracing::warn!(
                ticket_id = %ev.ticket_id,
                "resolution event without recorded state/action; dropping"
            );
            return;
        };

        let state = StateVector::from_snapshot(snapshot);
        let outcome = ResolutionOutcome::from_event(ev);
        let reward = resolution_reward(action, &outcome);

        self.agent.update(&state, action, reward, &state);
        tracing::info!(ticket_id = %ev.ticket_id, reward, "RL agent updated from resolution");
        self.audit.record_action(
            "feedback",
            "agent_updated",
            &json!({ "ticketId": ev.ticket_id, "action": action, "reward": reward }),
            "low",
        );

        let n = self.updates.fetch_add(1, Ordering::SeqCst) + 1;
        if n % self.save_every == 0 {
            if let Err(err) = self.agent.save_policy() {
                tracing::error!(%err, "periodic policy save failed");
            }
        }
    }

    pub fn updates_applied(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}
