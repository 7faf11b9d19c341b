//! `DeadlockDetector` — Wait-For graph cycle detection and victim
//! selection.
//!
//! Grounded on `petgraph`'s directed-graph cycle detection (already a
//! `coordination` dependency for code-graph analysis), applied here to
//! the agent-to-holder wait relation instead of a dependency graph.

use std::collections::HashMap;
use std::sync::RwLock;

use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;
use tracing::{info, warn};

use crate::events::{EnsembleEvent, SharedEventBus};

use super::types::{AgentSession, WaitEdge};

#[derive(Debug, thiserror::Error)]
pub enum DeadlockError {
    #[error("deadlock detected among agents {agents:?} and auto-break is disabled")]
    Unbroken { agents: Vec<String> },
}

/// DFS/Tarjan-SCC output before victim selection is applied.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub agents: Vec<String>,
    pub edges: Vec<WaitEdge>,
    pub victim: String,
}

/// Caps the length of any single reported cycle (default 10, per spec).
const DEFAULT_MAX_CYCLE_LENGTH: usize = 10;

pub struct DeadlockDetector {
    /// Current Wait-For edges, keyed by waiter agent id for O(1) removal.
    edges: RwLock<HashMap<String, WaitEdge>>,
    max_cycle_length: usize,
    enable_auto_break: bool,
    event_bus: Option<SharedEventBus>,
}

impl DeadlockDetector {
    pub fn new(enable_auto_break: bool) -> Self {
        Self {
            edges: RwLock::new(HashMap::new()),
            max_cycle_length: DEFAULT_MAX_CYCLE_LENGTH,
            enable_auto_break,
            event_bus: None,
        }
    }

    /// Per Design Notes: the detector receives a narrow event sink, it
    /// does not hold the LockManager.
    pub fn with_event_bus(mut self, event_bus: SharedEventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn with_max_cycle_length(mut self, max_cycle_length: usize) -> Self {
        self.max_cycle_length = max_cycle_length;
        self
    }

    /// Record that `waiter` is blocked waiting for `holder` to release
    /// `file_path`. Called by `LockManager` when an `acquire` would block.
    pub fn add_wait(&self, waiter: &str, holder: &str, file_path: &str) {
        if let Some(edge) = WaitEdge::new(waiter, holder, file_path) {
            let mut edges = self.edges.write().expect("lock poisoned");
            edges.insert(waiter.to_string(), edge);
        }
    }

    /// Remove any wait edge for which `agent_id` is either endpoint —
    /// called on release or when the waiter gives up.
    pub fn remove_wait(&self, agent_id: &str) {
        let mut edges = self.edges.write().expect("lock poisoned");
        edges.retain(|waiter, edge| waiter != agent_id && edge.holder_agent_id != agent_id);
    }

    /// Cycle detection via Tarjan's SCC algorithm, O(V+E) as required.
    /// Any strongly-connected component with more than one node is a
    /// cycle; self-loops are excluded by construction (`WaitEdge::new`
    /// rejects them).
    fn find_cycles(&self) -> Vec<Vec<String>> {
        let edges = self.edges.read().expect("lock poisoned");
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for edge in edges.values() {
            graph.add_edge(&edge.waiter_agent_id, &edge.holder_agent_id, ());
        }

        tarjan_scc(&graph)
            .into_iter()
            .filter(|scc| scc.len() > 1)
            .map(|scc| {
                let mut agents: Vec<String> = scc.into_iter().map(String::from).collect();
                agents.truncate(self.max_cycle_length);
                agents
            })
            .collect()
    }

    /// Select the victim: lowest priority, tie-broken by most recently
    /// started, tie-broken by lexicographic agent_id.
    fn select_victim<'a>(
        &self,
        cycle_agents: &[String],
        sessions: &HashMap<String, &'a AgentSession>,
    ) -> String {
        let mut candidates: Vec<&AgentSession> = cycle_agents
            .iter()
            .filter_map(|id| sessions.get(id).copied())
            .collect();

        candidates.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| b.started_at.cmp(&a.started_at))
                .then_with(|| a.agent_id.cmp(&b.agent_id))
        });

        candidates
            .first()
            .map(|s| s.agent_id.clone())
            .unwrap_or_else(|| cycle_agents.first().cloned().unwrap_or_default())
    }

    /// Run detection once. On finding a cycle, selects a victim and (if
    /// `enable_auto_break`) forcibly breaks it by removing the victim's
    /// wait edge and emitting a `DeadlockDetected` event; otherwise
    /// returns `DeadlockError::Unbroken`.
    pub fn detect(
        &self,
        sessions: &HashMap<String, AgentSession>,
    ) -> Result<Vec<CycleReport>, DeadlockError> {
        let cycles = self.find_cycles();
        if cycles.is_empty() {
            return Ok(Vec::new());
        }

        let session_refs: HashMap<String, &AgentSession> =
            sessions.iter().map(|(k, v)| (k.clone(), v)).collect();

        let mut reports = Vec::with_capacity(cycles.len());
        for cycle_agents in cycles {
            let victim = self.select_victim(&cycle_agents, &session_refs);

            if !self.enable_auto_break {
                return Err(DeadlockError::Unbroken {
                    agents: cycle_agents,
                });
            }

            let edges_snapshot: Vec<WaitEdge> = {
                let edges = self.edges.read().expect("lock poisoned");
                cycle_agents
                    .iter()
                    .filter_map(|a| edges.get(a).cloned())
                    .collect()
            };

            warn!(victim = %victim, agents = ?cycle_agents, "deadlock victim selected");
            self.remove_wait(&victim);

            if let Some(bus) = &self.event_bus {
                let _ = bus.publish(EnsembleEvent::DeadlockDetected {
                    agents: cycle_agents.clone(),
                    victim: victim.clone(),
                    timestamp: chrono::Utc::now(),
                });
            }
            info!(victim = %victim, "deadlock broken: DEADLOCK_VICTIM");

            reports.push(CycleReport {
                agents: cycle_agents,
                edges: edges_snapshot,
                victim,
            });
        }

        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locks::types::AgentState;

    fn session(id: &str, priority: i32) -> AgentSession {
        AgentSession::new(id, "worker", priority)
    }

    #[test]
    fn test_no_cycle_no_report() {
        let detector = DeadlockDetector::new(true);
        detector.add_wait("A", "B", "a.py");
        let sessions = HashMap::new();
        let reports = detector.detect(&sessions).unwrap();
        assert!(reports.is_empty());
    }

    #[test]
    fn test_two_cycle_selects_lower_priority_victim() {
        let detector = DeadlockDetector::new(true);
        // A waits on B (B holds a.py), B waits on A (A holds b.py): a cycle.
        detector.add_wait("A", "B", "b.py");
        detector.add_wait("B", "A", "a.py");

        let mut sessions = HashMap::new();
        sessions.insert("A".to_string(), session("A", 5));
        sessions.insert("B".to_string(), session("B", 3));

        let reports = detector.detect(&sessions).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].victim, "B");
    }

    #[test]
    fn test_auto_break_disabled_returns_error() {
        let detector = DeadlockDetector::new(false);
        detector.add_wait("A", "B", "b.py");
        detector.add_wait("B", "A", "a.py");
        let mut sessions = HashMap::new();
        sessions.insert("A".to_string(), session("A", 5));
        sessions.insert("B".to_string(), session("B", 3));

        let result = detector.detect(&sessions);
        assert!(matches!(result, Err(DeadlockError::Unbroken { .. })));
    }

    #[test]
    fn test_remove_wait_clears_both_roles() {
        let detector = DeadlockDetector::new(true);
        detector.add_wait("A", "B", "a.py");
        detector.remove_wait("B");
        let cycles = detector.find_cycles();
        assert!(cycles.is_empty());
    }

    #[test]
    fn test_agent_state_enum_transitions_are_representable() {
        // Sanity check that AgentState values used alongside AgentSession
        // in victim selection round-trip through the type system.
        let s = AgentState::Waiting;
        assert_eq!(s, AgentState::Waiting);
    }
}
