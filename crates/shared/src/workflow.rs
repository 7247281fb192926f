//! Directed graph over a workflow's states and transitions.
//!
//! Built once per board view and read-only afterwards; every query is a
//! lookup into maps computed at construction time.

use std::collections::{BTreeSet, HashMap};

use thiserror::Error;

use crate::domain::{StateId, TransitionId, Workflow, WorkflowState, WorkflowTransition};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedWorkflowError {
    #[error("transition {transition_id} references state {state_id} outside the workflow")]
    UnknownState {
        transition_id: TransitionId,
        state_id: StateId,
    },
    #[error("state {0} appears more than once in the workflow")]
    DuplicateState(StateId),
    #[error("workflow has no initial state")]
    MissingInitialState,
    #[error("workflow has {count} initial states, expected exactly one")]
    MultipleInitialStates { count: usize },
}

#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    workflow: Workflow,
    /// Indices into `workflow.states`, sorted by `(order, id)`.
    columns: Vec<usize>,
    index: HashMap<StateId, usize>,
    outgoing: HashMap<StateId, Vec<usize>>,
    initial: usize,
}

impl WorkflowGraph {
    pub fn new(workflow: Workflow) -> Result<Self, MalformedWorkflowError> {
        let mut index = HashMap::with_capacity(workflow.states.len());
        for (position, state) in workflow.states.iter().enumerate() {
            if index.insert(state.id, position).is_some() {
                return Err(MalformedWorkflowError::DuplicateState(state.id));
            }
        }

        let initials: Vec<usize> = workflow
            .states
            .iter()
            .enumerate()
            .filter(|(_, state)| state.is_initial)
            .map(|(position, _)| position)
            .collect();
        let initial = match initials.as_slice() {
            [] => return Err(MalformedWorkflowError::MissingInitialState),
            [only] => *only,
            many => {
                return Err(MalformedWorkflowError::MultipleInitialStates { count: many.len() })
            }
        };

        let mut outgoing: HashMap<StateId, Vec<usize>> = HashMap::new();
        for (position, transition) in workflow.transitions.iter().enumerate() {
            for endpoint in [transition.from_state.id, transition.to_state.id] {
                if !index.contains_key(&endpoint) {
                    return Err(MalformedWorkflowError::UnknownState {
                        transition_id: transition.id,
                        state_id: endpoint,
                    });
                }
            }
            outgoing
                .entry(transition.from_state.id)
                .or_default()
                .push(position);
        }

        let mut columns: Vec<usize> = (0..workflow.states.len()).collect();
        columns.sort_by_key(|&position| {
            let state = &workflow.states[position];
            (state.order, state.id)
        });

        Ok(Self {
            workflow,
            columns,
            index,
            outgoing,
            initial,
        })
    }

    /// Targets of every transition leaving `state_id`. Empty for sinks and
    /// for ids outside the workflow; a self-loop is only reported when the
    /// workflow declares one.
    pub fn allowed_next_states(&self, state_id: StateId) -> BTreeSet<StateId> {
        self.transitions_from(state_id)
            .map(|transition| transition.to_state.id)
            .collect()
    }

    pub fn can_transition(&self, from: StateId, to: StateId) -> bool {
        self.transitions_from(from)
            .any(|transition| transition.to_state.id == to)
    }

    pub fn transitions_from(
        &self,
        state_id: StateId,
    ) -> impl Iterator<Item = &WorkflowTransition> + '_ {
        self.outgoing
            .get(&state_id)
            .into_iter()
            .flatten()
            .map(move |&position| &self.workflow.transitions[position])
    }

    pub fn state(&self, state_id: StateId) -> Option<&WorkflowState> {
        self.index
            .get(&state_id)
            .map(|&position| &self.workflow.states[position])
    }

    pub fn contains_state(&self, state_id: StateId) -> bool {
        self.index.contains_key(&state_id)
    }

    pub fn initial_state(&self) -> &WorkflowState {
        &self.workflow.states[self.initial]
    }

    /// States in board column order: ascending `order`, ties by id.
    pub fn columns(&self) -> impl Iterator<Item = &WorkflowState> + '_ {
        self.columns
            .iter()
            .map(move |&position| &self.workflow.states[position])
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{StateCategory, WorkflowId};

    fn state(id: i64, name: &str, order: i32, is_initial: bool) -> WorkflowState {
        WorkflowState {
            id: StateId(id),
            name: name.to_string(),
            category: StateCategory::Todo,
            order,
            is_initial,
            created_at: None,
        }
    }

    fn edge(id: i64, from: &WorkflowState, to: &WorkflowState) -> WorkflowTransition {
        WorkflowTransition {
            id: TransitionId(id),
            from_state: from.clone(),
            to_state: to.clone(),
            name: format!("{} -> {}", from.name, to.name),
            created_at: None,
        }
    }

    fn workflow(states: Vec<WorkflowState>, transitions: Vec<WorkflowTransition>) -> Workflow {
        Workflow {
            id: WorkflowId(1),
            name: "Default".into(),
            states,
            transitions,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn linear_workflow_reports_single_successor_and_sink() {
        let todo = state(1, "To Do", 1, true);
        let doing = state(2, "In Progress", 2, false);
        let done = state(3, "Done", 3, false);
        let graph = WorkflowGraph::new(workflow(
            vec![todo.clone(), doing.clone(), done.clone()],
            vec![edge(10, &todo, &doing), edge(11, &doing, &done)],
        ))
        .expect("graph");

        assert_eq!(graph.allowed_next_states(todo.id), BTreeSet::from([doing.id]));
        assert_eq!(graph.allowed_next_states(doing.id), BTreeSet::from([done.id]));
        assert!(graph.allowed_next_states(done.id).is_empty());
        assert!(graph.allowed_next_states(StateId(99)).is_empty());
        assert!(!graph.can_transition(todo.id, done.id));
        assert_eq!(graph.initial_state().id, todo.id);
    }

    #[test]
    fn fan_out_and_self_loop_are_reported_verbatim() {
        let a = state(1, "A", 1, true);
        let b = state(2, "B", 2, false);
        let c = state(3, "C", 3, false);
        let graph = WorkflowGraph::new(workflow(
            vec![a.clone(), b.clone(), c.clone()],
            vec![
                edge(1, &a, &b),
                edge(2, &a, &c),
                edge(3, &a, &b),
                edge(4, &b, &b),
            ],
        ))
        .expect("graph");

        assert_eq!(graph.allowed_next_states(a.id), BTreeSet::from([b.id, c.id]));
        assert_eq!(graph.allowed_next_states(b.id), BTreeSet::from([b.id]));
        assert_eq!(graph.transitions_from(a.id).count(), 3);
    }

    #[test]
    fn no_implicit_self_transition() {
        let a = state(1, "A", 1, true);
        let b = state(2, "B", 2, false);
        let graph =
            WorkflowGraph::new(workflow(vec![a.clone(), b.clone()], vec![edge(1, &a, &b)]))
                .expect("graph");
        assert!(!graph.can_transition(a.id, a.id));
    }

    #[test]
    fn columns_sort_by_order_then_id() {
        let graph = WorkflowGraph::new(workflow(
            vec![
                state(7, "Review", 2, false),
                state(5, "Backlog", 2, false),
                state(9, "New", 1, true),
            ],
            Vec::new(),
        ))
        .expect("graph");
        let ids: Vec<i64> = graph.columns().map(|s| s.id.0).collect();
        assert_eq!(ids, vec![9, 5, 7]);
    }

    #[test]
    fn transition_to_foreign_state_is_malformed() {
        let a = state(1, "A", 1, true);
        let foreign = state(42, "Elsewhere", 1, false);
        let err = WorkflowGraph::new(workflow(vec![a.clone()], vec![edge(8, &a, &foreign)]))
            .expect_err("malformed");
        assert_eq!(
            err,
            MalformedWorkflowError::UnknownState {
                transition_id: TransitionId(8),
                state_id: StateId(42),
            }
        );
    }

    #[test]
    fn initial_state_must_be_unique() {
        let err = WorkflowGraph::new(workflow(
            vec![state(1, "A", 1, false), state(2, "B", 2, false)],
            Vec::new(),
        ))
        .expect_err("missing initial");
        assert_eq!(err, MalformedWorkflowError::MissingInitialState);

        let err = WorkflowGraph::new(workflow(
            vec![state(1, "A", 1, true), state(2, "B", 2, true)],
            Vec::new(),
        ))
        .expect_err("two initials");
        assert_eq!(err, MalformedWorkflowError::MultipleInitialStates { count: 2 });
    }

    #[test]
    fn duplicate_state_ids_are_rejected() {
        let err = WorkflowGraph::new(workflow(
            vec![state(1, "A", 1, true), state(1, "A again", 2, false)],
            Vec::new(),
        ))
        .expect_err("duplicate");
        assert_eq!(err, MalformedWorkflowError::DuplicateState(StateId(1)));
    }
}
