//! Refresh orchestration for the status view.
//!
//! The machine is pure: [`RefreshMachine::handle`] takes an event and
//! returns the effects the owner must carry out. A refresh in flight is
//! never restarted; anything that arrives meanwhile marks its result stale
//! and asks for exactly one follow-up.

/// Identifies one refresh so late results can be recognised
pub type Generation = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshState {
    #[default]
    Idle,
    Refreshing {
        generation: Generation,
        /// Something changed since this refresh started
        follow_up: bool,
    },
    /// A result is drawn and waiting to be presented
    Rendered,
    /// The drawn tree no longer matches the repository
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshEvent {
    /// The user (or auto-refresh) asked for a refresh
    Requested,
    /// The watcher saw the repository change
    ExternalChange,
    Completed { generation: Generation },
    Failed { generation: Generation },
    /// The UI has shown the rendered result
    Presented,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshEffect {
    StartRefresh { generation: Generation },
    Render,
    MarkStale,
    ClearStale,
    /// Issue [`RefreshEvent::Requested`] once the current result is handled
    ScheduleFollowUp,
    DiscardResult,
}

#[derive(Debug, Clone, Default)]
pub struct RefreshMachine {
    state: RefreshState,
    generation: Generation,
}

impl RefreshMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RefreshState {
        self.state
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(self.state, RefreshState::Refreshing { .. })
    }

    pub fn handle(&mut self, event: RefreshEvent) -> Vec<RefreshEffect> {
        use RefreshEffect::*;
        use RefreshEvent::*;

        let (next, effects) = match (self.state, event) {
            (RefreshState::Idle | RefreshState::Rendered, Requested) => {
                let generation = self.next_generation();
                (
                    RefreshState::Refreshing {
                        generation,
                        follow_up: false,
                    },
                    vec![StartRefresh { generation }],
                )
            }
            (RefreshState::Stale, Requested) => {
                let generation = self.next_generation();
                (
                    RefreshState::Refreshing {
                        generation,
                        follow_up: false,
                    },
                    vec![ClearStale, StartRefresh { generation }],
                )
            }
            (RefreshState::Idle | RefreshState::Rendered, ExternalChange) => {
                (RefreshState::Stale, vec![MarkStale])
            }
            (RefreshState::Stale, ExternalChange) => (RefreshState::Stale, vec![]),

            (RefreshState::Refreshing { generation, .. }, Requested | ExternalChange) => (
                RefreshState::Refreshing {
                    generation,
                    follow_up: true,
                },
                vec![],
            ),

            (
                RefreshState::Refreshing {
                    generation,
                    follow_up,
                },
                Completed { generation: done },
            ) if generation == done => {
                if follow_up {
                    (RefreshState::Stale, vec![Render, MarkStale, ScheduleFollowUp])
                } else {
                    (RefreshState::Rendered, vec![Render])
                }
            }
            (
                RefreshState::Refreshing {
                    generation,
                    follow_up,
                },
                Failed { generation: failed },
            ) if generation == failed => {
                if follow_up {
                    (RefreshState::Stale, vec![MarkStale, ScheduleFollowUp])
                } else {
                    (RefreshState::Idle, vec![])
                }
            }
            (state, Completed { .. } | Failed { .. }) => (state, vec![DiscardResult]),

            (RefreshState::Rendered, Presented) => (RefreshState::Idle, vec![]),
            (state, Presented) => (state, vec![]),
        };

        tracing::trace!(from = ?self.state, to = ?next, ?event, ?effects, "refresh transition");
        self.state = next;
        effects
    }

    fn next_generation(&mut self) -> Generation {
        self.generation += 1;
        self.generation
    }
}
