//! A small named-state, named-transition finite state machine, the source
//! of truth for session lifecycle.

use crate::error::ProtocolError;
use std::collections::HashMap;
use std::sync::Mutex;

/// A guard vetoes a transition by returning `false`.
pub type Guard = Box<dyn Fn() -> bool + Send + Sync>;
/// An action runs after a transition commits.
pub type Action = Box<dyn Fn() + Send + Sync>;
/// A hook runs on entering or leaving a state.
pub type Hook = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    /// A guard vetoed the transition; the state did not change.
    Guarded,
}

struct Transition {
    to: String,
    guard: Option<Guard>,
    action: Option<Action>,
}

/// A finite state machine over string-named states.
pub struct StateMachine {
    current: Mutex<String>,
    transitions: HashMap<(String, String), Transition>,
    terminal_states: Vec<String>,
    recovery_enabled: bool,
    on_enter: Mutex<Vec<Hook>>,
    on_leave: Mutex<Vec<Hook>>,
}

impl StateMachine {
    /// `initial` is the starting state. `closed` and `error` are always
    /// terminal; `recovery_enabled` additionally legalizes `error -> ready`.
    pub fn new(initial: impl Into<String>, recovery_enabled: bool) -> Self {
        StateMachine {
            current: Mutex::new(initial.into()),
            transitions: HashMap::new(),
            terminal_states: vec!["closed".to_owned(), "error".to_owned()],
            recovery_enabled,
            on_enter: Mutex::new(Vec::new()),
            on_leave: Mutex::new(Vec::new()),
        }
    }

    /// Register a legal `(from, event)` transition to `to`.
    pub fn add_transition(
        &mut self,
        from: impl Into<String>,
        event: impl Into<String>,
        to: impl Into<String>,
        guard: Option<Guard>,
        action: Option<Action>,
    ) {
        self.transitions.insert(
            (from.into(), event.into()),
            Transition {
                to: to.into(),
                guard,
                action,
            },
        );
    }

    pub fn on_enter(&self, hook: Hook) {
        self.on_enter.lock().unwrap_or_else(|e| e.into_inner()).push(hook);
    }

    pub fn on_leave(&self, hook: Hook) {
        self.on_leave.lock().unwrap_or_else(|e| e.into_inner()).push(hook);
    }

    pub fn current(&self) -> String {
        self.current.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn is_terminal(&self, state: &str) -> bool {
        self.terminal_states.iter().any(|s| s == state)
    }

    /// Fire `event` from the current state. Unregistered `(state, event)`
    /// pairs, and any transition attempted out of a terminal state other
    /// than the legal `closed`/`error` exits, are a `ProtocolViolation` —
    /// the machine never silently ignores an unknown event.
    pub fn fire(&self, event: &str) -> Result<TransitionOutcome, ProtocolError> {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());

        if *current == "closed" {
            return Err(ProtocolError::ProtocolViolation(
                "no transitions are legal from closed".to_owned(),
            ));
        }
        if *current == "error" {
            let recovering = self.recovery_enabled && event == "recover";
            let closing = event == "close";
            if !recovering && !closing {
                return Err(ProtocolError::ProtocolViolation(
                    "only close (and recover, if enabled) are legal from error".to_owned(),
                ));
            }
        }

        let key = (current.clone(), event.to_owned());
        let Some(transition) = self.transitions.get(&key) else {
            return Err(ProtocolError::ProtocolViolation(format!(
                "no transition registered for ({current}, {event})"
            )));
        };

        if let Some(guard) = &transition.guard {
            if !guard() {
                return Ok(TransitionOutcome::Guarded);
            }
        }

        let from = current.clone();
        let to = transition.to.clone();
        if let Some(action) = &transition.action {
            action();
        }

        for hook in self.on_leave.lock().unwrap_or_else(|e| e.into_inner()).iter() {
            hook(&from);
        }
        *current = to.clone();
        drop(current);
        for hook in self.on_enter.lock().unwrap_or_else(|e| e.into_inner()).iter() {
            hook(&to);
        }

        Ok(TransitionOutcome::Applied)
    }

    pub fn is_current_terminal(&self) -> bool {
        self.is_terminal(&self.current())
    }
}
