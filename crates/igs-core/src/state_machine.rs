//! Table-driven finite state machine.
//!
//! Sessions and tools describe their behaviour as an explicit table of
//! `(state, input) -> (next state, action)` entries. The table is built once
//! by [`StateMachineBuilder::build`], which fills every pair the caller did
//! not list with a self-transition to the "invalid request" action. The
//! resulting machine is therefore total over its state and input sets and can
//! be inspected ([`StateMachine::transitions`]) or rendered as Graphviz
//! ([`StateMachine::export_dot`]).
//!
//! The machine does not execute actions itself. [`StateMachine::process_next`]
//! pops one queued input, moves to the next state and hands back the action
//! for the owner to run. Actions push follow-up inputs (typically `Success`
//! or `Failure`) with [`StateMachine::push_input`]; the owner keeps calling
//! `process_next` until the queue is empty.
//!
//! # Example
//!
//! ```
//! use igs_core::state_machine::{StateMachineBuilder, Symbol};
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
//! enum Light { Off, On }
//! impl Symbol for Light {
//!     fn all() -> &'static [Self] { &[Light::Off, Light::On] }
//!     fn name(&self) -> &'static str { match self { Light::Off => "Off", Light::On => "On" } }
//! }
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
//! enum Switch { Flip }
//! impl Symbol for Switch {
//!     fn all() -> &'static [Self] { &[Switch::Flip] }
//!     fn name(&self) -> &'static str { "Flip" }
//! }
//!
//! let mut machine = StateMachineBuilder::new("light", Light::Off)
//!     .transition(Light::Off, Switch::Flip, Light::On, "turn_on")
//!     .transition(Light::On, Switch::Flip, Light::Off, "turn_off")
//!     .build("invalid");
//!
//! machine.push_input(Switch::Flip);
//! let step = machine.process_next().unwrap();
//! assert_eq!(step.action, "turn_on");
//! assert_eq!(machine.state(), Light::On);
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::fmt::{self, Debug, Write as _};

/// Closed set of named values usable as states or inputs.
pub trait Symbol: Copy + Eq + Ord + Debug + Send + Sync + 'static {
    /// Every value of the set, in declaration order.
    fn all() -> &'static [Self];

    /// Stable name used in logs, events and diagrams.
    fn name(&self) -> &'static str;
}

/// One entry of the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition<S, I, A> {
    /// State the entry applies to.
    pub from: S,
    /// Input the entry applies to.
    pub input: I,
    /// State after the input is processed.
    pub to: S,
    /// Action the owner runs after entering `to`.
    pub action: A,
    /// `false` for entries synthesized by [`StateMachineBuilder::build`].
    pub valid: bool,
}

/// Builder collecting the explicitly listed transitions.
pub struct StateMachineBuilder<S, I, A> {
    name: &'static str,
    initial: S,
    entries: BTreeMap<(S, I), (S, A)>,
}

impl<S: Symbol, I: Symbol, A: Copy + Debug> StateMachineBuilder<S, I, A> {
    /// Start a table for a machine in `initial` state.
    pub fn new(name: &'static str, initial: S) -> Self {
        Self {
            name,
            initial,
            entries: BTreeMap::new(),
        }
    }

    /// Add `(from, input) -> (to, action)`. A later entry for the same pair
    /// replaces an earlier one.
    #[must_use]
    pub fn transition(mut self, from: S, input: I, to: S, action: A) -> Self {
        self.entries.insert((from, input), (to, action));
        self
    }

    /// Add the same input/action for several source states.
    #[must_use]
    pub fn transitions_from(mut self, from: &[S], input: I, to: S, action: A) -> Self {
        for &state in from {
            self.entries.insert((state, input), (to, action));
        }
        self
    }

    /// Add a self-transition with `action` for several source states.
    #[must_use]
    pub fn self_transitions(mut self, from: &[S], input: I, action: A) -> Self {
        for &state in from {
            self.entries.insert((state, input), (state, action));
        }
        self
    }

    /// Freeze the table. Every `(state, input)` pair not listed maps to a
    /// self-transition carrying `invalid_action`.
    pub fn build(self, invalid_action: A) -> StateMachine<S, I, A> {
        let mut table = BTreeMap::new();
        for &state in S::all() {
            for &input in I::all() {
                let entry = match self.entries.get(&(state, input)) {
                    Some(&(to, action)) => Transition {
                        from: state,
                        input,
                        to,
                        action,
                        valid: true,
                    },
                    None => Transition {
                        from: state,
                        input,
                        to: state,
                        action: invalid_action,
                        valid: false,
                    },
                };
                table.insert((state, input), entry);
            }
        }
        StateMachine {
            name: self.name,
            state: self.initial,
            table,
            queue: VecDeque::new(),
        }
    }
}

/// Result of processing one queued input.
pub type Step<S, I, A> = Transition<S, I, A>;

/// Total, table-driven state machine with an input queue.
pub struct StateMachine<S, I, A> {
    name: &'static str,
    state: S,
    table: BTreeMap<(S, I), Transition<S, I, A>>,
    queue: VecDeque<I>,
}

impl<S: Symbol, I: Symbol, A: Copy + Debug> StateMachine<S, I, A> {
    /// Machine name used in logs.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Current state.
    pub fn state(&self) -> S {
        self.state
    }

    /// Queue an input. Inputs are processed in FIFO order.
    pub fn push_input(&mut self, input: I) {
        self.queue.push_back(input);
    }

    /// Whether inputs are waiting to be processed.
    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Pop the next input, move to the target state and return the step.
    ///
    /// Returns `None` when the queue is empty.
    pub fn process_next(&mut self) -> Option<Step<S, I, A>> {
        let input = self.queue.pop_front()?;
        let step = self.lookup(self.state, input)?;
        tracing::trace!(
            machine = self.name,
            from = step.from.name(),
            input = input.name(),
            to = step.to.name(),
            action = ?step.action,
            "state machine step"
        );
        self.state = step.to;
        Some(step)
    }

    /// Table entry for `(state, input)`.
    pub fn lookup(&self, state: S, input: I) -> Option<Transition<S, I, A>> {
        self.table.get(&(state, input)).copied()
    }

    /// All table entries, ordered by state then input.
    pub fn transitions(&self) -> impl Iterator<Item = &Transition<S, I, A>> {
        self.table.values()
    }

    /// Whether every `(state, input)` pair has an entry.
    pub fn is_total(&self) -> bool {
        S::all()
            .iter()
            .all(|&s| I::all().iter().all(|&i| self.table.contains_key(&(s, i))))
    }

    /// Render the table as a Graphviz digraph.
    ///
    /// Synthesized invalid-request entries are omitted unless
    /// `include_invalid` is set.
    pub fn export_dot(&self, include_invalid: bool) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "digraph {} {{", self.name);
        let _ = writeln!(out, "  rankdir=LR;");
        for &state in S::all() {
            let shape = if state == self.state {
                "doublecircle"
            } else {
                "ellipse"
            };
            let _ = writeln!(out, "  \"{}\" [shape={}];", state.name(), shape);
        }
        for entry in self.table.values() {
            if !entry.valid && !include_invalid {
                continue;
            }
            let style = if entry.valid { "solid" } else { "dashed" };
            let _ = writeln!(
                out,
                "  \"{}\" -> \"{}\" [label=\"{}\", style={}];",
                entry.from.name(),
                entry.to.name(),
                entry.input.name(),
                style
            );
        }
        out.push_str("}\n");
        out
    }
}

impl<S: Symbol, I: Symbol, A> fmt::Debug for StateMachine<S, I, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("name", &self.name)
            .field("state", &self.state.name())
            .field("pending", &self.queue.len())
            .finish()
    }
}

/// Implements [`Symbol`] and `Display` for a fieldless enum.
#[macro_export]
macro_rules! symbol_enum {
    ($ty:ident { $($variant:ident),+ $(,)? }) => {
        impl $crate::state_machine::Symbol for $ty {
            fn all() -> &'static [Self] {
                &[$($ty::$variant),+]
            }

            fn name(&self) -> &'static str {
                match self {
                    $($ty::$variant => stringify!($variant)),+
                }
            }
        }

        impl ::std::fmt::Display for $ty {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str($crate::state_machine::Symbol::name(self))
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    enum Door {
        Closed,
        Opening,
        Open,
    }
    symbol_enum!(Door { Closed, Opening, Open });

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    enum Cmd {
        Open,
        Success,
        Failure,
    }
    symbol_enum!(Cmd { Open, Success, Failure });

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Act {
        Motor,
        Done,
        Back,
        Invalid,
    }

    fn door() -> StateMachine<Door, Cmd, Act> {
        StateMachineBuilder::new("door", Door::Closed)
            .transition(Door::Closed, Cmd::Open, Door::Opening, Act::Motor)
            .transition(Door::Opening, Cmd::Success, Door::Open, Act::Done)
            .transition(Door::Opening, Cmd::Failure, Door::Closed, Act::Back)
            .build(Act::Invalid)
    }

    #[test]
    fn build_fills_missing_pairs() {
        let machine = door();
        assert!(machine.is_total());
        assert_eq!(machine.transitions().count(), 9);
        assert_eq!(machine.transitions().filter(|t| t.valid).count(), 3);

        let invalid = machine.lookup(Door::Open, Cmd::Open).unwrap();
        assert_eq!(invalid.to, Door::Open);
        assert_eq!(invalid.action, Act::Invalid);
        assert!(!invalid.valid);
    }

    #[test]
    fn queued_inputs_drive_the_machine() {
        let mut machine = door();
        machine.push_input(Cmd::Open);

        let step = machine.process_next().unwrap();
        assert_eq!(step.action, Act::Motor);
        assert_eq!(machine.state(), Door::Opening);

        machine.push_input(Cmd::Failure);
        let step = machine.process_next().unwrap();
        assert_eq!(step.action, Act::Back);
        assert_eq!(machine.state(), Door::Closed);
        assert!(machine.process_next().is_none());
    }

    #[test]
    fn invalid_input_keeps_state() {
        let mut machine = door();
        machine.push_input(Cmd::Success);
        let step = machine.process_next().unwrap();
        assert_eq!(step.action, Act::Invalid);
        assert_eq!(machine.state(), Door::Closed);
    }

    #[test]
    fn dot_export_lists_valid_edges() {
        let dot = door().export_dot(false);
        assert!(dot.starts_with("digraph door {"));
        assert!(dot.contains("\"Closed\" -> \"Opening\" [label=\"Open\", style=solid];"));
        assert!(!dot.contains("style=dashed"));
        assert!(door().export_dot(true).contains("style=dashed"));
    }

    #[test]
    fn symbol_display_uses_variant_name() {
        assert_eq!(Door::Opening.to_string(), "Opening");
        assert_eq!(Cmd::all().len(), 3);
    }
}
