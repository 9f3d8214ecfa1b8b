//! Position-derived step addressing.
//!
//! A path id names a step by where it sits in the control-flow tree, never
//! by its name or arguments. Two runs that walk structurally identical code
//! produce identical id sequences, which is what lets replay line cached
//! results up with the code asking for them.

/// Id handed out when addressing is disabled.
pub const PLACEHOLDER_PATH: &str = "placeholder";

/// Stack of sibling counters, one per nesting level.
///
/// Ancestor counters have already been advanced past the step they contain,
/// so they report `value - 1` when building a child's id.
#[derive(Debug, Clone, Default)]
pub struct PathAddresser {
    counters: Vec<u32>,
    enabled: bool,
}

impl PathAddresser {
    /// Creates an addresser bound to a persisted run, positioned at the root.
    pub fn new() -> Self {
        Self {
            counters: vec![0],
            enabled: true,
        }
    }

    /// Creates an addresser that always yields [`PLACEHOLDER_PATH`].
    pub fn disabled() -> Self {
        Self {
            counters: Vec::new(),
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Current nesting depth; the root level is 1.
    pub fn depth(&self) -> usize {
        self.counters.len()
    }

    /// Opens a nested scope for the steps of the step in progress.
    pub fn enter(&mut self) {
        if self.enabled {
            self.counters.push(0);
        }
    }

    /// Closes the innermost scope. The root scope is never popped.
    pub fn exit(&mut self) {
        if self.enabled && self.counters.len() > 1 {
            self.counters.pop();
        }
    }

    /// Returns the id of the step about to run and advances the innermost counter.
    pub fn next_id(&mut self) -> String {
        if !self.enabled {
            return PLACEHOLDER_PATH.to_string();
        }

        let last = self.counters.len() - 1;
        let id = self
            .counters
            .iter()
            .enumerate()
            .map(|(level, counter)| {
                if level == last {
                    counter.to_string()
                } else {
                    counter.saturating_sub(1).to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(".");

        self.counters[last] += 1;
        id
    }
}
