//! Block slot declarations for composite command kinds.

use serde::Serialize;

use crate::errors::InvalidBlockSlot;

/// Declares one named child block a composite kind owns.
///
/// `min` is the smallest number of children the block accepts and `max`
/// the largest, when bounded. A slot that does not allow empty blocks
/// requires at least one child regardless of `min`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockSlot {
    name: String,
    allow_empty: bool,
    min: usize,
    max: Option<usize>,
}

impl BlockSlot {
    /// Builds a slot, checking `max >= min` and that a non-empty slot can hold a child.
    pub fn new(name: impl Into<String>, allow_empty: bool, min: usize, max: Option<usize>) -> Result<Self, InvalidBlockSlot> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(InvalidBlockSlot {
                slot: name,
                reason: "slot name cannot be empty".into(),
            });
        }
        if let Some(max) = max {
            if max < min {
                return Err(InvalidBlockSlot {
                    slot: name,
                    reason: format!("max ({max}) is smaller than min ({min})"),
                });
            }
            if max == 0 && !allow_empty {
                return Err(InvalidBlockSlot {
                    slot: name,
                    reason: "max of 0 contradicts a slot that cannot be empty".into(),
                });
            }
        }
        Ok(Self {
            name,
            allow_empty,
            min,
            max,
        })
    }

    /// Unbounded slot that may stay empty.
    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            allow_empty: true,
            min: 0,
            max: None,
        }
    }

    /// Unbounded slot that needs at least one child.
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            allow_empty: false,
            min: 1,
            max: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn allow_empty(&self) -> bool {
        self.allow_empty
    }

    pub fn min(&self) -> usize {
        self.min
    }

    pub fn max(&self) -> Option<usize> {
        self.max
    }

    /// Describes why a block with `count` children does not fit this slot.
    pub fn cardinality_problem(&self, count: usize) -> Option<String> {
        if count == 0 && !self.allow_empty {
            return Some(format!("block '{}' cannot be empty", self.name));
        }
        if count < self.min && !(count == 0 && self.allow_empty) {
            return Some(format!("block '{}' needs at least {} command(s), found {}", self.name, self.min, count));
        }
        if let Some(max) = self.max
            && count > max
        {
            return Some(format!("block '{}' accepts at most {} command(s), found {}", self.name, max, count));
        }
        None
    }
}
