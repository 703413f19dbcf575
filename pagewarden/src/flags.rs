//! Named string flags carried across actions and ticks, and the evaluation of
//! flag-check expression trees against them.

use std::collections::HashMap;

use crate::condition;
use crate::errors::EngineError;
use crate::rules::{FlagExpr, FlagMutation};

/// Process-scoped key/value store for cross-action state.
///
/// Values are strings; the arithmetic mutations reinterpret them as floating
/// point. The store lives for one continuous run and is cleared explicitly on
/// session reset, never per tick.
#[derive(Debug, Clone, Default)]
pub struct FlagStore {
    values: HashMap<String, String>,
}

impl FlagStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a flag; a flag never set reads as `""`.
    pub fn get(&self, name: &str) -> String {
        self.values.get(name).cloned().unwrap_or_default()
    }

    pub fn set(&mut self, name: &str, value: &str) {
        self.values.insert(name.to_string(), value.to_string());
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Apply one mutation. `set` always succeeds, initializing the flag if
    /// absent; `incr`/`decr` require both the current value and the operand
    /// to parse as numbers. A mutation with an empty name does nothing.
    pub fn apply(&mut self, mutation: &FlagMutation) -> Result<(), EngineError> {
        if mutation.name.is_empty() {
            return Ok(());
        }
        match mutation.op.to_lowercase().as_str() {
            "set" | "=" => {
                self.set(&mutation.name, &mutation.value);
                Ok(())
            }
            "incr" | "+=" => self.arithmetic(mutation, |current, operand| current + operand),
            "decr" | "-=" => self.arithmetic(mutation, |current, operand| current - operand),
            _ => Err(EngineError::UnknownOperator(mutation.op.clone())),
        }
    }

    /// Apply a mutation list in document order, stopping at the first error.
    pub fn apply_all(&mut self, mutations: &[FlagMutation]) -> Result<(), EngineError> {
        for mutation in mutations {
            self.apply(mutation)?;
        }
        Ok(())
    }

    fn arithmetic(
        &mut self,
        mutation: &FlagMutation,
        op: fn(f64, f64) -> f64,
    ) -> Result<(), EngineError> {
        let current = self.get(&mutation.name);
        let non_numeric = || EngineError::NonNumericFlag {
            name: mutation.name.clone(),
            current: current.clone(),
            operand: mutation.value.clone(),
        };
        let lhs: f64 = current.trim().parse().map_err(|_| non_numeric())?;
        let rhs: f64 = mutation.value.trim().parse().map_err(|_| non_numeric())?;
        self.set(&mutation.name, &op(lhs, rhs).to_string());
        Ok(())
    }
}

impl FlagExpr {
    /// Evaluate the expression tree against `store`.
    ///
    /// An expression with an empty `name` is unconditionally `true` (the
    /// escape hatch for unconditional mutation blocks). Carrying both `and`
    /// and `or` on one node is a definition error. Children are always
    /// evaluated, even when the combined result is already decided, because
    /// their mutation lists must still run; each node applies its own
    /// `true`/`false` list once its result is known. Children therefore
    /// mutate the store before their parent commits, and every mutation is
    /// visible to siblings evaluated later in the same tree. That cascade is
    /// long-standing observed behavior, kept on purpose.
    pub fn evaluate(&self, store: &mut FlagStore) -> Result<bool, EngineError> {
        let mut result = if self.name.is_empty() {
            true
        } else {
            condition::evaluate(&store.get(&self.name), &self.value, &self.condition)?
        };

        if self.and.is_some() && self.or.is_some() {
            return Err(EngineError::ConflictingLogicalOperator);
        }

        if let Some(child) = &self.and {
            let rhs = child.evaluate(store)?;
            result = result && rhs;
        }
        if let Some(child) = &self.or {
            let rhs = child.evaluate(store)?;
            result = result || rhs;
        }

        let mutations = if result {
            &self.when_true
        } else {
            &self.when_false
        };
        if let Some(list) = mutations {
            store.apply_all(list)?;
        }

        Ok(result)
    }
}
