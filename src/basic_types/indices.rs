use crate::basic_types::StorageKey;

/// Declares a strongly-typed 32-bit index. The inner value is an `i32` so
/// that sentinel values (e.g. "invalid") can be represented as negatives;
/// indexing a [`KeyedVec`](crate::basic_types::KeyedVec) with a sentinel is a
/// bug caught by the bounds check.
macro_rules! strong_index {
    ($(#[$doc:meta])* $vis:vis $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        $vis struct $name(pub(crate) i32);

        impl $name {
            $vis fn new(index: usize) -> Self {
                $name(index as i32)
            }

            pub(crate) fn value(self) -> i32 {
                self.0
            }
        }

        impl StorageKey for $name {
            fn index(&self) -> usize {
                debug_assert!(self.0 >= 0, "indexing with a sentinel value");
                self.0 as usize
            }

            fn create_from_index(index: usize) -> Self {
                $name(index as i32)
            }
        }
    };
}

strong_index!(
    /// Identifies a variable of the original problem.
    pub VariableIndex
);
strong_index!(
    /// Identifies a constraint, following the convention of the local-search
    /// maintainer: index 0 is the objective pseudo-constraint.
    pub(crate) ConstraintIndex
);
strong_index!(
    /// Position of a term inside the per-constraint term list.
    pub(crate) TermIndex
);
strong_index!(
    /// Position of an entry inside the per-variable sparse column.
    pub(crate) EntryIndex
);
strong_index!(
    /// Identifies an optimizer inside a portfolio.
    pub(crate) OptimizerIndex
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic_types::KeyedVec;

    #[test]
    fn strong_indices_key_their_own_vectors() {
        let mut values: KeyedVec<VariableIndex, i64> = KeyedVec::default();
        let first = values.push(10);
        let second = values.push(20);

        assert_eq!(first, VariableIndex(0));
        assert_eq!(values[second], 20);
        assert_eq!(values.keys().collect::<Vec<_>>(), vec![first, second]);
    }
}
