use crate::basic_types::StorageKey;

/// A sparse set over integers in `[0, n)` with backtracking support.
///
/// Besides membership, the set maintains its exact size and a *superset* of
/// its members: every element whose state changed since the last
/// [`BacktrackableIntegerSet::clear_and_resize`]. Iterating the superset is
/// cheap even when most elements have left the set again, which is exactly
/// the access pattern of the possibly-infeasible-constraints set.
#[derive(Debug)]
pub(crate) struct BacktrackableIntegerSet<I> {
    size: i32,

    /// Contains the elements whose status has been changed at least once.
    stack: Vec<I>,
    in_stack: Vec<bool>,

    /// The `size` and `stack.len()` at each backtracking level not yet
    /// backtracked over.
    saved_sizes: Vec<i32>,
    saved_stack_sizes: Vec<usize>,
}

impl<I: StorageKey + Copy> BacktrackableIntegerSet<I> {
    pub(crate) fn new() -> Self {
        BacktrackableIntegerSet {
            size: 0,
            stack: vec![],
            in_stack: vec![],
            saved_sizes: vec![],
            saved_stack_sizes: vec![],
        }
    }

    /// Prepares the set for integers in `[0, n)` and empties it. This runs in
    /// `O(n)`; once sized, prefer [`BacktrackableIntegerSet::backtrack_all`].
    pub(crate) fn clear_and_resize(&mut self, n: usize) {
        self.size = 0;
        self.saved_sizes.clear();
        self.saved_stack_sizes.clear();
        self.stack.clear();
        self.in_stack.clear();
        self.in_stack.resize(n, false);
    }

    /// Changes the state of `i` to be inside or outside the set. Important:
    /// only call with the opposite of the current state, otherwise `size` is
    /// off.
    pub(crate) fn change_state(&mut self, i: I, should_be_inside: bool) {
        self.size += if should_be_inside { 1 } else { -1 };
        if !self.in_stack[i.index()] {
            self.in_stack[i.index()] = true;
            self.stack.push(i);
        }
    }

    /// The exact number of elements currently in the set (not its capacity).
    pub(crate) fn size(&self) -> i32 {
        self.size
    }

    /// A superset of the current set of integers.
    pub(crate) fn superset(&self) -> &[I] {
        &self.stack
    }

    pub(crate) fn add_backtracking_level(&mut self) {
        self.saved_stack_sizes.push(self.stack.len());
        self.saved_sizes.push(self.size);
    }

    /// Restores the state of the last [`BacktrackableIntegerSet::add_backtracking_level`].
    /// With no level left this behaves like [`BacktrackableIntegerSet::backtrack_all`].
    pub(crate) fn backtrack_one_level(&mut self) {
        match self.saved_stack_sizes.pop() {
            None => self.backtrack_all(),
            Some(saved_stack_size) => {
                for i in saved_stack_size..self.stack.len() {
                    self.in_stack[self.stack[i].index()] = false;
                }
                self.stack.truncate(saved_stack_size);
                self.size = self.saved_sizes.pop().unwrap();
            }
        }
    }

    /// Restores the state right after the last
    /// [`BacktrackableIntegerSet::clear_and_resize`].
    pub(crate) fn backtrack_all(&mut self) {
        for element in &self.stack {
            self.in_stack[element.index()] = false;
        }
        self.stack.clear();
        self.saved_stack_sizes.clear();
        self.size = 0;
        self.saved_sizes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic_types::ConstraintIndex;

    #[test]
    fn one_level_backtrack_restores_size_and_stack() {
        let mut set: BacktrackableIntegerSet<ConstraintIndex> = BacktrackableIntegerSet::new();
        set.clear_and_resize(10);

        set.change_state(ConstraintIndex(3), true);
        set.add_backtracking_level();
        set.change_state(ConstraintIndex(5), true);
        set.change_state(ConstraintIndex(3), false);
        assert_eq!(set.size(), 1);
        assert_eq!(set.superset().len(), 2);

        set.backtrack_one_level();
        assert_eq!(set.size(), 1);
        assert_eq!(set.superset(), &[ConstraintIndex(3)]);
    }

    #[test]
    fn superset_keeps_elements_that_left_the_set() {
        let mut set: BacktrackableIntegerSet<ConstraintIndex> = BacktrackableIntegerSet::new();
        set.clear_and_resize(4);
        set.change_state(ConstraintIndex(1), true);
        set.change_state(ConstraintIndex(1), false);
        assert_eq!(set.size(), 0);
        assert_eq!(set.superset(), &[ConstraintIndex(1)]);
    }

    #[test]
    fn backtrack_all_restores_the_resized_state() {
        let mut set: BacktrackableIntegerSet<ConstraintIndex> = BacktrackableIntegerSet::new();
        set.clear_and_resize(4);
        set.add_backtracking_level();
        set.change_state(ConstraintIndex(0), true);
        set.add_backtracking_level();
        set.change_state(ConstraintIndex(2), true);

        set.backtrack_all();
        assert_eq!(set.size(), 0);
        assert!(set.superset().is_empty());

        // Backtracking past the initial state keeps the set empty.
        set.backtrack_one_level();
        assert_eq!(set.size(), 0);
    }
}
