use crate::engine::sat::BooleanVariable;
use crate::engine::sat::Literal;

/// The truth value of every SAT variable: true, false or unassigned.
#[derive(Clone, Debug, Default)]
pub(crate) struct VariablesAssignment {
    values: Vec<Option<bool>>,
}

impl VariablesAssignment {
    pub(crate) fn grow_to(&mut self, num_variables: usize) {
        if num_variables > self.values.len() {
            self.values.resize(num_variables, None);
        }
    }

    pub(crate) fn num_variables(&self) -> usize {
        self.values.len()
    }

    pub(crate) fn variable_is_assigned(&self, variable: BooleanVariable) -> bool {
        self.values[variable.index()].is_some()
    }

    pub(crate) fn literal_is_assigned(&self, literal: Literal) -> bool {
        self.variable_is_assigned(literal.variable())
    }

    pub(crate) fn literal_is_true(&self, literal: Literal) -> bool {
        self.values[literal.variable().index()] == Some(literal.is_positive())
    }

    pub(crate) fn literal_is_false(&self, literal: Literal) -> bool {
        self.values[literal.variable().index()] == Some(!literal.is_positive())
    }

    pub(crate) fn assign(&mut self, literal: Literal) {
        debug_assert!(!self.literal_is_assigned(literal));
        self.values[literal.variable().index()] = Some(literal.is_positive());
    }

    pub(crate) fn unassign(&mut self, variable: BooleanVariable) -> bool {
        let value = self.values[variable.index()]
            .expect("only assigned variables can be unassigned");
        self.values[variable.index()] = None;
        value
    }
}
