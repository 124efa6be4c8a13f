use crate::bop_assert_simple;
use crate::engine::sat::Literal;

/// Identifies a clause in the [`ClauseAllocator`]. Code zero is reserved as
/// the null value and never allocated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct ClauseReference(u32);

#[derive(Debug)]
pub(crate) struct Clause {
    literals: Vec<Literal>,
    is_learned: bool,
}

impl Clause {
    fn new(literals: Vec<Literal>, is_learned: bool) -> Self {
        Clause {
            literals,
            is_learned,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.literals.len()
    }

    pub(crate) fn literals(&self) -> &[Literal] {
        &self.literals
    }
}

impl std::fmt::Display for Clause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (index, literal) in self.literals.iter().enumerate() {
            if index > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", literal.signed_value())?;
        }
        if self.is_learned {
            write!(f, " (learned)")?;
        }
        Ok(())
    }
}

impl std::ops::Index<usize> for Clause {
    type Output = Literal;
    fn index(&self, index: usize) -> &Literal {
        &self.literals[index]
    }
}

impl std::ops::IndexMut<usize> for Clause {
    fn index_mut(&mut self, index: usize) -> &mut Literal {
        &mut self.literals[index]
    }
}

/// Owns all clauses of two or more literals. Unit clauses are turned into
/// root assignments and never stored here.
#[derive(Debug, Default)]
pub(crate) struct ClauseAllocator {
    allocated_clauses: Vec<Clause>,
}

impl ClauseAllocator {
    pub(crate) fn create_clause(
        &mut self,
        literals: Vec<Literal>,
        is_learned: bool,
    ) -> ClauseReference {
        bop_assert_simple!(literals.len() >= 2);

        // Clause reference id zero is kept as the null value, never to be
        // allocated at that position.
        let clause_reference = ClauseReference(self.allocated_clauses.len() as u32 + 1);
        self.allocated_clauses.push(Clause::new(literals, is_learned));
        clause_reference
    }

    pub(crate) fn get_clause(&self, clause_reference: ClauseReference) -> &Clause {
        // -1 since clause ids go from one, and not zero.
        &self.allocated_clauses[clause_reference.0 as usize - 1]
    }

    pub(crate) fn get_mutable_clause(&mut self, clause_reference: ClauseReference) -> &mut Clause {
        &mut self.allocated_clauses[clause_reference.0 as usize - 1]
    }
}

/// An entry of a watch list. The cached literal is checked before touching
/// the clause memory; often it is true in practice.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ClauseWatcher {
    pub(crate) cached_literal: Literal,
    pub(crate) clause_reference: ClauseReference,
}
