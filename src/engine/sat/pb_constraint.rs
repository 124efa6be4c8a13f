use crate::engine::sat::Literal;

/// One term of a linear pseudo-Boolean constraint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct LiteralWithCoeff {
    pub(crate) literal: Literal,
    pub(crate) coefficient: i64,
}

impl LiteralWithCoeff {
    pub(crate) fn new(literal: Literal, coefficient: i64) -> Self {
        LiteralWithCoeff {
            literal,
            coefficient,
        }
    }

    pub(crate) fn from_signed(signed_literal: i32, coefficient: i64) -> Self {
        LiteralWithCoeff {
            literal: Literal::from_signed(signed_literal),
            coefficient,
        }
    }
}

/// Identifies a linear constraint inside the solver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct LinearConstraintId(pub(crate) u32);

/// A canonical pseudo-Boolean constraint `sum coeff_i * l_i <= rhs` with all
/// coefficients strictly positive, terms sorted by decreasing coefficient.
///
/// The activity (sum of the coefficients of the currently-true literals) is
/// maintained incrementally by the solver; a conflict occurs when it exceeds
/// the bound, and any unassigned literal whose coefficient no longer fits in
/// the slack is propagated to false.
#[derive(Clone, Debug)]
pub(crate) struct UpperBoundedLinearConstraint {
    pub(crate) terms: Vec<LiteralWithCoeff>,
    pub(crate) rhs: i64,
    pub(crate) activity: i64,
}

impl UpperBoundedLinearConstraint {
    pub(crate) fn slack(&self) -> i64 {
        self.rhs - self.activity
    }
}

/// Rewrites `sum terms <= rhs` so that every coefficient is positive, by
/// replacing `c * l` with `-c * !l + c` for negative `c`. Returns the terms
/// sorted by decreasing coefficient together with the adjusted bound.
pub(crate) fn canonicalize_upper_bounded(
    terms: &[LiteralWithCoeff],
    mut rhs: i64,
) -> (Vec<LiteralWithCoeff>, i64) {
    let mut canonical: Vec<LiteralWithCoeff> = Vec::with_capacity(terms.len());
    for term in terms {
        debug_assert!(term.coefficient != 0);
        if term.coefficient > 0 {
            canonical.push(*term);
        } else {
            canonical.push(LiteralWithCoeff::new(!term.literal, -term.coefficient));
            rhs -= term.coefficient;
        }
    }
    canonical.sort_by(|a, b| b.coefficient.cmp(&a.coefficient));
    (canonical, rhs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalization_flips_negative_terms() {
        // 2*x1 - 3*x2 <= 1 becomes 3*(!x2) + 2*x1 <= 4.
        let terms = vec![
            LiteralWithCoeff::from_signed(1, 2),
            LiteralWithCoeff::from_signed(2, -3),
        ];
        let (canonical, rhs) = canonicalize_upper_bounded(&terms, 1);
        assert_eq!(rhs, 4);
        assert_eq!(canonical[0].coefficient, 3);
        assert_eq!(canonical[0].literal, Literal::from_signed(-2));
        assert_eq!(canonical[1].coefficient, 2);
        assert_eq!(canonical[1].literal, Literal::from_signed(1));
    }
}
