use rand::Rng;

use crate::basic_types::Random;

/// The order in which unassigned variables are considered for branching.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) enum VariableOrder {
    #[default]
    InOrder,
    InReverseOrder,
    InRandomOrder,
}

/// The polarity given to a branching variable with no saved phase and no
/// assignment preference.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) enum Polarity {
    #[default]
    False,
    True,
    Random,
}

/// Parameters of one SAT solve. Borrowers of a shared solver snapshot these
/// on entry and restore them on exit.
#[derive(Clone, Debug)]
pub(crate) struct SatParameters {
    pub(crate) max_number_of_conflicts: i64,
    pub(crate) preferred_variable_order: VariableOrder,
    pub(crate) initial_polarity: Polarity,
    pub(crate) use_phase_saving: bool,
    /// Probability of flipping the chosen polarity to a random one.
    pub(crate) random_polarity_ratio: f64,
    /// Probability of branching on a uniformly random unassigned variable.
    pub(crate) random_branches_ratio: f64,
    pub(crate) random_seed: u64,
}

impl Default for SatParameters {
    fn default() -> Self {
        SatParameters {
            max_number_of_conflicts: i64::MAX,
            preferred_variable_order: VariableOrder::default(),
            initial_polarity: Polarity::default(),
            use_phase_saving: true,
            random_polarity_ratio: 0.0,
            random_branches_ratio: 0.0,
            random_seed: 8,
        }
    }
}

/// Picks uniformly a variable order and polarity strategy, enables phase
/// saving with probability 1/2, and sets each random ratio to 0.01 with
/// probability 1/2 and 0 otherwise.
pub(crate) fn randomize_decision_heuristic(random: &mut Random, parameters: &mut SatParameters) {
    parameters.preferred_variable_order = match random.gen_range(0..3) {
        0 => VariableOrder::InOrder,
        1 => VariableOrder::InReverseOrder,
        _ => VariableOrder::InRandomOrder,
    };
    parameters.initial_polarity = match random.gen_range(0..3) {
        0 => Polarity::False,
        1 => Polarity::True,
        _ => Polarity::Random,
    };
    parameters.use_phase_saving = random.gen_bool(0.5);
    parameters.random_polarity_ratio = if random.gen_bool(0.5) { 0.01 } else { 0.0 };
    parameters.random_branches_ratio = if random.gen_bool(0.5) { 0.01 } else { 0.0 };
}
