mod solver_scenarios;
