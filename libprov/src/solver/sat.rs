//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

//! CDCL backend on top of `varisat`.
//!
//! Preferences are honoured by incremental solving under assumptions: each preferred
//! literal is assumed on top of the ones already accepted and kept when the engine still
//! finds a model. Cores are computed from selector literals, one per clause tag, which
//! guard the tagged clauses and are passed to the engine as assumptions.

use super::{Assignment, Lit, Outcome, Problem, SolverBackend, SolverError};
use crate::cancel::CancellationToken;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace};
use varisat::{lit::Lit as EngineLit, ExtendFormula};

#[derive(Debug, Default)]
pub struct SatSolver {
    solves: u64,
}

impl SatSolver {
    pub fn new() -> Self {
        SatSolver::default()
    }

    /// Engine invocations over the lifetime of this solver.
    pub fn solves(&self) -> u64 {
        self.solves
    }

    /// Runs the engine once. `None` means the engine gave up.
    fn check(
        &mut self,
        engine: &mut varisat::Solver<'_>,
        assumptions: &[EngineLit],
    ) -> Option<bool> {
        self.solves += 1;
        engine.assume(assumptions);
        match engine.solve() {
            Ok(sat) => Some(sat),
            Err(e) => {
                debug!("sat engine stopped: {:?}", e);
                None
            }
        }
    }
}

fn engine_lit(lit: Lit) -> EngineLit {
    let dimacs = lit.var().0 as isize + 1;
    EngineLit::from_dimacs(if lit.is_positive() { dimacs } else { -dimacs })
}

/// Engine loaded with a problem. With selectors, tagged clauses only bind while their
/// selector is assumed.
struct Loaded<'a> {
    engine: varisat::Solver<'a>,
    selectors: BTreeMap<usize, EngineLit>,
    var_count: usize,
}

impl Loaded<'_> {
    fn new(problem: &Problem, with_selectors: bool) -> Self {
        let mut engine = varisat::Solver::new();
        let var_count = problem.var_count();
        // Variables are allocated up front so that the first `var_count` engine
        // variables line up with the problem's numbering.
        for _ in 0..var_count {
            engine.new_var();
        }
        let mut selectors = BTreeMap::new();
        if with_selectors {
            for tag in problem.tags() {
                selectors.insert(tag, engine.new_lit());
            }
        }

        let mut lits = Vec::new();
        for clause in problem.clauses() {
            lits.clear();
            lits.extend(clause.lits.iter().map(|l| engine_lit(*l)));
            if let Some(selector) = clause.tag.and_then(|t| selectors.get(&t)) {
                lits.push(!*selector);
            }
            engine.add_clause(&lits);
        }
        Loaded {
            engine,
            selectors,
            var_count,
        }
    }

    fn assignment(&self) -> Assignment {
        let mut values = vec![false; self.var_count];
        if let Some(model) = self.engine.model() {
            for lit in model {
                let index = lit.var().index();
                if index < self.var_count {
                    values[index] = lit.is_positive();
                }
            }
        }
        Assignment::new(values)
    }

    fn selectors_for(&self, tags: &BTreeSet<usize>) -> Vec<EngineLit> {
        tags.iter().filter_map(|t| self.selectors.get(t).copied()).collect()
    }

    fn failed_tags(&self) -> BTreeSet<usize> {
        let failed: Vec<EngineLit> = self
            .engine
            .failed_core()
            .map(|core| core.to_vec())
            .unwrap_or_default();
        self.selectors
            .iter()
            .filter(|(_, s)| failed.contains(*s) || failed.contains(&!**s))
            .map(|(t, _)| *t)
            .collect()
    }
}

impl SolverBackend for SatSolver {
    fn solve(&mut self, problem: &Problem, cancel: &CancellationToken) -> Outcome {
        if cancel.is_cancelled() {
            return Outcome::Cancelled;
        }
        let mut loaded = Loaded::new(problem, false);
        match self.check(&mut loaded.engine, &[]) {
            Some(true) => {}
            Some(false) => {
                trace!(solves = self.solves, "sat search found no model");
                return Outcome::Unsatisfiable;
            }
            None => return Outcome::Cancelled,
        }
        let mut model = loaded.assignment();

        let mut accepted: Vec<EngineLit> = Vec::new();
        let mut fixed = vec![false; problem.var_count()];
        for pref in problem.preferences() {
            let index = pref.var().0 as usize;
            if fixed.get(index).copied().unwrap_or(true) {
                continue;
            }
            fixed[index] = true;
            if model.satisfies(*pref) {
                accepted.push(engine_lit(*pref));
                continue;
            }
            if cancel.is_cancelled() {
                return Outcome::Cancelled;
            }
            accepted.push(engine_lit(*pref));
            match self.check(&mut loaded.engine, &accepted) {
                Some(true) => model = loaded.assignment(),
                Some(false) => {
                    accepted.pop();
                    accepted.push(engine_lit(!*pref));
                }
                None => return Outcome::Cancelled,
            }
        }
        trace!(solves = self.solves, "sat search finished");
        Outcome::Satisfiable(model)
    }

    fn minimal_core(
        &mut self,
        problem: &Problem,
        cancel: &CancellationToken,
    ) -> Result<BTreeSet<usize>, SolverError> {
        if cancel.is_cancelled() {
            return Err(SolverError::Cancelled);
        }
        let mut loaded = Loaded::new(problem, true);
        let all = problem.tags();
        let assumptions = loaded.selectors_for(&all);
        let mut core = match self.check(&mut loaded.engine, &assumptions) {
            Some(true) => return Err(SolverError::Satisfiable),
            Some(false) => loaded.failed_tags(),
            None => return Err(SolverError::Cancelled),
        };

        let candidates: Vec<usize> = core.iter().copied().collect();
        for tag in candidates {
            if !core.contains(&tag) {
                continue;
            }
            if cancel.is_cancelled() {
                return Err(SolverError::Cancelled);
            }
            let mut trial = core.clone();
            trial.remove(&tag);
            let assumptions = loaded.selectors_for(&trial);
            match self.check(&mut loaded.engine, &assumptions) {
                Some(true) => {}
                Some(false) => {
                    core = loaded.failed_tags().intersection(&trial).copied().collect();
                }
                None => return Err(SolverError::Cancelled),
            }
        }
        debug!(
            solves = self.solves,
            "core reduced from {} to {} tags",
            all.len(),
            core.len()
        );
        Ok(core)
    }
}
