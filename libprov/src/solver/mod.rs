//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

//! Boolean constraint problems and the engines that solve them.
//!
//! A [`Problem`] is a set of clauses over numbered variables plus an ordered list of
//! preferred literals. Engines implement [`SolverBackend`] and must return the model that
//! is best with respect to the preferences read lexicographically: the first preference is
//! honoured whenever any model allows it, the second whenever the first allows it, and so
//! on. Clauses may carry a tag; tagged clauses are what an unsatisfiable core is made of.

use crate::cancel::CancellationToken;
use miette::Diagnostic;
use std::collections::BTreeSet;
use std::fmt;
use std::ops::Not;
use thiserror::Error;

mod sat;

pub use sat::SatSolver;

#[derive(Debug, Error, Diagnostic, Clone, PartialEq, Eq)]
pub enum SolverError {
    #[error("solving was cancelled")]
    #[diagnostic(code(prov::solver_error::cancelled))]
    Cancelled,

    #[error("an unsatisfiable core was requested for a satisfiable problem")]
    #[diagnostic(
        code(prov::solver_error::satisfiable),
        help("Only ask for a core after the engine reported the problem unsatisfiable.")
    )]
    Satisfiable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Var(pub u32);

/// A variable or its negation, encoded as `2 * var + negated`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Lit(u32);

impl Lit {
    pub fn positive(var: Var) -> Self {
        Lit(var.0 << 1)
    }

    pub fn negative(var: Var) -> Self {
        Lit((var.0 << 1) | 1)
    }

    pub fn var(self) -> Var {
        Var(self.0 >> 1)
    }

    pub fn is_positive(self) -> bool {
        self.0 & 1 == 0
    }
}

impl Not for Lit {
    type Output = Lit;

    fn not(self) -> Lit {
        Lit(self.0 ^ 1)
    }
}

impl fmt::Debug for Lit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_positive() {
            write!(f, "x{}", self.var().0)
        } else {
            write!(f, "!x{}", self.var().0)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    pub lits: Vec<Lit>,
    pub tag: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct Problem {
    var_count: u32,
    clauses: Vec<Clause>,
    preferences: Vec<Lit>,
}

impl Problem {
    pub fn new() -> Self {
        Problem::default()
    }

    pub fn new_var(&mut self) -> Var {
        let var = Var(self.var_count);
        self.var_count += 1;
        var
    }

    pub fn var_count(&self) -> usize {
        self.var_count as usize
    }

    /// Adds a disjunction. Untagged clauses are background facts that never show up in a
    /// core.
    pub fn add_clause(&mut self, lits: Vec<Lit>, tag: Option<usize>) {
        self.clauses.push(Clause { lits, tag });
    }

    /// Appends a preferred literal; earlier preferences dominate later ones.
    pub fn prefer(&mut self, lit: Lit) {
        self.preferences.push(lit);
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn preferences(&self) -> &[Lit] {
        &self.preferences
    }

    pub fn tags(&self) -> BTreeSet<usize> {
        self.clauses.iter().filter_map(|c| c.tag).collect()
    }

    /// Copy keeping untagged clauses and clauses tagged with one of `tags`, without
    /// preferences.
    pub fn restricted(&self, tags: &BTreeSet<usize>) -> Problem {
        Problem {
            var_count: self.var_count,
            clauses: self
                .clauses
                .iter()
                .filter(|c| c.tag.map(|t| tags.contains(&t)).unwrap_or(true))
                .cloned()
                .collect(),
            preferences: Vec::new(),
        }
    }
}

/// Total assignment returned for a satisfiable problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    values: Vec<bool>,
}

impl Assignment {
    pub fn new(values: Vec<bool>) -> Self {
        Assignment { values }
    }

    pub fn value(&self, var: Var) -> bool {
        self.values.get(var.0 as usize).copied().unwrap_or(false)
    }

    pub fn satisfies(&self, lit: Lit) -> bool {
        self.value(lit.var()) == lit.is_positive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Satisfiable(Assignment),
    Unsatisfiable,
    Cancelled,
}

/// Pluggable search engine.
pub trait SolverBackend {
    /// Finds the preferred model, polling `cancel` between engine runs.
    fn solve(&mut self, problem: &Problem, cancel: &CancellationToken) -> Outcome;

    /// Deletion-minimal set of clause tags whose clauses, together with the untagged ones,
    /// are unsatisfiable. Removing any single returned tag makes the rest satisfiable.
    fn minimal_core(
        &mut self,
        problem: &Problem,
        cancel: &CancellationToken,
    ) -> Result<BTreeSet<usize>, SolverError> {
        let mut core = problem.tags();
        match self.solve(&problem.restricted(&core), cancel) {
            Outcome::Satisfiable(_) => return Err(SolverError::Satisfiable),
            Outcome::Cancelled => return Err(SolverError::Cancelled),
            Outcome::Unsatisfiable => {}
        }
        let candidates: Vec<usize> = core.iter().copied().collect();
        for tag in candidates {
            core.remove(&tag);
            match self.solve(&problem.restricted(&core), cancel) {
                Outcome::Unsatisfiable => {}
                Outcome::Satisfiable(_) => {
                    core.insert(tag);
                }
                Outcome::Cancelled => return Err(SolverError::Cancelled),
            }
        }
        Ok(core)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_encoding() {
        let v = Var(3);
        assert!(Lit::positive(v).is_positive());
        assert!(!Lit::negative(v).is_positive());
        assert_eq!(!Lit::positive(v), Lit::negative(v));
        assert_eq!(Lit::negative(v).var(), v);
        assert_eq!(format!("{:?}", Lit::negative(v)), "!x3");
    }

    #[test]
    fn restriction_keeps_untagged_clauses() {
        let mut p = Problem::new();
        let a = p.new_var();
        p.add_clause(vec![Lit::positive(a)], None);
        p.add_clause(vec![Lit::negative(a)], Some(7));
        p.prefer(Lit::positive(a));
        let r = p.restricted(&BTreeSet::new());
        assert_eq!(r.clauses().len(), 1);
        assert!(r.preferences().is_empty());
        assert_eq!(p.tags().into_iter().collect::<Vec<_>>(), vec![7]);
    }
}
