//! Linear-program capability interface and the `good_lp` backend
//!
//! [`LinearProgram`] is a backend-neutral model; any [`LpBackend`] that
//! returns a status and per-variable values can solve it.

use crate::{PlacementError, Result};
use good_lp::{
    default_solver, variable, variables, Expression, ResolutionError, Solution, SolverModel,
    Variable,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub usize);

#[derive(Debug, Clone, PartialEq)]
pub struct VariableSpec {
    pub name: String,
    pub lower: f64,
    /// `None` means unbounded above
    pub upper: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sense {
    Le,
    Ge,
    Eq,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinearConstraint {
    pub name: String,
    pub terms: Vec<(VarId, f64)>,
    pub sense: Sense,
    pub rhs: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Maximise,
    Minimise,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinearProgram {
    pub variables: Vec<VariableSpec>,
    pub constraints: Vec<LinearConstraint>,
    pub objective: Vec<(VarId, f64)>,
    pub direction: Direction,
}

impl LinearProgram {
    pub fn new(direction: Direction) -> Self {
        Self {
            variables: Vec::new(),
            constraints: Vec::new(),
            objective: Vec::new(),
            direction,
        }
    }

    pub fn add_variable(&mut self, name: impl Into<String>, lower: f64, upper: Option<f64>) -> VarId {
        self.variables.push(VariableSpec {
            name: name.into(),
            lower,
            upper,
        });
        VarId(self.variables.len() - 1)
    }

    pub fn add_constraint(
        &mut self,
        name: impl Into<String>,
        terms: Vec<(VarId, f64)>,
        sense: Sense,
        rhs: f64,
    ) {
        self.constraints.push(LinearConstraint {
            name: name.into(),
            terms,
            sense,
            rhs,
        });
    }

    pub fn set_objective(&mut self, terms: Vec<(VarId, f64)>) {
        self.objective = terms;
    }

    /// Largest violation of any bound or constraint by `values`
    pub fn max_violation(&self, values: &[f64]) -> f64 {
        let bounds = self.variables.iter().zip(values).map(|(spec, &v)| {
            let below = spec.lower - v;
            let above = spec.upper.map(|u| v - u).unwrap_or(0.0);
            below.max(above)
        });
        let rows = self.constraints.iter().map(|c| {
            let lhs: f64 = c.terms.iter().map(|&(id, coef)| coef * values[id.0]).sum();
            match c.sense {
                Sense::Le => lhs - c.rhs,
                Sense::Ge => c.rhs - lhs,
                Sense::Eq => (lhs - c.rhs).abs(),
            }
        });
        bounds.chain(rows).fold(0.0, f64::max)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LpStatus {
    Optimal,
    /// Stopped on the wall-clock budget; any values are feasible but maybe suboptimal
    TimeLimited,
    Infeasible,
    Unbounded,
    Other(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LpOutcome {
    pub status: LpStatus,
    /// One value per variable, in declaration order
    pub values: Option<Vec<f64>>,
}

pub trait LpBackend {
    fn solve(&self, program: &LinearProgram, time_limit: Option<Duration>) -> Result<LpOutcome>;
}

/// Solves with `good_lp`'s default (pure-Rust `microlp`) solver.
///
/// With a time limit the solve runs on its own thread and the caller waits
/// at most that long. microlp cannot be interrupted, so a timed-out worker
/// is left to finish in the background and its result is dropped. Clones
/// share one worker slot: while an abandoned worker is still running,
/// further time-limited solves report `TimeLimited` without spawning.
#[derive(Debug, Clone, Default)]
pub struct GoodLpBackend {
    busy: Arc<AtomicBool>,
}

impl GoodLpBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` if no time-limited worker is running
    pub fn is_free(&self) -> bool {
        !self.busy.load(Ordering::Relaxed)
    }
}

/// Holds the worker slot; released on drop, including on panic
struct BusyGuard(Arc<AtomicBool>);

impl BusyGuard {
    fn try_acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| BusyGuard(Arc::clone(flag)))
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn solve_now(program: &LinearProgram) -> LpOutcome {
    let mut vars = variables!();
    let handles: Vec<Variable> = program
        .variables
        .iter()
        .map(|spec| {
            let mut def = variable().min(spec.lower).name(spec.name.clone());
            if let Some(upper) = spec.upper {
                def = def.max(upper);
            }
            vars.add(def)
        })
        .collect();

    let linear = |terms: &[(VarId, f64)]| {
        terms
            .iter()
            .fold(Expression::with_capacity(terms.len()), |mut acc, &(id, coef)| {
                acc.add_mul(coef, handles[id.0]);
                acc
            })
    };

    let objective = linear(&program.objective);
    let unsolved = match program.direction {
        Direction::Maximise => vars.maximise(objective),
        Direction::Minimise => vars.minimise(objective),
    };
    let mut model = unsolved.using(default_solver);

    for c in &program.constraints {
        let lhs = linear(&c.terms);
        let constraint = match c.sense {
            Sense::Le => lhs.leq(c.rhs),
            Sense::Ge => lhs.geq(c.rhs),
            Sense::Eq => lhs.eq(c.rhs),
        };
        model = model.with(constraint);
    }

    match model.solve() {
        Ok(solution) => LpOutcome {
            status: LpStatus::Optimal,
            values: Some(handles.iter().map(|&h| solution.value(h)).collect()),
        },
        Err(ResolutionError::Infeasible) => LpOutcome {
            status: LpStatus::Infeasible,
            values: None,
        },
        Err(ResolutionError::Unbounded) => LpOutcome {
            status: LpStatus::Unbounded,
            values: None,
        },
        Err(e) => LpOutcome {
            status: LpStatus::Other(e.to_string()),
            values: None,
        },
    }
}

impl LpBackend for GoodLpBackend {
    fn solve(&self, program: &LinearProgram, time_limit: Option<Duration>) -> Result<LpOutcome> {
        debug!(
            "Solving LP: {} variables, {} constraints",
            program.variables.len(),
            program.constraints.len()
        );
        let start = Instant::now();

        let Some(limit) = time_limit else {
            let outcome = solve_now(program);
            debug!("LP finished in {:?} ({:?})", start.elapsed(), outcome.status);
            return Ok(outcome);
        };

        let Some(guard) = BusyGuard::try_acquire(&self.busy) else {
            warn!("Previous LP worker still running; skipping solve");
            return Ok(LpOutcome {
                status: LpStatus::TimeLimited,
                values: None,
            });
        };

        let (tx, rx) = mpsc::channel();
        let owned = program.clone();
        thread::Builder::new()
            .name("lp-worker".into())
            .spawn(move || {
                let outcome = solve_now(&owned);
                // free the slot before the caller can observe the result
                drop(guard);
                let _ = tx.send(outcome);
            })?;

        match rx.recv_timeout(limit) {
            Ok(outcome) => {
                debug!("LP finished in {:?} ({:?})", start.elapsed(), outcome.status);
                Ok(outcome)
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!("LP solve exceeded {:?}; abandoning worker", limit);
                Ok(LpOutcome {
                    status: LpStatus::TimeLimited,
                    values: None,
                })
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(PlacementError::Solver("LP worker exited without a result".into()))
            }
        }
    }
}
