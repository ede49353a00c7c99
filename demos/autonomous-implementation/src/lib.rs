//! The illustrative three-phase workflow (`spec.md` §1's "autonomous
//! implementation loop"): a planner fans a goal out across a fixed worker
//! pool, a reviewer inspects the merged results, and a conditional fixer
//! re-runs the failing work while `fix_attempts` hasn't exhausted
//! `max_fix_attempts`. Exercises `agentgraph-core`'s parallel fan-out,
//! conditional edges, and loop-style retry end to end — this is scenario
//! test material, not part of the engine itself.

pub mod runtime_stub;
pub mod workflow;
