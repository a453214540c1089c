//! Declarative resource lifecycles built on the reconciler.
pub mod assignments;
pub mod policies;

pub use assignments::{Assignment, AssignmentState, Assignments, requires_replacement};
pub use policies::{Policies, PolicySpec, PolicyState};
