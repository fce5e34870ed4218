//! Access rules and routing
//!
//! Rules route private fields to numbered subsections and attach a
//! disclosure modifier. Public fields stay in subsection 0.

mod router;
mod rule;

pub use router::{AccessRouter, Route, PUBLIC_SUBSECTION};
pub use rule::{AccessRule, DisclosureModifier, RulePath};
