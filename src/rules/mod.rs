//! Rule compiler and matcher: turns the declarative `Rule` list from
//! configuration into a compiled predicate set, and evaluates packets
//! against it in O(rules × predicates).

pub mod matcher;
pub mod predicate;

pub use matcher::{CompiledRule, RuleMatcher};
pub use predicate::MatchInput;
