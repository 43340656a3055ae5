#[path = "property/no_overcommit.rs"]
mod no_overcommit;

#[path = "property/evaluator_determinism.rs"]
mod evaluator_determinism;
