//! The compiler powering Quill, a declarative graph query language.
//!
//! This crate currently exposes the intermediate representation of the
//! compiler, in particular the query scope tree: the structure that records
//! where each navigation path referenced by a query is visible. Later
//! compilation stages consult it to decide how to correlate subexpressions
//! and where to insert implicit joins.
pub mod ir;
