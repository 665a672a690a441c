//! Connection dispatch loop test suite

mod support;

mod errors;
