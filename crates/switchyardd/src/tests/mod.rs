//! Test suites for the dispatcher runtime.

mod process;
mod support;
mod unit;
