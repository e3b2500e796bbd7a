//! End-to-end tests for the operation scheduler and its HTTP surface.

mod helpers;
mod lifecycle_test;
mod operations_test;
