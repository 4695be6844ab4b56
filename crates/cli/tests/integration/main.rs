//! End-to-end tests driving the layercake binary against real descriptors.

mod build_tests;
mod common;
mod gc_tests;
