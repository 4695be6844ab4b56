//! layercake-lib: a layered, content-addressed build cache
//!
//! A build is an ordered chain of steps. Each step gets a fingerprint that
//! covers its own inputs and every step before it, so a cached artifact can
//! only be reused when the whole history leading to it is unchanged:
//!
//! - `plan`: turn a build descriptor into a [`plan::BuildPlan`] with eagerly
//!   computed fingerprints
//! - `cache`: the on-disk [`cache::CacheStore`] of per-step filesystem deltas
//! - `execute`: run a single step and capture what it changed
//! - `build`: the [`build::Orchestrator`] that reuses the longest cached
//!   prefix and executes the rest

pub mod build;
pub mod cache;
pub mod consts;
pub mod execute;
pub mod fingerprint;
pub mod plan;
pub mod platform;
pub mod store_lock;
pub mod util;
