//! # SortOfRemote NG – Mirror
//!
//! Mirrors remote directory trees onto local storage:
//!   • Bounded pool of reusable remote sessions
//!   • Per-target regex matching with `{{$n}}` rename templates
//!   • Newest-candidate selection and size-based change detection
//!   • Throttled, pausable, abortable streaming downloads with progress
//!   • Sequential run orchestration, auto-sync timer and countdown
//!   • Status broadcasting and post-run hooks

pub mod mirror;
