//! Phase orchestration for iterative LLM document development.
//!
//! An artifact moves through an ordered plan of phases. Within a phase a
//! generator drafts it, a critic assesses it, and a refiner revises it until
//! the assessment reaches the phase's terminal set or the refine budget runs
//! out. The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (severity parsing, extraction,
//!   contracts, scoring, workflow state). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config, backend process, prompt
//!   templates, state files). Isolated behind traits so tests never spawn or sleep.
//!
//! Orchestration modules ([`caller`], [`agents`], [`cycle`], [`sequence`],
//! [`candidates`], [`run`]) coordinate core logic with I/O.

pub mod agents;
pub mod caller;
pub mod cancel;
pub mod candidates;
pub mod core;
pub mod cycle;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod run;
pub mod sequence;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validate;
