//! `diagrule-core`: collection rule execution engine.
//!
//! A collection rule pairs a trigger watching one target process with an
//! ordered list of diagnostic actions and optional limits. This crate runs
//! those rules: it resolves `$(...)` tokens between actions, executes action
//! lists, enforces limits and exposes a live description of every rule.
//!
//! # Architecture
//!
//! ```text
//! RulesConfig (YAML)
//!     │  into_definitions(&TypeCatalog)
//!     ▼
//! RuleDefinition          ← validated: unique action names, known types
//!     │
//!     ▼
//! CollectionRuleManager   ← one pipeline task per matching rule
//!     │
//!     ▼
//! CollectionRulePipeline  ← trigger lifecycle + state machine
//!     │        │
//!     │        └── RuleLimitsTracker   ← sliding window, lifetime cap, deadline
//!     ▼
//! ActionListExecutor      ← sequential start/wait, deferred completion
//!     │
//!     ▼
//! TokenResolver           ← $(Actions.<name>.<output>) / $(Process.<property>)
//! ```
//!
//! Triggers and actions are supplied by the host through
//! [`registry::CollectionRuleRegistry`]; the engine itself collects nothing.

pub mod action;
pub mod clock;
pub mod config;
pub mod context;
pub mod definition;
pub mod description;
pub mod error;
pub mod executor;
pub mod filter;
pub mod limits;
pub mod manager;
pub mod pipeline;
pub mod process;
pub mod registry;
pub mod settings;
pub mod state;
pub mod tokens;
pub mod trigger;

pub(crate) mod serde_duration;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Result, RuleError};
