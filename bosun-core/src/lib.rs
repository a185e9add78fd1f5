//! Bosun Core
//!
//! Core types and abstractions for the bosun workflow engine.
//!
//! This crate contains:
//! - Domain types: workflows, stages, steps and step outcomes
//! - Config: YAML workflow description loading and validation
//! - Source: the pluggable VCS source-fetcher contract
//! - Names: DNS-label normalization for cluster object names

pub mod config;
pub mod domain;
pub mod error;
pub mod names;
pub mod schedule;
pub mod source;
