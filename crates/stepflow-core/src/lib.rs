//! Workflow engine logic and repository trait definitions for Stepflow.
//!
//! This crate defines the "ports" (repository traits and step collaborator
//! traits) that the infrastructure layer implements. It depends only on
//! `stepflow-types` -- never on `stepflow-infra` or any database/IO crate.

pub mod event;
pub mod repository;
pub mod workflow;
