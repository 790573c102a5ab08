//! podstack: a local AI service stack on podman or docker.
//!
//! Manages a small catalog of containerized services (an LLM runtime, a web
//! chat UI, an image generation tool) behind one engine-agnostic interface.
//! Podman runs each service in a real pod; docker falls back to host
//! networking with a container name prefix standing in for the pod.
//!
//! The crate splits along the seams the CLI exercises: configuration with
//! template resolution ([`config`], [`template`]), the resolved service
//! catalog ([`spec`]), engine adapters ([`runtime`]), and the orchestration
//! engine ([`manager`]) that drives start, health polling, stop, and clean.

pub mod cli;
pub mod config;
pub mod error;
pub mod gpu;
pub mod manager;
pub mod runtime;
pub mod secrets;
pub mod spec;
pub mod template;

pub use error::{Error, Result};
