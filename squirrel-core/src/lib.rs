//! squirrel-core: Plugin runtime for the Squirrel wiki
//!
//! Search and authentication providers ship as native dynamic libraries
//! built against `squirrel-plugin-api`. This crate finds them on disk, loads
//! each module into its own load context, drives the initialize/shutdown
//! lifecycle, and resolves their configuration from stored settings,
//! environment overrides and schema defaults.
//!
//! See [`plugins`] for the entry points.

pub mod plugins;

pub use plugins::{PluginHost, PluginHostConfig, PluginHostError};
