//! A modular Discord guild bot: feature modules plug into a shared command
//! registry and interaction dispatcher, with persisted per-module config and
//! a small local HTTP API for administration.

pub mod commands;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod logging;
pub mod modules;
pub mod store;
pub mod web;
