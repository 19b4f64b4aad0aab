//! Control-plane commands and workflows.
//!
//! Each function returns a [`marshal_engine::Command`] or a
//! [`marshal_engine::Workflow`] ready to run on an engine. Nothing here talks
//! to the network directly.
//!
//! - [`auth`]: token creation, step-up, login.
//! - [`endpoints`]: certificate and endpoint provisioning.
//! - [`services`]: scaling and status polling.
//! - [`apps`]: configuration and deploys.

pub mod apps;
pub mod auth;
pub mod endpoints;
pub mod services;
mod support;
