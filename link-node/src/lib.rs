//! # Network Link - Node Implementation
//!
//! This crate contains a node of a Network Link group, the LAN presence protocol presentation
//! computers use to find each other. Every node keeps a replica of the group roster, there is no
//! coordinator.
//!
//! For the wire format, look into the [`link_protocol`] crate.
//!
//! A node is made of:
//! - the [`roster`], the group replica, and [`reconcile`], which merges what peers report into it
//! - the [`handshake`], joining the group of a bootstrap peer on start
//! - the [`heartbeat`] engine, probing every peer on a fixed interval
//! - the [`handler`], answering the three protocol operations
//!
//! [`server::Node`] wires them to HTTP on a [`tokio`] runtime. All of them share one roster
//! behind a single mutex, see [`roster::SharedRoster`].

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod codec;
pub mod config;
pub mod console;
pub mod handler;
pub mod handshake;
pub mod heartbeat;
pub mod reconcile;
pub mod roster;
pub mod server;
pub mod transport;

pub use server::{Node, NodeError};

#[cfg(test)]
mod tests;
