//! RPKI relying-party validation.
//!
//! The _Resource Public Key Infrastructure_ (RPKI) lets owners of IP
//! address space cryptographically attest which autonomous systems are
//! allowed to originate routes for their prefixes. This crate fetches
//! the globally distributed repository of signed RPKI objects starting
//! from a set of trust anchor locators, validates the certificate and
//! signed-object chain down to each Route Origin Attestation, and emits
//! the resulting Validated ROA Payloads (VRPs) in the formats BGP
//! routers expect.
//!
//! Fetching, parsing, and validation each run in their own child
//! process (see [`orchestrator`] and [`workers`]), communicating over
//! length-delimited framed messages (see [`ipc`]) rather than sharing
//! memory -- a parse failure or a hung transport in one process cannot
//! take down the others.

pub mod authtree;
pub mod config;
pub mod crypto;
pub mod error;
pub mod ipc;
pub mod log;
pub mod metrics;
pub mod object;
pub mod operation;
pub mod orchestrator;
pub mod output;
pub mod queue;
pub mod repo;
pub mod resources;
pub mod slurm;
pub mod store;
pub mod tal;
pub mod uri;
pub mod validation;
pub mod workers;
