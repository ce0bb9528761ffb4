//! tcpmap operator: command line, CRD installation and controller wiring

#![deny(missing_docs)]

/// Command line and environment configuration
pub mod config;
/// Controller construction and watch routing
pub mod controller_runner;
/// Startup utilities (CRD install)
pub mod startup;
