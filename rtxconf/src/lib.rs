//! # rtxconf
//!
//! Configuration text translation for Yamaha RTX routers.
//!
//! rtxconf turns the raw output of `show config` into typed records and turns
//! typed records back into the command lines the router accepts. It sits
//! between an orchestration layer that holds desired state and whatever
//! actually talks to the device.
//!
//! ## Features
//!
//! - Reconstruction of logical lines from terminal-wrapped output
//! - Context-aware scanning of `tunnel select` / `pp select` blocks
//! - Decoders and encoders for filters, routes, tunnels, PP interfaces,
//!   schedules and DNS server selection
//! - Reconciliation of desired records against what the device reports
//! - A small async [`Executor`](device::Executor) boundary for sending commands
//!
//! ## Quick Start
//!
//! ```rust
//! use rtxconf::dialect::rtx;
//! use rtxconf::feature::{Feature, Intent, StaticRoutes};
//! use rtxconf::Parser;
//!
//! let parser = Parser::new(&rtx::dialect());
//! let parsed = parser.parse("ip route default gateway pp 1\nip route 10.0.0.0/8 gateway 192.168.1.1\n");
//!
//! let routes = parsed.decode::<StaticRoutes>();
//! assert!(routes.is_clean());
//! assert_eq!(routes.records.len(), 2);
//!
//! let commands = StaticRoutes::encode(&routes.records[1], Intent::Delete).unwrap();
//! assert_eq!(commands, vec!["no ip route 10.0.0.0/8"]);
//! ```

pub mod device;
pub mod dialect;
pub mod error;
pub mod feature;
pub mod parser;
pub mod reconcile;
pub mod text;

// Re-export main types for convenience
pub use device::{Device, Executor, Response};
pub use dialect::{ContextDefinition, Dialect};
pub use error::{Error, Result};
pub use feature::{Decoded, Feature, Intent};
pub use parser::{ParsedConfig, Parser};
pub use reconcile::{Reconcilable, Reconciliation, reconcile};
