//! The coordination server for distributed execution.
//!
//! When several processes execute blueprints against one shared store,
//! the at-most-once assignment record must live outside any of them.
//! This crate provides that record as a small HTTP service with three
//! calls:
//!
//! - `POST /assign` -- the first requester for a call id wins and must
//!   later report `done`; everyone else is told to await.
//! - `POST /await` -- long-polls until the winner reports a terminal
//!   status.
//! - `POST /done` -- the winner's terminal report; wakes every waiter.
//!
//! [`client::HttpCoordinator`] implements the executor's `Coordinator`
//! trait over these calls.

pub mod client;
pub mod handlers;
pub mod ledger;
pub mod router;

pub use client::HttpCoordinator;
pub use ledger::{AsyncLedger, LedgerError};
pub use router::build_router;
