//! # Token Clerk
//!
//! Time-bounded anti-CSRF token registry.
//!
//! ## Structure
//!
//! - Live map: token value to expiry (**µs**), set once at registration and never touched again
//! - Audit map: token value to its scheduled expiry (**µs**), carried over unchanged on sweep
//!   or revocation, bounded to the latest-expiring `audit_capacity` entries
//! - A value is never in both maps at once
//!
//! ## Sweeping
//!
//! Every operation sweeps first. A token whose expiry is at or before `now` moves from live
//! to audit before anything else is looked at, so a validation racing its own expiry reports
//! the token as expired instead of valid.
//!
//! ## Locking
//!
//! One mutex per store, held for the whole read-modify-write of an operation including the
//! clock read. Operations on one store are linearizable.
pub mod clock;
pub mod error;
pub mod keys;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::ClerkError;
pub use keys::{KeyFn, random_key};
pub use store::{Snapshot, StoreConfig, Token, TokenStore, Validity};

pub const MICROS_PER_MILLI: i64 = 1_000;
pub const MICROS_PER_SEC: i64 = 1_000_000;
