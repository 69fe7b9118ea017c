//! Ad-reward earnings ledger.
//!
//! Users earn a fixed reward per watched ad and withdraw their balance
//! through a configurable catalog of payout methods (mobile money and crypto
//! networks). Withdrawals go through an administrative approve/reject step
//! and may be cancelled while pending; rejection and cancellation refund
//! exactly once.
//!
//! The [`Ledger`] bundles the components over one [`LedgerStore`]. The
//! [`server`] module exposes it over HTTP.

pub mod amount;
pub mod auth;
pub mod catalog;
pub mod config;
pub mod cooldown;
pub mod currency;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod model;
pub mod rewards;
pub mod server;
pub mod store;
pub mod util;
pub mod validator;
pub mod withdrawal;

pub use amount::Amount;
pub use auth::{Caller, IdentityResolver, TokenResolver};
pub use config::LedgerConfig;
pub use error::{LedgerError, StoreError};
pub use ledger::Ledger;
pub use store::{LedgerStore, MemoryStore};
