//! HTTP-backed `ApplianceProvider` for the TrueNAS REST API. `truenas` holds
//! the provider, `client` the authenticated transport, and `parse` the
//! response decoding.

mod client;
mod parse;
mod truenas;

pub use truenas::TrueNasProvider;
