//! Data models
//!
//! Shared between the ordering backend and the client core (via API).
//! All ids are opaque strings assigned by their owning side. The wire
//! format is camelCase JSON. Money is carried as `f64` rounded to two
//! decimal places; arithmetic happens in `rust_decimal` on the client.

pub mod cart;
pub mod menu_item;
pub mod order;
pub mod session;

// Re-exports
pub use cart::*;
pub use menu_item::*;
pub use order::*;
pub use session::*;
