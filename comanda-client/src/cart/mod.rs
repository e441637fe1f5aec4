//! Cart engine
//!
//! Owns the cart lifecycle for one session. Lines are identified by
//! `(menu_item_id, special_instructions)`: adding the same item with the
//! same note folds into the existing line, a different note makes a new
//! line. Totals are derived values, recomputed from the lines on every
//! read and never stored.
//!
//! Every mutation persists the full snapshot before returning, so a
//! process restart reloads an identical cart. A malformed persisted cart
//! degrades to an empty one with a logged warning instead of failing the
//! caller.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use shared::models::{
    CartLine, CartSnapshot, CartTotals, MAX_INSTRUCTIONS_LEN, MenuItem, OrderDraft,
};
use shared::util::{new_id, now_millis};
use thiserror::Error;

use crate::store::{DurableStore, StoreError};

#[derive(Debug, Error)]
pub enum CartError {
    /// Checkout requested on an empty cart
    #[error("Cart is empty")]
    EmptyCart,

    /// Zero quantity on add; use remove or set-quantity instead
    #[error("Quantity must be at least 1")]
    InvalidQuantity,

    /// Note exceeds the shared instructions limit
    #[error("Special instructions too long: {len} > {max} chars")]
    InstructionsTooLong { len: usize, max: usize },

    /// The availability sweep removed items; shown to the user before a
    /// second checkout attempt
    #[error("No longer available: {}", names.join(", "))]
    ItemsUnavailable { names: Vec<String> },

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

pub type CartResult<T> = Result<T, CartError>;

/// Cart engine, one per active session
///
/// Mutations serialize on the internal lock, which is held across the
/// persist so snapshots hit the store in mutation order. The lock is per
/// cart, never global.
pub struct CartEngine {
    store: Arc<DurableStore>,
    session_id: String,
    lines: RwLock<Vec<CartLine>>,
}

impl CartEngine {
    /// Load the persisted cart for a session, degrading to empty when the
    /// stored snapshot is unreadable
    pub fn load(store: Arc<DurableStore>, session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        let lines = match store.load_cart(&session_id) {
            Ok(Some(snapshot)) => {
                tracing::debug!(
                    session_id = %session_id,
                    lines = snapshot.lines.len(),
                    "Cart restored"
                );
                snapshot.lines
            }
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!(
                    session_id = %session_id,
                    "Persisted cart unreadable, starting empty: {e}"
                );
                Vec::new()
            }
        };
        Self {
            store,
            session_id,
            lines: RwLock::new(lines),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Add an item, folding into an existing line when
    /// `(menu_item_id, instructions)` already exists
    ///
    /// Availability is not checked here; the sweep before checkout handles
    /// items that went off the menu while they sat in the cart. Returns
    /// the id of the affected line.
    pub fn add_item(
        &self,
        item: &MenuItem,
        quantity: u32,
        instructions: &str,
    ) -> CartResult<String> {
        if quantity == 0 {
            return Err(CartError::InvalidQuantity);
        }
        check_instructions(instructions)?;

        let mut lines = self.lines.write();
        let line_id = match lines.iter_mut().find(|l| l.matches(&item.id, instructions)) {
            Some(line) => {
                line.quantity += quantity;
                line.cart_line_id.clone()
            }
            None => {
                let line = CartLine {
                    cart_line_id: new_id(),
                    menu_item_id: item.id.clone(),
                    name: item.name.clone(),
                    unit_price: item.price,
                    quantity,
                    special_instructions: instructions.to_string(),
                    category: item.category.clone(),
                    prep_time_minutes: item.preparation_time,
                };
                let id = line.cart_line_id.clone();
                lines.push(line);
                id
            }
        };
        self.persist(&lines)?;
        Ok(line_id)
    }

    /// Set a line's quantity; zero removes the line
    ///
    /// Unknown line ids are a no-op, not an error: the UI may race a
    /// removal that already happened.
    pub fn set_quantity(&self, cart_line_id: &str, quantity: u32) -> CartResult<()> {
        let mut lines = self.lines.write();
        if quantity == 0 {
            if !lines.iter().any(|l| l.cart_line_id == cart_line_id) {
                return Ok(());
            }
            lines.retain(|l| l.cart_line_id != cart_line_id);
        } else {
            match lines.iter_mut().find(|l| l.cart_line_id == cart_line_id) {
                Some(line) => line.quantity = quantity,
                None => return Ok(()),
            }
        }
        self.persist(&lines)
    }

    /// Remove a line; absent ids are a no-op
    pub fn remove_line(&self, cart_line_id: &str) -> CartResult<()> {
        let mut lines = self.lines.write();
        if !lines.iter().any(|l| l.cart_line_id == cart_line_id) {
            return Ok(());
        }
        lines.retain(|l| l.cart_line_id != cart_line_id);
        self.persist(&lines)
    }

    /// Empty the cart
    pub fn clear(&self) -> CartResult<()> {
        let mut lines = self.lines.write();
        if lines.is_empty() {
            return Ok(());
        }
        lines.clear();
        self.persist(&lines)
    }

    /// Replace a line's note
    ///
    /// When the new note collides with another line's identity the two
    /// fold into one, same as adding would have.
    pub fn update_instructions(&self, cart_line_id: &str, instructions: &str) -> CartResult<()> {
        check_instructions(instructions)?;

        let mut lines = self.lines.write();
        let Some(idx) = lines.iter().position(|l| l.cart_line_id == cart_line_id) else {
            return Ok(());
        };

        let menu_item_id = lines[idx].menu_item_id.clone();
        let collision = lines
            .iter()
            .position(|l| l.cart_line_id != cart_line_id && l.matches(&menu_item_id, instructions));
        match collision {
            Some(other) => {
                let quantity = lines[idx].quantity;
                lines[other].quantity += quantity;
                lines.remove(idx);
            }
            None => lines[idx].special_instructions = instructions.to_string(),
        }
        self.persist(&lines)
    }

    /// Drop every line whose menu item is in the unavailable set; returns
    /// the removed lines so the UI can tell the user what changed
    ///
    /// Runs before every checkout attempt.
    pub fn validate_against_availability(
        &self,
        unavailable: &HashSet<String>,
    ) -> CartResult<Vec<CartLine>> {
        if unavailable.is_empty() {
            return Ok(Vec::new());
        }
        let mut lines = self.lines.write();
        let (removed, kept): (Vec<CartLine>, Vec<CartLine>) = lines
            .drain(..)
            .partition(|l| unavailable.contains(&l.menu_item_id));
        *lines = kept;
        if removed.is_empty() {
            return Ok(removed);
        }
        tracing::info!(
            session_id = %self.session_id,
            removed = removed.len(),
            "Dropped unavailable items from cart"
        );
        self.persist(&lines)?;
        Ok(removed)
    }

    /// Pure checkout snapshot; the cart itself is not touched
    ///
    /// Clearing after a successful handoff to the outbox is the caller's
    /// job, so a failed enqueue leaves the cart intact.
    pub fn to_order_payload(
        &self,
        table_number: u32,
        session_id: &str,
        instructions: &str,
    ) -> CartResult<OrderDraft> {
        check_instructions(instructions)?;
        let lines = self.lines.read();
        if lines.is_empty() {
            return Err(CartError::EmptyCart);
        }
        let totals = CartTotals::compute(&lines);
        Ok(OrderDraft {
            table_number,
            session_id: session_id.to_string(),
            items: lines.iter().map(CartLine::to_snapshot).collect(),
            total_amount: totals.subtotal,
            special_instructions: instructions.to_string(),
        })
    }

    /// Cloned view of the current lines
    pub fn lines(&self) -> Vec<CartLine> {
        self.lines.read().clone()
    }

    /// Totals derived from the current lines
    pub fn totals(&self) -> CartTotals {
        CartTotals::compute(&self.lines.read())
    }

    pub fn is_empty(&self) -> bool {
        self.lines.read().is_empty()
    }

    fn persist(&self, lines: &[CartLine]) -> CartResult<()> {
        let snapshot = CartSnapshot {
            lines: lines.to_vec(),
            updated_at: now_millis(),
        };
        self.store.save_cart(&self.session_id, &snapshot)?;
        Ok(())
    }
}

fn check_instructions(instructions: &str) -> CartResult<()> {
    let len = instructions.chars().count();
    if len > MAX_INSTRUCTIONS_LEN {
        return Err(CartError::InstructionsTooLong {
            len,
            max: MAX_INSTRUCTIONS_LEN,
        });
    }
    Ok(())
}
