//! Cart line items and derived totals

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};

use crate::models::OrderLineSnapshot;

/// Longest special-instructions note accepted on a line
pub const MAX_INSTRUCTIONS_LEN: usize = 500;

/// Rounding for monetary values (2 decimal places, half away from zero)
const DECIMAL_PLACES: u32 = 2;

/// Extra prep minutes added per cart line on top of the slowest item
const PREP_PER_LINE_MINUTES: u32 = 2;
/// Cap on the per-line prep surcharge
const PREP_SURCHARGE_CAP_MINUTES: u32 = 10;

/// One distinct purchasable configuration (item + note) with a quantity
///
/// Two lines are the *same* line iff `(menu_item_id, special_instructions)`
/// match. Quantity is always ≥ 1; a line reduced to zero is removed, never
/// persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub cart_line_id: String,
    pub menu_item_id: String,
    pub name: String,
    pub unit_price: f64,
    pub quantity: u32,
    #[serde(default)]
    pub special_instructions: String,
    pub category: String,
    #[serde(default)]
    pub prep_time_minutes: u32,
}

impl CartLine {
    /// Line identity: menu item plus customization note
    pub fn matches(&self, menu_item_id: &str, instructions: &str) -> bool {
        self.menu_item_id == menu_item_id && self.special_instructions == instructions
    }

    /// Freeze the line for an order payload
    pub fn to_snapshot(&self) -> OrderLineSnapshot {
        OrderLineSnapshot {
            menu_item_id: self.menu_item_id.clone(),
            name: self.name.clone(),
            unit_price: self.unit_price,
            quantity: self.quantity,
            special_instructions: self.special_instructions.clone(),
        }
    }
}

/// Persisted cart snapshot, one per session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartSnapshot {
    #[serde(default)]
    pub lines: Vec<CartLine>,
    #[serde(default)]
    pub updated_at: i64,
}

/// Values derived from the cart, recomputed on every read and never stored
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartTotals {
    pub subtotal: f64,
    pub item_count: u32,
    pub estimated_prep_minutes: u32,
}

impl CartTotals {
    /// Recompute totals from the given lines
    ///
    /// Money math runs in `Decimal` and is rounded to two decimal places on
    /// the way out. Prep estimate: the slowest item plus two minutes per
    /// line, the per-line surcharge capped at ten minutes; an empty cart is
    /// all zeros.
    pub fn compute(lines: &[CartLine]) -> Self {
        let mut subtotal = Decimal::ZERO;
        let mut item_count = 0u32;
        let mut max_prep = 0u32;

        for line in lines {
            let price = Decimal::from_f64(line.unit_price).unwrap_or(Decimal::ZERO);
            subtotal += price * Decimal::from(line.quantity);
            item_count += line.quantity;
            max_prep = max_prep.max(line.prep_time_minutes);
        }

        let estimated_prep_minutes = if lines.is_empty() {
            0
        } else {
            let surcharge =
                (PREP_PER_LINE_MINUTES * lines.len() as u32).min(PREP_SURCHARGE_CAP_MINUTES);
            max_prep + surcharge
        };

        Self {
            subtotal: subtotal
                .round_dp_with_strategy(DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
                .to_f64()
                .unwrap_or(0.0),
            item_count,
            estimated_prep_minutes,
        }
    }
}
