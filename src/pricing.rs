//! Money arithmetic shared by the cart, checkout and payment flows.
//!
//! All amounts are `Decimal` in the display currency; rounding is to cents,
//! half away from zero.

use rust_decimal::{Decimal, RoundingStrategy, prelude::ToPrimitive};

/// Currency code for payment intents.
pub const CURRENCY: &str = "usd";

/// Flat shipping charge added to every order.
pub const SHIPPING_FEE: Decimal = Decimal::from_parts(500, 0, 0, false, 2);

/// Largest difference accepted between a client-declared and a computed total.
pub const TOTAL_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

pub fn round2(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

pub fn line_total(price: Decimal, quantity: i32) -> Decimal {
    price * Decimal::from(quantity)
}

/// Sum of `price * quantity` over `(price, quantity)` lines, rounded to cents.
pub fn subtotal<I>(lines: I) -> Decimal
where
    I: IntoIterator<Item = (Decimal, i32)>,
{
    round2(
        lines
            .into_iter()
            .map(|(price, quantity)| line_total(price, quantity))
            .sum(),
    )
}

pub fn item_count<I>(quantities: I) -> i64
where
    I: IntoIterator<Item = i32>,
{
    quantities.into_iter().map(i64::from).sum()
}

pub fn grand_total(subtotal: Decimal) -> Decimal {
    round2(subtotal + SHIPPING_FEE)
}

pub fn totals_match(declared: Decimal, computed: Decimal) -> bool {
    (declared - computed).abs() <= TOTAL_TOLERANCE
}

/// Amount in cents, as payment processors expect it.
pub fn to_minor_units(amount: Decimal) -> Option<i64> {
    (round2(amount) * Decimal::ONE_HUNDRED).to_i64()
}
