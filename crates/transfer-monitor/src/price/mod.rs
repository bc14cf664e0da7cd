pub mod pending;
pub mod resolver;
pub mod source;

use alloy_primitives::U256;

use crate::domain::types::{TokenAmount, UsdCents};

const PICO_PER_DOLLAR: f64 = 1e12;
// pico-dollars -> cents
const PICO_TO_CENTS_EXP: u64 = 10;

/// Converts a feed price in dollars to integer pico-dollars.
pub fn price_to_pico(price_usd: f64) -> Option<u128> {
    if !price_usd.is_finite() || price_usd < 0.0 {
        return None;
    }
    let pico = (price_usd * PICO_PER_DOLLAR).round();
    if pico >= u128::MAX as f64 {
        return None;
    }
    Some(pico as u128)
}

/// `raw * price / 10^decimals`, in cents, truncated. Saturates on overflow.
pub fn usd_value(amount: &TokenAmount, price_pico: u128) -> UsdCents {
    let Some(scaled) = amount.raw.checked_mul(U256::from(price_pico)) else {
        return UsdCents(u128::MAX);
    };
    let divisor = U256::from(10u64).pow(U256::from(amount.decimals as u64 + PICO_TO_CENTS_EXP));
    UsdCents(u128::try_from(scaled / divisor).unwrap_or(u128::MAX))
}
