//! Layer math shared by iceberg and slow iceberg strategies.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use crate::domain::{LayeredConfig, OrderSide};

const BASIS_POINTS: Decimal = dec!(10000);

/// Built-in split for ten layers, heaviest first
pub const TEN_LAYER_RATIOS: [Decimal; 10] = [
    dec!(0.19),
    dec!(0.17),
    dec!(0.15),
    dec!(0.13),
    dec!(0.11),
    dec!(0.09),
    dec!(0.07),
    dec!(0.05),
    dec!(0.03),
    dec!(0.01),
];

/// Default share of the total for each of `layers` layers.
///
/// Ten layers use [`TEN_LAYER_RATIOS`]; any other count decreases linearly,
/// layer `i` getting `(L - i) / (L(L+1)/2)`.
pub fn default_ratios(layers: usize) -> Vec<Decimal> {
    if layers == TEN_LAYER_RATIOS.len() {
        return TEN_LAYER_RATIOS.to_vec();
    }
    let count = Decimal::from(layers as u64);
    let weight_sum = count * (count + Decimal::ONE) / dec!(2);
    (0..layers)
        .map(|i| Decimal::from((layers - i) as u64) / weight_sum)
        .collect()
}

pub fn ratios(config: &LayeredConfig) -> Vec<Decimal> {
    match &config.layer_ratios {
        Some(custom) if custom.len() == config.layers => custom.clone(),
        _ => default_ratios(config.layers),
    }
}

/// Price offset of every layer in basis points.
///
/// Layer 0 sits at `first_offset_bp`, layer `i` at `offset_step_bp × i`.
/// Entries of a custom schedule replace the computed ones.
pub fn offsets_bp(config: &LayeredConfig, first_offset_bp: Decimal) -> Vec<Decimal> {
    (0..config.layers)
        .map(|i| {
            let custom = config
                .layer_offsets_bp
                .as_ref()
                .and_then(|offsets| offsets.get(i).copied());
            match (custom, i) {
                (Some(offset), _) => offset,
                (None, 0) => first_offset_bp,
                (None, _) => config.offset_step_bp * Decimal::from(i as u64),
            }
        })
        .collect()
}

/// Split `total` by `ratios`; the rounding residue goes to layer 0 so the
/// parts always add back up to `total`.
pub fn split_quantity(total: Decimal, ratios: &[Decimal]) -> Vec<Decimal> {
    let mut parts: Vec<Decimal> = ratios.iter().map(|r| total * *r).collect();
    let assigned: Decimal = parts.iter().copied().sum();
    if let Some(first) = parts.first_mut() {
        *first += total - assigned;
    }
    parts
}

/// Buy layers sit below the base price, sell layers above it.
pub fn layer_price(base: Decimal, offset_bp: Decimal, side: OrderSide) -> Decimal {
    let shift = offset_bp / BASIS_POINTS;
    match side {
        OrderSide::Buy => base * (Decimal::ONE - shift),
        OrderSide::Sell => base * (Decimal::ONE + shift),
    }
}

/// Client order id for layer `index`, numbered from 1: `<uuid8>_L<n>`.
pub fn layer_client_id(index: usize) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{}_L{}", &id[..8], index + 1)
}
