/*
[INPUT]:  Reference price, quote offsets, and the venue's distance tiers
[OUTPUT]: Quote prices, distances, and band classification
[POS]:    Pricing layer - pure ladder arithmetic, no I/O
[UPDATE]: When the venue changes its band boundaries or point multipliers
*/

use rust_decimal::{Decimal, RoundingStrategy};

use perpx_adapter::Side;

const BPS_DENOMINATOR: i64 = 10_000;

/// Venue-defined distance tiers for maker-point accrual.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    /// 0-10 bps: 100% points
    A,
    /// 10-30 bps: 50% points
    B,
    /// 30-100 bps: 10% points
    C,
    /// beyond 100 bps: no points
    Out,
}

impl Band {
    pub fn points_multiplier(self) -> Decimal {
        match self {
            Band::A => Decimal::ONE,
            Band::B => Decimal::new(5, 1),
            Band::C => Decimal::new(1, 1),
            Band::Out => Decimal::ZERO,
        }
    }
}

/// One desired resting quote: a side, a ladder slot, and a concrete price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteSpec {
    pub side: Side,
    pub slot: u8,
    pub offset_bps: Decimal,
    pub price: Decimal,
}

/// Classify a distance from the reference price into a band.
pub fn classify(distance_bps: Decimal) -> Band {
    if distance_bps <= Decimal::from(10) {
        Band::A
    } else if distance_bps <= Decimal::from(30) {
        Band::B
    } else if distance_bps <= Decimal::from(100) {
        Band::C
    } else {
        Band::Out
    }
}

/// Absolute distance of `price` from `reference` in basis points.
pub fn distance_bps(price: Decimal, reference: Decimal) -> Decimal {
    if reference <= Decimal::ZERO {
        return Decimal::MAX;
    }
    (price - reference).abs() / reference * Decimal::from(BPS_DENOMINATOR)
}

/// Quote price at `offset_bps` from the reference, on the passive side.
///
/// Rounded outward to the symbol tick (BUY down, SELL up) so rounding never
/// moves a quote closer to the reference than the offset promises.
pub fn quote_price(
    reference: Decimal,
    side: Side,
    offset_bps: Decimal,
    price_tick_decimals: u32,
) -> Decimal {
    let ratio = offset_bps / Decimal::from(BPS_DENOMINATOR);
    match side {
        Side::Buy => (reference * (Decimal::ONE - ratio))
            .round_dp_with_strategy(price_tick_decimals, RoundingStrategy::ToNegativeInfinity),
        Side::Sell => (reference * (Decimal::ONE + ratio))
            .round_dp_with_strategy(price_tick_decimals, RoundingStrategy::ToPositiveInfinity),
    }
}

/// Build the full desired ladder: both sides at every configured offset.
///
/// Slot numbering is 1-based and shared across sides, so slot 1 is the inner
/// quote pair and higher slots sit further out.
pub fn build_ladder(
    reference: Decimal,
    offsets_bps: &[Decimal],
    price_tick_decimals: u32,
) -> Vec<QuoteSpec> {
    let mut ladder = Vec::with_capacity(offsets_bps.len() * 2);

    for (index, offset) in offsets_bps.iter().enumerate() {
        let slot = (index + 1) as u8;
        for side in [Side::Buy, Side::Sell] {
            ladder.push(QuoteSpec {
                side,
                slot,
                offset_bps: *offset,
                price: quote_price(reference, side, *offset, price_tick_decimals),
            });
        }
    }

    ladder
}
