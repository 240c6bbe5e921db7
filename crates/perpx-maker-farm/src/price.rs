/*
[INPUT]:  Push-stream price updates and REST fallback snapshots
[OUTPUT]: The freshest per-symbol reference price view
[POS]:    Data layer - price state only, no I/O (the owning task fetches)
[UPDATE]: When snapshot fields or staleness semantics change
*/

use std::time::{Duration, Instant};

use rust_decimal::Decimal;

use perpx_adapter::SymbolPrice;

const BPS_DENOMINATOR: i64 = 10_000;

/// A price update from the push stream, already parsed into decimals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceUpdate {
    pub symbol: String,
    pub mark: Decimal,
    pub mid: Option<Decimal>,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    /// Venue timestamp in epoch milliseconds; orders pushes between restarts.
    pub ts_ms: i64,
}

impl PriceUpdate {
    pub fn empty(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            mark: Decimal::ZERO,
            mid: None,
            bid: None,
            ask: None,
            ts_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceSource {
    Push,
    Rest,
}

/// The freshest known price surface for one symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceSnapshot {
    pub mark: Decimal,
    pub mid: Option<Decimal>,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub spread_bps: Option<Decimal>,
    pub source: PriceSource,
    pub ts_ms: i64,
    pub updated_at: Instant,
}

impl PriceSnapshot {
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.updated_at)
    }

    pub fn is_stale(&self, now: Instant, threshold: Duration) -> bool {
        self.age(now) > threshold
    }

    /// Gap between the venue's mark and the book midpoint, in bps.
    ///
    /// Zero when the mid is unknown; divergence cannot be judged without it.
    pub fn mark_mid_divergence_bps(&self) -> Decimal {
        let Some(mid) = self.mid else {
            return Decimal::ZERO;
        };
        if mid <= Decimal::ZERO || self.mark <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        (self.mark - mid).abs() / mid * Decimal::from(BPS_DENOMINATOR)
    }
}

/// Per-symbol price state. One tracker per strategy task; the task is the
/// sole writer.
#[derive(Debug, Default)]
pub struct PriceTracker {
    snapshot: Option<PriceSnapshot>,
}

impl PriceTracker {
    pub fn new() -> Self {
        Self { snapshot: None }
    }

    /// Latest snapshot, or `None` when no reference price is available.
    pub fn latest(&self) -> Option<&PriceSnapshot> {
        self.snapshot.as_ref()
    }

    /// Ingest a push update. Updates without a usable mark are ignored, and
    /// pushes older than the current snapshot are dropped. Returns whether
    /// the update was accepted.
    pub fn on_push(&mut self, update: &PriceUpdate, now: Instant) -> bool {
        if update.mark <= Decimal::ZERO {
            return false;
        }

        if let Some(current) = &self.snapshot
            && update.ts_ms != 0
            && update.ts_ms < current.ts_ms
        {
            return false;
        }

        self.snapshot = Some(PriceSnapshot {
            mark: update.mark,
            mid: update.mid,
            bid: update.bid,
            ask: update.ask,
            spread_bps: spread_bps(update.bid, update.ask),
            source: PriceSource::Push,
            ts_ms: update.ts_ms,
            updated_at: now,
        });
        true
    }

    /// Ingest a REST fallback snapshot.
    ///
    /// REST has no ordering guarantee against the stream, so it never rolls
    /// the venue timestamp back; it only refreshes the local clock and
    /// fields.
    pub fn on_rest(&mut self, price: &SymbolPrice, now: Instant) {
        if price.mark_price <= Decimal::ZERO {
            return;
        }

        let ts_ms = self.snapshot.as_ref().map(|s| s.ts_ms).unwrap_or(0);
        self.snapshot = Some(PriceSnapshot {
            mark: price.mark_price,
            mid: price.mid_price,
            bid: price.spread_bid,
            ask: price.spread_ask,
            spread_bps: spread_bps(price.spread_bid, price.spread_ask),
            source: PriceSource::Rest,
            ts_ms,
            updated_at: now,
        });
    }

    /// Whether the owning task should refresh the reference over REST.
    pub fn wants_rest_refresh(&self, now: Instant, fallback_interval: Duration) -> bool {
        match &self.snapshot {
            None => true,
            Some(snapshot) => snapshot.age(now) >= fallback_interval,
        }
    }
}

fn spread_bps(bid: Option<Decimal>, ask: Option<Decimal>) -> Option<Decimal> {
    let (bid, ask) = (bid?, ask?);
    if bid <= Decimal::ZERO || ask <= Decimal::ZERO || ask <= bid {
        return None;
    }

    let mid = (bid + ask) / Decimal::from(2);
    Some((ask - bid) / mid * Decimal::from(BPS_DENOMINATOR))
}
