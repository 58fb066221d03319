//! Market data normaliser.
//!
//! Converts raw quotes into [`TickObservation`]s and keeps a bounded ring of
//! them per symbol. Snapshot queries walk the ring once.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::domain::{last_digit, DomainError, Symbol, TickObservation, TickUpdate};

#[derive(Debug, Default)]
struct History {
    ring: VecDeque<TickObservation>,
    pip_size: Option<u32>,
}

/// Digit statistics over the most recent observations of one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DigitSnapshot {
    pub symbol: Symbol,
    /// Observations the statistics cover.
    pub sample_size: usize,
    /// Digits in arrival order, oldest first.
    pub recent: Vec<u8>,
    pub counts: [u32; 10],
    /// Per-digit share of the sample, 0-100, two decimals.
    pub percentages: [Decimal; 10],
    pub even_pct: Decimal,
    pub odd_pct: Decimal,
    /// Digits 0-4.
    pub low_pct: Decimal,
    /// Digits 5-9.
    pub high_pct: Decimal,
    pub latest: Option<TickObservation>,
}

impl DigitSnapshot {
    fn compute(symbol: &Symbol, window: &[&TickObservation]) -> Self {
        let mut counts = [0u32; 10];
        for obs in window {
            counts[usize::from(obs.digit)] += 1;
        }
        let total = window.len();
        let pct = |n: u32| percentage(n, total);
        let even: u32 = counts.iter().step_by(2).sum();
        let low: u32 = counts[..5].iter().sum();
        let sample = u32::try_from(total).unwrap_or(u32::MAX);

        Self {
            symbol: symbol.clone(),
            sample_size: total,
            recent: window.iter().map(|obs| obs.digit).collect(),
            counts,
            percentages: counts.map(pct),
            even_pct: pct(even),
            odd_pct: pct(sample.saturating_sub(even)),
            low_pct: pct(low),
            high_pct: pct(sample.saturating_sub(low)),
            latest: window.last().map(|obs| (*obs).clone()),
        }
    }
}

fn percentage(count: u32, total: usize) -> Decimal {
    if total == 0 {
        return Decimal::ZERO;
    }
    (Decimal::from(count) * Decimal::ONE_HUNDRED / Decimal::from(total))
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Per-symbol tick history with broadcast notifications.
pub struct MarketDataNormalizer {
    capacity: usize,
    symbols: RwLock<HashMap<Symbol, History>>,
    /// Current stream segment, shared by all symbols.
    segment: RwLock<u64>,
    tx: broadcast::Sender<TickObservation>,
}

impl MarketDataNormalizer {
    /// Ring buffers hold at most `capacity` observations per symbol.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.clamp(16, 4096));
        Self {
            capacity: capacity.max(1),
            symbols: RwLock::new(HashMap::new()),
            segment: RwLock::new(0),
            tx,
        }
    }

    /// Receive every accepted observation.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TickObservation> {
        self.tx.subscribe()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fix the number of decimals quotes for `symbol` are rendered with.
    pub fn set_pip_size(&self, symbol: &Symbol, pip_size: u32) {
        self.symbols
            .write()
            .entry(symbol.clone())
            .or_default()
            .pip_size = Some(pip_size);
    }

    /// Ingest a venue tick, adopting its pip size.
    ///
    /// # Errors
    ///
    /// Returns an error if the quote is not decimal text.
    pub fn on_tick(&self, tick: &TickUpdate) -> Result<Option<TickObservation>, DomainError> {
        if let Some(pip) = tick.pip_size {
            self.set_pip_size(&tick.symbol, pip);
        }
        self.on_quote(&tick.symbol, &tick.quote, tick.epoch)
    }

    /// Normalise one quote and append it to the symbol's ring.
    ///
    /// Returns `None` for a tick no newer than the latest stored one (the
    /// venue repeats the current tick when a stream is re-issued).
    ///
    /// # Errors
    ///
    /// Returns an error if the quote is not decimal text.
    pub fn on_quote(
        &self,
        symbol: &Symbol,
        raw_quote: &str,
        epoch: i64,
    ) -> Result<Option<TickObservation>, DomainError> {
        let segment = *self.segment.read();
        let observation = {
            let mut symbols = self.symbols.write();
            let history = symbols.entry(symbol.clone()).or_default();
            if history.ring.back().is_some_and(|last| epoch <= last.epoch) {
                trace!(%symbol, epoch, "Skipping stale tick");
                return Ok(None);
            }
            let (quote, digit) = last_digit(raw_quote, history.pip_size)?;
            let observation = TickObservation {
                symbol: symbol.clone(),
                quote,
                digit,
                epoch,
                segment,
            };
            if history.ring.len() == self.capacity {
                history.ring.pop_front();
            }
            history.ring.push_back(observation.clone());
            observation
        };

        let _ = self.tx.send(observation.clone());
        Ok(Some(observation))
    }

    /// Start a new segment: the next observation of every symbol follows a
    /// gap.
    pub fn mark_discontinuity(&self) -> u64 {
        let mut segment = self.segment.write();
        *segment += 1;
        *segment
    }

    #[must_use]
    pub fn segment(&self) -> u64 {
        *self.segment.read()
    }

    /// Statistics over the last `recent` observations (all of them when
    /// `recent` is 0). `None` if the symbol has never ticked.
    #[must_use]
    pub fn snapshot(&self, symbol: &Symbol, recent: usize) -> Option<DigitSnapshot> {
        let symbols = self.symbols.read();
        let history = symbols.get(symbol)?;
        let len = history.ring.len();
        let take = if recent == 0 { len } else { recent.min(len) };
        let window: Vec<&TickObservation> = history.ring.iter().skip(len - take).collect();
        Some(DigitSnapshot::compute(symbol, &window))
    }

    #[must_use]
    pub fn latest(&self, symbol: &Symbol) -> Option<TickObservation> {
        self.symbols
            .read()
            .get(symbol)
            .and_then(|h| h.ring.back().cloned())
    }

    #[must_use]
    pub fn len(&self, symbol: &Symbol) -> usize {
        self.symbols.read().get(symbol).map_or(0, |h| h.ring.len())
    }

    #[must_use]
    pub fn pip_size(&self, symbol: &Symbol) -> Option<u32> {
        self.symbols.read().get(symbol).and_then(|h| h.pip_size)
    }
}
