// =============================================================================
// Kagi policy
// =============================================================================
//
// A Kagi chart is a sequence of alternating up / down lines.  Each tick's
// close price `p` either extends the current line or reverses it:
//
//   anchor    = current line's end price (its extreme so far)
//   threshold = reversal_amount                 (points)
//             = anchor * reversal_amount / 100  (percentage)
//
//   reverse  iff  |p - anchor| >= threshold  AND  p moves against direction
//
// On reversal the current line is finalized and a new line starts at the old
// end price with the opposite direction.  Smaller pullbacks leave the end
// price at the extreme.  The very first line has no direction until price
// moves, and follows the sign of (p - start_price) until it is finalized.
//
// Thickness (yang / yin):
//   - the first line is thin
//   - an up line turns thick once p exceeds the highest shoulder (up-line end)
//     among the last 10 finalized lines
//   - a down line turns thin once p drops below the lowest waist (down-line
//     end) among the last 10 finalized lines
//   - otherwise a line inherits the thickness of the line before it

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::bars::Bar;
use crate::types::{Direction, SizeMode, Thickness};

/// Number of finalized lines whose shoulders / waists decide thickness.
pub const LEVEL_LOOKBACK_LINES: usize = 10;

/// One Kagi line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KagiLine {
    pub start_price: f64,
    pub end_price: f64,
    pub start_time: i64,
    pub end_time: i64,
    pub direction: Direction,
    pub thickness: Thickness,
    pub is_yang: bool,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
    pub tick_count: u64,
}

impl KagiLine {
    fn open(start_price: f64, time: i64, direction: Direction, thickness: Thickness) -> Self {
        Self {
            start_price,
            end_price: start_price,
            start_time: time,
            end_time: time,
            direction,
            thickness,
            is_yang: thickness == Thickness::Thick,
            high: start_price,
            low: start_price,
            volume: 0.0,
            tick_count: 0,
        }
    }

    fn absorb(&mut self, time: i64, price: f64, volume: f64) {
        self.end_time = time;
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.volume += volume;
        self.tick_count += 1;
    }

    fn set_thickness(&mut self, thickness: Thickness) {
        self.thickness = thickness;
        self.is_yang = thickness == Thickness::Thick;
    }

    /// Vertical length of the line.
    pub fn length(&self) -> f64 {
        (self.end_price - self.start_price).abs()
    }

    /// OHLCV view: open = start price, close = end price.
    pub fn bar(&self) -> Bar {
        Bar {
            start_time: self.start_time,
            end_time: self.end_time,
            open: self.start_price,
            high: self.high,
            low: self.low,
            close: self.end_price,
            volume: self.volume,
        }
    }
}

/// A turning point of the Kagi chart: a shoulder (top of an up line) or a
/// waist (bottom of a down line).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KagiLevel {
    pub price: f64,
    pub time: i64,
    /// Index of the finalized line that produced this level.
    pub line_index: usize,
}

/// Shoulder / waist levels accumulated as lines finalize.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KagiLevels {
    pub shoulders: Vec<KagiLevel>,
    pub waists: Vec<KagiLevel>,
}

impl KagiLevels {
    /// Highest shoulder produced by a line with index >= `min_line_index`.
    pub fn max_shoulder_since(&self, min_line_index: usize) -> Option<f64> {
        self.shoulders
            .iter()
            .rev()
            .take_while(|l| l.line_index >= min_line_index)
            .map(|l| l.price)
            .reduce(f64::max)
    }

    /// Lowest waist produced by a line with index >= `min_line_index`.
    pub fn min_waist_since(&self, min_line_index: usize) -> Option<f64> {
        self.waists
            .iter()
            .rev()
            .take_while(|l| l.line_index >= min_line_index)
            .map(|l| l.price)
            .reduce(f64::min)
    }
}

#[derive(Debug, Clone)]
pub struct KagiFormer {
    reversal_amount: f64,
    mode: SizeMode,
    current: Option<KagiLine>,
    /// False until the first line has moved away from its start price.
    directed: bool,
    finalized_count: usize,
    levels: KagiLevels,
    /// (direction, end price) of the most recent finalized lines.
    recent: VecDeque<(Direction, f64)>,
}

impl KagiFormer {
    pub fn new(reversal_amount: f64, mode: SizeMode) -> Self {
        Self {
            reversal_amount,
            mode,
            current: None,
            directed: false,
            finalized_count: 0,
            levels: KagiLevels::default(),
            recent: VecDeque::with_capacity(LEVEL_LOOKBACK_LINES + 1),
        }
    }

    /// Reversal distance required from `anchor`.
    pub fn threshold(&self, anchor: f64) -> f64 {
        match self.mode {
            SizeMode::Points => self.reversal_amount,
            SizeMode::Percentage => anchor.abs() * self.reversal_amount / 100.0,
        }
    }

    pub fn current(&self) -> Option<&KagiLine> {
        self.current.as_ref()
    }

    pub fn levels(&self) -> &KagiLevels {
        &self.levels
    }

    /// Feed one close price; returns the line finalized by a reversal.
    pub fn push(&mut self, time: i64, price: f64, volume: f64) -> Option<KagiLine> {
        let Some(mut line) = self.current.take() else {
            let mut line = KagiLine::open(price, time, Direction::Up, Thickness::Thin);
            line.absorb(time, price, volume);
            self.current = Some(line);
            return None;
        };

        if !self.directed {
            // First line: direction follows the sign of the move from start.
            line.absorb(time, price, volume);
            if price != line.start_price {
                line.direction = if price > line.start_price {
                    Direction::Up
                } else {
                    Direction::Down
                };
                line.end_price = price;
                self.directed = true;
            }
            self.refresh_thickness(&mut line);
            self.current = Some(line);
            return None;
        }

        let extends = match line.direction {
            Direction::Up => price > line.end_price,
            Direction::Down => price < line.end_price,
        };
        if extends {
            line.absorb(time, price, volume);
            line.end_price = price;
            self.refresh_thickness(&mut line);
            self.current = Some(line);
            return None;
        }

        let anchor = line.end_price;
        if (price - anchor).abs() >= self.threshold(anchor) {
            let mut next = KagiLine::open(anchor, time, line.direction.flipped(), line.thickness);
            next.absorb(time, price, volume);
            next.end_price = price;

            let finished = line;
            self.record_finalized(&finished);
            self.refresh_thickness(&mut next);
            self.current = Some(next);
            return Some(finished);
        }

        // Pullback inside the threshold.  On the first line a move back across
        // the start price flips the direction without creating a new line.
        line.absorb(time, price, volume);
        if self.finalized_count == 0 {
            let crossed = match line.direction {
                Direction::Up => price < line.start_price,
                Direction::Down => price > line.start_price,
            };
            if crossed {
                line.direction = line.direction.flipped();
                line.end_price = price;
                self.refresh_thickness(&mut line);
            }
        }
        self.current = Some(line);
        None
    }

    fn record_finalized(&mut self, line: &KagiLine) {
        let level = KagiLevel {
            price: line.end_price,
            time: line.end_time,
            line_index: self.finalized_count,
        };
        match line.direction {
            Direction::Up => self.levels.shoulders.push(level),
            Direction::Down => self.levels.waists.push(level),
        }
        self.recent.push_back((line.direction, line.end_price));
        while self.recent.len() > LEVEL_LOOKBACK_LINES {
            self.recent.pop_front();
        }
        self.finalized_count += 1;
    }

    fn refresh_thickness(&self, line: &mut KagiLine) {
        match line.direction {
            Direction::Up => {
                let max_shoulder = self
                    .recent
                    .iter()
                    .filter(|(d, _)| *d == Direction::Up)
                    .map(|(_, p)| *p)
                    .reduce(f64::max);
                if matches!(max_shoulder, Some(s) if line.end_price > s) {
                    line.set_thickness(Thickness::Thick);
                }
            }
            Direction::Down => {
                let min_waist = self
                    .recent
                    .iter()
                    .filter(|(d, _)| *d == Direction::Down)
                    .map(|(_, p)| *p)
                    .reduce(f64::min);
                if matches!(min_waist, Some(w) if line.end_price < w) {
                    line.set_thickness(Thickness::Thin);
                }
            }
        }
    }
}
