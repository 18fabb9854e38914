//! Price schedule optimizer: picks the decrease/pause hours inside a window
//! that capture the most expensive hours, under the constraint that the pump
//! never sees more than a couple of consecutive decrease hours before a
//! forced pause.

use std::collections::HashSet;

use crate::{api::prices::HourlyPrices, prelude::*, quantity::Ore};

const N_BLOCKS: usize = 12;

/// One hour of the merged decrease plan.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum HourSlot {
    /// Outside every window.
    #[default]
    Unset,
    /// Decrease this hour; carries the captured price.
    Decrease(Ore),
    /// Inside a window but the temperature must not be decreased.
    Pause,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct HourMask([HourSlot; 24]);

impl HourMask {
    pub const fn slot(&self, hour: u32) -> HourSlot {
        self.0[hour as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, HourSlot)> + '_ {
        (0..24).zip(self.0.iter().copied())
    }

    /// Merge another window's plan into this one; the newcomer wins wherever
    /// it says anything at all.
    pub fn merge(&mut self, other: &Self) {
        for (slot, incoming) in self.0.iter_mut().zip(other.0) {
            if incoming != HourSlot::Unset {
                *slot = incoming;
            }
        }
    }
}

#[derive(Debug)]
pub struct Optimized {
    pub mask: HourMask,
    /// Total captured price over the selected hours.
    pub total: Ore,
}

/// Exhaustively search the block patterns over `[start, stop)` and keep the
/// one capturing the highest total price.
///
/// The span is covered by 12 independently chosen blocks — `[1, 1, 0]` or
/// `[1, 0]` — each combination emitted both as-is and with a leading pause,
/// truncated to the span and deduplicated. 2 × 4096 candidates at most, so
/// brute force is fine and the tie-break stays deterministic.
pub fn optimize(prices: &HourlyPrices, start: u32, stop: u32) -> Result<Optimized> {
    ensure!(start < stop, "empty window {start}-{stop}");
    ensure!(stop <= 24, "window {start}-{stop} ends beyond 24");
    let span = (stop - start) as usize;

    let window_prices: Vec<Ore> = (start..stop).map(|hour| prices.price(hour)).collect();

    let mut seen = HashSet::new();
    let mut candidates: Vec<(Vec<bool>, Ore)> = Vec::new();
    for bits in 0_u16..(1 << N_BLOCKS) {
        for leading_pause in [false, true] {
            let Some(pattern) = build_pattern(bits, leading_pause, span) else {
                continue;
            };
            let key: u32 = pattern
                .iter()
                .enumerate()
                .filter(|(_, selected)| **selected)
                .fold(0, |key, (index, _)| key | (1 << index));
            if !seen.insert(key) {
                continue;
            }
            let total: Ore = pattern
                .iter()
                .zip(&window_prices)
                .filter(|(selected, _)| **selected)
                .map(|(_, price)| *price)
                .sum();
            candidates.push((pattern, total));
        }
    }

    // Stable sort: among equal totals, the first-enumerated pattern wins.
    candidates.sort_by_key(|(_, total)| std::cmp::Reverse(total.ordered()));
    let (pattern, total) = candidates.into_iter().next().context("there is no candidate")?;

    let mut mask = HourMask::default();
    for (offset, selected) in pattern.iter().enumerate() {
        mask.0[start as usize + offset] = if *selected {
            HourSlot::Decrease(window_prices[offset])
        } else {
            HourSlot::Pause
        };
    }
    trace!(start, stop, total = %total, "optimized window");
    Ok(Optimized { mask, total })
}

fn build_pattern(bits: u16, leading_pause: bool, span: usize) -> Option<Vec<bool>> {
    let block_lengths = (0..N_BLOCKS).map(|index| if bits >> index & 1 == 1 { 3_usize } else { 2 });
    if block_lengths.clone().sum::<usize>() < span {
        // Too few hours to cover the span.
        return None;
    }

    let mut pattern = Vec::with_capacity(span);
    if leading_pause {
        pattern.push(false);
    }
    'blocks: for length in block_lengths {
        for position in 0..length {
            if pattern.len() == span {
                break 'blocks;
            }
            pattern.push(position < length - 1);
        }
    }
    pattern.truncate(span);
    Some(pattern)
}

/// The merged plan over every configured window, later windows winning per
/// hour.
pub fn merged_plan(prices: &HourlyPrices, windows: &[(u32, u32)]) -> Result<HourMask> {
    let mut merged = HourMask::default();
    for &(start, stop) in windows {
        merged.merge(&optimize(prices, start, stop)?.mask);
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use approx::assert_abs_diff_eq;

    use super::*;

    fn prices(entries: &[(u32, f64)]) -> HourlyPrices {
        HourlyPrices::new(entries.iter().map(|(hour, price)| (*hour, Ore(*price))).collect())
    }

    #[test]
    fn test_prefers_expensive_hours() -> Result {
        // Any valid pattern over the 4-hour span must pause somewhere; the
        // optimum pauses on the cheapest hour, 9.
        let prices = prices(&[(7, 150.0), (8, 300.0), (9, 80.0), (10, 280.0)]);
        let optimized = optimize(&prices, 7, 11)?;
        assert_abs_diff_eq!(optimized.total.0, 730.0);
        assert_eq!(optimized.mask.slot(7), HourSlot::Decrease(Ore(150.0)));
        assert_eq!(optimized.mask.slot(8), HourSlot::Decrease(Ore(300.0)));
        assert_eq!(optimized.mask.slot(9), HourSlot::Pause);
        assert_eq!(optimized.mask.slot(10), HourSlot::Decrease(Ore(280.0)));
        Ok(())
    }

    #[test]
    fn test_hours_outside_window_stay_unset() -> Result {
        let optimized = optimize(&prices(&[(7, 10.0), (8, 20.0)]), 7, 9)?;
        assert_eq!(optimized.mask.slot(6), HourSlot::Unset);
        assert_eq!(optimized.mask.slot(9), HourSlot::Unset);
        Ok(())
    }

    #[test]
    fn test_no_decrease_run_longer_than_three() -> Result {
        let all = prices(&(0..24).map(|hour| (hour, f64::from(hour) + 1.0)).collect::<Vec<_>>());
        let optimized = optimize(&all, 0, 24)?;
        let mut run = 0;
        for (_, slot) in optimized.mask.iter() {
            if matches!(slot, HourSlot::Decrease(_)) {
                run += 1;
                assert!(run <= 3, "decrease run exceeds 3 consecutive hours");
            } else {
                run = 0;
            }
        }
        Ok(())
    }

    #[test]
    fn test_every_window_hour_is_marked() -> Result {
        let all = prices(&(0..24).map(|hour| (hour, 100.0)).collect::<Vec<_>>());
        let optimized = optimize(&all, 6, 18)?;
        for hour in 6..18 {
            assert_ne!(optimized.mask.slot(hour), HourSlot::Unset, "hour {hour}");
        }
        Ok(())
    }

    #[test]
    fn test_missing_prices_count_as_zero() -> Result {
        // Only hour 8 carries a price, so the optimum must capture it.
        let optimized = optimize(&prices(&[(8, 55.0)]), 7, 11)?;
        assert_eq!(optimized.mask.slot(8), HourSlot::Decrease(Ore(55.0)));
        assert_abs_diff_eq!(optimized.total.0, 55.0);
        Ok(())
    }

    #[test]
    fn test_invalid_window_rejected() {
        let prices = HourlyPrices::new(BTreeMap::new());
        assert!(optimize(&prices, 11, 7).is_err());
        assert!(optimize(&prices, 7, 25).is_err());
    }

    #[test]
    fn test_merge_last_window_wins() -> Result {
        let prices = prices(&(0..24).map(|hour| (hour, 100.0)).collect::<Vec<_>>());
        let merged = merged_plan(&prices, &[(7, 11), (9, 13)])?;
        // Hours 9 and 10 belong to both windows; the later window decides.
        let second = optimize(&prices, 9, 13)?;
        assert_eq!(merged.slot(9), second.mask.slot(9));
        assert_eq!(merged.slot(10), second.mask.slot(10));
        assert_ne!(merged.slot(7), HourSlot::Unset);
        Ok(())
    }
}
