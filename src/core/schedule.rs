use std::collections::BTreeMap;

/// Base setpoint schedule for one day: hour of day mapped to the setpoint
/// that takes effect at that hour.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DaySchedule(BTreeMap<u32, i32>);

impl DaySchedule {
    pub const fn new(entries: BTreeMap<u32, i32>) -> Self {
        Self(entries)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The setpoint scheduled to be set exactly at `hour`, if any.
    pub fn get(&self, hour: u32) -> Option<i32> {
        self.0.get(&hour).copied()
    }

    /// The last scheduled hour of the day (the night-reset hour).
    pub fn last_hour(&self) -> Option<u32> {
        self.0.keys().next_back().copied()
    }

    /// The base setpoint in effect at `hour`: the latest entry at or before
    /// it, wrapping to the last entry of the previous evening.
    pub fn active_at(&self, hour: u32) -> Option<i32> {
        self.0
            .range(..=hour)
            .next_back()
            .or_else(|| self.0.iter().next_back())
            .map(|(_, setpoint)| *setpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule() -> DaySchedule {
        DaySchedule::new(BTreeMap::from([(6, 20), (20, 15)]))
    }

    #[test]
    fn test_get() {
        assert_eq!(schedule().get(6), Some(20));
        assert_eq!(schedule().get(7), None);
    }

    #[test]
    fn test_last_hour() {
        assert_eq!(schedule().last_hour(), Some(20));
        assert_eq!(DaySchedule::default().last_hour(), None);
    }

    #[test]
    fn test_active_at_between_entries() {
        assert_eq!(schedule().active_at(13), Some(20));
        assert_eq!(schedule().active_at(21), Some(15));
    }

    #[test]
    fn test_active_at_wraps_past_midnight() {
        // Before the first morning entry, the evening setpoint still holds.
        assert_eq!(schedule().active_at(3), Some(15));
    }
}
