use comfy_table::{Attribute, Cell, CellAlignment, Color, Table, modifiers, presets};

use crate::{
    api::prices::HourlyPrices,
    core::{
        optimizer::{HourMask, HourSlot},
        schedule::DaySchedule,
    },
    quantity::Ore,
};

/// Today's decrease plan as a table, one row per hour.
pub fn build_plan_table(
    prices: &HourlyPrices,
    mask: &HourMask,
    schedule: &DaySchedule,
    threshold: Ore,
) -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED).apply_modifier(modifiers::UTF8_ROUND_CORNERS);
    table.enforce_styling();
    table.set_header(vec!["Hour", "Price", "Plan", "Base"]);

    for (hour, slot) in mask.iter() {
        let price = prices.price(hour);
        let (plan, plan_color) = match slot {
            HourSlot::Decrease(_) if price <= threshold => ("under threshold", Color::DarkYellow),
            HourSlot::Decrease(_) => ("decrease", Color::Red),
            HourSlot::Pause => ("pause", Color::Green),
            HourSlot::Unset => ("", Color::Reset),
        };
        let base = schedule
            .active_at(hour)
            .map_or_else(String::new, |setpoint| setpoint.to_string());

        table.add_row(vec![
            Cell::new(format!("{hour:02}")).add_attribute(Attribute::Dim),
            Cell::new(price).set_alignment(CellAlignment::Right).fg(
                if matches!(slot, HourSlot::Decrease(_)) { Color::Red } else { Color::Reset },
            ),
            Cell::new(plan).fg(plan_color),
            Cell::new(base).set_alignment(CellAlignment::Right),
        ]);
    }
    table
}

/// The priciest hours of the day for the top-hours strategy.
pub fn build_top_hours_table(prices: &HourlyPrices, n_hours: usize) -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED).apply_modifier(modifiers::UTF8_ROUND_CORNERS);
    table.set_header(vec!["Hour", "Price"]);
    for (hour, price) in prices.top_hours(n_hours) {
        table.add_row(vec![
            Cell::new(format!("{hour:02}")),
            Cell::new(price).set_alignment(CellAlignment::Right),
        ]);
    }
    table
}
