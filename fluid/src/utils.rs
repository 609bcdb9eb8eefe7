use bevy::math::Vec2;

/// Largest power of two that is less than or equal to `x`. Returns 0 for 0.
pub fn prev_power_of_two(x: u32) -> u32 {
    if x == 0 {
        0
    } else {
        1 << (31 - x.leading_zeros())
    }
}

/// Rounds each component down onto a grid of `1 / steps` cells.
pub fn floor_to_grid(v: Vec2, steps: f32) -> Vec2 {
    (v * steps).floor() / steps
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} {}", UNITS[0])
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}
