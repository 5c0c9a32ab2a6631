use palette::Srgb;

use super::device::TEMPERATURE_RANGE;

const COOL: (u8, u8, u8) = (136, 170, 255);
const WARM: (u8, u8, u8) = (255, 153, 68);

/// Convert device temperature units (143-344) to Kelvin (~7000K-2900K).
pub fn elgato_units_to_kelvin(value: u16) -> u32 {
    let kelvin = (-4100.0 * f64::from(value)) / 201.0 + 1_993_300.0 / 201.0;
    kelvin.round().max(0.0) as u32
}

/// Inverse of [`elgato_units_to_kelvin`], clamped to the device domain.
pub fn kelvin_to_elgato_units(kelvin: u32) -> u16 {
    let units = (1_993_300.0 - 201.0 * f64::from(kelvin)) / 4100.0;
    let (min, max) = (*TEMPERATURE_RANGE.start(), *TEMPERATURE_RANGE.end());

    (units.round() as i64).clamp(min.into(), max.into()) as u16
}

/// Indicator color for a temperature: linear blend from cool blue at 143 to
/// warm orange at 344.
pub fn temperature_to_rgb(value: u16) -> Srgb<u8> {
    let (min, max) = (*TEMPERATURE_RANGE.start(), *TEMPERATURE_RANGE.end());
    let t = f64::from(value.clamp(min, max) - min) / f64::from(max - min);

    let lerp = |from: u8, to: u8| (f64::from(from) + (f64::from(to) - f64::from(from)) * t) as u8;

    Srgb::new(lerp(COOL.0, WARM.0), lerp(COOL.1, WARM.1), lerp(COOL.2, WARM.2))
}

/// 0-100 percent to an 8-bit alpha channel.
pub fn percent_to_alpha(percent: f32) -> u8 {
    ((percent.clamp(0.0, 100.0) / 100.0) * 255.0).round() as u8
}

pub fn to_hex(color: Srgb<u8>) -> String {
    format!("#{:02x}{:02x}{:02x}", color.red, color.green, color.blue)
}
