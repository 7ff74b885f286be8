//! Board wiring, set at build time from the `[sqmd]` table of `cfg.toml`

#[toml_cfg::toml_config]
pub struct Config {
    #[default("/dev/ttyUSB0")]
    serial_path: &'static str,
    #[default("/dev/gpiochip0")]
    gpio_chip: &'static str,
    #[default(17)]
    de_line: u32,
    #[default(27)]
    re_line: u32,
    #[default("/sys/bus/iio/devices/iio:device0/in_voltage0_raw")]
    ph_channel: &'static str,
    #[default("/sys/bus/iio/devices/iio:device0/in_voltage1_raw")]
    ec_channel: &'static str,
    #[default("/sys/bus/iio/devices/iio:device0/in_voltage2_raw")]
    soil_channel: &'static str,
    #[default(10)]
    adc_resolution_bits: u8,
    #[default(1800)]
    cycle_interval_s: u64,
}

pub fn serial_path() -> &'static str {
    CONFIG.serial_path
}

pub fn gpio_chip() -> &'static str {
    CONFIG.gpio_chip
}

/// (DE, RE) line offsets on [`gpio_chip`]
pub fn direction_lines() -> (u32, u32) {
    (CONFIG.de_line, CONFIG.re_line)
}

/// (pH, EC, soil) sysfs raw value files
pub fn adc_channels() -> (&'static str, &'static str, &'static str) {
    (CONFIG.ph_channel, CONFIG.ec_channel, CONFIG.soil_channel)
}

pub fn adc_resolution_bits() -> u8 {
    CONFIG.adc_resolution_bits
}

pub fn cycle_interval_s() -> u64 {
    CONFIG.cycle_interval_s
}
