use std::io;
use std::path::PathBuf;
use std::time::Duration;

use linux_embedded_hal::gpio_cdev::{Chip, LineRequestFlags};
use linux_embedded_hal::{CdevPin, Delay};
use serialport::SerialPort;

use sqmp_sensor::analog::{AnalogInput, KValueCalibration};
use sqmp_sensor::station::AnalogProbes;
use sqmp_sensor::{config as probe_config, ModbusTransport, Station};

use crate::{config, StationError, StationResult};

pub type Transport = ModbusTransport<SerialPortBus, CdevPin, CdevPin, Delay>;

pub type HostStation =
    Station<IioChannel, IioChannel, IioChannel, KValueCalibration, Transport, Delay>;

/// Read timeout for the tty; reads are only issued once bytes are known
/// to be waiting, so this only bounds a misbehaving driver
const TTY_READ_TIMEOUT: Duration = Duration::from_millis(10);

/// `embedded-io` view of a serial tty. `read_ready` is backed by the
/// driver's pending byte count.
pub struct SerialPortBus {
    port: Box<dyn SerialPort>,
}

impl SerialPortBus {
    pub fn open(path: &str, baud_rate: u32) -> StationResult<Self> {
        let port = serialport::new(path, baud_rate)
            .timeout(TTY_READ_TIMEOUT)
            .open()?;
        log::info!("Opened {path} at {baud_rate} baud");
        Ok(Self { port })
    }
}

impl embedded_io::ErrorType for SerialPortBus {
    type Error = io::Error;
}

impl embedded_io::Read for SerialPortBus {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        io::Read::read(&mut self.port, buf)
    }
}

impl embedded_io::ReadReady for SerialPortBus {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(self.port.bytes_to_read()? > 0)
    }
}

impl embedded_io::Write for SerialPortBus {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        io::Write::write(&mut self.port, buf)
    }

    // drains the tty output queue before returning
    fn flush(&mut self) -> Result<(), Self::Error> {
        io::Write::flush(&mut self.port)
    }
}

/// One IIO ADC channel, rescaled to the 10-bit range the probe
/// conversions expect
pub struct IioChannel {
    path: PathBuf,
    resolution_bits: u8,
}

impl IioChannel {
    const TARGET_BITS: u8 = 10;
    const MAX_COUNTS: u32 = (1 << Self::TARGET_BITS) - 1;
    /// Widest reading that fits the `u32` parse
    const MAX_BITS: u8 = 32;

    /// `resolution_bits` is clamped to 1..=32
    pub fn new(path: impl Into<PathBuf>, resolution_bits: u8) -> Self {
        Self {
            path: path.into(),
            resolution_bits: resolution_bits.clamp(1, Self::MAX_BITS),
        }
    }

    fn rescale(&self, raw: u32) -> u16 {
        let scaled = if self.resolution_bits >= Self::TARGET_BITS {
            raw >> (self.resolution_bits - Self::TARGET_BITS)
        } else {
            raw << (Self::TARGET_BITS - self.resolution_bits)
        };
        scaled.min(Self::MAX_COUNTS) as u16
    }
}

impl AnalogInput for IioChannel {
    type Error = StationError;

    fn read_counts(&mut self) -> Result<u16, Self::Error> {
        let text = std::fs::read_to_string(&self.path)?;
        let text = text.trim();
        let raw: u32 = text
            .parse()
            .map_err(|_| StationError::AdcParse(text.to_string()))?;
        Ok(self.rescale(raw))
    }
}

fn output_line(chip: &mut Chip, offset: u32, consumer: &str) -> StationResult<CdevPin> {
    let handle = chip
        .get_line(offset)?
        .request(LineRequestFlags::OUTPUT, 0, consumer)?;
    Ok(CdevPin::new(handle)?)
}

/// Open the tty and both direction lines, transceiver left listening
pub fn open_transport() -> StationResult<Transport> {
    let serial = SerialPortBus::open(config::serial_path(), probe_config::baud_rate())?;

    let mut chip = Chip::new(config::gpio_chip())?;
    let (de_line, re_line) = config::direction_lines();
    let de = output_line(&mut chip, de_line, "sqmd-rs485-de")?;
    let re = output_line(&mut chip, re_line, "sqmd-rs485-re")?;
    log::info!(
        "RS485 direction on {} lines DE={de_line} RE={re_line}",
        config::gpio_chip()
    );

    Ok(ModbusTransport::new(serial, de, re, Delay)?)
}

pub fn open_station() -> StationResult<HostStation> {
    let transport = open_transport()?;
    let (ph, ec, soil) = config::adc_channels();
    let bits = config::adc_resolution_bits();
    let probes = AnalogProbes {
        ph: IioChannel::new(ph, bits),
        ec: IioChannel::new(ec, bits),
        soil: IioChannel::new(soil, bits),
    };
    Ok(Station::new(
        probes,
        KValueCalibration::default(),
        transport,
        Delay,
    ))
}
