//! MAX485 style transceiver direction control. DE enables the line
//! driver, RE (active low) enables the receiver. Both are driven
//! together: high for transmit, low for receive.

use embedded_hal::digital::OutputPin;

use crate::ModbusError;

pub struct Rs485Direction<DE, RE> {
    de: DE,
    re: RE,
    transmitting: bool,
}

impl<DE: OutputPin, RE: OutputPin> Rs485Direction<DE, RE> {
    /// Takes the pins and leaves the transceiver listening
    pub fn new(de: DE, re: RE) -> Result<Self, ModbusError> {
        let mut dir = Self {
            de,
            re,
            transmitting: true,
        };
        dir.receive()?;
        Ok(dir)
    }

    pub fn transmit(&mut self) -> Result<(), ModbusError> {
        self.de.set_high().map_err(|_| ModbusError::Pin)?;
        self.re.set_high().map_err(|_| ModbusError::Pin)?;
        self.transmitting = true;
        Ok(())
    }

    pub fn receive(&mut self) -> Result<(), ModbusError> {
        // driver first so the line is released before the receiver listens
        self.de.set_low().map_err(|_| ModbusError::Pin)?;
        self.re.set_low().map_err(|_| ModbusError::Pin)?;
        self.transmitting = false;
        Ok(())
    }

    pub fn is_transmitting(&self) -> bool {
        self.transmitting
    }

    pub fn release(self) -> (DE, RE) {
        (self.de, self.re)
    }
}
