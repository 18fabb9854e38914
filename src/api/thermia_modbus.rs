//! Thermia over Modbus TCP. Register map per Thermia's Modbus protocol
//! sheet: the comfort wheel is holding register 5 at scale 100, the outdoor
//! temperature input register 13 at scale 100 and the room sensor input
//! register 121 at scale 10.

use std::net::SocketAddr;

use tokio_modbus::{
    Slave,
    client::sync::{Context as ModbusContext, Reader, Writer, tcp},
};

use crate::{
    api::pump::{Pump, PumpReading},
    prelude::*,
};

const UNIT_ID: u8 = 5;
const COMFORT_WHEEL: u16 = 5;
const OUTDOOR_TEMP: u16 = 13;
const ROOM_SENSOR: u16 = 121;

pub struct ThermiaModbus {
    context: ModbusContext,
}

enum Register {
    Holding(u16),
    Input(u16),
}

impl ThermiaModbus {
    pub fn connect(address: &str) -> Result<Self> {
        let address: SocketAddr =
            address.parse().with_context(|| format!("invalid pump address `{address}`"))?;
        let context = tcp::connect_slave(address, Slave(UNIT_ID))
            .with_context(|| format!("failed to connect to the pump at `{address}`"))?;
        Ok(Self { context })
    }

    /// Read one register and scale it down to whole degrees. The registers
    /// carry signed 16-bit values.
    fn read_temperature(&mut self, register: Register, scale: f64) -> Result<i32> {
        let (address, words) = match register {
            Register::Holding(address) => {
                (address, self.context.read_holding_registers(address, 1))
            }
            Register::Input(address) => (address, self.context.read_input_registers(address, 1)),
        };
        let words = words
            .with_context(|| format!("failed to read register {address}"))?
            .map_err(|code| anyhow!("exception response for register {address}: {code}"))?;
        let raw = *words.first().with_context(|| format!("empty response for {address}"))?;
        let value = (f64::from(raw as i16) / scale).round() as i32;
        trace!(address, raw, value, "read register");
        Ok(value)
    }
}

impl Pump for ThermiaModbus {
    fn read(&mut self) -> Result<PumpReading> {
        let reading = PumpReading {
            outdoor_temp: self.read_temperature(Register::Input(OUTDOOR_TEMP), 100.0)?,
            room_temp: self.read_temperature(Register::Input(ROOM_SENSOR), 10.0)?,
            setpoint: self.read_temperature(Register::Holding(COMFORT_WHEEL), 100.0)?,
        };
        debug!(?reading, "read the pump");
        Ok(reading)
    }

    fn write_setpoint(&mut self, setpoint: i32) -> Result {
        let value = u16::try_from(setpoint * 100)
            .with_context(|| format!("setpoint {setpoint} out of register range"))?;
        self.context
            .write_single_register(COMFORT_WHEEL, value)
            .context("failed to write the comfort wheel")?
            .map_err(|code| anyhow!("exception response for the comfort wheel write: {code}"))?;
        info!(setpoint, "wrote the comfort wheel");
        Ok(())
    }
}
