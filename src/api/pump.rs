use crate::prelude::*;

/// One snapshot of the pump as seen at the start of a run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PumpReading {
    pub outdoor_temp: i32,
    pub room_temp: i32,
    /// The comfort wheel setting, the value this program steers.
    pub setpoint: i32,
}

/// A heat pump reachable over some transport.
pub trait Pump {
    fn read(&mut self) -> Result<PumpReading>;
    fn write_setpoint(&mut self, setpoint: i32) -> Result;
}

impl<P: Pump + ?Sized> Pump for Box<P> {
    fn read(&mut self) -> Result<PumpReading> {
        (**self).read()
    }

    fn write_setpoint(&mut self, setpoint: i32) -> Result {
        (**self).write_setpoint(setpoint)
    }
}

/// In-memory substitute for tests.
#[derive(Debug)]
pub struct MemoryPump {
    pub reading: PumpReading,
    pub written: Vec<i32>,
    pub fail_writes: bool,
}

impl MemoryPump {
    pub const fn new(reading: PumpReading) -> Self {
        Self { reading, written: Vec::new(), fail_writes: false }
    }
}

impl Pump for MemoryPump {
    fn read(&mut self) -> Result<PumpReading> {
        Ok(self.reading)
    }

    fn write_setpoint(&mut self, setpoint: i32) -> Result {
        if self.fail_writes {
            bail!("write failed on purpose");
        }
        self.written.push(setpoint);
        self.reading.setpoint = setpoint;
        Ok(())
    }
}
