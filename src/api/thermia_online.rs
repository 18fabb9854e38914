//! Thermia online REST API. The heavy Azure B2C login dance stays outside
//! this program: a valid bearer token is expected in the configuration or in
//! the `THERMIA_ACCESS_TOKEN` environment variable.

use serde::{Deserialize, Serialize};

use crate::{
    api::pump::{Pump, PumpReading},
    prelude::*,
};

pub struct ThermiaOnline {
    api_base_url: String,
    installation_id: u64,
    token: String,

    /// Taken from the latest status response; a write needs a read first.
    heating_effect_register: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstallationStatus {
    heating_effect: f64,
    outdoor_temperature: f64,
    indoor_temperature: f64,
    heating_effect_registers: Vec<u64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterWrite {
    register_specification_id: u64,
    register_value: i32,
    client_uuid: &'static str,
}

impl ThermiaOnline {
    pub fn new(api_base_url: String, installation_id: u64, token: Option<String>) -> Result<Self> {
        let token = match token {
            Some(token) => token,
            None => std::env::var("THERMIA_ACCESS_TOKEN")
                .context("no access token configured and `THERMIA_ACCESS_TOKEN` is not set")?,
        };
        Ok(Self { api_base_url, installation_id, token, heating_effect_register: None })
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn status(&mut self) -> Result<InstallationStatus> {
        let url = format!(
            "{}/api/v1/installationstatus/{}/status",
            self.api_base_url, self.installation_id,
        );
        let status: InstallationStatus = ureq::get(&url)
            .header("Authorization", &self.bearer())
            .call()
            .context("failed to fetch the installation status")?
            .body_mut()
            .read_json()
            .context("failed to deserialize the installation status")?;
        self.heating_effect_register = status.heating_effect_registers.get(1).copied();
        Ok(status)
    }
}

impl Pump for ThermiaOnline {
    fn read(&mut self) -> Result<PumpReading> {
        let status = self.status()?;
        let reading = PumpReading {
            outdoor_temp: status.outdoor_temperature.round() as i32,
            room_temp: status.indoor_temperature.round() as i32,
            setpoint: status.heating_effect.round() as i32,
        };
        debug!(?reading, "read the pump");
        Ok(reading)
    }

    fn write_setpoint(&mut self, setpoint: i32) -> Result {
        if self.heating_effect_register.is_none() {
            self.status()?;
        }
        let register_specification_id =
            self.heating_effect_register.context("the pump reports no heating effect register")?;
        let url = format!(
            "{}/api/v1/Registers/Installations/{}/Registers",
            self.api_base_url, self.installation_id,
        );
        ureq::post(&url)
            .header("Authorization", &self.bearer())
            .send_json(RegisterWrite {
                register_specification_id,
                register_value: setpoint,
                client_uuid: "api-client-uuid",
            })
            .context("failed to write the heating effect")?;
        info!(setpoint, "wrote the heating effect");
        Ok(())
    }
}
