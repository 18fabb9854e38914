pub mod forecast;
pub mod prices;
pub mod pump;
pub mod sensor;
pub mod smhi;
pub mod thermia_modbus;
pub mod thermia_online;
