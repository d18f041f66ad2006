use std::net::SocketAddr;

use async_trait::async_trait;
use chrono::Utc;
use tokio_modbus::client::{Context, Reader, tcp};
use tokio_modbus::Slave;
use tracing::{info, warn};

use crate::errors::{Result, SimError};
use crate::models::samples::MeasurementSample;
use crate::services::expectation_pipeline::MeasurementSource;

/// Join two big-endian u16 words (high first) into an IEEE 754 f32.
fn words_to_float(high: u16, low: u16) -> f32 {
    f32::from_bits(((high as u32) << 16) | low as u32)
}

/// AC power of a real inverter, read over Modbus TCP.
///
/// The power register holds a float32 in kW spread over two consecutive
/// holding registers, high word at `power_register`.
pub struct ModbusMeasurement {
    addr: SocketAddr,
    unit_id: u8,
    power_register: u16,
    ctx: Option<Context>,
}

impl ModbusMeasurement {
    pub fn new(addr: SocketAddr, unit_id: u8, power_register: u16) -> Self {
        Self {
            addr,
            unit_id,
            power_register,
            ctx: None,
        }
    }

    async fn connected(&mut self) -> Result<&mut Context> {
        if self.ctx.is_none() {
            let ctx = tcp::connect_slave(self.addr, Slave(self.unit_id))
                .await
                .map_err(|e| {
                    SimError::SourceUnavailable(format!("Modbus connect to {} failed: {}", self.addr, e))
                })?;
            info!("[MODBUS] Connected to {} (unit {})", self.addr, self.unit_id);
            self.ctx = Some(ctx);
        }
        self.ctx
            .as_mut()
            .ok_or_else(|| SimError::SourceUnavailable("Modbus context missing".to_string()))
    }

    async fn read_power_kw(&mut self) -> Result<f32> {
        let register = self.power_register;
        let addr = self.addr;
        let ctx = self.connected().await?;
        let result = ctx.read_holding_registers(register, 2).await;
        let words = match result {
            Ok(Ok(words)) => words,
            Ok(Err(code)) => {
                return Err(SimError::SourceUnavailable(format!(
                    "Modbus exception {:?} reading register {} on {}",
                    code, register, addr
                )));
            }
            Err(e) => {
                // drop the connection so the next update reconnects
                self.ctx = None;
                return Err(SimError::SourceUnavailable(format!(
                    "Modbus read on {} failed: {}",
                    addr, e
                )));
            }
        };
        match words.as_slice() {
            [high, low] => Ok(words_to_float(*high, *low)),
            other => Err(SimError::SourceUnavailable(format!(
                "expected 2 registers, got {}",
                other.len()
            ))),
        }
    }
}

#[async_trait]
impl MeasurementSource for ModbusMeasurement {
    async fn update(&mut self) -> Result<MeasurementSample> {
        let power = self.read_power_kw().await?;
        if !power.is_finite() {
            warn!("[MODBUS] Non-finite power reading from {}", self.addr);
            return Err(SimError::SourceUnavailable(format!(
                "non-finite power reading {} from {}",
                power, self.addr
            )));
        }
        Ok(MeasurementSample {
            timestamp: Utc::now().into(),
            power_kw: power as f64,
        })
    }
}
