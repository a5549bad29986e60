//! Bluetooth Low Energy backend built on `btleplug`.
//!
//! btleplug is async; each call is driven to completion on a private
//! current-thread runtime so the supervisor keeps its blocking contract.

use anyhow::{anyhow, Context, Result};
use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use uuid::Uuid;

use super::{LinkBackend, PeerSession};
use crate::error::PipelineError;

pub struct BtleLink {
    runtime: Arc<Runtime>,
    adapter: Adapter,
    service: Uuid,
}

fn connect_error(context: &str, err: impl std::fmt::Display) -> PipelineError {
    PipelineError::LinkConnect {
        message: format!("{}: {}", context, err),
    }
}

impl BtleLink {
    /// Open the first Bluetooth adapter on the host.
    pub fn new(service_uuid: &str) -> Result<Self> {
        let service = Uuid::parse_str(service_uuid)
            .with_context(|| format!("invalid service uuid '{}'", service_uuid))?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to start BLE runtime")?;
        let adapter = runtime.block_on(async {
            let manager = Manager::new().await?;
            let adapters = manager.adapters().await?;
            Ok::<_, btleplug::Error>(adapters.into_iter().next())
        })?;
        let adapter = adapter.ok_or_else(|| anyhow!("no Bluetooth adapter found"))?;
        Ok(Self {
            runtime: Arc::new(runtime),
            adapter,
            service,
        })
    }

    fn find(&self, address: &str) -> Result<Option<Peripheral>, PipelineError> {
        let peripherals = self
            .runtime
            .block_on(self.adapter.peripherals())
            .map_err(|e| connect_error("failed to list peripherals", e))?;
        Ok(peripherals
            .into_iter()
            .find(|p| p.address().to_string().eq_ignore_ascii_case(address)))
    }
}

impl LinkBackend for BtleLink {
    fn name(&self) -> &'static str {
        "ble"
    }

    fn scan(&mut self, duration: Duration) -> Result<Vec<String>, PipelineError> {
        let adapter = &self.adapter;
        self.runtime
            .block_on(async {
                adapter.start_scan(ScanFilter::default()).await?;
                tokio::time::sleep(duration).await;
                adapter.stop_scan().await?;
                let peripherals = adapter.peripherals().await?;
                Ok::<_, btleplug::Error>(
                    peripherals
                        .iter()
                        .map(|p| p.address().to_string())
                        .collect(),
                )
            })
            .map_err(|e| connect_error("scan failed", e))
    }

    fn connect(&mut self, address: &str) -> Result<Box<dyn PeerSession>, PipelineError> {
        let peripheral = self
            .find(address)?
            .ok_or_else(|| connect_error("peer not in scan results", address))?;
        self.runtime
            .block_on(async {
                peripheral.connect().await?;
                peripheral.discover_services().await
            })
            .map_err(|e| connect_error("connect failed", e))?;
        Ok(Box::new(BtleSession {
            runtime: Arc::clone(&self.runtime),
            peripheral,
            service: self.service,
        }))
    }
}

struct BtleSession {
    runtime: Arc<Runtime>,
    peripheral: Peripheral,
    service: Uuid,
}

impl PeerSession for BtleSession {
    fn is_connected(&self) -> bool {
        self.runtime
            .block_on(self.peripheral.is_connected())
            .unwrap_or(false)
    }

    fn write(&mut self, target: &str, bytes: &[u8]) -> Result<(), PipelineError> {
        let write_error = |message: String| PipelineError::LinkWrite { message };
        let uuid = Uuid::parse_str(target)
            .map_err(|e| write_error(format!("invalid characteristic uuid '{}': {}", target, e)))?;
        let characteristic = self
            .peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid && c.service_uuid == self.service)
            .ok_or_else(|| write_error(format!("characteristic {} not offered by peer", uuid)))?;
        self.runtime
            .block_on(
                self.peripheral
                    .write(&characteristic, bytes, WriteType::WithResponse),
            )
            .map_err(|e| write_error(e.to_string()))
    }
}

impl Drop for BtleSession {
    fn drop(&mut self) {
        if let Err(e) = self.runtime.block_on(self.peripheral.disconnect()) {
            log::debug!("disconnect on drop failed: {}", e);
        }
    }
}
