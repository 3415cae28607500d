//! Initial and periodic modem state publishing

use super::publisher::StatePublisher;
use super::tracker::OperationTracker;
use crate::modem::{Modem, ModemError};
use crate::protocol::{ModemInfo, SimInfo};
use crate::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

pub struct StatusReporter<T: Transport + 'static> {
    modem: Arc<dyn Modem>,
    operations: Arc<OperationTracker<T>>,
    publisher: Arc<StatePublisher<T>>,
}

impl<T: Transport + 'static> StatusReporter<T> {
    pub fn new(
        modem: Arc<dyn Modem>,
        operations: Arc<OperationTracker<T>>,
        publisher: Arc<StatePublisher<T>>,
    ) -> Self {
        Self {
            modem,
            operations,
            publisher,
        }
    }

    /// Publish every state topic once; each step fails on its own
    pub async fn publish_initial_states(&self) {
        self.publisher.publish_device_status().await;

        if let Err(e) = self.publish_signal().await {
            error!(error = %e, "Error publishing initial signal state");
        }
        if let Err(e) = self.publish_network().await {
            error!(error = %e, "Error publishing initial network state");
        }
        self.publisher.publish_counter().await;

        match self.modem_info().await {
            Ok(modem_info) => self.publisher.publish_modem_info(&modem_info).await,
            Err(e) => error!(error = %e, "Error publishing modem info"),
        }

        match self
            .operations
            .track("GetSIMIMSI", self.modem.sim_imsi())
            .await
        {
            Ok(imsi) => self.publisher.publish_sim_info(&SimInfo { imsi }).await,
            Err(e) => error!(error = %e, "Error publishing SIM info"),
        }

        match self
            .operations
            .track("GetSMSStatus", self.modem.sms_status())
            .await
        {
            Ok(capacity) => self.publisher.publish_capacity(&capacity).await,
            Err(e) => error!(error = %e, "Error publishing SMS capacity"),
        }

        info!("Published initial states");
    }

    async fn publish_signal(&self) -> Result<(), ModemError> {
        let signal = self
            .operations
            .track("GetSignalQuality", self.modem.signal_quality())
            .await?;
        self.publisher.publish_signal(&signal).await;
        Ok(())
    }

    async fn publish_network(&self) -> Result<(), ModemError> {
        let network = self
            .operations
            .track("GetNetworkInfo", self.modem.network_info())
            .await?;
        self.publisher.publish_network(&network).await;
        Ok(())
    }

    async fn modem_info(&self) -> Result<ModemInfo, ModemError> {
        let imei = self.operations.track("GetIMEI", self.modem.imei()).await?;
        let manufacturer = self
            .operations
            .track("GetManufacturer", self.modem.manufacturer())
            .await?;
        let model = self
            .operations
            .track("GetModel", self.modem.model())
            .await?;
        let firmware = match self
            .operations
            .track("GetFirmware", self.modem.firmware())
            .await
        {
            Ok(firmware) => firmware,
            Err(e) => {
                warn!(error = %e, "Firmware version unavailable");
                "Unknown".to_string()
            }
        };
        Ok(ModemInfo {
            imei,
            manufacturer,
            model,
            firmware,
        })
    }

    /// Signal then network; the first failure ends the cycle
    pub async fn publish_periodic(&self) -> Result<(), ModemError> {
        self.publish_signal().await?;
        self.publish_network().await?;
        debug!("Published periodic status");
        Ok(())
    }

    /// Republish signal and network every `interval` until cancelled
    pub async fn run(
        self: Arc<Self>,
        interval: Duration,
        mut cancel: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Initial states already covered the first tick
        ticker.tick().await;

        loop {
            tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.publish_periodic().await {
                        error!(error = %e, "Error in status publishing");
                    }
                }
            }
        }
        debug!("Periodic status publishing stopped");
    }
}
