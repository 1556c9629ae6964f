//! Serial port enumeration: authorization and hot-plug polling.
//!
//! [`SerialAuthorizer`] decides which system serial ports the core may
//! probe. [`HotplugWatcher`] polls the port list and reports arrivals and
//! removals as [`HotplugEvent`]s.

use async_trait::async_trait;
use std::collections::{BTreeSet, VecDeque};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_serial::SerialPortType;
use tokio_util::sync::CancellationToken;

use scalelink_core::error::{Error, Result};
use scalelink_core::events::HotplugEvent;
use scalelink_core::transport::{Authorizer, Channel};
use scalelink_core::types::ChannelId;

use crate::serial::{FlowControl, SerialChannel};

/// Default interval between port-list polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Which system ports to consider.
#[derive(Debug, Clone, Default)]
pub struct PortFilter {
    /// Only USB serial adapters.
    pub usb_only: bool,
    /// If set, only these port names.
    pub allow: Option<Vec<String>>,
}

impl PortFilter {
    fn admits(&self, name: &str, port_type: &SerialPortType) -> bool {
        if self.usb_only && !matches!(port_type, SerialPortType::UsbPort(_)) {
            return false;
        }
        match &self.allow {
            Some(allow) => allow.iter().any(|a| a == name),
            None => true,
        }
    }
}

/// Names of the system serial ports admitted by `filter`, sorted.
pub fn list_ports(filter: &PortFilter) -> Result<BTreeSet<String>> {
    let ports = tokio_serial::available_ports()
        .map_err(|e| Error::Transport(format!("failed to enumerate serial ports: {e}")))?;
    Ok(ports
        .into_iter()
        .filter(|p| filter.admits(&p.port_name, &p.port_type))
        .map(|p| p.port_name)
        .collect())
}

// ---------------------------------------------------------------------------
// SerialAuthorizer
// ---------------------------------------------------------------------------

/// [`Authorizer`] over the system's serial ports.
///
/// Ports passing the filter count as authorized. Ports named with
/// [`grantable()`](Self::grantable) are held back until an explicit
/// authorization request, one per request.
#[derive(Debug, Default)]
pub struct SerialAuthorizer {
    filter: PortFilter,
    grantable: VecDeque<String>,
    granted: Vec<String>,
    flow_control: FlowControl,
}

impl SerialAuthorizer {
    pub fn new(filter: PortFilter) -> Self {
        SerialAuthorizer {
            filter,
            ..Default::default()
        }
    }

    /// Ports granted only on explicit request, in order.
    pub fn grantable(mut self, ports: impl IntoIterator<Item = String>) -> Self {
        self.grantable.extend(ports);
        self
    }

    pub fn with_flow_control(mut self, flow_control: FlowControl) -> Self {
        self.flow_control = flow_control;
        self
    }

    fn channel(&self, name: &str) -> Box<dyn Channel> {
        Box::new(SerialChannel::new(name).with_flow_control(self.flow_control))
    }
}

#[async_trait]
impl Authorizer for SerialAuthorizer {
    async fn list_authorized(&mut self) -> Result<Vec<Box<dyn Channel>>> {
        let present = list_ports(&self.filter).map_err(|e| Error::Authorization(e.to_string()))?;
        let mut names: Vec<String> = present
            .iter()
            .filter(|p| !self.grantable.contains(p))
            .cloned()
            .collect();
        for g in &self.granted {
            if !names.contains(g) {
                names.push(g.clone());
            }
        }
        tracing::debug!(ports = ?names, "authorized serial ports");
        Ok(names.iter().map(|n| self.channel(n)).collect())
    }

    async fn request_authorization(&mut self) -> Result<Option<Box<dyn Channel>>> {
        while let Some(name) = self.grantable.pop_front() {
            if self.granted.contains(&name) {
                continue;
            }
            tracing::info!(port = %name, "serial port authorized");
            self.granted.push(name.clone());
            return Ok(Some(self.channel(&name)));
        }
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// HotplugWatcher
// ---------------------------------------------------------------------------

/// Events describing the change from `before` to `after`: removals first,
/// then arrivals, each in name order.
pub fn diff_ports(before: &BTreeSet<String>, after: &BTreeSet<String>) -> Vec<HotplugEvent> {
    let gone = before
        .difference(after)
        .map(|p| HotplugEvent::Disconnected(ChannelId::new(p.as_str())));
    let new = after
        .difference(before)
        .map(|p| HotplugEvent::Connected(ChannelId::new(p.as_str())));
    gone.chain(new).collect()
}

/// Polls the serial port list and forwards changes.
pub struct HotplugWatcher {
    filter: PortFilter,
    interval: Duration,
}

/// Handle to a running [`HotplugWatcher`].
pub struct HotplugHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl HotplugHandle {
    /// Stop polling and wait for the task to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

impl HotplugWatcher {
    pub fn new(filter: PortFilter) -> Self {
        HotplugWatcher {
            filter,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Start polling. The first poll sets the baseline and emits nothing.
    /// The task exits when stopped or when `tx` closes.
    pub fn spawn<T>(self, tx: mpsc::Sender<T>) -> HotplugHandle
    where
        T: From<HotplugEvent> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(watch_loop(self, tx, cancel.clone()));
        HotplugHandle { cancel, task }
    }
}

async fn watch_loop<T>(watcher: HotplugWatcher, tx: mpsc::Sender<T>, cancel: CancellationToken)
where
    T: From<HotplugEvent> + Send + 'static,
{
    let mut known = list_ports(&watcher.filter).unwrap_or_default();

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                tracing::debug!("hotplug watcher stopped");
                return;
            }
            _ = tokio::time::sleep(watcher.interval) => {}
        }

        let now = match list_ports(&watcher.filter) {
            Ok(now) => now,
            Err(e) => {
                tracing::warn!(error = %e, "port enumeration failed");
                continue;
            }
        };

        for event in diff_ports(&known, &now) {
            tracing::info!(event = ?event, "serial port change");
            if tx.send(T::from(event)).await.is_err() {
                tracing::debug!("hotplug receiver closed");
                return;
            }
        }
        known = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn diff_reports_removals_then_arrivals() {
        let events = diff_ports(&set(&["COM1", "COM3"]), &set(&["COM3", "COM4", "COM2"]));
        assert_eq!(
            events,
            vec![
                HotplugEvent::Disconnected(ChannelId::from("COM1")),
                HotplugEvent::Connected(ChannelId::from("COM2")),
                HotplugEvent::Connected(ChannelId::from("COM4")),
            ]
        );
    }

    #[test]
    fn diff_unchanged_is_empty() {
        assert!(diff_ports(&set(&["a"]), &set(&["a"])).is_empty());
    }

    #[test]
    fn filter_allow_list() {
        let filter = PortFilter {
            usb_only: false,
            allow: Some(vec!["/dev/ttyUSB0".into()]),
        };
        assert!(filter.admits("/dev/ttyUSB0", &SerialPortType::Unknown));
        assert!(!filter.admits("/dev/ttyS0", &SerialPortType::Unknown));
    }

    #[test]
    fn filter_usb_only() {
        let filter = PortFilter {
            usb_only: true,
            allow: None,
        };
        assert!(!filter.admits("/dev/ttyS0", &SerialPortType::PciPort));
    }

    #[tokio::test]
    async fn request_grants_each_port_once() {
        let mut auth = SerialAuthorizer::new(PortFilter::default())
            .grantable(vec!["/dev/ttyX".to_string(), "/dev/ttyX".to_string()]);
        let first = auth.request_authorization().await.unwrap().unwrap();
        assert_eq!(first.id().as_str(), "/dev/ttyX");
        assert!(auth.request_authorization().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn watcher_stops_on_cancel() {
        let (tx, _rx) = mpsc::channel::<HotplugEvent>(4);
        let handle = HotplugWatcher::new(PortFilter::default())
            .interval(Duration::from_millis(5))
            .spawn(tx);
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.stop().await;
    }
}
