//! The serialized service loop and its IPC-facing handle.

use std::sync::Arc;

use coop_dinput::GatewayEvent;
use coop_types::{DeviceId, Dhid, EventVerdict, NetworkId, PeerSignal, PointerEvent};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{CoopError, ServiceError};
use crate::machine::{Collaborators, CooperationSnapshot, CooperationStateMachine};
use crate::notifier::{CooperationObserver, SubscriptionId};
use crate::outbox::OutboxWorker;

/// IPC requests, each answered on its oneshot.
pub enum Request {
    Enable {
        enabled: bool,
        reply: oneshot::Sender<Result<(), CoopError>>,
    },
    Start {
        network_id: NetworkId,
        device: DeviceId,
        reply: oneshot::Sender<Result<(), CoopError>>,
    },
    Stop {
        reply: oneshot::Sender<Result<(), CoopError>>,
    },
    GetState {
        network_id: NetworkId,
        reply: oneshot::Sender<bool>,
    },
    CheckPointerEvent {
        event: PointerEvent,
        reply: oneshot::Sender<EventVerdict>,
    },
    Subscribe {
        observer: Arc<dyn CooperationObserver>,
        reply: oneshot::Sender<SubscriptionId>,
    },
    Unsubscribe {
        id: SubscriptionId,
        reply: oneshot::Sender<bool>,
    },
}

/// Events processed by the service loop.
pub enum ServiceEvent {
    Request(Request),
    /// A paired device left the network.
    DeviceOffline(NetworkId),
    KeyboardOnline(Dhid),
    /// A signal from a peer's cooperation service.
    Peer(PeerSignal),
    CrossingSwitchChanged {
        network_id: NetworkId,
        enabled: bool,
    },
    Shutdown,
}

/// Owns the state machine on one task.
pub struct CooperationService {
    machine: CooperationStateMachine,
    gateway_rx: mpsc::UnboundedReceiver<GatewayEvent>,
    outbox: Option<OutboxWorker>,
    event_tx: mpsc::Sender<ServiceEvent>,
    event_rx: mpsc::Receiver<ServiceEvent>,
    status_tx: watch::Sender<CooperationSnapshot>,
}

impl CooperationService {
    pub fn new(config: &Config, collab: Collaborators) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.service.queue_depth.max(1));
        let (machine, gateway_rx, outbox) =
            CooperationStateMachine::new(config, collab, event_tx.clone());
        let (status_tx, _) = watch::channel(machine.snapshot());
        Self {
            machine,
            gateway_rx,
            outbox: Some(outbox),
            event_tx,
            event_rx,
            status_tx,
        }
    }

    pub fn status_receiver(&self) -> watch::Receiver<CooperationSnapshot> {
        self.status_tx.subscribe()
    }

    pub fn handle(&self) -> CooperationHandle {
        CooperationHandle {
            tx: self.event_tx.clone(),
            status: self.status_receiver(),
        }
    }

    /// Run until [`ServiceEvent::Shutdown`].
    pub async fn run(mut self) -> Result<(), ServiceError> {
        info!("cooperation service running");
        if let Some(outbox) = self.outbox.take() {
            tokio::spawn(outbox.run());
        }
        loop {
            tokio::select! {
                Some(event) = self.gateway_rx.recv() => {
                    self.machine.handle_gateway_event(event);
                }
                event = self.event_rx.recv() => {
                    match event {
                        Some(ServiceEvent::Shutdown) | None => {
                            info!("shutting down");
                            break;
                        }
                        Some(event) => self.dispatch(event),
                    }
                }
            }
            self.status_tx.send_replace(self.machine.snapshot());
        }
        self.machine.shutdown();
        self.status_tx.send_replace(self.machine.snapshot());
        Ok(())
    }

    fn dispatch(&mut self, event: ServiceEvent) {
        match event {
            ServiceEvent::Request(request) => self.handle_request(request),
            ServiceEvent::DeviceOffline(id) => self.machine.on_device_offline(&id),
            ServiceEvent::KeyboardOnline(dhid) => self.machine.on_keyboard_online(dhid),
            ServiceEvent::Peer(signal) => self.machine.on_peer_signal(signal),
            ServiceEvent::CrossingSwitchChanged {
                network_id,
                enabled,
            } => self
                .machine
                .on_crossing_switch_changed(&network_id, enabled),
            ServiceEvent::Shutdown => {}
        }
    }

    fn handle_request(&mut self, request: Request) {
        // a dropped reply receiver means the caller gave up; nothing to do
        match request {
            Request::Enable { enabled, reply } => {
                let _ = reply.send(self.machine.enable_cooperation(enabled));
            }
            Request::Start {
                network_id,
                device,
                reply,
            } => {
                let result = self.machine.start_cooperation(network_id, device);
                let _ = reply.send(result);
            }
            Request::Stop { reply } => {
                let _ = reply.send(self.machine.stop_cooperation());
            }
            Request::GetState { network_id, reply } => {
                let _ = reply.send(self.machine.get_cooperation_state(&network_id));
            }
            Request::CheckPointerEvent { event, reply } => {
                let _ = reply.send(self.machine.check_pointer_event(&event));
            }
            Request::Subscribe { observer, reply } => {
                let _ = reply.send(self.machine.subscribe(observer));
            }
            Request::Unsubscribe { id, reply } => {
                let _ = reply.send(self.machine.unsubscribe(id));
            }
        }
    }
}

/// Cloneable async façade used by IPC handlers.
#[derive(Clone)]
pub struct CooperationHandle {
    tx: mpsc::Sender<ServiceEvent>,
    status: watch::Receiver<CooperationSnapshot>,
}

impl CooperationHandle {
    pub async fn enable_cooperation(&self, enabled: bool) -> Result<(), CoopError> {
        self.request(|reply| Request::Enable { enabled, reply })
            .await?
    }

    pub async fn start_cooperation(
        &self,
        network_id: NetworkId,
        device: DeviceId,
    ) -> Result<(), CoopError> {
        self.request(|reply| Request::Start {
            network_id,
            device,
            reply,
        })
        .await?
    }

    pub async fn stop_cooperation(&self) -> Result<(), CoopError> {
        self.request(|reply| Request::Stop { reply }).await?
    }

    pub async fn get_cooperation_state(&self, network_id: NetworkId) -> Result<bool, CoopError> {
        self.request(|reply| Request::GetState { network_id, reply })
            .await
    }

    pub async fn check_pointer_event(&self, event: PointerEvent) -> Result<EventVerdict, CoopError> {
        self.request(|reply| Request::CheckPointerEvent { event, reply })
            .await
    }

    pub async fn subscribe(
        &self,
        observer: Arc<dyn CooperationObserver>,
    ) -> Result<SubscriptionId, CoopError> {
        self.request(|reply| Request::Subscribe { observer, reply })
            .await
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<bool, CoopError> {
        self.request(|reply| Request::Unsubscribe { id, reply }).await
    }

    pub async fn device_offline(&self, network_id: NetworkId) -> Result<(), CoopError> {
        self.post(ServiceEvent::DeviceOffline(network_id)).await
    }

    pub async fn keyboard_online(&self, dhid: Dhid) -> Result<(), CoopError> {
        self.post(ServiceEvent::KeyboardOnline(dhid)).await
    }

    pub async fn peer_signal(&self, signal: PeerSignal) -> Result<(), CoopError> {
        self.post(ServiceEvent::Peer(signal)).await
    }

    pub async fn shutdown(&self) -> Result<(), CoopError> {
        self.post(ServiceEvent::Shutdown).await
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> CooperationSnapshot {
        self.status.borrow().clone()
    }

    pub fn status(&self) -> watch::Receiver<CooperationSnapshot> {
        self.status.clone()
    }

    async fn post(&self, event: ServiceEvent) -> Result<(), CoopError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| CoopError::ServiceUnavailable("service stopped".into()))
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Request,
    ) -> Result<T, CoopError> {
        let (reply, rx) = oneshot::channel();
        self.post(ServiceEvent::Request(make(reply))).await?;
        rx.await.map_err(|_| {
            debug!("service dropped a request");
            CoopError::ServiceUnavailable("request dropped".into())
        })
    }
}
