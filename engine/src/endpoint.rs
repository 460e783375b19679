// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use mqtt_codec::{ControlPacketType, Packet, PacketId, ProtocolVersion};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::ConnectionConfig;
use crate::connection::{Connection, Event, Role, TimerName};
use crate::error::{EngineError, Result};
use crate::timer::Timer;
use crate::transport::{read_packet, write_packet, Transport};

/// Application-facing notification the endpoint's strand cannot fold into a
/// request/response pair: an inbound packet, or the connection closing
/// (locally requested, peer-initiated, or a protocol-error auto-disconnect).
#[derive(Debug)]
pub enum EndpointEvent {
    PacketReceived(Packet),
    Closed,
}

/// Which packet kinds a [`Endpoint::recv`] call surfaces. An empty kind list
/// means "no filtering": every `PacketReceived` event passes. A filtered-out
/// packet has already been fully handled by the connection state machine
/// (acks auto-sent, pids released, ...) -- it just never reaches this
/// particular `recv` call.
#[derive(Debug, Clone, Default)]
pub struct RecvFilter {
    kinds: Vec<ControlPacketType>,
    except: bool,
}

impl RecvFilter {
    /// No filtering: every inbound packet is surfaced.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Only packets whose kind is in `kinds` are surfaced.
    #[must_use]
    pub fn matching(kinds: Vec<ControlPacketType>) -> Self {
        Self { kinds, except: false }
    }

    /// Every packet kind except those in `kinds` is surfaced.
    #[must_use]
    pub fn except(kinds: Vec<ControlPacketType>) -> Self {
        Self { kinds, except: true }
    }

    fn allows(&self, kind: ControlPacketType) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&kind) != self.except
    }
}

enum Command {
    Send(Packet, oneshot::Sender<Result<()>>),
    AcquirePacketId(oneshot::Sender<std::result::Result<PacketId, oneshot::Receiver<PacketId>>>),
    RegisterPacketId(PacketId, oneshot::Sender<bool>),
    ReleasePacketId(PacketId),
    GetStoredPackets(oneshot::Sender<Vec<Packet>>),
    RestorePackets(Vec<Packet>, oneshot::Sender<()>),
    Close,
}

/// Drives one MQTT connection's strand: a single `tokio::task` owning the
/// `Connection` state machine and a `Transport`, serialized behind an `mpsc`
/// command channel so every public method below is just "send a command,
/// await the reply" -- mirroring how `ruo::AsyncClient::start` owns its
/// stream outright and every other method funnels through `self.send`.
pub struct Endpoint {
    commands: mpsc::Sender<Command>,
    events: mpsc::Receiver<EndpointEvent>,
    task: JoinHandle<()>,
}

impl Endpoint {
    #[must_use]
    pub fn spawn<T: Transport + 'static>(
        role: Role,
        version: ProtocolVersion,
        config: ConnectionConfig,
        transport: T,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (event_tx, event_rx) = mpsc::channel(32);
        let task = tokio::spawn(run(role, version, config, transport, cmd_rx, event_tx));
        Self {
            commands: cmd_tx,
            events: event_rx,
            task,
        }
    }

    /// Sends a packet through the connection state machine. Resolves once
    /// the machine has accepted (and, if applicable, written) it -- not once
    /// any matching ack has arrived.
    ///
    /// # Errors
    /// Returns the [`EngineError`] the state machine raised (role/version
    /// mismatch, not-allowed-to-send, ...), or [`EngineError::Transport`] if
    /// the strand has already shut down.
    pub async fn send(&self, packet: Packet) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Send(packet, tx))
            .await
            .map_err(|_| EngineError::Transport("endpoint strand closed".to_owned()))?;
        rx.await
            .map_err(|_| EngineError::Transport("endpoint strand closed".to_owned()))?
    }

    /// Next application-visible event matching `filter`: an inbound packet
    /// whose kind `filter` allows, or a close notification (never filtered).
    /// Packets `filter` excludes are silently skipped -- they were already
    /// processed by the state machine, just not surfaced here. Returns
    /// `None` once the strand has shut down and no more events remain
    /// queued.
    pub async fn recv(&mut self, filter: &RecvFilter) -> Option<EndpointEvent> {
        loop {
            let event = self.events.recv().await?;
            if let EndpointEvent::PacketReceived(packet) = &event {
                if !filter.allows(packet.kind()) {
                    continue;
                }
            }
            return Some(event);
        }
    }

    /// An id immediately available, or `None` if every id is currently in
    /// use (use [`Self::acquire_unique_packet_id_wait_until_available`]
    /// instead to suspend until one frees up).
    pub async fn acquire_unique_packet_id(&self) -> Option<PacketId> {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::AcquirePacketId(tx)).await.is_err() {
            return None;
        }
        match rx.await {
            Ok(Ok(id)) => Some(id),
            Ok(Err(waiter)) => {
                // An id was not immediately free; this call does not wait.
                drop(waiter);
                None
            }
            Err(_) => None,
        }
    }

    /// Suspends until a packet id is available, honouring FIFO order among
    /// concurrent waiters.
    ///
    /// # Errors
    /// Returns [`EngineError::Transport`] if the strand has already shut
    /// down while this call was waiting.
    pub async fn acquire_unique_packet_id_wait_until_available(&self) -> Result<PacketId> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::AcquirePacketId(tx))
            .await
            .map_err(|_| EngineError::Transport("endpoint strand closed".to_owned()))?;
        match rx
            .await
            .map_err(|_| EngineError::Transport("endpoint strand closed".to_owned()))?
        {
            Ok(id) => Ok(id),
            Err(waiter) => waiter
                .await
                .map_err(|_| EngineError::Transport("endpoint strand closed".to_owned())),
        }
    }

    /// Registers a caller-supplied id, e.g. one restored from a persisted
    /// store. Returns `false` if it is `0` or already in use.
    pub async fn register_packet_id(&self, id: PacketId) -> bool {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::RegisterPacketId(id, tx)).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub async fn release_packet_id(&self, id: PacketId) {
        let _ = self.commands.send(Command::ReleasePacketId(id)).await;
    }

    /// Snapshots the store's current unacknowledged publishes/PUBRELs, for
    /// persisting across a process restart.
    pub async fn get_stored_packets(&self) -> Vec<Packet> {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::GetStoredPackets(tx)).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Re-populates the store ahead of a session resume, from a prior
    /// [`Self::get_stored_packets`] snapshot. Only `PUBLISH` and `PUBREL`
    /// packets are meaningful here; anything else is ignored.
    pub async fn restore_packets(&self, packets: Vec<Packet>) {
        let (tx, rx) = oneshot::channel();
        if self
            .commands
            .send(Command::RestorePackets(packets, tx))
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    /// Whether `packet` is a kind the store retains across a reconnect
    /// (`PUBLISH` with `QoS > 0`, or `PUBREL`) -- callers use this to decide
    /// whether a packet they are about to send needs a packet id reserved
    /// for eventual replay bookkeeping.
    #[must_use]
    pub fn regulate_for_store(packet: &Packet) -> bool {
        matches!(
            packet,
            Packet::Publish(p) if p.qos != mqtt_codec::QoS::AtMostOnce
        ) || matches!(packet, Packet::PubRel(_))
    }

    /// Requests the strand close the connection and stop. Does not wait for
    /// in-flight sends to complete.
    pub async fn close(&self) {
        let _ = self.commands.send(Command::Close).await;
    }

    /// Waits for the strand's task to fully exit.
    ///
    /// # Errors
    /// Returns the task's join error if it panicked.
    pub async fn join(self) -> std::result::Result<(), tokio::task::JoinError> {
        drop(self.commands);
        self.task.await
    }
}

async fn run<T: Transport>(
    role: Role,
    version: ProtocolVersion,
    config: ConnectionConfig,
    mut transport: T,
    mut commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<EndpointEvent>,
) {
    let mut connection = Connection::new(role, version, config);
    let mut pingreq_timer = Timer::new();
    let mut pingresp_timer = Timer::new();

    loop {
        tokio::select! {
            biased;

            Some(command) = commands.recv() => {
                if !handle_command(&mut connection, &mut transport, &mut pingreq_timer, &mut pingresp_timer, &events, command).await {
                    break;
                }
            }

            incoming = read_packet(&mut transport, version) => {
                match incoming {
                    Ok(packet) => {
                        let out = connection.receive(packet);
                        if !apply_events(&mut transport, &mut pingreq_timer, &mut pingresp_timer, &events, out).await {
                            break;
                        }
                    }
                    Err(_) => {
                        let _ = events.send(EndpointEvent::Closed).await;
                        break;
                    }
                }
            }

            () = pingreq_timer.tick() => {
                let out = connection.on_pingreq_timer();
                if !apply_events(&mut transport, &mut pingreq_timer, &mut pingresp_timer, &events, out).await {
                    break;
                }
            }

            () = pingresp_timer.tick() => {
                let out = connection.on_pingresp_timeout();
                let _ = apply_events(&mut transport, &mut pingreq_timer, &mut pingresp_timer, &events, out).await;
                break;
            }
        }
    }

    let out = connection.notify_closed();
    let _ = apply_events(&mut transport, &mut pingreq_timer, &mut pingresp_timer, &events, out).await;
}

/// Returns `false` once the strand should stop.
async fn handle_command<T: Transport>(
    connection: &mut Connection,
    transport: &mut T,
    pingreq_timer: &mut Timer,
    pingresp_timer: &mut Timer,
    events: &mpsc::Sender<EndpointEvent>,
    command: Command,
) -> bool {
    match command {
        Command::Send(packet, reply) => {
            let out = connection.send(packet);
            let error = out.iter().find_map(|e| match e {
                Event::Error(err) => Some(err.clone()),
                _ => None,
            });
            let keep_going = apply_events(transport, pingreq_timer, pingresp_timer, events, out).await;
            let _ = reply.send(error.map_or(Ok(()), Err));
            keep_going
        }
        Command::AcquirePacketId(reply) => {
            let _ = reply.send(connection.pid_manager_mut().poll_acquire_or_wait());
            true
        }
        Command::RegisterPacketId(id, reply) => {
            let _ = reply.send(connection.pid_manager_mut().register(id));
            true
        }
        Command::ReleasePacketId(id) => {
            connection.pid_manager_mut().release(id);
            true
        }
        Command::GetStoredPackets(reply) => {
            let _ = reply.send(connection.stored_packets());
            true
        }
        Command::RestorePackets(packets, reply) => {
            connection.restore_packets(packets);
            let _ = reply.send(());
            true
        }
        Command::Close => false,
    }
}

/// Drains state-machine events: writes outbound packets, (re)arms timers,
/// forwards application-visible events. Returns `false` once a `Closed`
/// event means the strand must stop.
async fn apply_events<T: Transport>(
    transport: &mut T,
    pingreq_timer: &mut Timer,
    pingresp_timer: &mut Timer,
    events: &mpsc::Sender<EndpointEvent>,
    out: Vec<Event>,
) -> bool {
    for event in out {
        match event {
            Event::Send(packet) => {
                if write_packet(transport, &packet).await.is_err() {
                    let _ = events.send(EndpointEvent::Closed).await;
                    return false;
                }
            }
            Event::PacketReceived(packet) => {
                let _ = events.send(EndpointEvent::PacketReceived(packet)).await;
            }
            Event::TimerReset(TimerName::PingReqSend, dur) => pingreq_timer.reset(dur),
            Event::TimerReset(TimerName::PingRespRecv, dur) => pingresp_timer.reset(dur),
            Event::TimerCancel(TimerName::PingReqSend) => pingreq_timer.cancel(),
            Event::TimerCancel(TimerName::PingRespRecv) => pingresp_timer.cancel(),
            Event::PacketIdReleased(_) | Event::Error(_) => {}
            Event::Closed => {
                let _ = events.send(EndpointEvent::Closed).await;
                return false;
            }
        }
    }
    true
}
