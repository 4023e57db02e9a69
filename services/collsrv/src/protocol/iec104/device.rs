//! Per-device connection actor
//!
//! One actor per declared device. The actor owns the TCP connection and the
//! link state, runs the polling cycle (clock sync, general interrogation,
//! counter interrogation), executes interactive read and select-and-execute
//! control requests, and feeds decoded data objects into the measurement
//! pipeline. Connection loss is recovered with exponential backoff; a
//! peer-issued STOPDT halts the link until the inventory changes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use common::time::{now_iso_millis, now_local};
use datacoll_rtdb::keyspace;
use datacoll_rtdb::model::{Device, PointRequest};
use datacoll_rtdb::Inventory;

use super::asdu::{Asdu, Cause, InfoObject, ObjectData, TypeId};
use super::frame::{read_raw_frame, Apci, Frame, UFrameKind};
use super::link::{LinkPhase, LinkState, LinkTimer, TimerBank};
use crate::config::Iec104Params;
use crate::error::{CollSrvError, Result};
use crate::pipeline::{DataObject, MeasurementPipeline, SampleRoute};

/// ASDU common address used on outgoing commands
const COMMON_ADDR: u16 = 1;
/// Reconnect backoff: initial delay, multiplier, cap
const RECONNECT_INITIAL: Duration = Duration::from_secs(3);
const RECONNECT_MULTIPLIER: f64 = 2.0;
const RECONNECT_MAX: Duration = Duration::from_secs(60);
/// Codec-error tolerance: close after this many within the window
const CODEC_ERROR_LIMIT: u32 = 5;
const CODEC_ERROR_WINDOW: Duration = Duration::from_secs(10);
/// Frame log retention (entries per device)
const FRAME_LOG_KEEP: isize = 1000;

/// Requests routed to an actor by the supervisor
#[derive(Debug, Clone)]
pub enum DeviceCommand {
    /// Interactive read of one binding
    Call(PointRequest),
    /// Select-and-execute control of one binding
    Ctrl(PointRequest),
    /// Terminal/binding inventory changed: drop cached resolutions
    Refresh,
}

/// Handle the supervisor keeps per live actor
pub struct DeviceHandle {
    device: Device,
    tx: mpsc::Sender<DeviceCommand>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl DeviceHandle {
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Route a command to the actor; false when the actor is gone
    pub async fn send(&self, command: DeviceCommand) -> bool {
        self.tx.send(command).await.is_ok()
    }

    /// Cancel the actor and all of its connection tasks
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                warn!("device[{}] actor task panicked: {e}", self.device.id);
            }
        }
    }
}

/// Spawn the actor task for a declared device
pub fn spawn(device: Device, params: Iec104Params, inventory: Inventory) -> DeviceHandle {
    let (tx, rx) = mpsc::channel(32);
    let cancel = CancellationToken::new();
    let pipeline = Arc::new(MeasurementPipeline::new(
        inventory.clone(),
        device.id.clone(),
        device.protocol.clone(),
    ));
    let actor = Iec104Device {
        device: device.clone(),
        params,
        inventory,
        pipeline,
    };
    let task = tokio::spawn(actor.run(rx, cancel.clone()));
    DeviceHandle {
        device,
        tx,
        cancel,
        task,
    }
}

/// How a connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnOutcome {
    /// Transport failure or protocol violation: reconnect with backoff
    Reconnect,
    /// Peer-driven STOPDT: stay down until reconfigured
    Halt,
    /// Actor shutdown
    Cancelled,
}

/// The device actor
struct Iec104Device {
    device: Device,
    params: Iec104Params,
    inventory: Inventory,
    pipeline: Arc<MeasurementPipeline>,
}

impl Iec104Device {
    async fn run(self, mut cmd_rx: mpsc::Receiver<DeviceCommand>, cancel: CancellationToken) {
        let device_id = self.device.id.clone();
        let mut attempt: u32 = 0;
        'actor: while !cancel.is_cancelled() {
            let mut state = LinkState::new(self.params.k, self.params.w);
            state.phase = LinkPhase::Connecting;
            match self.connect(&cancel).await {
                Some(stream) => {
                    attempt = 0;
                    state.phase = LinkPhase::ConnectedStopped;
                    match self.run_connection(stream, state, &mut cmd_rx, &cancel).await {
                        ConnOutcome::Reconnect => {},
                        ConnOutcome::Cancelled => break 'actor,
                        ConnOutcome::Halt => {
                            info!("device[{device_id}] halted by peer, waiting for reconfiguration");
                            loop {
                                tokio::select! {
                                    cmd = cmd_rx.recv() => match cmd {
                                        Some(cmd) => {
                                            warn!("device[{device_id}] halted, dropping {cmd:?}");
                                        },
                                        None => break 'actor,
                                    },
                                    _ = cancel.cancelled() => break 'actor,
                                }
                            }
                        },
                    }
                },
                None => {
                    if cancel.is_cancelled() {
                        break 'actor;
                    }
                },
            }
            attempt += 1;
            let delay = reconnect_delay(attempt);
            debug!(
                "device[{device_id}] reconnect attempt {attempt} in {:.1}s",
                delay.as_secs_f64()
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {},
                _ = cancel.cancelled() => break 'actor,
            }
        }
        if let Err(e) = self.inventory.set_device_status(&device_id, false).await {
            warn!("device[{device_id}] status update failed: {e}");
        }
        info!("device[{device_id}] actor stopped");
    }

    /// One connect attempt, bounded by T0
    async fn connect(&self, cancel: &CancellationToken) -> Option<TcpStream> {
        let endpoint = (self.device.ip.clone(), self.device.port);
        debug!(
            "device[{}] connecting to {}:{}",
            self.device.id, endpoint.0, endpoint.1
        );
        let attempt = tokio::time::timeout(self.params.t0(), TcpStream::connect(endpoint));
        tokio::select! {
            result = attempt => match result {
                Ok(Ok(stream)) => Some(stream),
                Ok(Err(e)) => {
                    debug!("device[{}] connect failed: {e}", self.device.id);
                    None
                },
                Err(_) => {
                    debug!("device[{}] connect timeout (T0)", self.device.id);
                    None
                },
            },
            _ = cancel.cancelled() => None,
        }
    }

    async fn run_connection(
        &self,
        stream: TcpStream,
        state: LinkState,
        cmd_rx: &mut mpsc::Receiver<DeviceCommand>,
        cancel: &CancellationToken,
    ) -> ConnOutcome {
        let device_id = &self.device.id;
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();

        let conn = Arc::new(Conn {
            device_id: device_id.clone(),
            params: self.params.clone(),
            inventory: self.inventory.clone(),
            pipeline: self.pipeline.clone(),
            state: Mutex::new(state),
            writer: Mutex::new(write_half),
            k_released: Notify::new(),
            started: Notify::new(),
            timers: TimerBank::new(),
            signals: CycleSignals::default(),
            closing: CancellationToken::new(),
            peer_halt: AtomicBool::new(false),
        });

        if let Err(e) = self.inventory.set_device_status(device_id, true).await {
            warn!("device[{device_id}] status update failed: {e}");
        }
        info!(
            "device[{device_id}] connected to {}:{}",
            self.device.ip, self.device.port
        );

        let receive = tokio::spawn(receive_task(conn.clone(), read_half));
        let timers = tokio::spawn(timer_task(conn.clone()));
        let poll = tokio::spawn(poll_task(conn.clone()));

        if let Err(e) = conn.send_frame(Frame::u(UFrameKind::StartDtAct), true).await {
            conn.close(&format!("STARTDT send failed: {e}"));
        }

        let outcome = loop {
            tokio::select! {
                _ = conn.closing.cancelled() => {
                    break if conn.peer_halt.load(Ordering::Relaxed) {
                        ConnOutcome::Halt
                    } else {
                        ConnOutcome::Reconnect
                    };
                },
                _ = cancel.cancelled() => {
                    conn.close("actor shutdown");
                    break ConnOutcome::Cancelled;
                },
                cmd = cmd_rx.recv() => match cmd {
                    Some(DeviceCommand::Call(request)) => {
                        if let Err(e) = conn.call_data(&request).await {
                            error!("device[{device_id}] call_data failed: {e}");
                        }
                    },
                    Some(DeviceCommand::Ctrl(request)) => {
                        if let Err(e) = conn.ctrl_data(&request).await {
                            error!("device[{device_id}] ctrl_data failed: {e}");
                        }
                    },
                    Some(DeviceCommand::Refresh) => {
                        debug!("device[{device_id}] refreshing binding cache");
                        self.pipeline.invalidate();
                    },
                    None => {
                        conn.close("supervisor gone");
                        break ConnOutcome::Cancelled;
                    },
                },
            }
        };

        conn.timers.stop_all();
        receive.abort();
        timers.abort();
        poll.abort();
        conn.state.lock().await.reset();
        if let Err(e) = self.inventory.set_device_status(device_id, false).await {
            warn!("device[{device_id}] status update failed: {e}");
        }
        info!("device[{device_id}] disconnected");
        outcome
    }
}

fn reconnect_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(8) as i32;
    let base = RECONNECT_INITIAL.mul_f64(RECONNECT_MULTIPLIER.powi(exponent));
    let capped = base.min(RECONNECT_MAX);
    // ±25% jitter keeps a fleet of actors from reconnecting in lockstep
    let jitter = rand::thread_rng().gen_range(-0.25..0.25);
    capped.mul_f64(1.0 + jitter)
}

/// Poll-cycle milestone signals, re-armed at the start of every cycle
#[derive(Default)]
struct CycleSignals {
    inner: parking_lot::Mutex<CycleWaiters>,
}

#[derive(Default)]
struct CycleWaiters {
    time_synced: Option<oneshot::Sender<()>>,
    all_data: Option<oneshot::Sender<()>>,
    counter_data: Option<oneshot::Sender<()>>,
}

impl CycleSignals {
    fn arm_time_synced(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().time_synced = Some(tx);
        rx
    }

    fn arm_all_data(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().all_data = Some(tx);
        rx
    }

    fn arm_counter_data(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().counter_data = Some(tx);
        rx
    }

    fn fire_time_synced(&self) {
        if let Some(tx) = self.inner.lock().time_synced.take() {
            let _ = tx.send(());
        }
    }

    fn fire_all_data(&self) {
        if let Some(tx) = self.inner.lock().all_data.take() {
            let _ = tx.send(());
        }
    }

    fn fire_counter_data(&self) {
        if let Some(tx) = self.inner.lock().counter_data.take() {
            let _ = tx.send(());
        }
    }
}

/// Shared state of one live connection
struct Conn {
    device_id: String,
    params: Iec104Params,
    inventory: Inventory,
    pipeline: Arc<MeasurementPipeline>,
    state: Mutex<LinkState>,
    writer: Mutex<OwnedWriteHalf>,
    /// Wakes senders suspended on the K window
    k_released: Notify,
    /// Fired when data transfer starts (STARTDT confirmed)
    started: Notify,
    timers: TimerBank,
    signals: CycleSignals,
    closing: CancellationToken,
    peer_halt: AtomicBool,
}

impl Conn {
    fn close(&self, reason: &str) {
        if !self.closing.is_cancelled() {
            warn!("device[{}] closing link: {reason}", self.device_id);
            self.closing.cancel();
        }
    }

    async fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await?;
        Ok(())
    }

    async fn log_frame(&self, bytes: &[u8], send: bool) {
        if !self.params.log_frame {
            return;
        }
        let entry = format!(
            "{},{},{}",
            now_iso_millis(),
            if send { "send" } else { "recv" },
            hex::encode(bytes)
        );
        let key = keyspace::frame_log(&self.device_id);
        let rtdb = self.inventory.rtdb();
        if let Err(e) = rtdb.list_rpush(&key, &entry).await {
            warn!("device[{}] frame log append failed: {e}", self.device_id);
            return;
        }
        let _ = rtdb.list_trim(&key, -FRAME_LOG_KEEP, -1).await;
    }

    /// Send one frame, enforcing the link discipline
    ///
    /// `check` mirrors the pending-queue rules: a checked command with
    /// cause=act behind an outstanding one is queued instead of sent; a
    /// checked activation is appended to the pending queue either way.
    async fn send_frame(&self, frame: Frame, check: bool) -> Result<()> {
        match frame.apci {
            Apci::S { .. } => {
                self.timers.stop(LinkTimer::T2);
                let mut state = self.state.lock().await;
                let stamped = Frame::s(state.rsn);
                let bytes = stamped.encode()?;
                self.write_bytes(&bytes).await?;
                state.note_s_sent();
                drop(state);
                debug!("device[{}] sent S-frame: {}", self.device_id, hex::encode(&bytes));
                self.log_frame(&bytes, true).await;
            },
            Apci::U(kind) => {
                let mut state = self.state.lock().await;
                let send_now = !check || state.send_list.is_empty();
                if send_now {
                    let bytes = frame.encode()?;
                    self.write_bytes(&bytes).await?;
                    if kind.is_act() {
                        self.timers.start(LinkTimer::T1, self.params.t1());
                    }
                    debug!(
                        "device[{}] sent U-frame {kind:?}: {}",
                        self.device_id,
                        hex::encode(&bytes)
                    );
                }
                if check && kind.is_act() {
                    state.push_pending(frame);
                }
                drop(state);
            },
            Apci::I { .. } => {
                let cause = frame.asdu().map(|a| a.cause);
                {
                    let mut state = self.state.lock().await;
                    let immediate =
                        !check || state.send_list.is_empty() || cause != Some(Cause::Activation);
                    if !immediate {
                        // Another command is outstanding: wait our turn
                        state.push_pending(frame);
                        return Ok(());
                    }
                }
                loop {
                    let notified = self.k_released.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();

                    let mut state = self.state.lock().await;
                    if !state.window_full() {
                        self.timers.stop(LinkTimer::T2);
                        let (send, recv) = state.stamp_outgoing_i();
                        let stamped = Frame {
                            apci: Apci::I { send, recv },
                            asdu: frame.asdu.clone(),
                        };
                        let bytes = stamped.encode()?;
                        // Emission happens under the state lock so frames
                        // hit the wire in ssn order
                        self.write_bytes(&bytes).await?;
                        if cause == Some(Cause::Activation) {
                            self.timers.start(LinkTimer::T1, self.params.t1());
                            if check {
                                state.push_pending(frame.clone());
                            }
                        }
                        drop(state);
                        debug!(
                            "device[{}] sent I-frame ssn={send} rsn={recv}: {}",
                            self.device_id,
                            hex::encode(&bytes)
                        );
                        self.log_frame(&bytes, true).await;
                        break;
                    }
                    debug!(
                        "device[{}] send window full (k={}), waiting for ack",
                        self.device_id, state.k
                    );
                    drop(state);
                    tokio::select! {
                        _ = &mut notified => {},
                        _ = self.closing.cancelled() => {
                            return Err(CollSrvError::link("connection closing"));
                        },
                    }
                }
            },
        }
        Ok(())
    }

    /// Process one decoded inbound frame
    async fn handle_frame(&self, frame: Frame) -> Result<()> {
        match frame.apci {
            Apci::U(kind) => self.handle_u(kind).await,
            Apci::S { recv } => {
                self.state.lock().await.accept_ack(recv)?;
                self.k_released.notify_waiters();
                Ok(())
            },
            Apci::I { send, recv } => {
                let s_frame_due = {
                    let mut state = self.state.lock().await;
                    state.accept_ack(recv)?;
                    state.accept_i_arrival(send)?
                };
                self.k_released.notify_waiters();
                if s_frame_due {
                    self.send_frame(Frame::s(0), true).await?;
                } else {
                    self.timers.start(LinkTimer::T2, self.params.t2());
                }
                self.handle_asdu(&frame).await
            },
        }
    }

    async fn handle_u(&self, kind: UFrameKind) -> Result<()> {
        debug!("device[{}] got U-frame {kind:?}", self.device_id);
        match kind {
            UFrameKind::StartDtAct => {
                // Both ends opened simultaneously: drop our pending copy
                self.collapse_pending_act(UFrameKind::StartDtAct).await;
                self.send_frame(Frame::u(UFrameKind::StartDtCon), false).await?;
                self.enter_started().await;
            },
            UFrameKind::StartDtCon => {
                self.advance_pending_u(kind).await?;
                self.enter_started().await;
            },
            UFrameKind::TestFrAct => {
                self.collapse_pending_act(UFrameKind::TestFrAct).await;
                self.send_frame(Frame::u(UFrameKind::TestFrCon), false).await?;
            },
            UFrameKind::TestFrCon => {
                self.advance_pending_u(kind).await?;
            },
            UFrameKind::StopDtAct => {
                self.send_frame(Frame::u(UFrameKind::StopDtCon), false).await?;
                self.peer_halt.store(true, Ordering::Relaxed);
                self.close("peer requested STOPDT");
            },
            UFrameKind::StopDtCon => {
                self.timers.stop(LinkTimer::T1);
                self.peer_halt.store(true, Ordering::Relaxed);
                self.close("peer confirmed STOPDT");
            },
        }
        Ok(())
    }

    async fn collapse_pending_act(&self, kind: UFrameKind) {
        let mut state = self.state.lock().await;
        if let Some(Frame {
            apci: Apci::U(pending),
            ..
        }) = state.pending_head()
        {
            if *pending == kind {
                info!(
                    "device[{}] peer sent {kind:?} too, dropping ours",
                    self.device_id
                );
                state.send_list.pop_front();
                self.timers.stop(LinkTimer::T1);
            }
        }
    }

    async fn advance_pending_u(&self, kind: UFrameKind) -> Result<()> {
        self.advance_pending(&Frame::u(kind)).await
    }

    /// A confirmation arrived: stop T1, pop the matching pending command
    /// and push the next queued one onto the wire
    async fn advance_pending(&self, reply: &Frame) -> Result<()> {
        self.timers.stop(LinkTimer::T1);
        let next = {
            let mut state = self.state.lock().await;
            match state.pop_matching(reply) {
                Some(done) => {
                    debug!(
                        "device[{}] pending command confirmed: {:?}",
                        self.device_id,
                        done.asdu().map(|a| a.type_id)
                    );
                    state.pending_head().cloned()
                },
                None => None,
            }
        };
        if let Some(frame) = next {
            self.send_frame(frame, false).await?;
        }
        Ok(())
    }

    /// Data transfer confirmed: start the polling schedule
    async fn enter_started(&self) {
        let mut state = self.state.lock().await;
        if state.phase != LinkPhase::ConnectedStarted {
            state.phase = LinkPhase::ConnectedStarted;
            drop(state);
            info!(
                "device[{}] data transfer started, first poll in {}s",
                self.device_id, self.params.coll_interval
            );
            self.started.notify_one();
        }
    }

    async fn handle_asdu(&self, frame: &Frame) -> Result<()> {
        let Some(asdu) = frame.asdu() else {
            return Ok(());
        };
        debug!(
            "device[{}] got I-frame type={:?} cause={:?} count={}",
            self.device_id,
            asdu.type_id,
            asdu.cause,
            asdu.objects.len()
        );

        if matches!(asdu.cause, Cause::ActivationConfirmation | Cause::Request) {
            self.advance_pending(frame).await?;
        }

        let first_select = asdu.objects.first().and_then(|o| o.data.select());
        let carries_data = asdu.cause.carries_data()
            || (asdu.cause == Cause::Request && asdu.type_id.is_monitor())
            || (asdu.cause == Cause::ActivationConfirmation
                && asdu.type_id.is_command()
                && first_select == Some(false));

        if carries_data {
            let route = match asdu.cause {
                Cause::Request => SampleRoute::Call,
                Cause::ActivationConfirmation => SampleRoute::Ctrl,
                _ => SampleRoute::Data,
            };
            let objects: Vec<DataObject> = asdu
                .objects
                .iter()
                .map(|object| DataObject {
                    address: object.address,
                    value: object.data.raw_value(),
                    time: object.data.time(),
                    invalid: object.data.is_invalid(),
                })
                .collect();
            let published = self.pipeline.process(objects, route).await?;
            debug!(
                "device[{}] pipeline published {published} sample(s) via {route:?}",
                self.device_id
            );
        } else if asdu.cause == Cause::ActivationConfirmation {
            if asdu.type_id.is_command() && first_select == Some(true) {
                // Select accepted: repeat the command as execute
                let mut execute = asdu.clone();
                execute.cause = Cause::Activation;
                if let Some(object) = execute.objects.first_mut() {
                    object.data.set_select(false);
                }
                debug!(
                    "device[{}] select confirmed, sending execute",
                    self.device_id
                );
                self.send_frame(Frame::i(0, 0, execute), true).await?;
            } else if asdu.type_id == TypeId::ClockSyncCommand {
                self.signals.fire_time_synced();
            }
        } else if asdu.cause == Cause::ActivationTermination {
            match asdu.type_id {
                TypeId::InterrogationCommand => self.signals.fire_all_data(),
                TypeId::CounterInterrogationCommand => self.signals.fire_counter_data(),
                _ => {},
            }
        } else if asdu.cause == Cause::Activation {
            warn!(
                "device[{}] unexpected activation from peer, ignored",
                self.device_id
            );
        } else {
            debug!(
                "device[{}] unhandled I-frame cause {:?}",
                self.device_id, asdu.cause
            );
        }
        Ok(())
    }

    /// Interactive read: emit a read command for the binding's address
    async fn call_data(&self, request: &PointRequest) -> Result<()> {
        let binding = self
            .inventory
            .get_binding(&request.term_id, &request.item_id)
            .await?
            .ok_or_else(|| {
                CollSrvError::InventoryMiss(format!(
                    "binding {}:{}",
                    request.term_id, request.item_id
                ))
            })?;
        let address: u32 = binding.protocol_code.parse().map_err(|_| {
            CollSrvError::Validation(format!("bad protocol_code {}", binding.protocol_code))
        })?;
        let asdu = Asdu::single(
            TypeId::ReadCommand,
            Cause::Activation,
            COMMON_ADDR,
            InfoObject::new(address, ObjectData::ReadCommand),
        );
        self.send_frame(Frame::i(0, 0, asdu), true).await
    }

    /// Select-and-execute control of the binding's point
    async fn ctrl_data(&self, request: &PointRequest) -> Result<()> {
        let binding = self
            .inventory
            .get_binding(&request.term_id, &request.item_id)
            .await?
            .ok_or_else(|| {
                CollSrvError::InventoryMiss(format!(
                    "binding {}:{}",
                    request.term_id, request.item_id
                ))
            })?;
        let value = request
            .value
            .ok_or_else(|| CollSrvError::Validation("control request without value".into()))?;
        let code_type = binding.code_type.ok_or_else(|| {
            CollSrvError::Validation(format!(
                "binding {}:{} has no code_type",
                request.term_id, request.item_id
            ))
        })?;
        let type_id = TypeId::from_byte(code_type).ok_or_else(|| {
            CollSrvError::Validation(format!("unknown control type {code_type}"))
        })?;
        let address: u32 = binding.protocol_code.parse().map_err(|_| {
            CollSrvError::Validation(format!("bad protocol_code {}", binding.protocol_code))
        })?;
        let select = type_id.has_select();
        let data = ObjectData::command(type_id, value, select, now_local())?;
        let asdu = Asdu::single(
            type_id,
            Cause::Activation,
            COMMON_ADDR,
            InfoObject::new(address, data),
        );
        self.send_frame(Frame::i(0, 0, asdu), true).await
    }
}

/// Read loop: frames arrive in order and are processed in arrival order
async fn receive_task(conn: Arc<Conn>, mut reader: OwnedReadHalf) {
    let mut codec_errors: u32 = 0;
    let mut window_start = tokio::time::Instant::now();
    loop {
        let raw = tokio::select! {
            result = read_raw_frame(&mut reader) => result,
            _ = conn.closing.cancelled() => return,
        };
        let bytes = match raw {
            Ok(bytes) => bytes,
            Err(e) => {
                conn.close(&format!("receive failed: {e}"));
                return;
            },
        };
        conn.timers.start(LinkTimer::T3, conn.params.t3());
        debug!("device[{}] recv: {}", conn.device_id, hex::encode(&bytes));
        conn.log_frame(&bytes, false).await;

        match Frame::decode(&bytes) {
            Ok(frame) => {
                if let Err(e) = conn.handle_frame(frame).await {
                    if e.closes_link() {
                        conn.close(&e.to_string());
                        return;
                    }
                    warn!("device[{}] frame dropped: {e}", conn.device_id);
                }
            },
            Err(e) => {
                // Tolerate stray garbage, close on a burst of it
                let now = tokio::time::Instant::now();
                if now.duration_since(window_start) > CODEC_ERROR_WINDOW {
                    window_start = now;
                    codec_errors = 0;
                }
                codec_errors += 1;
                warn!(
                    "device[{}] undecodable frame ({codec_errors} in window): {e}",
                    conn.device_id
                );
                if codec_errors >= CODEC_ERROR_LIMIT {
                    conn.close("repeated codec errors");
                    return;
                }
            },
        }
    }
}

/// Timer loop: T1 closes, T2 acknowledges, T3 probes
async fn timer_task(conn: Arc<Conn>) {
    loop {
        let timer = tokio::select! {
            timer = conn.timers.expired() => timer,
            _ = conn.closing.cancelled() => return,
        };
        match timer {
            LinkTimer::T1 => {
                conn.close("T1 expired waiting for confirmation");
                return;
            },
            LinkTimer::T2 => {
                debug!("device[{}] T2 expired, acknowledging", conn.device_id);
                if let Err(e) = conn.send_frame(Frame::s(0), true).await {
                    conn.close(&format!("S-frame send failed: {e}"));
                    return;
                }
            },
            LinkTimer::T3 => {
                debug!("device[{}] T3 expired, sending test frame", conn.device_id);
                if let Err(e) = conn.send_frame(Frame::u(UFrameKind::TestFrAct), true).await {
                    conn.close(&format!("TESTFR send failed: {e}"));
                    return;
                }
            },
        }
    }
}

/// Polling schedule: clock sync, general interrogation, counter
/// interrogation, repeated every `coll_interval`
async fn poll_task(conn: Arc<Conn>) {
    tokio::select! {
        _ = conn.started.notified() => {},
        _ = conn.closing.cancelled() => return,
    }
    let mut cycles: u64 = 0;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(conn.params.coll_interval()) => {},
            _ = conn.closing.cancelled() => return,
        }
        let begun = tokio::time::Instant::now();
        match run_cycle(&conn).await {
            Ok(()) => {
                cycles += 1;
                info!(
                    "device[{}] poll cycle {cycles} finished in {:.2}s",
                    conn.device_id,
                    begun.elapsed().as_secs_f64()
                );
            },
            Err(e) => {
                conn.close(&format!("poll cycle failed: {e}"));
                return;
            },
        }
    }
}

async fn run_cycle(conn: &Arc<Conn>) -> Result<()> {
    debug!("device[{}] poll cycle begin", conn.device_id);
    let time_synced = conn.signals.arm_time_synced();
    let all_data = conn.signals.arm_all_data();
    let counter_data = conn.signals.arm_counter_data();

    let clock_sync = Asdu::single(
        TypeId::ClockSyncCommand,
        Cause::Activation,
        COMMON_ADDR,
        InfoObject::new(0, ObjectData::ClockSyncCommand { time: now_local() }),
    );
    conn.send_frame(Frame::i(0, 0, clock_sync), true).await?;
    await_milestone(time_synced, conn.params.t1(), "clock sync").await?;

    let interrogation = Asdu::single(
        TypeId::InterrogationCommand,
        Cause::Activation,
        COMMON_ADDR,
        InfoObject::new(0, ObjectData::InterrogationCommand { qualifier: 20 }),
    );
    conn.send_frame(Frame::i(0, 0, interrogation), true).await?;
    await_milestone(all_data, conn.params.t1(), "general interrogation").await?;

    let counter = Asdu::single(
        TypeId::CounterInterrogationCommand,
        Cause::Activation,
        COMMON_ADDR,
        InfoObject::new(
            0,
            ObjectData::CounterInterrogationCommand {
                freeze: 0,
                request: 5,
            },
        ),
    );
    conn.send_frame(Frame::i(0, 0, counter), true).await?;
    await_milestone(counter_data, conn.params.t1(), "counter interrogation").await?;
    Ok(())
}

async fn await_milestone(
    rx: oneshot::Receiver<()>,
    deadline: Duration,
    what: &str,
) -> Result<()> {
    match tokio::time::timeout(deadline, rx).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err(CollSrvError::link("connection closed mid-cycle")),
        Err(_) => Err(CollSrvError::timeout(format!("{what} confirmation"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_starts_small_and_caps() {
        let first = reconnect_delay(1);
        assert!(first >= Duration::from_millis(2250) && first <= Duration::from_millis(3750));
        let late = reconnect_delay(20);
        assert!(late <= Duration::from_secs(75));
        assert!(late >= Duration::from_secs(45));
    }
}
