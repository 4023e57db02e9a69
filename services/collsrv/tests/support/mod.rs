//! Test support: a scripted IEC-104 peer and inventory seeding
//!
//! The mock peer plays the controlled station: it confirms STARTDT and
//! TESTFR, acknowledges commands with actcon, streams interrogation data
//! between actcon and actterm, and answers read commands with a
//! `req`-cause measurement. Sequence numbers are tracked just enough to
//! satisfy a conforming master.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use collsrv::protocol::iec104::asdu::{
    Asdu, Cause, CounterReading, InfoObject, ObjectData, Quality, TypeId,
};
use collsrv::protocol::iec104::frame::{read_raw_frame, Apci, Frame, UFrameKind};
use datacoll_rtdb::model::{Device, Item, PointBinding, Term};
use datacoll_rtdb::{Inventory, MemoryRtdb, Rtdb};

/// Scripted behavior of the mock controlled station
#[derive(Debug, Clone)]
pub struct MockPeerConfig {
    /// (address, value) pairs streamed on general interrogation
    pub measurements: Vec<(u32, f32)>,
    /// (address, reading) pairs streamed on counter interrogation
    pub counters: Vec<(u32, u32)>,
    /// Value answered to read commands (at the requested address)
    pub read_reply_value: f32,
    /// Close the first accepted connection after one inbound frame
    pub drop_first_connection: bool,
}

impl Default for MockPeerConfig {
    fn default() -> Self {
        Self {
            measurements: vec![(100, 1.5), (200, 2.5), (300, 3.5)],
            counters: Vec::new(),
            read_reply_value: 102.0,
            drop_first_connection: false,
        }
    }
}

/// Running mock peer bound to an ephemeral port
pub struct MockPeer {
    pub addr: SocketAddr,
    /// Total connections accepted so far
    pub connections: Arc<AtomicUsize>,
    /// Select flags of received control commands, in arrival order
    pub command_selects: Arc<Mutex<Vec<Option<bool>>>>,
    accept_task: JoinHandle<()>,
}

impl MockPeer {
    pub async fn start(config: MockPeerConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let command_selects = Arc::new(Mutex::new(Vec::new()));

        let accept_connections = connections.clone();
        let accept_selects = command_selects.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let n = accept_connections.fetch_add(1, Ordering::SeqCst) + 1;
                let drop_early = config.drop_first_connection && n == 1;
                let config = config.clone();
                let selects = accept_selects.clone();
                tokio::spawn(async move {
                    let _ = serve_connection(stream, config, selects, drop_early).await;
                });
            }
        });

        Self {
            addr,
            connections,
            command_selects,
            accept_task,
        }
    }

    pub fn stop(&self) {
        self.accept_task.abort();
    }
}

impl Drop for MockPeer {
    fn drop(&mut self) {
        self.stop();
    }
}

struct PeerLink {
    writer: OwnedWriteHalf,
    ssn: u16,
    rsn: u16,
}

impl PeerLink {
    async fn send_u(&mut self, kind: UFrameKind) -> std::io::Result<()> {
        let bytes = Frame::u(kind).encode().unwrap();
        self.writer.write_all(&bytes).await
    }

    async fn send_i(&mut self, asdu: Asdu) -> std::io::Result<()> {
        let bytes = Frame::i(self.ssn, self.rsn, asdu).encode().unwrap();
        self.ssn = (self.ssn + 1) % 32768;
        self.writer.write_all(&bytes).await
    }
}

async fn serve_connection(
    stream: TcpStream,
    config: MockPeerConfig,
    selects: Arc<Mutex<Vec<Option<bool>>>>,
    drop_early: bool,
) -> std::io::Result<()> {
    let (mut reader, writer) = stream.into_split();
    let mut link = PeerLink {
        writer,
        ssn: 0,
        rsn: 0,
    };
    let mut handled = 0usize;

    loop {
        let Ok(raw) = read_raw_frame(&mut reader).await else {
            return Ok(());
        };
        handled += 1;
        let Ok(frame) = Frame::decode(&raw) else {
            continue;
        };

        match frame.apci {
            Apci::U(UFrameKind::StartDtAct) => {
                link.send_u(UFrameKind::StartDtCon).await?;
            },
            Apci::U(UFrameKind::TestFrAct) => {
                link.send_u(UFrameKind::TestFrCon).await?;
            },
            Apci::U(_) | Apci::S { .. } => {},
            Apci::I { send, .. } => {
                link.rsn = (send + 1) % 32768;
                if let Some(asdu) = frame.asdu {
                    handle_command(&mut link, &config, &selects, asdu).await?;
                }
            },
        }

        if drop_early && handled >= 1 {
            return Ok(());
        }
    }
}

async fn handle_command(
    link: &mut PeerLink,
    config: &MockPeerConfig,
    selects: &Arc<Mutex<Vec<Option<bool>>>>,
    asdu: Asdu,
) -> std::io::Result<()> {
    match asdu.type_id {
        TypeId::InterrogationCommand => {
            let mut actcon = asdu.clone();
            actcon.cause = Cause::ActivationConfirmation;
            link.send_i(actcon).await?;
            for (address, value) in &config.measurements {
                link.send_i(Asdu::single(
                    TypeId::MeasFloat,
                    Cause::StationInterrogation,
                    1,
                    InfoObject::new(
                        *address,
                        ObjectData::MeasFloat {
                            value: *value,
                            quality: Quality::default(),
                        },
                    ),
                ))
                .await?;
            }
            let mut actterm = asdu;
            actterm.cause = Cause::ActivationTermination;
            link.send_i(actterm).await?;
        },
        TypeId::CounterInterrogationCommand => {
            let mut actcon = asdu.clone();
            actcon.cause = Cause::ActivationConfirmation;
            link.send_i(actcon).await?;
            for (address, value) in &config.counters {
                link.send_i(Asdu::single(
                    TypeId::IntegratedTotals,
                    Cause::GeneralCounterRequest,
                    1,
                    InfoObject::new(
                        *address,
                        ObjectData::IntegratedTotals {
                            counter: CounterReading {
                                value: *value,
                                ..CounterReading::default()
                            },
                        },
                    ),
                ))
                .await?;
            }
            let mut actterm = asdu;
            actterm.cause = Cause::ActivationTermination;
            link.send_i(actterm).await?;
        },
        TypeId::ReadCommand => {
            let address = asdu.objects.first().map(|o| o.address).unwrap_or(0);
            link.send_i(Asdu::single(
                TypeId::MeasFloat,
                Cause::Request,
                1,
                InfoObject::new(
                    address,
                    ObjectData::MeasFloat {
                        value: config.read_reply_value,
                        quality: Quality::default(),
                    },
                ),
            ))
            .await?;
        },
        type_id if type_id.is_command() || type_id == TypeId::ClockSyncCommand => {
            if type_id.is_command() {
                selects
                    .lock()
                    .push(asdu.objects.first().and_then(|o| o.data.select()));
            }
            let mut actcon = asdu;
            actcon.cause = Cause::ActivationConfirmation;
            link.send_i(actcon).await?;
        },
        _ => {},
    }
    Ok(())
}

/// Seed the canonical test inventory: device `d1` pointed at the mock,
/// terminal `t1`, measurement points at addresses 100/200/300 and a float
/// set-point control at 400.
pub async fn seed_inventory(inventory: &Inventory, peer: &SocketAddr) {
    inventory
        .create_device(&Device {
            id: "d1".into(),
            name: "mock rtu".into(),
            ip: peer.ip().to_string(),
            port: peer.port(),
            identify: String::new(),
            protocol: "iec104".into(),
            status: "off".into(),
        })
        .await
        .unwrap();
    inventory
        .create_term(&Term {
            id: "t1".into(),
            name: "unit 1".into(),
            address: "1".into(),
            identify: String::new(),
            protocol: "iec104".into(),
            device_id: "d1".into(),
        })
        .await
        .unwrap();

    for (item_id, address, code_type) in [
        ("i1", 100u32, None),
        ("i2", 200, None),
        ("i3", 300, None),
        ("i4", 400, Some(TypeId::SetpointFloatTime56.to_byte())),
    ] {
        inventory
            .create_item(&Item {
                id: item_id.into(),
                name: format!("point {item_id}"),
                view_code: String::new(),
                func_type: String::new(),
            })
            .await
            .unwrap();
        inventory
            .create_binding(&PointBinding {
                term_id: "t1".into(),
                item_id: item_id.into(),
                device_id: String::new(),
                protocol_code: address.to_string(),
                code_type,
                coefficient: 1.0,
                base_val: 0.0,
            })
            .await
            .unwrap();
    }
}

/// Fresh in-memory store + inventory pair
pub fn memory_inventory() -> (Arc<MemoryRtdb>, Inventory) {
    let rtdb = Arc::new(MemoryRtdb::new());
    let inventory = Inventory::new(rtdb.clone() as Arc<dyn Rtdb>);
    (rtdb, inventory)
}

/// Poll the store until the device status matches, or panic
pub async fn wait_for_status(rtdb: &MemoryRtdb, device_id: &str, wanted: &str, deadline: Duration) {
    let key = format!("HS:DEVICE:{device_id}");
    let begun = tokio::time::Instant::now();
    loop {
        if let Some(status) = rtdb.hash_get(&key, "status").await.unwrap() {
            if status == wanted {
                return;
            }
        }
        if begun.elapsed() > deadline {
            panic!("device {device_id} never reached status `{wanted}`");
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
