//! Modbus TCP driver plugin: owns a point table and a polling thread,
//! serves read/write requests between poll cycles.

pub mod address;
pub mod codec;
pub mod point_table;

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use itertools::{EitherOrBoth, Itertools};

use crate::constants::defaults;
use crate::data_mgmt::models::{DataType, TagId, TagTable, Value};
use crate::interfaces::transport::TcpTransport;
use crate::plugin::message::{
    NodeCtl, ReadRequest, ReadResponse, Request, Response, TagResult, WriteRequest,
    WriteResponse, ITEM_ERR_LOOKUP, ITEM_ERR_TRANSPORT, ITEM_ERR_TYPE, ITEM_OK,
};
use crate::plugin::{
    Adapter, Plugin, PluginConfig, PluginError, PluginKind, PluginModule, SharedTransport,
};
use self::point_table::{PointError, PointTable, RawValue, RawWidth};

pub static MODULE: PluginModule = PluginModule {
    name: "modbus-tcp",
    descr: "Modbus TCP polling driver",
    kind: PluginKind::Driver,
    open,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessStatus {
    Stopped,
    Running,
    /// Polling paused; the connection is retained.
    Waiting,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectStatus {
    Disconnected,
    Connected,
}

struct Shared {
    status: ProcessStatus,
    interval_ms: u32,
}

type TransportSlot = Arc<Mutex<Option<SharedTransport>>>;

pub struct ModbusTcpPlugin {
    node: String,
    shared: Arc<Mutex<Shared>>,
    connect_status: Arc<Mutex<ConnectStatus>>,
    points: Arc<Mutex<PointTable>>,
    transport: TransportSlot,
    tag_table: Option<Arc<TagTable>>,
    loop_handle: Option<JoinHandle<()>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn open(adapter: Adapter) -> Result<Box<dyn Plugin>, PluginError> {
    if adapter.node.is_empty() {
        return Err(PluginError::InvalidArgument(
            "node name must not be empty".into(),
        ));
    }
    Ok(Box::new(ModbusTcpPlugin {
        node: adapter.node,
        shared: Arc::new(Mutex::new(Shared {
            status: ProcessStatus::Stopped,
            interval_ms: defaults::POLL_INTERVAL_MS,
        })),
        connect_status: Arc::new(Mutex::new(ConnectStatus::Disconnected)),
        points: Arc::new(Mutex::new(PointTable::new())),
        transport: Arc::new(Mutex::new(None)),
        tag_table: None,
        loop_handle: None,
    }))
}

impl ModbusTcpPlugin {
    pub fn connect_status(&self) -> ConnectStatus {
        *lock(&self.connect_status)
    }

    fn current_transport(&self) -> Option<SharedTransport> {
        lock(&self.transport).clone()
    }

    fn handle_read(&self, read: ReadRequest) -> ReadResponse {
        let points = lock(&self.points);
        let items = read
            .group
            .tag_ids()
            .iter()
            .map(|&id| self.read_one(&points, id))
            .collect();
        ReadResponse {
            group: read.group.name.clone(),
            items,
        }
    }

    fn read_one(&self, points: &PointTable, id: TagId) -> TagResult {
        let tag = match self.tag_table.as_ref().and_then(|t| t.get(id)) {
            Some(tag) => tag,
            None => return TagResult::Error {
                error: ITEM_ERR_LOOKUP,
            },
        };
        match points.find(&tag.address) {
            Err(_) => TagResult::Error {
                error: ITEM_ERR_LOOKUP,
            },
            Ok(raw) => match decode_cached(raw, tag.data_type) {
                Some(value) => TagResult::Value(value),
                None => TagResult::Error {
                    error: ITEM_ERR_TYPE,
                },
            },
        }
    }

    fn handle_write(&self, write: WriteRequest) -> WriteResponse {
        let transport = self.current_transport();
        let mut points = lock(&self.points);
        let codes = write
            .group
            .tag_ids()
            .iter()
            .zip_longest(write.values.iter())
            .map(|pair| match pair {
                EitherOrBoth::Both(&id, value) => {
                    self.write_one(&mut points, transport.as_ref(), id, *value)
                }
                // A tag without a value, or a value without a tag
                _ => ITEM_ERR_LOOKUP,
            })
            .collect();
        WriteResponse {
            group: write.group.name.clone(),
            codes,
        }
    }

    fn write_one(
        &self,
        points: &mut PointTable,
        transport: Option<&SharedTransport>,
        id: TagId,
        value: Value,
    ) -> u8 {
        let tag = match self.tag_table.as_ref().and_then(|t| t.get(id)) {
            Some(tag) => tag,
            None => return ITEM_ERR_LOOKUP,
        };
        let raw = match encode_value(value, tag.data_type) {
            Some(raw) => raw,
            None => return ITEM_ERR_LOOKUP,
        };
        let tp = match transport {
            Some(tp) => tp,
            None => return ITEM_ERR_TRANSPORT,
        };
        let mut t = lock(tp);
        match points.write(&tag.address, raw, &mut **t) {
            Ok(()) => ITEM_OK,
            Err(PointError::Transport(_)) | Err(PointError::Codec(_)) => ITEM_ERR_TRANSPORT,
            Err(_) => ITEM_ERR_LOOKUP,
        }
    }

    fn handle_ctl(&self, ctl: NodeCtl) {
        let mut shared = lock(&self.shared);
        // Stopped is entered and left only through init/uninit
        if shared.status == ProcessStatus::Stopped {
            return;
        }
        shared.status = match ctl {
            NodeCtl::Start => ProcessStatus::Running,
            NodeCtl::Stop => ProcessStatus::Waiting,
        };
        log::info!("Driver '{}' polling now {:?}", self.node, shared.status);
    }
}

impl Plugin for ModbusTcpPlugin {
    fn init(&mut self) -> Result<(), PluginError> {
        if self.loop_handle.is_some() {
            return Err(PluginError::InvalidArgument(
                "init called twice without uninit".into(),
            ));
        }
        lock(&self.shared).status = ProcessStatus::Running;

        let node = self.node.clone();
        let shared = self.shared.clone();
        let points = self.points.clone();
        let transport = self.transport.clone();
        let connect_status = self.connect_status.clone();
        self.loop_handle = Some(thread::spawn(move || {
            polling_loop(node, shared, points, transport, connect_status)
        }));

        log::info!("Modbus TCP driver '{}' started", self.node);
        Ok(())
    }

    fn config(&mut self, config: &PluginConfig) -> Result<(), PluginError> {
        if let Some(tp) = &config.transport {
            *lock(&self.transport) = Some(tp.clone());
        } else if let Some(host) = config.str_setting("host") {
            let port = config
                .u64_setting("port")
                .unwrap_or(defaults::MODBUS_TCP_PORT as u64) as u16;
            let timeout = config
                .u64_setting("timeout_ms")
                .map(Duration::from_millis)
                .unwrap_or(defaults::TRANSPORT_TIMEOUT);
            let tcp = TcpTransport::new(host, port, timeout);
            *lock(&self.transport) = Some(Arc::new(Mutex::new(Box::new(tcp))));
        } else if lock(&self.transport).is_none() {
            return Err(PluginError::InvalidArgument(
                "modbus-tcp requires a transport or a 'host' setting".into(),
            ));
        }

        if let Some(interval) = config.u64_setting("interval_ms") {
            lock(&self.shared).interval_ms = interval as u32;
        }

        if let Some(table) = &config.tag_table {
            self.tag_table = Some(table.clone());
        }

        if !config.groups.is_empty() {
            let tags = self.tag_table.as_ref().ok_or_else(|| {
                PluginError::InvalidArgument("groups configured without a tag table".into())
            })?;

            let mut points = PointTable::new();
            for group in &config.groups {
                for &id in group.tag_ids() {
                    let Some(tag) = tags.get(id) else {
                        log::warn!("Group '{}' references unknown tag id {}", group.name, id);
                        continue;
                    };
                    if let Err(e) = points.add(&tag.address, tag_width(tag.data_type)) {
                        log::warn!("Skipping tag '{}': {}", tag.name, e);
                    }
                }
            }
            points.rebuild_commands();
            log::info!(
                "Driver '{}' configured with {} points in {} commands",
                self.node,
                points.len(),
                points.commands().len()
            );
            *lock(&self.points) = points;
        }

        Ok(())
    }

    fn request(&mut self, req: Request) -> Option<Response> {
        match req {
            Request::Read(read) => Some(Response::Read(self.handle_read(read))),
            Request::Write(write) => Some(Response::Write(self.handle_write(write))),
            Request::Ctl(ctl) => {
                self.handle_ctl(ctl);
                None
            }
        }
    }

    fn uninit(&mut self) {
        lock(&self.shared).status = ProcessStatus::Stopped;
        if let Some(handle) = self.loop_handle.take() {
            if handle.join().is_err() {
                log::error!("Polling loop of '{}' panicked", self.node);
            }
        }
        if let Some(tp) = lock(&self.transport).take() {
            lock(&tp).disconnect();
        }
        *lock(&self.points) = PointTable::new();
        *lock(&self.connect_status) = ConnectStatus::Disconnected;
        log::info!("Modbus TCP driver '{}' stopped", self.node);
    }
}

/// Dedicated polling loop, one per driver node. Sleeps for the configured
/// interval after each cycle (fixed delay, as opposed to a fixed-rate
/// tick), so a status change takes effect on the next iteration boundary.
fn polling_loop(
    node: String,
    shared: Arc<Mutex<Shared>>,
    points: Arc<Mutex<PointTable>>,
    transport: TransportSlot,
    connect_status: Arc<Mutex<ConnectStatus>>,
) {
    loop {
        // Status and interval are read in one critical section so the pair
        // cannot be torn by a concurrent reconfiguration.
        let (status, interval_ms) = {
            let s = lock(&shared);
            (s.status, s.interval_ms)
        };
        if status == ProcessStatus::Stopped {
            break;
        }

        if status == ProcessStatus::Running {
            match lock(&transport).clone() {
                Some(tp) => {
                    let connected = {
                        let mut pts = lock(&points);
                        let mut t = lock(&tp);
                        pts.poll_all(&mut **t, true);
                        t.is_connected()
                    };
                    *lock(&connect_status) = if connected {
                        ConnectStatus::Connected
                    } else {
                        ConnectStatus::Disconnected
                    };
                }
                None => log::debug!("Driver '{node}' has no transport; skipping poll"),
            }
        }

        thread::sleep(Duration::from_millis(u64::from(interval_ms)));
    }
    log::debug!("Polling loop of '{node}' exited");
}

fn tag_width(data_type: DataType) -> RawWidth {
    match data_type {
        DataType::Boolean => RawWidth::B8,
        DataType::Word | DataType::Uword => RawWidth::B16,
        DataType::Dword | DataType::Udword | DataType::Float => RawWidth::B32,
    }
}

/// Reinterpret a cached raw value as the tag's declared type. This is a
/// bit-pattern reinterpretation, not a numeric cast.
fn decode_cached(raw: RawValue, data_type: DataType) -> Option<Value> {
    match (raw, data_type) {
        (RawValue::B8(b), DataType::Boolean) => Some(Value::Boolean(b != 0)),
        (RawValue::B16(w), DataType::Word) => Some(Value::Word(w as i16)),
        (RawValue::B16(w), DataType::Uword) => Some(Value::Uword(w)),
        (RawValue::B32(d), DataType::Dword) => Some(Value::Dword(d as i32)),
        (RawValue::B32(d), DataType::Udword) => Some(Value::Udword(d)),
        (RawValue::B32(d), DataType::Float) => Some(Value::Float(f32::from_bits(d))),
        _ => None,
    }
}

fn encode_value(value: Value, data_type: DataType) -> Option<RawValue> {
    match (value, data_type) {
        (Value::Boolean(b), DataType::Boolean) => Some(RawValue::B8(u8::from(b))),
        (Value::Word(w), DataType::Word) => Some(RawValue::B16(w as u16)),
        (Value::Uword(w), DataType::Uword) => Some(RawValue::B16(w)),
        (Value::Dword(d), DataType::Dword) => Some(RawValue::B32(d as u32)),
        (Value::Udword(d), DataType::Udword) => Some(RawValue::B32(d)),
        (Value::Float(f), DataType::Float) => Some(RawValue::B32(f.to_bits())),
        _ => None,
    }
}
