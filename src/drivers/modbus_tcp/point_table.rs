//! Point cache and command batching.
//!
//! Points are registered once (addresses parsed at registration time), the
//! command set is recomputed from the full point set on any change, and the
//! polling loop scatters response words back into the cached values.

use ahash::AHashMap;
use thiserror::Error;

use crate::interfaces::transport::{Transport, TransportError};

use super::address::{self, Address, MalformedAddress, RegisterKind};
use super::codec::{self, CodecError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RawWidth {
    B8,
    B16,
    B32,
}

impl RawWidth {
    /// Registers (or bits) occupied by a point of this width.
    fn span(self) -> u16 {
        match self {
            RawWidth::B8 | RawWidth::B16 => 1,
            RawWidth::B32 => 2,
        }
    }

    fn zero(self) -> RawValue {
        match self {
            RawWidth::B8 => RawValue::B8(0),
            RawWidth::B16 => RawValue::B16(0),
            RawWidth::B32 => RawValue::B32(0),
        }
    }
}

/// Cached raw value of a point, as read off the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RawValue {
    B8(u8),
    B16(u16),
    B32(u32),
}

impl RawValue {
    pub fn width(self) -> RawWidth {
        match self {
            RawValue::B8(_) => RawWidth::B8,
            RawValue::B16(_) => RawWidth::B16,
            RawValue::B32(_) => RawWidth::B32,
        }
    }
}

#[derive(Clone, Debug)]
struct Point {
    addr: Address,
    width: RawWidth,
    value: RawValue,
    stale: bool,
}

#[derive(Error, Debug)]
pub enum PointError {
    #[error(transparent)]
    Malformed(#[from] MalformedAddress),
    #[error("duplicate address '{0}'")]
    DuplicateAddress(String),
    #[error("width incompatible with register kind of '{0}'")]
    IncompatibleWidth(String),
    #[error("address '{0}' not registered")]
    NotFound(String),
    #[error("register kind of '{0}' is not writable")]
    NotWritable(String),
    #[error("value width does not match point '{0}'")]
    WidthMismatch(String),
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
    #[error("protocol error: {0}")]
    Codec(#[from] CodecError),
}

/// One batched read transaction: a contiguous run of same-kind registers
/// (or bits) on a single slave.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    pub slave: u8,
    pub kind: RegisterKind,
    pub start: u16,
    pub count: u16,
}

impl Command {
    fn end(&self) -> u16 {
        self.start + (self.count - 1)
    }

    fn covers(&self, addr: &Address) -> bool {
        addr.slave == self.slave
            && addr.kind == self.kind
            && addr.offset >= self.start
            && addr.offset <= self.end()
    }
}

#[derive(Debug, Default)]
pub struct PollOutcome {
    pub polled: usize,
    pub skipped: usize,
    pub failures: Vec<(Command, PointError)>,
}

#[derive(Default)]
pub struct PointTable {
    points: Vec<Point>,
    index: AHashMap<Address, usize>,
    commands: Vec<Command>,
    txn: u16,
}

impl PointTable {
    pub fn new() -> Self {
        PointTable::default()
    }

    /// Register a point. The command set must be rebuilt before the next
    /// poll picks the point up.
    pub fn add(&mut self, address_text: &str, width: RawWidth) -> Result<(), PointError> {
        let addr = address::parse(address_text)?;
        let width_ok = if addr.kind.is_bit() {
            width == RawWidth::B8
        } else {
            width == RawWidth::B16 || width == RawWidth::B32
        };
        if !width_ok || addr.offset.checked_add(width.span() - 1).is_none() {
            return Err(PointError::IncompatibleWidth(address_text.to_string()));
        }
        if self.index.contains_key(&addr) {
            return Err(PointError::DuplicateAddress(address_text.to_string()));
        }

        self.points.push(Point {
            addr,
            width,
            value: width.zero(),
            stale: true,
        });
        self.index.insert(addr, self.points.len() - 1);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Recompute the minimal covering command set from the full point set.
    /// Not incremental; callers avoid invoking this on the poll path.
    pub fn rebuild_commands(&mut self) {
        let points = &self.points;
        let mut order: Vec<usize> = (0..points.len()).collect();
        order.sort_by_key(|&i| points[i].addr);

        let mut commands: Vec<Command> = Vec::new();
        for &i in &order {
            let p = &points[i];
            let limit = if p.addr.kind.is_bit() {
                codec::MAX_BITS_PER_READ
            } else {
                codec::MAX_REGS_PER_READ
            };
            let first = p.addr.offset;
            let last = first + p.width.span() - 1;

            match commands.last_mut() {
                Some(cmd)
                    if cmd.slave == p.addr.slave
                        && cmd.kind == p.addr.kind
                        && u32::from(first) <= u32::from(cmd.end()) + 1
                        && u32::from(last.max(cmd.end())) - u32::from(cmd.start) + 1
                            <= u32::from(limit) =>
                {
                    if first <= cmd.end() {
                        log::warn!(
                            "Point {} overlaps an already covered register",
                            address::format(&p.addr)
                        );
                    }
                    cmd.count = last.max(cmd.end()) - cmd.start + 1;
                }
                _ => commands.push(Command {
                    slave: p.addr.slave,
                    kind: p.addr.kind,
                    start: first,
                    count: last - first + 1,
                }),
            }
        }

        log::debug!(
            "Rebuilt {} commands from {} points",
            commands.len(),
            points.len()
        );
        self.commands = commands;
    }

    /// Execute every command against the transport. A failed command marks
    /// its points stale and is recorded; it never aborts the remaining
    /// commands. With `force` unset, commands whose points are all fresh
    /// are skipped.
    pub fn poll_all(&mut self, transport: &mut dyn Transport, force: bool) -> PollOutcome {
        let commands = self.commands.clone();
        let mut outcome = PollOutcome::default();

        for cmd in commands {
            let covered = self.covered_points(&cmd);
            if !force && covered.iter().all(|&i| !self.points[i].stale) {
                outcome.skipped += 1;
                continue;
            }
            match self.execute_read(transport, &cmd, &covered) {
                Ok(()) => outcome.polled += 1,
                Err(e) => {
                    for &i in &covered {
                        self.points[i].stale = true;
                    }
                    log::warn!(
                        "Poll of {:?}@{} [{}..={}] failed: {}",
                        cmd.kind,
                        cmd.slave,
                        cmd.start,
                        cmd.end(),
                        e
                    );
                    outcome.failures.push((cmd, e));
                }
            }
        }
        outcome
    }

    /// Cached value of a point; performs no I/O.
    pub fn find(&self, address_text: &str) -> Result<RawValue, PointError> {
        let addr = address::parse(address_text)?;
        self.index
            .get(&addr)
            .map(|&i| self.points[i].value)
            .ok_or_else(|| PointError::NotFound(address_text.to_string()))
    }

    /// Issue a single synchronous write transaction and update the cache
    /// on success (write-through).
    pub fn write(
        &mut self,
        address_text: &str,
        value: RawValue,
        transport: &mut dyn Transport,
    ) -> Result<(), PointError> {
        let addr = address::parse(address_text)?;
        let idx = *self
            .index
            .get(&addr)
            .ok_or_else(|| PointError::NotFound(address_text.to_string()))?;
        if value.width() != self.points[idx].width {
            return Err(PointError::WidthMismatch(address_text.to_string()));
        }

        let txn = self.next_txn();
        let (request, function) = match (addr.kind, value) {
            (RegisterKind::Coil, RawValue::B8(b)) => (
                codec::encode_write_single(
                    txn,
                    addr.slave,
                    codec::FN_WRITE_SINGLE_COIL,
                    addr.offset,
                    if b != 0 { 0xFF00 } else { 0x0000 },
                ),
                codec::FN_WRITE_SINGLE_COIL,
            ),
            (RegisterKind::HoldingRegister, RawValue::B16(w)) => (
                codec::encode_write_single(
                    txn,
                    addr.slave,
                    codec::FN_WRITE_SINGLE_REGISTER,
                    addr.offset,
                    w,
                ),
                codec::FN_WRITE_SINGLE_REGISTER,
            ),
            (RegisterKind::HoldingRegister, RawValue::B32(d)) => (
                codec::encode_write_registers(
                    txn,
                    addr.slave,
                    addr.offset,
                    &[(d >> 16) as u16, d as u16],
                ),
                codec::FN_WRITE_MULTIPLE_REGISTERS,
            ),
            _ => return Err(PointError::NotWritable(address_text.to_string())),
        };

        let frame = transport.send_recv(&request)?;
        codec::decode_write_ack(&frame, txn, addr.slave, function)?;

        let point = &mut self.points[idx];
        point.value = value;
        point.stale = false;
        Ok(())
    }

    fn covered_points(&self, cmd: &Command) -> Vec<usize> {
        self.points
            .iter()
            .enumerate()
            .filter(|(_, p)| cmd.covers(&p.addr))
            .map(|(i, _)| i)
            .collect()
    }

    fn execute_read(
        &mut self,
        transport: &mut dyn Transport,
        cmd: &Command,
        covered: &[usize],
    ) -> Result<(), PointError> {
        let txn = self.next_txn();
        let function = codec::read_function(cmd.kind);
        let request = codec::encode_read(txn, cmd.slave, function, cmd.start, cmd.count);
        let frame = transport.send_recv(&request)?;

        if cmd.kind.is_bit() {
            let bits = codec::decode_read_bits(&frame, txn, cmd.slave, function, cmd.count)?;
            for &i in covered {
                let p = &mut self.points[i];
                p.value = RawValue::B8(bits[(p.addr.offset - cmd.start) as usize] as u8);
                p.stale = false;
            }
        } else {
            let words = codec::decode_read_registers(&frame, txn, cmd.slave, function, cmd.count)?;
            for &i in covered {
                let p = &mut self.points[i];
                let at = (p.addr.offset - cmd.start) as usize;
                p.value = match p.width {
                    RawWidth::B16 => RawValue::B16(words[at]),
                    RawWidth::B32 => {
                        RawValue::B32((u32::from(words[at]) << 16) | u32::from(words[at + 1]))
                    }
                    // Bit widths never land on register kinds (checked in add)
                    RawWidth::B8 => continue,
                };
                p.stale = false;
            }
        }
        Ok(())
    }

    fn next_txn(&mut self) -> u16 {
        self.txn = self.txn.wrapping_add(1);
        self.txn
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Scripted Modbus slave backing the tests: answers reads from its
    /// register maps and applies writes to them.
    pub(crate) struct SimSlave {
        pub holding: Vec<u16>,
        pub input: Vec<u16>,
        pub coils: Vec<bool>,
        pub discrete: Vec<bool>,
        /// Function codes that fail with a transport error.
        pub fail_functions: Vec<u8>,
        pub calls: usize,
    }

    impl SimSlave {
        pub fn new() -> Self {
            SimSlave {
                holding: vec![0; 256],
                input: vec![0; 256],
                coils: vec![false; 256],
                discrete: vec![false; 256],
                fail_functions: Vec::new(),
                calls: 0,
            }
        }

        fn respond(&mut self, request: &[u8]) -> Option<Vec<u8>> {
            let txn = &request[0..2];
            let unit = request[6];
            let function = request[7];
            let start = u16::from_be_bytes([request[8], request[9]]) as usize;
            let arg = u16::from_be_bytes([request[10], request[11]]);

            if self.fail_functions.contains(&function) {
                return None;
            }

            let pdu: Vec<u8> = match function {
                codec::FN_READ_HOLDING_REGISTERS | codec::FN_READ_INPUT_REGISTERS => {
                    let regs = if function == codec::FN_READ_HOLDING_REGISTERS {
                        &self.holding
                    } else {
                        &self.input
                    };
                    let mut pdu = vec![function, (arg * 2) as u8];
                    for w in &regs[start..start + arg as usize] {
                        pdu.extend_from_slice(&w.to_be_bytes());
                    }
                    pdu
                }
                codec::FN_READ_COILS | codec::FN_READ_DISCRETE_INPUTS => {
                    let bits = if function == codec::FN_READ_COILS {
                        &self.coils
                    } else {
                        &self.discrete
                    };
                    let nbytes = (arg as usize + 7) / 8;
                    let mut packed = vec![0u8; nbytes];
                    for i in 0..arg as usize {
                        if bits[start + i] {
                            packed[i / 8] |= 1 << (i % 8);
                        }
                    }
                    let mut pdu = vec![function, nbytes as u8];
                    pdu.extend_from_slice(&packed);
                    pdu
                }
                codec::FN_WRITE_SINGLE_COIL => {
                    self.coils[start] = arg == 0xFF00;
                    request[7..12].to_vec()
                }
                codec::FN_WRITE_SINGLE_REGISTER => {
                    self.holding[start] = arg;
                    request[7..12].to_vec()
                }
                codec::FN_WRITE_MULTIPLE_REGISTERS => {
                    for i in 0..arg as usize {
                        self.holding[start + i] =
                            u16::from_be_bytes([request[13 + 2 * i], request[14 + 2 * i]]);
                    }
                    request[7..12].to_vec()
                }
                _ => vec![function | 0x80, 0x01],
            };

            let mut frame = Vec::with_capacity(7 + pdu.len());
            frame.extend_from_slice(txn);
            frame.extend_from_slice(&[0, 0]);
            frame.extend_from_slice(&(pdu.len() as u16 + 1).to_be_bytes());
            frame.push(unit);
            frame.extend_from_slice(&pdu);
            Some(frame)
        }
    }

    impl Transport for SimSlave {
        fn send_recv(&mut self, request: &[u8]) -> Result<Vec<u8>, TransportError> {
            self.calls += 1;
            self.respond(request)
                .ok_or(TransportError::NotConnected)
        }

        fn is_connected(&self) -> bool {
            true
        }

        fn disconnect(&mut self) {}
    }

    fn table_with(addresses: &[(&str, RawWidth)]) -> PointTable {
        let mut table = PointTable::new();
        for (addr, width) in addresses {
            table.add(addr, *width).unwrap();
        }
        table.rebuild_commands();
        table
    }

    #[test]
    fn contiguous_points_merge_and_holes_split() {
        // Offsets {0, 1, 2, 5, 6} on one slave and kind
        let table = table_with(&[
            ("1!400001", RawWidth::B16),
            ("1!400002", RawWidth::B16),
            ("1!400003", RawWidth::B16),
            ("1!400006", RawWidth::B16),
            ("1!400007", RawWidth::B16),
        ]);
        assert_eq!(
            table.commands(),
            &[
                Command {
                    slave: 1,
                    kind: RegisterKind::HoldingRegister,
                    start: 0,
                    count: 3
                },
                Command {
                    slave: 1,
                    kind: RegisterKind::HoldingRegister,
                    start: 5,
                    count: 2
                },
            ]
        );
    }

    #[test]
    fn wide_points_extend_the_merged_span() {
        // B32 at offset 0 spans registers 0-1; the B16 at offset 2 is
        // adjacent and merges into one command of three registers.
        let table = table_with(&[("1!400001", RawWidth::B32), ("1!400003", RawWidth::B16)]);
        assert_eq!(table.commands().len(), 1);
        assert_eq!(table.commands()[0].count, 3);
    }

    #[test]
    fn commands_split_by_slave_and_kind() {
        let table = table_with(&[
            ("1!400001", RawWidth::B16),
            ("2!400002", RawWidth::B16),
            ("1!300002", RawWidth::B16),
            ("1!00001", RawWidth::B8),
        ]);
        assert_eq!(table.commands().len(), 4);
    }

    #[test]
    fn merge_respects_register_limit() {
        let mut table = PointTable::new();
        for reg in 1..=126u32 {
            table
                .add(&format!("1!4{reg:05}"), RawWidth::B16)
                .unwrap();
        }
        table.rebuild_commands();
        assert_eq!(table.commands().len(), 2);
        assert_eq!(table.commands()[0].count, 125);
        assert_eq!(table.commands()[1].count, 1);
    }

    #[test]
    fn rejects_duplicates_and_incompatible_widths() {
        let mut table = PointTable::new();
        table.add("1!400001", RawWidth::B16).unwrap();
        assert!(matches!(
            table.add("1!400001", RawWidth::B32),
            Err(PointError::DuplicateAddress(_))
        ));
        assert!(matches!(
            table.add("1!00001", RawWidth::B16),
            Err(PointError::IncompatibleWidth(_))
        ));
        assert!(matches!(
            table.add("1!400002", RawWidth::B8),
            Err(PointError::IncompatibleWidth(_))
        ));
        assert!(matches!(
            table.add("bogus", RawWidth::B16),
            Err(PointError::Malformed(_))
        ));
    }

    #[test]
    fn poll_scatters_values_into_the_cache() {
        let mut table = table_with(&[
            ("1!400001", RawWidth::B16),
            ("1!400002", RawWidth::B32),
            ("1!00003", RawWidth::B8),
        ]);
        let mut slave = SimSlave::new();
        slave.holding[0] = 0x0042;
        slave.holding[1] = 0x1234;
        slave.holding[2] = 0x5678;
        slave.coils[2] = true;

        let outcome = table.poll_all(&mut slave, true);
        assert_eq!(outcome.polled, 2);
        assert!(outcome.failures.is_empty());

        assert_eq!(table.find("1!400001").unwrap(), RawValue::B16(0x0042));
        assert_eq!(table.find("1!400002").unwrap(), RawValue::B32(0x1234_5678));
        assert_eq!(table.find("1!00003").unwrap(), RawValue::B8(1));
    }

    #[test]
    fn one_failing_command_does_not_block_the_rest() {
        let mut table = table_with(&[
            ("1!400001", RawWidth::B16),
            ("1!300001", RawWidth::B16),
        ]);
        let mut slave = SimSlave::new();
        slave.holding[0] = 7;
        slave.fail_functions.push(codec::FN_READ_INPUT_REGISTERS);

        let outcome = table.poll_all(&mut slave, true);
        assert_eq!(outcome.polled, 1);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].0.kind, RegisterKind::InputRegister);
        assert_eq!(table.find("1!400001").unwrap(), RawValue::B16(7));
    }

    #[test]
    fn unforced_poll_skips_fresh_commands() {
        let mut table = table_with(&[("1!400001", RawWidth::B16)]);
        let mut slave = SimSlave::new();

        assert_eq!(table.poll_all(&mut slave, false).polled, 1);
        let outcome = table.poll_all(&mut slave, false);
        assert_eq!(outcome.polled, 0);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(table.poll_all(&mut slave, true).polled, 1);
    }

    #[test]
    fn write_through_updates_cache_and_device() {
        let mut table = table_with(&[
            ("1!400001", RawWidth::B16),
            ("1!400005", RawWidth::B32),
            ("1!00001", RawWidth::B8),
        ]);
        let mut slave = SimSlave::new();

        table
            .write("1!400001", RawValue::B16(0x1234), &mut slave)
            .unwrap();
        assert_eq!(slave.holding[0], 0x1234);
        assert_eq!(table.find("1!400001").unwrap(), RawValue::B16(0x1234));

        table
            .write("1!400005", RawValue::B32(0xDEAD_BEEF), &mut slave)
            .unwrap();
        assert_eq!(slave.holding[4], 0xDEAD);
        assert_eq!(slave.holding[5], 0xBEEF);

        table.write("1!00001", RawValue::B8(1), &mut slave).unwrap();
        assert!(slave.coils[0]);
    }

    #[test]
    fn write_errors_are_typed() {
        let mut table = table_with(&[
            ("1!400001", RawWidth::B16),
            ("1!300001", RawWidth::B16),
        ]);
        let mut slave = SimSlave::new();

        assert!(matches!(
            table.write("1!400099", RawValue::B16(1), &mut slave),
            Err(PointError::NotFound(_))
        ));
        assert!(matches!(
            table.write("1!400001", RawValue::B32(1), &mut slave),
            Err(PointError::WidthMismatch(_))
        ));
        assert!(matches!(
            table.write("1!300001", RawValue::B16(1), &mut slave),
            Err(PointError::NotWritable(_))
        ));

        slave.fail_functions.push(codec::FN_WRITE_SINGLE_REGISTER);
        assert!(matches!(
            table.write("1!400001", RawValue::B16(1), &mut slave),
            Err(PointError::Transport(_))
        ));
        // Failed write must not dirty the cache
        assert_eq!(table.find("1!400001").unwrap(), RawValue::B16(0));
    }
}
