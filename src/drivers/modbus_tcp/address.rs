//! Symbolic point addresses of the form `<slave>!<kind><register>`, e.g.
//! `1!400001` for holding register 1 on slave 1 or `1!00001` for coil 1.
//! Register numbers are 1-based in the text form and stored 0-based.

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("malformed address '{0}'")]
pub struct MalformedAddress(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RegisterKind {
    Coil,
    DiscreteInput,
    InputRegister,
    HoldingRegister,
}

impl RegisterKind {
    /// Coils and discrete inputs address single bits.
    pub fn is_bit(self) -> bool {
        matches!(self, RegisterKind::Coil | RegisterKind::DiscreteInput)
    }

    fn from_digit(c: char) -> Option<Self> {
        match c {
            '0' => Some(RegisterKind::Coil),
            '1' => Some(RegisterKind::DiscreteInput),
            '3' => Some(RegisterKind::InputRegister),
            '4' => Some(RegisterKind::HoldingRegister),
            _ => None,
        }
    }

    fn digit(self) -> char {
        match self {
            RegisterKind::Coil => '0',
            RegisterKind::DiscreteInput => '1',
            RegisterKind::InputRegister => '3',
            RegisterKind::HoldingRegister => '4',
        }
    }
}

/// Parsed point address. The derived ordering (slave, kind, offset) is the
/// sort key for command batching.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address {
    pub slave: u8,
    pub kind: RegisterKind,
    pub offset: u16,
}

pub fn parse(text: &str) -> Result<Address, MalformedAddress> {
    let malformed = || MalformedAddress(text.to_string());

    let (slave_str, rest) = text.split_once('!').ok_or_else(malformed)?;
    let slave: u8 = slave_str.parse().map_err(|_| malformed())?;

    let mut chars = rest.chars();
    let kind = chars
        .next()
        .and_then(RegisterKind::from_digit)
        .ok_or_else(malformed)?;

    let number_str = chars.as_str();
    if number_str.is_empty() || !number_str.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    let number: u32 = number_str.parse().map_err(|_| malformed())?;
    if number == 0 || number > u16::MAX as u32 + 1 {
        return Err(malformed());
    }

    Ok(Address {
        slave,
        kind,
        offset: (number - 1) as u16,
    })
}

pub fn format(addr: &Address) -> String {
    format!(
        "{}!{}{:05}",
        addr.slave,
        addr.kind.digit(),
        addr.offset as u32 + 1
    )
}
