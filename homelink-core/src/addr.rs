//! KNX group addressing
//!
//! Group addresses use the 3-level notation `main/middle/sub`:
//! main 0-31 (5 bits), middle 0-7 (3 bits), sub 0-255 (8 bits). The raw
//! 16-bit form is what telegrams carry on the wire.

use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, CoreResult};

/// A KNX group address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupAddress(u16);

impl GroupAddress {
    /// Builds a group address from its 3-level parts.
    pub fn new(main: u8, middle: u8, sub: u8) -> CoreResult<Self> {
        if main > 31 || middle > 7 {
            return Err(CoreError::parse(
                "group address",
                format!("{main}/{middle}/{sub}"),
            ));
        }
        Ok(GroupAddress(
            ((main as u16) << 11) | ((middle as u16) << 8) | sub as u16,
        ))
    }

    /// Raw 16-bit wire representation.
    pub fn raw(self) -> u16 {
        self.0
    }

    /// Main group (0-31).
    pub fn main(self) -> u8 {
        (self.0 >> 11) as u8
    }

    /// Middle group (0-7).
    pub fn middle(self) -> u8 {
        ((self.0 >> 8) & 0x07) as u8
    }

    /// Sub group (0-255).
    pub fn sub(self) -> u8 {
        (self.0 & 0xFF) as u8
    }
}

impl From<u16> for GroupAddress {
    fn from(raw: u16) -> Self {
        GroupAddress(raw)
    }
}

impl FromStr for GroupAddress {
    type Err = CoreError;

    fn from_str(text: &str) -> CoreResult<Self> {
        let invalid = || CoreError::parse("group address", text);
        let mut parts = text.split('/');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(main), Some(middle), Some(sub), None) => {
                let main: u8 = main.parse().map_err(|_| invalid())?;
                let middle: u8 = middle.parse().map_err(|_| invalid())?;
                let sub: u8 = sub.parse().map_err(|_| invalid())?;
                GroupAddress::new(main, middle, sub).map_err(|_| invalid())
            }
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for GroupAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.main(), self.middle(), self.sub())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid() {
        assert_eq!("0/0/0".parse::<GroupAddress>().unwrap().raw(), 0x0000);
        assert_eq!("1/0/7".parse::<GroupAddress>().unwrap().raw(), 0x0807);
        assert_eq!("5/3/128".parse::<GroupAddress>().unwrap().raw(), 0x2B80);
        assert_eq!("31/7/255".parse::<GroupAddress>().unwrap().raw(), 0xFFFF);
    }

    #[test]
    fn parse_invalid() {
        assert!("32/0/0".parse::<GroupAddress>().is_err());
        assert!("0/8/0".parse::<GroupAddress>().is_err());
        assert!("1/0/256".parse::<GroupAddress>().is_err());
        assert!("1/0".parse::<GroupAddress>().is_err());
        assert!("1".parse::<GroupAddress>().is_err());
        assert!("a/b/c".parse::<GroupAddress>().is_err());
        assert!("".parse::<GroupAddress>().is_err());
        assert!("1/0/7/2".parse::<GroupAddress>().is_err());
    }

    #[test]
    fn parts() {
        let addr = GroupAddress::from(0x0807);
        assert_eq!(addr.main(), 1);
        assert_eq!(addr.middle(), 0);
        assert_eq!(addr.sub(), 7);
    }

    #[test]
    fn round_trip() {
        for text in ["0/0/0", "1/0/7", "5/3/128", "31/7/255", "10/2/64"] {
            let addr: GroupAddress = text.parse().unwrap();
            assert_eq!(addr.to_string(), text);
        }
    }
}
