use std::str::FromStr;

use anyhow::{Context as _, Error, Result, bail};
use macaddr::MacAddr6;

/// A monitored Aranet4 as given on the command line: `{ID}` or `{ID}={name}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: MacAddr6,

    pub name: String,
}

impl FromStr for Device {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut splits = s.split('=');
        let id = splits.next().unwrap_or_default();
        let name = splits.next();
        if splits.next().is_some() {
            bail!("invalid Aranet device {s:?}: must be of format {{ID}} or {{ID}}={{name}}");
        }

        let parsed_id = parse_bluetooth_mac(id)?;
        let name = match name {
            Some("") => bail!("invalid Aranet device {s:?}: name must not be empty"),
            Some(name) => name.to_owned(),
            None => id.to_owned(),
        };

        Ok(Device {
            id: parsed_id,
            name,
        })
    }
}

/// Parses `XX:XX:XX:XX:XX:XX` (hex digits, either case). Other notations
/// accepted by [`MacAddr6`] are rejected.
pub fn parse_bluetooth_mac(s: &str) -> Result<MacAddr6> {
    if !is_valid_bluetooth_mac(s) {
        bail!("not a valid Bluetooth MAC address: {s:?}");
    }

    s.parse()
        .with_context(|| format!("failed to parse Bluetooth MAC address: {s:?}"))
}

fn is_valid_bluetooth_mac(s: &str) -> bool {
    let octets: Vec<&str> = s.split(':').collect();
    octets.len() == 6
        && octets
            .iter()
            .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()))
}
