use std::fmt;
use std::str::FromStr;

use anyhow::{Context as _, Error, Result, bail};

// Ref: HomeKit Accessory Protocol, "Setup Payload"
pub const SENSOR_CATEGORY: u8 = 10;
pub const IP_TRANSPORT_FLAG: u8 = 2;

const SETUP_URI_SCHEME: &str = "X-HM://";
const PAYLOAD_VERSION: u64 = 0;
const PAYLOAD_RESERVED: u64 = 0;
const PAYLOAD_DIGITS: usize = 9;
const SETUP_CODE_MASK: u64 = (1 << 27) - 1;

/// Eight-digit HomeKit setup code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pin(String);

impl Pin {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `XXX-XX-XXX`, the form shown to users when pairing.
    pub fn formatted(&self) -> String {
        format!("{}-{}-{}", &self.0[0..3], &self.0[3..5], &self.0[5..8])
    }
}

impl FromStr for Pin {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_digit()) {
            bail!("invalid HomeKit pin {s:?}: must be exactly 8 digits");
        }

        Ok(Pin(s.to_owned()))
    }
}

impl fmt::Display for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Four upper-case alphanumeric characters, or empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetupId(String);

impl SetupId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for SetupId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = s.is_empty()
            || (s.len() == 4
                && s.bytes()
                    .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()));
        if !valid {
            bail!("invalid HomeKit setup id {s:?}: must be 4 characters of A-Z or 0-9");
        }

        Ok(SetupId(s.to_owned()))
    }
}

impl fmt::Display for SetupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Builds the `X-HM://` pairing URI encoded in HomeKit setup QR codes.
///
/// The payload packs, from the most significant bit: version (3 bits),
/// reserved (4), category (8), flag (4) and the low 27 bits of the numeric
/// setup code. It is rendered as 9 upper-case base-36 digits, followed by the
/// setup id.
pub fn setup_uri(category: u8, flag: u8, setup_code: &str, setup_id: &str) -> Result<String> {
    if setup_code.is_empty() || !setup_code.bytes().all(|b| b.is_ascii_digit()) {
        bail!("could not parse setup code as int: {setup_code:?}");
    }
    let code: u64 = setup_code
        .parse()
        .with_context(|| format!("could not parse setup code as int: {setup_code:?}"))?;

    let mut payload = PAYLOAD_VERSION & 0x7;
    payload = (payload << 4) | (PAYLOAD_RESERVED & 0xf);
    payload = (payload << 8) | u64::from(category);
    payload = (payload << 4) | (u64::from(flag) & 0xf);
    payload = (payload << 27) | (code & SETUP_CODE_MASK);

    Ok(format!(
        "{SETUP_URI_SCHEME}{:0>width$}{}",
        to_base36(payload),
        setup_id.to_uppercase(),
        width = PAYLOAD_DIGITS,
    ))
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

    let mut digits = Vec::new();
    loop {
        digits.push(DIGITS[(n % 36) as usize]);
        n /= 36;
        if n == 0 {
            break;
        }
    }

    digits.iter().rev().map(|&d| char::from(d)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_setup_uris() {
        assert_eq!(setup_uri(8, 2, "84131633", "").unwrap(), "X-HM://0081YCYEP");
        assert_eq!(
            setup_uri(8, 2, "84131633", "3QYT").unwrap(),
            "X-HM://0081YCYEP3QYT"
        );
        assert_eq!(
            setup_uri(8, 4, "84131633", "3QYT").unwrap(),
            "X-HM://0086E6GJ53QYT"
        );
        assert_eq!(
            setup_uri(SENSOR_CATEGORY, IP_TRANSPORT_FLAG, "12344321", "RNDM").unwrap(),
            "X-HM://009ZSQCXTRNDM"
        );
    }

    #[test]
    fn small_payloads_are_zero_padded() {
        assert_eq!(setup_uri(0, 0, "00000001", "").unwrap(), "X-HM://000000001");
        assert_eq!(setup_uri(0, 0, "0", "").unwrap(), "X-HM://000000000");
    }

    #[test]
    fn setup_id_is_appended_upper_case() {
        assert_eq!(setup_uri(8, 2, "84131633", "3qyt").unwrap(), "X-HM://0081YCYEP3QYT");
    }

    #[test]
    fn uri_shape_holds_across_inputs() {
        for (category, flag, pin, setup_id) in [
            (0, 0, "00000000", "AAAA"),
            (1, 1, "11111111", "0000"),
            (10, 2, "99999999", "ZZZZ"),
            (255, 15, "99999999", "9Z9Z"),
            (32, 8, "01234567", "AB12"),
        ] {
            let uri = setup_uri(category, flag, pin, setup_id).unwrap();
            let payload = uri.strip_prefix("X-HM://").unwrap();
            assert_eq!(payload.len(), 9 + 4, "{uri}");
            assert!(
                payload[..9]
                    .bytes()
                    .all(|b| b.is_ascii_digit() || b.is_ascii_uppercase()),
                "{uri}"
            );
            assert_eq!(&payload[9..], setup_id);
            assert_eq!(setup_uri(category, flag, pin, setup_id).unwrap(), uri);
        }
    }

    #[test]
    fn flag_only_touches_flag_bits() {
        let decode = |uri: &str| u64::from_str_radix(&uri[7..16], 36).unwrap();
        let a = decode(&setup_uri(8, 2, "84131633", "").unwrap());
        let b = decode(&setup_uri(8, 4, "84131633", "").unwrap());

        assert_eq!(a & SETUP_CODE_MASK, 84131633);
        assert_eq!(a & SETUP_CODE_MASK, b & SETUP_CODE_MASK);
        assert_eq!(a >> 31, b >> 31);
        assert_eq!((a >> 27) & 0xf, 2);
        assert_eq!((b >> 27) & 0xf, 4);
    }

    #[test]
    fn rejects_unparseable_setup_code() {
        assert!(setup_uri(10, 2, "1234-4321", "").is_err());
        assert!(setup_uri(10, 2, "", "").is_err());
        assert!(setup_uri(10, 2, "+12344321", "").is_err());
        assert!(setup_uri(10, 2, " 12344321", "").is_err());
    }

    #[test]
    fn pin_formats_with_dashes() {
        let pin: Pin = "12344321".parse().unwrap();
        assert_eq!(pin.formatted(), "123-44-321");
        assert_eq!(pin.to_string(), "12344321");
    }

    #[test]
    fn pin_must_be_eight_digits() {
        for s in ["1234432", "123443210", "1234432a", "", "123-44-321"] {
            assert!(s.parse::<Pin>().is_err(), "accepted {s:?}");
        }
    }

    #[test]
    fn setup_id_validation() {
        assert!("RNDM".parse::<SetupId>().is_ok());
        assert!("3QYT".parse::<SetupId>().is_ok());
        assert!("".parse::<SetupId>().is_ok());
        for s in ["rndm", "RND", "RNDMX", "RN-M"] {
            assert!(s.parse::<SetupId>().is_err(), "accepted {s:?}");
        }
    }
}
