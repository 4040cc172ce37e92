//! Address classification for SSRF protection.
//!
//! Every address is matched against a table of CIDR ranges, each tagged with
//! the class it represents. Anything that matches no row is public.
//! IPv4-mapped IPv6 addresses are classified as the IPv4 address they carry.
use std::fmt;
use std::net::IpAddr;

use crate::types::{ErrorCode, WebFetchError};

/// Built-in non-public ranges.
pub const DEFAULT_CLASSIFIED_CIDRS: &[(&str, AddressClass)] = &[
    // IPv4
    ("127.0.0.0/8", AddressClass::Loopback),
    ("10.0.0.0/8", AddressClass::Private),
    ("172.16.0.0/12", AddressClass::Private),
    ("192.168.0.0/16", AddressClass::Private),
    ("100.64.0.0/10", AddressClass::Private),
    ("169.254.0.0/16", AddressClass::Private),
    ("0.0.0.0/8", AddressClass::Reserved),
    ("192.0.0.0/24", AddressClass::Reserved),
    ("192.0.2.0/24", AddressClass::Reserved),
    ("198.18.0.0/15", AddressClass::Reserved),
    ("198.51.100.0/24", AddressClass::Reserved),
    ("203.0.113.0/24", AddressClass::Reserved),
    ("224.0.0.0/4", AddressClass::Reserved),
    ("240.0.0.0/4", AddressClass::Reserved),
    ("255.255.255.255/32", AddressClass::Reserved),
    // IPv6
    ("::1/128", AddressClass::Loopback),
    ("fc00::/7", AddressClass::Private),
    ("fe80::/10", AddressClass::Private),
    ("::/96", AddressClass::Reserved),
    ("64:ff9b:1::/48", AddressClass::Reserved),
    ("100::/64", AddressClass::Reserved),
    ("2001::/23", AddressClass::Reserved),
    ("2001:db8::/32", AddressClass::Reserved),
    ("ff00::/8", AddressClass::Reserved),
];

/// Network class of a numeric address. Only `Public` permits fetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressClass {
    Public,
    Private,
    Loopback,
    Reserved,
    /// Input was not a numeric address.
    Invalid,
}

impl AddressClass {
    #[must_use]
    pub const fn is_public(self) -> bool {
        matches!(self, AddressClass::Public)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            AddressClass::Public => "public",
            AddressClass::Private => "private",
            AddressClass::Loopback => "loopback",
            AddressClass::Reserved => "reserved",
            AddressClass::Invalid => "invalid",
        }
    }
}

impl fmt::Display for AddressClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
struct Cidr {
    network: IpAddr,
    prefix: u8,
    class: AddressClass,
}

/// Classifier over the built-in table plus operator-supplied ranges.
#[derive(Debug, Clone)]
pub struct AddressClassifier {
    cidrs: Vec<Cidr>,
}

impl Default for AddressClassifier {
    fn default() -> Self {
        let cidrs = DEFAULT_CLASSIFIED_CIDRS
            .iter()
            .filter_map(|(text, class)| parse_cidr(text, *class))
            .collect();
        Self { cidrs }
    }
}

impl AddressClassifier {
    /// Build a classifier that also treats `extra` ranges as reserved.
    pub fn with_blocked_cidrs(extra: &[String]) -> Result<Self, WebFetchError> {
        let mut classifier = Self::default();
        for entry in extra {
            let cidr = parse_cidr(entry, AddressClass::Reserved).ok_or_else(|| {
                WebFetchError::new(
                    ErrorCode::Internal,
                    format!("invalid blocked cidr: {entry}"),
                    false,
                )
                .with_detail("cidr", entry)
            })?;
            classifier.cidrs.push(cidr);
        }
        Ok(classifier)
    }

    #[must_use]
    pub fn classify(&self, ip: IpAddr) -> AddressClass {
        let ip = match ip {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(ip, IpAddr::V4),
            IpAddr::V4(_) => ip,
        };

        self.cidrs
            .iter()
            .find(|cidr| ip_in_cidr(ip, cidr))
            .map_or(AddressClass::Public, |cidr| cidr.class)
    }

    /// Classify a textual address. Non-numeric input is `Invalid`.
    #[must_use]
    pub fn classify_str(&self, text: &str) -> AddressClass {
        let trimmed = text
            .trim()
            .trim_start_matches('[')
            .trim_end_matches(']');
        match trimmed.parse::<IpAddr>() {
            Ok(ip) => self.classify(ip),
            Err(_) => AddressClass::Invalid,
        }
    }
}

/// Classify against the built-in table only.
#[must_use]
pub fn classify(ip: IpAddr) -> AddressClass {
    AddressClassifier::default().classify(ip)
}

/// Classify a textual address against the built-in table only.
#[must_use]
pub fn classify_str(text: &str) -> AddressClass {
    AddressClassifier::default().classify_str(text)
}

fn parse_cidr(text: &str, class: AddressClass) -> Option<Cidr> {
    let (addr, prefix) = text.split_once('/')?;
    let network = addr.trim().parse::<IpAddr>().ok()?;
    let prefix = prefix.trim().parse::<u8>().ok()?;
    match network {
        IpAddr::V4(_) if prefix > 32 => return None,
        IpAddr::V6(_) if prefix > 128 => return None,
        _ => {}
    }
    Some(Cidr {
        network,
        prefix,
        class,
    })
}

fn ip_in_cidr(ip: IpAddr, cidr: &Cidr) -> bool {
    match (ip, cidr.network) {
        (IpAddr::V4(ipv4), IpAddr::V4(net)) => {
            prefix_match(&ipv4.octets(), &net.octets(), cidr.prefix)
        }
        (IpAddr::V6(ipv6), IpAddr::V6(net)) => {
            prefix_match(&ipv6.octets(), &net.octets(), cidr.prefix)
        }
        _ => false,
    }
}

fn prefix_match(ip: &[u8], net: &[u8], prefix: u8) -> bool {
    if prefix == 0 {
        return true;
    }
    let full = (prefix / 8) as usize;
    let rem = prefix % 8;

    if ip.len() < full || net.len() < full {
        return false;
    }

    if ip[..full] != net[..full] {
        return false;
    }

    if rem == 0 {
        return true;
    }

    let mask = 0xFFu8 << (8 - rem);
    ip[full] & mask == net[full] & mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn every_default_row_parses() {
        assert_eq!(
            AddressClassifier::default().cidrs.len(),
            DEFAULT_CLASSIFIED_CIDRS.len()
        );
    }

    #[test]
    fn non_public_ranges_never_classify_public() {
        let samples = [
            "127.0.0.1",
            "127.255.255.254",
            "10.0.0.5",
            "172.16.0.1",
            "172.31.255.255",
            "192.168.1.10",
            "100.64.0.1",
            "169.254.169.254",
            "0.0.0.0",
            "192.0.2.1",
            "198.18.0.1",
            "198.51.100.7",
            "203.0.113.9",
            "224.0.0.1",
            "240.0.0.1",
            "255.255.255.255",
            "::1",
            "::",
            "fc00::1",
            "fd12:3456::1",
            "fe80::1",
            "2001:db8::1",
            "ff02::1",
            "::ffff:10.0.0.1",
            "::ffff:127.0.0.1",
        ];
        for sample in samples {
            let class = classify_str(sample);
            assert!(!class.is_public(), "{sample} classified as {class}");
            assert_ne!(class, AddressClass::Invalid, "{sample} failed to parse");
        }
    }

    #[test]
    fn classes_are_specific() {
        assert_eq!(
            classify(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            AddressClass::Loopback
        );
        assert_eq!(
            classify(IpAddr::V6(Ipv6Addr::LOCALHOST)),
            AddressClass::Loopback
        );
        assert_eq!(classify_str("10.0.0.5"), AddressClass::Private);
        assert_eq!(classify_str("fd00::1"), AddressClass::Private);
        assert_eq!(classify_str("0.0.0.0"), AddressClass::Reserved);
        assert_eq!(classify_str("::ffff:127.0.0.1"), AddressClass::Loopback);
    }

    #[test]
    fn public_addresses_are_public() {
        for sample in [
            "93.184.216.34",
            "8.8.8.8",
            "1.1.1.1",
            "172.32.0.1",
            "2606:4700:4700::1111",
        ] {
            assert_eq!(classify_str(sample), AddressClass::Public, "{sample}");
        }
    }

    #[test]
    fn invalid_input_is_invalid_not_error() {
        assert_eq!(classify_str("not-an-ip"), AddressClass::Invalid);
        assert_eq!(classify_str(""), AddressClass::Invalid);
        assert_eq!(classify_str("999.1.1.1"), AddressClass::Invalid);
    }

    #[test]
    fn bracketed_ipv6_is_accepted() {
        assert_eq!(classify_str("[::1]"), AddressClass::Loopback);
    }

    #[test]
    fn extra_cidrs_are_reserved() {
        let classifier =
            AddressClassifier::with_blocked_cidrs(&["93.184.216.0/24".to_string()])
                .expect("valid cidr");
        assert_eq!(
            classifier.classify_str("93.184.216.34"),
            AddressClass::Reserved
        );
        assert_eq!(classifier.classify_str("8.8.8.8"), AddressClass::Public);
    }

    #[test]
    fn invalid_extra_cidr_is_config_error() {
        let err = AddressClassifier::with_blocked_cidrs(&["10.0.0.0/33".to_string()])
            .expect_err("prefix out of range");
        assert_eq!(err.code, ErrorCode::Internal);
        assert_eq!(err.detail("cidr"), Some("10.0.0.0/33"));
    }

    #[test]
    fn prefix_match_handles_partial_octets() {
        assert!(prefix_match(&[172, 31, 0, 1], &[172, 16, 0, 0], 12));
        assert!(!prefix_match(&[172, 32, 0, 1], &[172, 16, 0, 0], 12));
        assert!(prefix_match(&[1, 2, 3, 4], &[0, 0, 0, 0], 0));
    }
}
