//! Pairing data: passcodes, manual pairing codes and commissioning state
//!
//! Passcodes are generated once per storage namespace and persisted, so a
//! device keeps its pairing code across restarts until it is decommissioned.

use matterstore::{Namespace, StoreError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const PASSCODE_KEY: &str = "passcode";
const COMMISSIONED_KEY: &str = "commissioned";

const MAX_PASSCODE: u32 = 99_999_998;

/// Passcodes the commissioning protocol forbids
const INVALID_PASSCODES: [u32; 12] = [
    0, 11_111_111, 22_222_222, 33_333_333, 44_444_444, 55_555_555, 66_666_666, 77_777_777, 88_888_888,
    99_999_999, 12_345_678, 87_654_321,
];

/// What a user needs to commission an endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingInfo {
    pub manual_code: String,
    pub url: String,
    pub commissioned: bool,
}

/// Persisted pairing state of one endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingData {
    pub passcode: u32,
    pub discriminator: u16,
}

impl PairingData {
    /// Load the endpoint's passcode, generating and persisting one on first use
    pub fn load_or_create(namespace: &Namespace, discriminator: u16) -> Result<Self, StoreError> {
        debug!(namespace = %namespace.id(), discriminator, "PairingData::load_or_create: called");
        let passcode = namespace.get_or_insert_with(PASSCODE_KEY, generate_passcode)?;
        Ok(Self {
            passcode,
            discriminator,
        })
    }

    /// Read the persisted passcode; `None` until the endpoint has been served once
    pub fn load(namespace: &Namespace, discriminator: u16) -> Result<Option<Self>, StoreError> {
        debug!(namespace = %namespace.id(), discriminator, "PairingData::load: called");
        Ok(namespace.get::<u32>(PASSCODE_KEY)?.map(|passcode| Self {
            passcode,
            discriminator,
        }))
    }

    pub fn manual_code(&self) -> String {
        format_manual_code(self.discriminator, self.passcode)
    }

    pub fn info(&self, namespace: &Namespace, qr_base_url: &str) -> Result<PairingInfo, StoreError> {
        let manual_code = self.manual_code();
        let url = format!("{}?data={}", qr_base_url, manual_code.replace('-', ""));
        Ok(PairingInfo {
            manual_code,
            url,
            commissioned: is_commissioned(namespace)?,
        })
    }
}

pub fn is_commissioned(namespace: &Namespace) -> Result<bool, StoreError> {
    Ok(namespace.get::<bool>(COMMISSIONED_KEY)?.unwrap_or(false))
}

#[cfg(test)]
pub(crate) fn mark_commissioned(namespace: &Namespace) -> Result<(), StoreError> {
    info!(namespace = %namespace.id(), "Endpoint commissioned");
    namespace.set(COMMISSIONED_KEY, &true)
}

/// Forget every fabric and the passcode; the next start pairs from scratch
pub fn decommission(namespace: &Namespace) -> Result<(), StoreError> {
    info!(namespace = %namespace.id(), "Decommissioning endpoint");
    namespace.clear()
}

fn generate_passcode() -> u32 {
    let mut rng = rand::rng();
    loop {
        let candidate = rng.random_range(1..=MAX_PASSCODE);
        if !INVALID_PASSCODES.contains(&candidate) {
            return candidate;
        }
    }
}

// Verhoeff tables
const VERHOEFF_D: [[u8; 10]; 10] = [
    [0, 1, 2, 3, 4, 5, 6, 7, 8, 9],
    [1, 2, 3, 4, 0, 6, 7, 8, 9, 5],
    [2, 3, 4, 0, 1, 7, 8, 9, 5, 6],
    [3, 4, 0, 1, 2, 8, 9, 5, 6, 7],
    [4, 0, 1, 2, 3, 9, 5, 6, 7, 8],
    [5, 9, 8, 7, 6, 0, 4, 3, 2, 1],
    [6, 5, 9, 8, 7, 1, 0, 4, 3, 2],
    [7, 6, 5, 9, 8, 2, 1, 0, 4, 3],
    [8, 7, 6, 5, 9, 3, 2, 1, 0, 4],
    [9, 8, 7, 6, 5, 4, 3, 2, 1, 0],
];

const VERHOEFF_P: [[u8; 10]; 8] = [
    [0, 1, 2, 3, 4, 5, 6, 7, 8, 9],
    [1, 5, 7, 6, 2, 8, 3, 0, 9, 4],
    [5, 8, 0, 3, 7, 9, 6, 1, 4, 2],
    [8, 9, 1, 6, 0, 4, 3, 5, 2, 7],
    [9, 4, 5, 3, 1, 2, 6, 8, 7, 0],
    [4, 2, 8, 6, 5, 7, 3, 9, 0, 1],
    [2, 7, 9, 3, 8, 0, 6, 4, 1, 5],
    [7, 0, 4, 6, 9, 1, 3, 2, 5, 8],
];

const VERHOEFF_INV: [u8; 10] = [0, 4, 3, 2, 1, 5, 6, 7, 8, 9];

fn verhoeff(digits: &[u8], offset: usize) -> u8 {
    digits
        .iter()
        .rev()
        .enumerate()
        .fold(0u8, |c, (i, d)| {
            VERHOEFF_D[c as usize][VERHOEFF_P[(i + offset) % 8][*d as usize] as usize]
        })
}

fn to_digits(s: &str) -> Option<Vec<u8>> {
    s.chars().map(|c| c.to_digit(10).map(|d| d as u8)).collect()
}

/// Format the 11-digit manual pairing code as `dddd-ddd-dddd`
pub fn format_manual_code(discriminator: u16, passcode: u32) -> String {
    let short = u32::from((discriminator >> 8) & 0x0f);
    let chunk1 = short >> 2;
    let chunk2 = ((short & 0x03) << 14) | (passcode & 0x3fff);
    let chunk3 = passcode >> 14;
    let payload = format!("{}{:05}{:04}", chunk1, chunk2, chunk3);
    let check = to_digits(&payload)
        .map(|digits| VERHOEFF_INV[verhoeff(&digits, 1) as usize])
        .unwrap_or(0);
    let code = format!("{}{}", payload, check);
    format!("{}-{}-{}", &code[0..4], &code[4..7], &code[7..11])
}

/// Decode a manual pairing code into (short discriminator, passcode)
pub fn parse_manual_code(code: &str) -> Option<(u8, u32)> {
    let compact: String = code.chars().filter(|c| !matches!(c, '-' | ' ')).collect();
    if compact.len() != 11 {
        return None;
    }
    let digits = to_digits(&compact)?;
    if verhoeff(&digits, 0) != 0 {
        return None;
    }
    let chunk1: u32 = compact[0..1].parse().ok()?;
    let chunk2: u32 = compact[1..6].parse().ok()?;
    let chunk3: u32 = compact[6..10].parse().ok()?;
    let short = (((chunk1 & 0x03) << 2) | (chunk2 >> 14)) as u8;
    let passcode = (chunk3 << 14) | (chunk2 & 0x3fff);
    Some((short, passcode))
}

#[cfg(test)]
mod tests {
    use super::*;
    use matterstore::{NamespaceKind, StorageRoot};
    use tempfile::TempDir;

    #[test]
    fn test_known_manual_code() {
        assert_eq!(format_manual_code(3840, 20202021), "3497-011-2332");
        assert_eq!(parse_manual_code("3497-011-2332"), Some((15, 20202021)));
        assert_eq!(parse_manual_code("34970112332"), Some((15, 20202021)));
    }

    #[test]
    fn test_parse_rejects_bad_codes() {
        assert_eq!(parse_manual_code("3497-011-2333"), None);
        assert_eq!(parse_manual_code("3497-011"), None);
        assert_eq!(parse_manual_code("abcd-efg-hijk"), None);
    }

    #[test]
    fn test_format_round_trips_generated_passcodes() {
        for _ in 0..50 {
            let passcode = generate_passcode();
            assert!(passcode >= 1 && passcode <= MAX_PASSCODE);
            assert!(!INVALID_PASSCODES.contains(&passcode));
            let code = format_manual_code(3840, passcode);
            assert_eq!(parse_manual_code(&code), Some((15, passcode)));
        }
    }

    #[test]
    fn test_passcode_persisted_until_decommission() {
        let temp = TempDir::new().unwrap();
        let root = StorageRoot::open(temp.path()).unwrap();
        let ns = root.namespace(NamespaceKind::Device, "lamp").unwrap();

        assert_eq!(PairingData::load(&ns, 3840).unwrap(), None);
        assert!(!ns.exists());

        let first = PairingData::load_or_create(&ns, 3840).unwrap();
        let again = PairingData::load_or_create(&ns, 3840).unwrap();
        assert_eq!(first, again);
        assert_eq!(PairingData::load(&ns, 3840).unwrap(), Some(first.clone()));

        mark_commissioned(&ns).unwrap();
        let info = first.info(&ns, "https://example.test/qr").unwrap();
        assert!(info.commissioned);
        assert_eq!(
            info.url,
            format!("https://example.test/qr?data={}", info.manual_code.replace('-', ""))
        );

        decommission(&ns).unwrap();
        assert!(!is_commissioned(&ns).unwrap());
    }
}
