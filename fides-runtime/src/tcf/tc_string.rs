//! IAB TCF v2 core segment.
//!
//! Vendor sections are always written as bitfields; both bitfield and range
//! encodings are accepted when reading. Publisher restrictions are written as
//! an empty list and skipped when reading. Segments after the core one
//! (disclosed vendors, publisher TC) are ignored.

use std::collections::BTreeSet;

use base64::{
    Engine as _,
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
};
use chrono::{DateTime, Utc};

use super::bits::{BitReader, BitWriter};
use crate::error::TcfError;

/// URL-safe base64 without padding on write; padding tolerated on read.
const TC_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

pub const TC_STRING_VERSION: u8 = 2;
const NUM_SPECIAL_FEATURES: u16 = 12;
const NUM_PURPOSES: u16 = 24;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcModel {
    pub version: u8,
    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub cmp_id: u16,
    pub cmp_version: u16,
    pub consent_screen: u8,
    /// Two uppercase letters, e.g. `EN`.
    pub consent_language: String,
    pub vendor_list_version: u16,
    pub tcf_policy_version: u8,
    pub is_service_specific: bool,
    pub use_non_standard_texts: bool,
    pub special_feature_optins: BTreeSet<u16>,
    pub purpose_consents: BTreeSet<u16>,
    pub purpose_legitimate_interests: BTreeSet<u16>,
    pub purpose_one_treatment: bool,
    /// Two uppercase letters; `AA` for unknown.
    pub publisher_cc: String,
    pub vendor_consents: BTreeSet<u16>,
    pub vendor_legitimate_interests: BTreeSet<u16>,
}

impl Default for TcModel {
    fn default() -> Self {
        Self {
            version: TC_STRING_VERSION,
            created: DateTime::<Utc>::default(),
            last_updated: DateTime::<Utc>::default(),
            cmp_id: 0,
            cmp_version: 0,
            consent_screen: 0,
            consent_language: "EN".to_string(),
            vendor_list_version: 0,
            tcf_policy_version: 0,
            is_service_specific: true,
            use_non_standard_texts: false,
            special_feature_optins: BTreeSet::new(),
            purpose_consents: BTreeSet::new(),
            purpose_legitimate_interests: BTreeSet::new(),
            purpose_one_treatment: false,
            publisher_cc: "AA".to_string(),
            vendor_consents: BTreeSet::new(),
            vendor_legitimate_interests: BTreeSet::new(),
        }
    }
}

impl TcModel {
    /// Encodes the core segment.
    pub fn encode(&self) -> Result<String, TcfError> {
        let mut w = BitWriter::new();
        w.write(u64::from(self.version), 6)?;
        w.write(deciseconds(&self.created), 36)?;
        w.write(deciseconds(&self.last_updated), 36)?;
        w.write(u64::from(self.cmp_id), 12)?;
        w.write(u64::from(self.cmp_version), 12)?;
        w.write(u64::from(self.consent_screen), 6)?;
        write_letters(&mut w, &self.consent_language)?;
        w.write(u64::from(self.vendor_list_version), 12)?;
        w.write(u64::from(self.tcf_policy_version), 6)?;
        w.write_bool(self.is_service_specific);
        w.write_bool(self.use_non_standard_texts);
        write_fixed_bitfield(&mut w, &self.special_feature_optins, NUM_SPECIAL_FEATURES);
        write_fixed_bitfield(&mut w, &self.purpose_consents, NUM_PURPOSES);
        write_fixed_bitfield(&mut w, &self.purpose_legitimate_interests, NUM_PURPOSES);
        w.write_bool(self.purpose_one_treatment);
        write_letters(&mut w, &self.publisher_cc)?;
        write_vendor_section(&mut w, &self.vendor_consents)?;
        write_vendor_section(&mut w, &self.vendor_legitimate_interests)?;
        // NumPubRestrictions
        w.write(0, 12)?;
        Ok(TC_BASE64.encode(w.into_bytes()))
    }

    /// Decodes the core segment of a TC string.
    pub fn decode(tc_string: &str) -> Result<Self, TcfError> {
        let core = tc_string.split('.').next().unwrap_or_default().trim();
        if core.is_empty() {
            return Err(TcfError::Empty);
        }
        let bytes = TC_BASE64
            .decode(core)
            .map_err(|e| TcfError::Base64(e.to_string()))?;
        let mut r = BitReader::new(&bytes);

        let version = r.read(6)? as u8;
        if version != TC_STRING_VERSION {
            return Err(TcfError::UnsupportedVersion(version));
        }
        let created = from_deciseconds(r.read(36)?);
        let last_updated = from_deciseconds(r.read(36)?);
        let cmp_id = r.read(12)? as u16;
        let cmp_version = r.read(12)? as u16;
        let consent_screen = r.read(6)? as u8;
        let consent_language = read_letters(&mut r)?;
        let vendor_list_version = r.read(12)? as u16;
        let tcf_policy_version = r.read(6)? as u8;
        let is_service_specific = r.read_bool()?;
        let use_non_standard_texts = r.read_bool()?;
        let special_feature_optins = read_fixed_bitfield(&mut r, NUM_SPECIAL_FEATURES)?;
        let purpose_consents = read_fixed_bitfield(&mut r, NUM_PURPOSES)?;
        let purpose_legitimate_interests = read_fixed_bitfield(&mut r, NUM_PURPOSES)?;
        let purpose_one_treatment = r.read_bool()?;
        let publisher_cc = read_letters(&mut r)?;
        let vendor_consents = read_vendor_section(&mut r)?;
        let vendor_legitimate_interests = read_vendor_section(&mut r)?;
        skip_publisher_restrictions(&mut r)?;

        Ok(Self {
            version,
            created,
            last_updated,
            cmp_id,
            cmp_version,
            consent_screen,
            consent_language,
            vendor_list_version,
            tcf_policy_version,
            is_service_specific,
            use_non_standard_texts,
            special_feature_optins,
            purpose_consents,
            purpose_legitimate_interests,
            purpose_one_treatment,
            publisher_cc,
            vendor_consents,
            vendor_legitimate_interests,
        })
    }
}

fn deciseconds(at: &DateTime<Utc>) -> u64 {
    u64::try_from(at.timestamp_millis() / 100).unwrap_or(0)
}

fn from_deciseconds(ds: u64) -> DateTime<Utc> {
    i64::try_from(ds)
        .ok()
        .and_then(|ds| DateTime::from_timestamp_millis(ds.saturating_mul(100)))
        .unwrap_or_default()
}

fn write_letters(w: &mut BitWriter, letters: &str) -> Result<(), TcfError> {
    let upper = letters.to_ascii_uppercase();
    let bytes = upper.as_bytes();
    if bytes.len() != 2 || !bytes.iter().all(u8::is_ascii_uppercase) {
        return Err(TcfError::InvalidLetter(letters.to_string()));
    }
    for b in bytes {
        w.write(u64::from(b - b'A'), 6)?;
    }
    Ok(())
}

fn read_letters(r: &mut BitReader<'_>) -> Result<String, TcfError> {
    let mut out = String::with_capacity(2);
    for _ in 0..2 {
        let offset = r.read(6)? as u8;
        out.push(char::from(b'A' + offset.min(25)));
    }
    Ok(out)
}

fn write_fixed_bitfield(w: &mut BitWriter, ids: &BTreeSet<u16>, width: u16) {
    for id in 1..=width {
        w.write_bool(ids.contains(&id));
    }
}

fn read_fixed_bitfield(r: &mut BitReader<'_>, width: u16) -> Result<BTreeSet<u16>, TcfError> {
    let mut ids = BTreeSet::new();
    for id in 1..=width {
        if r.read_bool()? {
            ids.insert(id);
        }
    }
    Ok(ids)
}

fn write_vendor_section(w: &mut BitWriter, vendors: &BTreeSet<u16>) -> Result<(), TcfError> {
    let max = vendors.last().copied().unwrap_or(0);
    w.write(u64::from(max), 16)?;
    // IsRangeEncoding
    w.write_bool(false);
    for id in 1..=max {
        w.write_bool(vendors.contains(&id));
    }
    Ok(())
}

fn read_vendor_section(r: &mut BitReader<'_>) -> Result<BTreeSet<u16>, TcfError> {
    let max = r.read(16)? as u16;
    let is_range = r.read_bool()?;
    if is_range {
        return read_range_entries(r, max);
    }
    let mut ids = BTreeSet::new();
    for id in 1..=max {
        if r.read_bool()? {
            ids.insert(id);
        }
    }
    Ok(ids)
}

/// Ranges must lie inside `1..=max` and may not expand to more than `max`
/// ids in total.
fn read_range_entries(r: &mut BitReader<'_>, max: u16) -> Result<BTreeSet<u16>, TcfError> {
    let entries = r.read(12)?;
    let mut ids = BTreeSet::new();
    let mut expanded = 0usize;
    for _ in 0..entries {
        let is_a_range = r.read_bool()?;
        let start = r.read(16)? as u16;
        let end = if is_a_range { r.read(16)? as u16 } else { start };
        expanded += usize::from(end.saturating_sub(start)) + 1;
        if start == 0 || end < start || end > max || expanded > usize::from(max) {
            return Err(TcfError::VendorRange { start, end, max });
        }
        ids.extend(start..=end);
    }
    Ok(ids)
}

fn skip_publisher_restrictions(r: &mut BitReader<'_>) -> Result<(), TcfError> {
    let restrictions = r.read(12)?;
    for _ in 0..restrictions {
        // PurposeId, RestrictionType
        r.read(6)?;
        r.read(2)?;
        read_range_entries(r)?;
    }
    Ok(())
}
