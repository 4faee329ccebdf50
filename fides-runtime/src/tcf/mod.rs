//! TCF support: the Global Vendor List, the visitor's TCF decisions and the
//! fides string (`<tc_string>[,<ac_string>]`) written to the cookie.

pub mod bits;
pub mod tc_string;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use tc_string::TcModel;

use crate::{
    error::TcfError,
    experience::PrivacyExperience,
    i18n::Messages,
    locale::{Locale, primary_language},
};

/// CMP id registered with the IAB for this runtime.
pub const FIDES_CMP_ID: u16 = 407;
pub const FIDES_CMP_VERSION: u16 = 1;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GvlPurpose {
    pub id: u16,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub illustrations: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GvlVendor {
    pub id: u16,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub purposes: Vec<u16>,
    #[serde(default)]
    pub leg_int_purposes: Vec<u16>,
    #[serde(default)]
    pub special_purposes: Vec<u16>,
    #[serde(default)]
    pub features: Vec<u16>,
    #[serde(default)]
    pub special_features: Vec<u16>,
}

/// The English Global Vendor List as embedded in a TCF experience.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gvl {
    #[serde(default)]
    pub vendor_list_version: u16,
    #[serde(default)]
    pub tcf_policy_version: u8,
    #[serde(default)]
    pub purposes: BTreeMap<String, GvlPurpose>,
    #[serde(default)]
    pub special_purposes: BTreeMap<String, GvlPurpose>,
    #[serde(default)]
    pub features: BTreeMap<String, GvlPurpose>,
    #[serde(default)]
    pub special_features: BTreeMap<String, GvlPurpose>,
    #[serde(default)]
    pub stacks: BTreeMap<String, GvlPurpose>,
    #[serde(default)]
    pub vendors: BTreeMap<String, GvlVendor>,
}

/// Translatable part of the GVL for one language.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GvlTranslation {
    #[serde(default)]
    pub purposes: BTreeMap<String, GvlPurpose>,
    #[serde(default)]
    pub special_purposes: BTreeMap<String, GvlPurpose>,
    #[serde(default)]
    pub features: BTreeMap<String, GvlPurpose>,
    #[serde(default)]
    pub special_features: BTreeMap<String, GvlPurpose>,
    #[serde(default)]
    pub stacks: BTreeMap<String, GvlPurpose>,
}

pub type GvlTranslationsByLocale = BTreeMap<Locale, GvlTranslation>;

impl Gvl {
    /// The English copy of the GVL as a translation.
    pub fn english_translation(&self) -> GvlTranslation {
        GvlTranslation {
            purposes: self.purposes.clone(),
            special_purposes: self.special_purposes.clone(),
            features: self.features.clone(),
            special_features: self.special_features.clone(),
            stacks: self.stacks.clone(),
        }
    }

    pub fn vendor_name(&self, id: u16) -> Option<&str> {
        self.vendors.get(&id.to_string()).map(|v| v.name.as_str())
    }
}

impl GvlTranslation {
    /// Catalog entries, keyed `exp.tcf.<section>.<id>.name|description`.
    pub fn messages(&self) -> Messages {
        let sections = [
            ("purposes", &self.purposes),
            ("specialPurposes", &self.special_purposes),
            ("features", &self.features),
            ("specialFeatures", &self.special_features),
            ("stacks", &self.stacks),
        ];
        let mut messages = Messages::new();
        for (section, records) in sections {
            for (id, record) in records {
                messages.insert(format!("exp.tcf.{section}.{id}.name"), record.name.clone());
                messages.insert(
                    format!("exp.tcf.{section}.{id}.description"),
                    record.description.clone(),
                );
            }
        }
        messages
    }
}

/// A vendor id as the experience spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VendorId {
    /// `gvl.<id>`: an IAB vendor, encoded in the TC string.
    Gvl(u16),
    /// `gacp.<id>`: a Google Additional Consent vendor, encoded in the AC string.
    Ac(u32),
}

impl VendorId {
    pub fn parse(id: &str) -> Option<Self> {
        let (source, number) = id.split_once('.')?;
        match source {
            "gvl" => number.parse().ok().map(Self::Gvl),
            "gacp" => number.parse().ok().map(Self::Ac),
            _ => None,
        }
    }
}

/// The visitor's TCF decisions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcfConsent {
    pub purpose_consents: BTreeSet<u16>,
    pub purpose_legitimate_interests: BTreeSet<u16>,
    pub special_feature_optins: BTreeSet<u16>,
    pub vendor_consents: BTreeSet<u16>,
    pub vendor_legitimate_interests: BTreeSet<u16>,
    pub ac_vendor_consents: BTreeSet<u32>,
}

impl TcfConsent {
    /// Everything the experience lists, opted in.
    pub fn accept_all(experience: &PrivacyExperience) -> Self {
        let mut consent = Self {
            purpose_consents: experience.tcf_purpose_consents.iter().map(|p| p.id).collect(),
            purpose_legitimate_interests: experience
                .tcf_purpose_legitimate_interests
                .iter()
                .map(|p| p.id)
                .collect(),
            special_feature_optins: experience.tcf_special_features.iter().map(|p| p.id).collect(),
            ..Self::default()
        };
        for vendor in &experience.tcf_vendor_consents {
            match VendorId::parse(&vendor.id) {
                Some(VendorId::Gvl(id)) => {
                    consent.vendor_consents.insert(id);
                }
                Some(VendorId::Ac(id)) => {
                    consent.ac_vendor_consents.insert(id);
                }
                None => {}
            }
        }
        for vendor in &experience.tcf_vendor_legitimate_interests {
            if let Some(VendorId::Gvl(id)) = VendorId::parse(&vendor.id) {
                consent.vendor_legitimate_interests.insert(id);
            }
        }
        consent
    }

    /// Nothing opted in, legitimate interests included.
    pub fn reject_all() -> Self {
        Self::default()
    }

    /// Decodes a fides string back into decisions.
    pub fn from_fides_string(fides_string: &str) -> Result<Self, TcfError> {
        let (tc, ac) = split_fides_string(fides_string);
        let model = TcModel::decode(tc)?;
        Ok(Self {
            purpose_consents: model.purpose_consents,
            purpose_legitimate_interests: model.purpose_legitimate_interests,
            special_feature_optins: model.special_feature_optins,
            vendor_consents: model.vendor_consents,
            vendor_legitimate_interests: model.vendor_legitimate_interests,
            ac_vendor_consents: ac.map(decode_ac_string).transpose()?.unwrap_or_default(),
        })
    }

    /// Encodes the decisions as a fides string.
    pub fn to_fides_string(
        &self,
        experience: &PrivacyExperience,
        locale: &Locale,
        now: DateTime<Utc>,
    ) -> Result<String, TcfError> {
        let gvl = experience.gvl.clone().unwrap_or_default();
        let language = primary_language(locale.as_str())
            .filter(|l| l.len() == 2)
            .unwrap_or_else(|| "en".to_string())
            .to_ascii_uppercase();
        let model = TcModel {
            created: now,
            last_updated: now,
            cmp_id: FIDES_CMP_ID,
            cmp_version: FIDES_CMP_VERSION,
            consent_language: language,
            vendor_list_version: gvl.vendor_list_version,
            tcf_policy_version: gvl.tcf_policy_version,
            special_feature_optins: self.special_feature_optins.clone(),
            purpose_consents: self.purpose_consents.clone(),
            purpose_legitimate_interests: self.purpose_legitimate_interests.clone(),
            vendor_consents: self.vendor_consents.clone(),
            vendor_legitimate_interests: self.vendor_legitimate_interests.clone(),
            ..TcModel::default()
        };
        let tc = model.encode()?;
        if experience
            .tcf_vendor_consents
            .iter()
            .any(|v| matches!(VendorId::parse(&v.id), Some(VendorId::Ac(_))))
        {
            Ok(format!("{tc},{}", encode_ac_string(&self.ac_vendor_consents)))
        } else {
            Ok(tc)
        }
    }
}

/// Splits `<tc>[,<ac>]`.
pub fn split_fides_string(fides_string: &str) -> (&str, Option<&str>) {
    match fides_string.split_once(',') {
        Some((tc, ac)) => (tc, Some(ac)),
        None => (fides_string, None),
    }
}

/// `1~1.35.41`: version 1 followed by consented AC vendor ids.
pub fn encode_ac_string(vendors: &BTreeSet<u32>) -> String {
    let ids: Vec<String> = vendors.iter().map(u32::to_string).collect();
    format!("1~{}", ids.join("."))
}

/// Reads the consented vendor ids of a v1 or v2 AC string.
pub fn decode_ac_string(ac: &str) -> Result<BTreeSet<u32>, TcfError> {
    let mut parts = ac.split('~');
    match parts.next() {
        Some("1" | "2") => {}
        _ => return Err(TcfError::InvalidAcString(ac.to_string())),
    }
    let ids = parts.next().unwrap_or_default();
    if ids.is_empty() {
        return Ok(BTreeSet::new());
    }
    ids.split('.')
        .map(|id| {
            id.parse::<u32>()
                .map_err(|_| TcfError::InvalidAcString(ac.to_string()))
        })
        .collect()
}
