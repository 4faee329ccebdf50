//! The message catalog.
//!
//! Two layers are consulted for every lookup:
//!
//! 1. **Runtime dictionaries** loaded with [`I18n::load`]: experience copy,
//!    notice titles, GVL translations. Keyed by the raw message id
//!    (`exp.banner_title`).
//! 2. **Baked catalogs** compiled from `locales/*/messages.ftl` (and, once a
//!    TCF experience is rendered, `messages-tcf.ftl`). Keyed by the Fluent id,
//!    which is the message id with `.` and `_` turned into `-`.
//!
//! # Resolution Order
//!
//! 1. **Active locale**: runtime, then TCF (if enabled), then base.
//! 2. **Default locale**: same order, skipped when it is the active one.
//! 3. **Missing key**: the id itself, so broken data never renders blank text.

use std::{
    borrow::Cow,
    collections::{BTreeMap, HashMap},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use arc_swap::ArcSwap;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    BundleCollection, CacheEntry, CacheStore, ConcurrentFluentBundle, FluentArgs, FluentResource,
    LanguageIdentifier, baked,
    error::I18nError,
    locale::{DEFAULT_LOCALE, Locale},
};

/// A flat `id -> text` dictionary for one locale.
pub type Messages = HashMap<String, String>;

/// A message reference with an optional default text and interpolation values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MessageDescriptor {
    pub id: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

impl MessageDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

/// A pair of generated (or test) maps making up one baked catalog.
#[derive(Clone, Copy)]
pub struct StaticCatalog {
    pub cache: &'static dyn CacheStore,
    pub bundles: &'static dyn BundleCollection,
}

impl StaticCatalog {
    /// Built-in labels shared by every experience type.
    pub fn base() -> Self {
        Self {
            cache: &baked::BASE_CACHE,
            bundles: &baked::BASE_BUNDLES,
        }
    }

    /// TCF labels. Empty unless the `tcf` feature is enabled.
    pub fn tcf() -> Self {
        Self {
            cache: &baked::TCF_CACHE,
            bundles: &baked::TCF_BUNDLES,
        }
    }
}

/// Builds a concurrent bundle from one baked `.ftl` source.
///
/// Called by the generated catalogs. The sources are validated at build time,
/// so parse or registration errors here only produce a warning.
pub fn bundle_from_source(tag: &str, source: &str) -> ConcurrentFluentBundle<FluentResource> {
    let langid: LanguageIdentifier = tag.parse().unwrap_or_default();
    let mut bundle = ConcurrentFluentBundle::new_concurrent(vec![langid]);
    bundle.set_use_isolating(false);

    let resource = FluentResource::try_new(source.to_string()).unwrap_or_else(|(resource, errors)| {
        warn!("Baked catalog for {tag} has {} parse errors", errors.len());
        resource
    });
    if let Err(errors) = bundle.add_resource(resource) {
        warn!("Baked catalog for {tag} has {} duplicate messages", errors.len());
    }
    bundle
}

/// Turns a message id into the Fluent id used by the baked catalogs.
pub fn normalize_identifier(id: &str) -> Cow<'_, str> {
    if id.contains(['.', '_']) {
        Cow::Owned(id.replace(['.', '_'], "-"))
    } else {
        Cow::Borrowed(id)
    }
}

/// Currently active language.
struct ActiveLocale {
    locale: Locale,
    /// Canonical key used for both layers (e.g. "es-MX").
    key: String,
}

impl ActiveLocale {
    fn new(locale: Locale) -> Self {
        let key = locale.catalog_key();
        Self { locale, key }
    }
}

/// Localized message lookup for one runtime instance.
///
/// Reads are lock-free (`ArcSwap`), so rendering never contends with a late
/// translation load.
pub struct I18n {
    active: ArcSwap<ActiveLocale>,
    default_key: String,
    runtime: ArcSwap<HashMap<String, Arc<Messages>>>,
    base: StaticCatalog,
    tcf: StaticCatalog,
    tcf_enabled: AtomicBool,
}

impl Default for I18n {
    fn default() -> Self {
        Self::new()
    }
}

impl I18n {
    /// A catalog over the baked dictionaries, active on the default locale.
    pub fn new() -> Self {
        Self::with_catalogs(StaticCatalog::base(), StaticCatalog::tcf())
    }

    pub fn with_catalogs(base: StaticCatalog, tcf: StaticCatalog) -> Self {
        let default = Locale::new(DEFAULT_LOCALE);
        Self {
            default_key: default.catalog_key(),
            active: ArcSwap::from_pointee(ActiveLocale::new(default)),
            runtime: ArcSwap::from_pointee(HashMap::new()),
            base,
            tcf,
            tcf_enabled: AtomicBool::new(false),
        }
    }

    /// Merges `messages` into the runtime dictionary of `locale`.
    ///
    /// Existing ids are overwritten, other ids and other locales are kept.
    pub fn load<I, K, V>(&self, locale: &Locale, messages: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let key = locale.catalog_key();
        let incoming: Vec<(String, String)> = messages
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        debug!("Loading {} messages for locale {locale}", incoming.len());

        self.runtime.rcu(|current| {
            let mut next = HashMap::clone(current);
            let mut dict = next.get(&key).map(|d| Messages::clone(d)).unwrap_or_default();
            dict.extend(incoming.iter().cloned());
            next.insert(key.clone(), Arc::new(dict));
            next
        });
    }

    /// Like [`I18n::load`], but only while `locale` is still the active one.
    ///
    /// Returns `false` (and leaves the catalog untouched) for a stale load, e.g.
    /// a translation fetch that resolved after the locale changed.
    pub fn load_if_active<I, K, V>(&self, locale: &Locale, messages: I) -> bool
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        if self.active.load().key != locale.catalog_key() {
            debug!(
                "Discarding messages for {locale}, active locale is now {}",
                self.active.load().locale
            );
            return false;
        }
        self.load(locale, messages);
        true
    }

    /// Switches the active locale. Loaded dictionaries are kept.
    pub fn activate(&self, locale: &Locale) {
        debug!("Activating locale {locale}");
        self.active.store(Arc::new(ActiveLocale::new(locale.clone())));
    }

    pub fn active_locale(&self) -> Locale {
        self.active.load().locale.clone()
    }

    /// Adds the baked TCF dictionaries to the lookup chain.
    pub fn enable_tcf(&self) {
        if !self.tcf_enabled.swap(true, Ordering::AcqRel) {
            debug!("TCF messages enabled");
        }
    }

    pub fn tcf_enabled(&self) -> bool {
        self.tcf_enabled.load(Ordering::Acquire)
    }

    /// Resolves a message id. Unknown ids come back unchanged.
    pub fn t<'a>(&self, id: &'a str) -> Cow<'a, str> {
        self.resolve(id, None).unwrap_or(Cow::Borrowed(id))
    }

    /// Resolves a message id with Fluent arguments.
    ///
    /// Arguments only affect dynamic baked messages; static and runtime
    /// messages are returned as they are.
    pub fn t_with_args<'a>(&self, id: &'a str, args: &FluentArgs) -> Cow<'a, str> {
        self.resolve(id, Some(args)).unwrap_or(Cow::Borrowed(id))
    }

    /// Resolves a descriptor. An unknown id falls back to the descriptor's
    /// default `message`, then to the id.
    pub fn t_descriptor(&self, descriptor: &MessageDescriptor) -> String {
        let mut args = FluentArgs::new();
        for (k, v) in &descriptor.values {
            args.set(k.as_str(), v.as_str());
        }
        let text = match self.resolve(&descriptor.id, Some(&args)) {
            Some(text) => text.into_owned(),
            None => descriptor
                .message
                .clone()
                .unwrap_or_else(|| descriptor.id.clone()),
        };
        interpolate(text, &descriptor.values)
    }

    /// Resolves loosely typed input as it arrives from a host integration.
    ///
    /// * a string is a message id,
    /// * an object with a string `id` is a descriptor,
    /// * anything else resolves to `""`.
    ///
    /// # Errors
    ///
    /// `None` (undefined) and JSON `null` are programmer errors and return
    /// [`I18nError::NullDescriptor`].
    pub fn translate(&self, input: Option<&Value>) -> Result<String, I18nError> {
        match input {
            None | Some(Value::Null) => Err(I18nError::NullDescriptor),
            Some(Value::String(id)) => Ok(self.t(id).into_owned()),
            Some(Value::Object(map)) => match map.get("id") {
                Some(Value::String(id)) => {
                    let descriptor = serde_json::from_value::<MessageDescriptor>(Value::Object(map.clone()))
                        .unwrap_or_else(|_| MessageDescriptor::new(id.clone()));
                    Ok(self.t_descriptor(&descriptor))
                }
                _ => Ok(String::new()),
            },
            Some(_) => Ok(String::new()),
        }
    }

    fn resolve<'a>(&self, id: &'a str, args: Option<&FluentArgs>) -> Option<Cow<'a, str>> {
        let active = self.active.load();
        if let Some(text) = self.lookup_in_locale(&active.key, id, args) {
            return Some(text);
        }
        if active.key != self.default_key {
            return self.lookup_in_locale(&self.default_key, id, args);
        }
        None
    }

    fn lookup_in_locale<'a>(&self, lang: &str, id: &str, args: Option<&FluentArgs>) -> Option<Cow<'a, str>> {
        if let Some(text) = self.runtime.load().get(lang).and_then(|m| m.get(id)) {
            return Some(Cow::Owned(text.clone()));
        }

        let fluent_id = normalize_identifier(id);
        self.tcf_enabled()
            .then(|| lookup_baked(self.tcf, lang, &fluent_id, args))
            .flatten()
            .or_else(|| lookup_baked(self.base, lang, &fluent_id, args))
    }
}

fn lookup_baked(
    catalog: StaticCatalog,
    lang: &str,
    key: &str,
    args: Option<&FluentArgs>,
) -> Option<Cow<'static, str>> {
    match catalog.cache.get_entry(lang, key)? {
        // Even if args are provided, a static entry is returned as is (zero alloc).
        CacheEntry::Static(s) => Some(Cow::Borrowed(s)),
        CacheEntry::Dynamic => {
            let bundle = catalog.bundles.get_bundle(lang)?;
            format_in_bundle(bundle, key, args)
        }
    }
}

fn format_in_bundle<'b>(
    bundle: &'b ConcurrentFluentBundle<FluentResource>,
    key: &str,
    args: Option<&FluentArgs>,
) -> Option<Cow<'b, str>> {
    let msg = bundle.get_message(key)?;
    let pattern = msg.value()?;
    let mut errors = vec![];
    let text = bundle.format_pattern(pattern, args, &mut errors);
    if !errors.is_empty() {
        debug!("Formatting {key} reported {} errors", errors.len());
    }
    Some(text)
}

/// Replaces `{name}` placeholders in runtime copy.
fn interpolate(text: String, values: &BTreeMap<String, String>) -> String {
    if values.is_empty() || !text.contains('{') {
        return text;
    }
    values
        .iter()
        .fold(text, |acc, (k, v)| acc.replace(&format!("{{{k}}}"), v))
}
