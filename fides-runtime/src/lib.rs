// fides-runtime/src/lib.rs
//! # fides-runtime
//!
//! The embeddable consent runtime. Given a server-supplied privacy experience,
//! the visitor's stored consent cookie, the browser's language list and its
//! Global Privacy Control signal, it decides which consent UI to show, in which
//! language, with which defaults, and reconciles every decision into one
//! authoritative cookie that is broadcast to the host page and the backend.
//!
//! Localized text is resolved through a two-layer catalog. Built-in labels are
//! compiled by `fides-runtime-build` into static Perfect Hash Maps, so a static
//! label is returned as a `&'static str` without touching the heap. Copy that
//! arrives with the experience (banner titles, notice names, GVL translations)
//! is loaded at runtime on top of it.
//!
//! ```text
//!  navigator + override ──► locale ──► i18n ◄── gvl (TCF only)
//!                                       │
//!  experience ─┐                        ▼
//!  cookie ─────┼──► ui (draft) ──► render ──► overlay ──► host document
//!  gpc ────────┘        │
//!                       ▼
//!                    commit ──► cookie store ─┬─► events
//!                                             └─► preference api
//! ```
//!
//! [`fides::Fides`] owns all of it; host integrations talk to that one value.

extern crate self as fides_runtime;

pub mod api;
pub mod commit;
pub mod config;
pub mod consent;
pub mod cookie;
pub mod error;
pub mod events;
pub mod experience;
pub mod fides;
pub mod gpc;
pub mod gvl;
pub mod i18n;
pub mod locale;
pub mod overlay;
pub mod render;
pub mod tcf;
pub mod ui;

use std::{collections::HashMap, hash::BuildHasher, sync::LazyLock};

pub use fluent_bundle::{
    FluentArgs, FluentResource, concurrent::FluentBundle as ConcurrentFluentBundle,
};
pub use unic_langid::LanguageIdentifier;

pub use config::FidesOptions;
pub use error::{FidesError, Result};
pub use fides::{Fides, FidesServices, TcfToggle};
pub use i18n::{I18n, MessageDescriptor};
pub use locale::{DEFAULT_LOCALE, Locale, detect_user_locale, match_available_locales};

// =========================================================================
// 1. UNIFIED CACHE TYPES
// =========================================================================

/// Represents the result of a cache lookup in a baked catalog.
///
/// Lets the catalog distinguish zero-cost static strings from those that need
/// the `FluentBundle` machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEntry {
    /// The message is static and contains no variables.
    ///
    /// The payload is a direct reference to the string in the binary's data section.
    Static(&'static str),
    /// The message contains variables or selectors and must be formatted by the
    /// locale's `ConcurrentFluentBundle`.
    Dynamic,
}

// =========================================================================
// 2. TRAIT ABSTRACTIONS
// =========================================================================

/// A store that maps `(Locale, Key)` to a `CacheEntry`.
///
/// Abstracts over the generated `phf::Map` and the `HashMap`s used in tests.
pub trait CacheStore: Sync + Send {
    /// Retrieves a cache entry for a specific language and message key.
    fn get_entry(&self, lang: &str, key: &str) -> Option<CacheEntry>;
}

// Impl for Generated PHF Map
impl CacheStore for phf::Map<&'static str, &'static phf::Map<&'static str, CacheEntry>> {
    fn get_entry(&self, lang: &str, key: &str) -> Option<CacheEntry> {
        // Single hash on `lang` (usually very small map), then Single hash on `key`.
        self.get(lang).and_then(|m| m.get(key)).copied()
    }
}

// Impl for HashMap (For Tests)
impl<S: BuildHasher + Sync + Send> CacheStore for HashMap<String, HashMap<String, CacheEntry>, S> {
    fn get_entry(&self, lang: &str, key: &str) -> Option<CacheEntry> {
        self.get(lang).and_then(|m| m.get(key)).copied()
    }
}

/// A collection capable of retrieving a `ConcurrentFluentBundle` by language key.
pub trait BundleCollection: Sync + Send {
    /// Retrieves the bundle for the specified language.
    fn get_bundle(&self, lang: &str) -> Option<&ConcurrentFluentBundle<FluentResource>>;
}

// Impl for Generated PHF Map
impl BundleCollection
    for phf::Map<&'static str, &'static LazyLock<ConcurrentFluentBundle<FluentResource>>>
{
    fn get_bundle(&self, lang: &str) -> Option<&ConcurrentFluentBundle<FluentResource>> {
        self.get(lang).map(|lazy| &***lazy)
    }
}

// Impl for HashMap (For Tests)
impl<S: BuildHasher + Sync + Send> BundleCollection
    for HashMap<String, ConcurrentFluentBundle<FluentResource>, S>
{
    fn get_bundle(&self, lang: &str) -> Option<&ConcurrentFluentBundle<FluentResource>> {
        self.get(lang)
    }
}

// =========================================================================
// 3. BAKED CATALOGS
// =========================================================================

/// Catalogs compiled from `locales/<locale>/*.ftl` by the build script.
pub mod baked {
    include!(concat!(env!("OUT_DIR"), "/baked_catalogs.rs"));
}

// =========================================================================
// 4. ACCESSOR MACRO
// =========================================================================

/// The primary accessor macro for localized strings.
///
/// Delegates to [`I18n::t`] or [`I18n::t_with_args`] depending on whether
/// arguments are provided.
///
/// # Examples
///
/// ```rust,ignore
/// let close = t!(i18n, "static.close");
/// let pending = t!(i18n, "static.notices_pending", { "count" => 3 });
/// ```
#[macro_export]
macro_rules! t {
    ($i18n:expr, $key:expr) => {
        $i18n.t($key)
    };
    ($i18n:expr, $key:expr, { $($k:expr => $v:expr),* $(,)? }) => {
        {
            let mut args = $crate::FluentArgs::new();
            $( args.set($k, $v); )*
            $i18n.t_with_args($key, &args)
        }
    };
}
