// fides-runtime-build/src/lib.rs
//! # fides-runtime-build
//!
//! Build-time generator for `fides-runtime`. Each baked catalog is a set of
//! `locales/<locale>/<file>.ftl` files. This crate parses them with
//! `fluent-syntax`, classifies every message as static (plain text) or dynamic
//! (placeables, selectors), and writes Rust source containing:
//!
//! * one `phf::Map` of `CacheEntry` per locale plus an outer map keyed by the
//!   canonical locale tag (`<NAME>_CACHE`),
//! * one lazily constructed concurrent `FluentBundle` per locale plus an outer
//!   map keyed the same way (`<NAME>_BUNDLES`),
//! * the sorted list of locales present in the catalog (`<NAME>_LOCALES`).
//!
//! The generated file is meant to be `include!`d from inside `fides-runtime`,
//! so every path it emits is rooted at `crate::`.

use std::{
    collections::BTreeMap,
    fmt::{self, Write as _},
    fs, io,
    path::{Path, PathBuf},
};

use fluent_syntax::{ast, parser};
use thiserror::Error;
use unic_langid::LanguageIdentifier;

/// A catalog the generator should emit.
#[derive(Debug, Clone)]
pub struct BakedCatalog {
    /// Prefix of the generated statics, e.g. `BASE` or `TCF`.
    pub name: String,
    /// File looked up in every locale directory, e.g. `messages.ftl`.
    pub file_name: String,
    /// Disabled catalogs are still emitted, but empty.
    pub enabled: bool,
}

impl BakedCatalog {
    pub fn new(name: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file_name: file_name.into(),
            enabled: true,
        }
    }

    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Errors surfaced to the build script.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("failed to read {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("locale directory `{dir}` is not a valid language tag")]
    InvalidLocale { dir: String },

    #[error("failed to parse {}: {}", path.display(), errors.join("; "))]
    Parse { path: PathBuf, errors: Vec<String> },

    #[error("failed to format generated code: {0}")]
    Format(#[from] fmt::Error),
}

/// One parsed `.ftl` file.
struct LocaleFile {
    /// Canonical tag, e.g. `es-MX`.
    tag: String,
    path: PathBuf,
    /// Message id -> `None` for dynamic, `Some(text)` for static.
    entries: BTreeMap<String, Option<String>>,
}

/// Generates the catalogs and writes them to `out_file`.
///
/// Returns the list of files the build script should watch.
///
/// # Errors
///
/// Fails on unreadable directories, locale directories that are not valid
/// language tags, and Fluent syntax errors.
pub fn generate(
    locales_dir: &Path,
    catalogs: &[BakedCatalog],
    out_file: &Path,
) -> Result<Vec<PathBuf>, BuildError> {
    let mut code = String::from("// Generated by fides-runtime-build. Do not edit.\n\n");
    let mut watched = vec![locales_dir.to_path_buf()];

    for catalog in catalogs {
        let files = if catalog.enabled {
            collect_locale_files(locales_dir, &catalog.file_name)?
        } else {
            Vec::new()
        };
        watched.extend(files.iter().map(|f| f.path.clone()));
        write_catalog(&mut code, &catalog.name, &files)?;
    }

    fs::write(out_file, code).map_err(|source| BuildError::Io {
        path: out_file.to_path_buf(),
        source,
    })?;
    Ok(watched)
}

fn collect_locale_files(locales_dir: &Path, file_name: &str) -> Result<Vec<LocaleFile>, BuildError> {
    let read_dir = fs::read_dir(locales_dir).map_err(|source| BuildError::Io {
        path: locales_dir.to_path_buf(),
        source,
    })?;

    let mut dirs = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(|source| BuildError::Io {
            path: locales_dir.to_path_buf(),
            source,
        })?;
        if entry.path().is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();

    let mut files = Vec::new();
    for dir in dirs {
        let path = dir.join(file_name);
        if !path.is_file() {
            continue;
        }
        let dir_name = dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let langid: LanguageIdentifier = dir_name
            .parse()
            .map_err(|_| BuildError::InvalidLocale { dir: dir_name.clone() })?;
        let source = fs::read_to_string(&path).map_err(|source| BuildError::Io {
            path: path.clone(),
            source,
        })?;
        let entries = classify(&path, &source)?;
        files.push(LocaleFile {
            tag: langid.to_string(),
            path,
            entries,
        });
    }
    Ok(files)
}

fn classify(path: &Path, source: &str) -> Result<BTreeMap<String, Option<String>>, BuildError> {
    let resource = parser::parse(source).map_err(|(_, errors)| BuildError::Parse {
        path: path.to_path_buf(),
        errors: errors.iter().map(|e| format!("{e:?}")).collect(),
    })?;

    let mut entries = BTreeMap::new();
    for entry in resource.body {
        let ast::Entry::Message(message) = entry else {
            continue;
        };
        let Some(pattern) = message.value else {
            continue;
        };
        let value = match pattern.elements.as_slice() {
            [ast::PatternElement::TextElement { value }] => Some((*value).to_string()),
            _ => None,
        };
        entries.insert(message.id.name.to_string(), value);
    }
    Ok(entries)
}

fn static_ident(catalog: &str, tag: &str, kind: &str) -> String {
    let suffix: String = tag
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("{catalog}_{kind}_{suffix}")
}

fn write_catalog(code: &mut String, name: &str, files: &[LocaleFile]) -> Result<(), BuildError> {
    let bundle_ty = "::std::sync::LazyLock<crate::ConcurrentFluentBundle<crate::FluentResource>>";

    for file in files {
        let mut map = phf_codegen::Map::<&str>::new();
        for (id, value) in &file.entries {
            let entry = match value {
                Some(text) => format!("crate::CacheEntry::Static({text:?})"),
                None => "crate::CacheEntry::Dynamic".to_string(),
            };
            map.entry(id.as_str(), entry);
        }
        writeln!(
            code,
            "static {}: ::phf::Map<&'static str, crate::CacheEntry> = {};\n",
            static_ident(name, &file.tag, "CACHE"),
            map.build()
        )?;

        let path = file.path.to_string_lossy();
        writeln!(
            code,
            "static {}: {bundle_ty} = ::std::sync::LazyLock::new(|| crate::i18n::bundle_from_source({:?}, include_str!({:?})));\n",
            static_ident(name, &file.tag, "BUNDLE"),
            file.tag,
            path
        )?;
    }

    let mut caches = phf_codegen::Map::<&str>::new();
    let mut bundles = phf_codegen::Map::<&str>::new();
    for file in files {
        caches.entry(file.tag.as_str(), format!("&{}", static_ident(name, &file.tag, "CACHE")));
        bundles.entry(file.tag.as_str(), format!("&{}", static_ident(name, &file.tag, "BUNDLE")));
    }

    writeln!(
        code,
        "pub static {name}_CACHE: ::phf::Map<&'static str, &'static ::phf::Map<&'static str, crate::CacheEntry>> = {};\n",
        caches.build()
    )?;
    writeln!(
        code,
        "pub static {name}_BUNDLES: ::phf::Map<&'static str, &'static {bundle_ty}> = {};\n",
        bundles.build()
    )?;

    let tags: Vec<String> = files.iter().map(|f| format!("{:?}", f.tag)).collect();
    writeln!(
        code,
        "pub static {name}_LOCALES: &[&str] = &[{}];\n",
        tags.join(", ")
    )?;
    Ok(())
}
