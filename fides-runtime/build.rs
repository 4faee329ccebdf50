use std::{env, path::PathBuf};

use fides_runtime_build::{BakedCatalog, generate};

fn main() {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR"));
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR"));
    let tcf = env::var_os("CARGO_FEATURE_TCF").is_some();

    let catalogs = [
        BakedCatalog::new("BASE", "messages.ftl"),
        BakedCatalog::new("TCF", "messages-tcf.ftl").enabled(tcf),
    ];

    let watched = generate(
        &manifest_dir.join("locales"),
        &catalogs,
        &out_dir.join("baked_catalogs.rs"),
    )
    .unwrap_or_else(|e| panic!("failed to generate baked catalogs: {e}"));

    for path in watched {
        println!("cargo:rerun-if-changed={}", path.display());
    }
}
