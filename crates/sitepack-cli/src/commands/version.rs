use super::print_json;
use miette::Result;
use serde::Serialize;
use sitepack_core::version::{version_string, SCHEMA_VERSION};
use sitepack_core::VERSION;

#[derive(Serialize)]
struct VersionJson {
    schema_version: u32,
    ok: bool,
    name: &'static str,
    version: &'static str,
}

pub fn run(json: bool) -> Result<()> {
    if json {
        return print_json(&VersionJson {
            schema_version: SCHEMA_VERSION,
            ok: true,
            name: "sitepack",
            version: VERSION,
        });
    }
    println!("{}", version_string());
    Ok(())
}
