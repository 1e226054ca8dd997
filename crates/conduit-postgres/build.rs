#![forbid(unsafe_code)]

/// `embed_migrations!` cannot watch the migrations directory by itself, so
/// the crate is rebuilt whenever a migration is added or edited.
fn main() {
    println!("cargo:rerun-if-changed=./migrations");
}
