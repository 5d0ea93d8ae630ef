//! fshare daemon - multi-user file sharing server
//!
//! See [`fshared::cli`] for usage.

fn main() -> anyhow::Result<()> {
    fshared::cli::run()
}
