//! fshare - command-line client for an fshare server
//!
//! See [`fshare_client::cli`] for usage.

fn main() -> anyhow::Result<()> {
    fshare_client::cli::run()
}
