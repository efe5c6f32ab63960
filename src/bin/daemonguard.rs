use anyhow::Result;

fn main() -> Result<()> {
    daemonguard::cli::run()
}
