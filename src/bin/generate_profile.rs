use clap::Parser;
use eareye::profile::SoundProfile;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "generate_profile",
    about = "Write the default fast/slow/static feedback sounds",
    version = "0.1.0"
)]
struct Args {
    /// Directory to write the WAV files into
    #[arg(short, long, default_value = "sounds/default")]
    output: PathBuf,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let written = SoundProfile::default().write_to(&args.output)?;
    log::info!("generated {} sounds in {}", written.len(), args.output.display());
    Ok(())
}
