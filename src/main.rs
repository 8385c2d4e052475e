mod config;
mod error;
mod scsi;
mod sg;

use clap::Parser;
use color_eyre::Result;
use tracing::info;

use config::Config;
use scsi::TemperatureReader;
use sg::SgDevice;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let config = Config::parse();
    tracing_subscriber::fmt()
        .with_max_level(config.max_level())
        .with_writer(std::io::stderr)
        .init();

    let mut device = SgDevice::open(&config.device).await?;
    info!(device = %device.path().display(), "device opened");

    let mut reader = TemperatureReader::new(&mut device, &config);
    let temperature = reader.read_max_temperature().await?;
    println!("{}", reader.report(&temperature)?);
    Ok(())
}
