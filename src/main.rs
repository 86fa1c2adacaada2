use clap::Parser;
use tracing::info;

use fxtick_rs::config::{Cli, Settings};
use fxtick_rs::market_data::adapters::TungsteniteConnector;
use fxtick_rs::market_data::view::TickerView;
use fxtick_rs::market_data::{self, StreamClient};
use fxtick_rs::telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok(); // load .env

    let cli = Cli::parse();
    let settings = Settings::load(&cli)?;

    telemetry::init_tracing(&settings.log_filter);
    if let Some(addr) = &settings.metrics_addr {
        telemetry::init_metrics(addr.parse()?)?;
    }

    info!(endpoint = %settings.endpoint, instrument = %settings.instrument, "starting ticker");

    let handle = market_data::spawn(StreamClient::new(settings.stream_config()), TungsteniteConnector);
    let mut updates = handle.subscribe();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    println!("{}\n", TickerView::new(&updates.borrow_and_update()));
    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                println!("{}\n", TickerView::new(&snapshot));
                if cli.once && snapshot.quote.is_some() {
                    break;
                }
            }
            _ = &mut ctrl_c => {
                info!("interrupt received, shutting down");
                break;
            }
        }
    }

    handle.dispose();
    handle.join().await;
    Ok(())
}
