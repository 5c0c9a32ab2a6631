use std::sync::Arc;

use color_eyre::Result;
use eyre::eyre;
use keylight::discovery::start_static_discovery;
use protocols::http::mk_http_client;
use store::{default_store_path, JsonStore};
use sync::{controller::Controller, runtime::spawn_controller, transport::HttpDispatcher};

use crate::{
    console::{run_console, start_event_printer},
    settings::read_settings,
};

mod console;
mod keylight;
mod protocols;
mod settings;
mod store;
mod sync;

fn init_logging(debug: bool) {
    let mut builder = pretty_env_logger::formatted_builder();

    match std::env::var("RUST_LOG") {
        Ok(filters) => {
            builder.parse_filters(&filters);
        }
        Err(_) => {
            let level = if debug { log::LevelFilter::Debug } else { log::LevelFilter::Info };
            builder.filter_level(level);
        }
    }

    builder.init();
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let settings = read_settings()?;
    init_logging(settings.advanced.enable_debug_logging);

    let store_path = settings
        .store
        .path
        .clone()
        .or_else(default_store_path)
        .ok_or_else(|| eyre!("Could not determine a config directory, set store.path"))?;
    let store = Arc::new(JsonStore::open(store_path));
    log::info!("Using store at {}", store.path().display());

    let http_client = mk_http_client(settings.http_timeout());
    let (dispatcher, pull_results) = HttpDispatcher::new(http_client.clone());

    let controller = Controller::new(
        store,
        Arc::new(dispatcher),
        settings.timings(),
        settings.advanced.master_power_semantics,
    );
    let (handle, _task) = spawn_controller(controller, pull_results);

    start_event_printer(&handle);
    start_static_discovery(&settings, &http_client, &handle);

    tokio::select! {
        result = run_console(handle, http_client) => result?,
        result = tokio::signal::ctrl_c() => result?,
    }

    Ok(())
}
