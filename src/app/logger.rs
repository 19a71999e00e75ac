//! Logging setup (SPEC_FULL.md §2-EXPANDED): `tracing-subscriber` is the only
//! installed backend, driven entirely through the `log` facade so the core
//! (session, codec, dispatcher, hub, pool) never constructs a subscriber
//! itself.

use tracing_subscriber::EnvFilter;

use super::args::{Args, LogFormat};
use crate::config::VERSION;

pub fn init_logging(args: &Args) {
    let filter = EnvFilter::from_default_env().add_directive(args.log_level.into());
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(!args.no_color);

    match args.log_format {
        LogFormat::Structured => subscriber.json().init(),
        LogFormat::Debug => subscriber.pretty().init(),
        LogFormat::Text => subscriber.init(),
    };

    log::info!("pg_mock_server {VERSION} starting up");
}
