use std::process::ExitCode;
use std::sync::Arc;

use pg_mock_server::app::{init_logging, parse};
use pg_mock_server::config::Config;
use pg_mock_server::server::{self, ServerHandle};
use pg_mock_server::stats::NoopStats;

fn main() -> ExitCode {
    let args = parse();
    init_logging(&args);

    let mut config = match Config::load(&args.config_file) {
        Ok(cfg) => cfg,
        Err(e) => {
            log::error!("failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(host) = &args.host {
        config.server.host = host.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("pg-mock-server-worker")
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            log::error!("failed to start tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let handle = ServerHandle::with_config_path(config, Arc::new(NoopStats), Some(args.config_file.clone()));
    match runtime.block_on(server::run(handle)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("server exited with error: {e}");
            ExitCode::FAILURE
        }
    }
}
