//! Deterministic fixture-replay driver for the packet dispatch core.
//!
//! Loads a runtime configuration (or the shipped defaults), wires a
//! [`Dispatcher`] to in-memory fakes instead of the kernel and an external
//! store, registers the classifier subscriber alongside a trivial logging
//! subscriber on all three pipelines, and replays a text fixture of
//! NFQUEUE/conntrack/NFLOG events against it. No DPI binary is spawned: the
//! classifier's socket never connects, so every packet it sees falls back to
//! the transient-I/O release path — enough to exercise the wiring without a
//! live engine.

mod fakes;
mod fixture;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use packetd_classifier::ClassifierSubscriber;
use packetd_classifier::socket_manager::SocketManager;
use packetd_core::config::{default_config, load_config};
use packetd_core::kernel::WarehousePlayback;
use packetd_core::Dispatcher;
use packetd_types::ApplicationTable;

use fakes::{LoggingSubscriber, RecordingDictionary, RecordingKernel, RecordingReports};
use fixture::FixtureDriver;

const LOGGER_OWNER: &str = "demo-logger";
const LOGGER_PRIORITY: u8 = 10;
const CLASSIFIER_PRIORITY: u8 = 0;

fn main() -> ExitCode {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let Some(fixture_path) = args.next() else {
        eprintln!("usage: packetd-harness <fixture-file> [config-file]");
        return ExitCode::FAILURE;
    };
    let config_path = args.next();

    let config = match config_path {
        Some(path) => match load_config(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("failed to load configuration from '{path}': {e}");
                return ExitCode::FAILURE;
            }
        },
        None => default_config(),
    };

    let kernel = Arc::new(RecordingKernel::default());
    let session_dict = Arc::new(RecordingDictionary::default());
    let reports = Arc::new(RecordingReports::default());

    let process_start = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let mut dispatcher = Dispatcher::new(process_start, kernel.clone(), session_dict.clone(), reports.clone());
    dispatcher.nfqueue_handler_timeout = Duration::from_secs(config.dispatch.nfqueue_handler_timeout_secs);

    let socket = Arc::new(SocketManager::new(
        "127.0.0.1:8123".to_string(),
        Duration::from_secs(2),
        Duration::from_secs(2),
    ));
    let classifier = Arc::new(ClassifierSubscriber::new(
        socket,
        Arc::new(ApplicationTable::default()),
        session_dict.clone(),
        reports.clone(),
        None,
    ));
    dispatcher.registry.insert_nfqueue(packetd_classifier::packet_handler::SUBSCRIBER_OWNER, CLASSIFIER_PRIORITY, classifier.clone());
    dispatcher.registry.insert_conntrack(packetd_classifier::packet_handler::SUBSCRIBER_OWNER, CLASSIFIER_PRIORITY, classifier);

    let logger = Arc::new(LoggingSubscriber);
    dispatcher.registry.insert_nfqueue(LOGGER_OWNER, LOGGER_PRIORITY, logger.clone());
    dispatcher.registry.insert_conntrack(LOGGER_OWNER, LOGGER_PRIORITY, logger.clone());
    dispatcher.registry.insert_netlogger(LOGGER_OWNER, LOGGER_PRIORITY, logger);

    let dispatcher = Arc::new(dispatcher);

    let runtime = Arc::new(
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .expect("failed to build the tokio runtime"),
    );
    let _reaper = runtime.block_on(async { dispatcher.spawn_reaper() });

    let driver = FixtureDriver::new(Arc::clone(&dispatcher), Arc::clone(&runtime));
    let (nf_ctids, ct_ctids) = match driver.playback_file(&fixture_path) {
        Ok(ctids) => ctids,
        Err(e) => {
            eprintln!("failed to replay fixture '{fixture_path}': {e}");
            return ExitCode::FAILURE;
        }
    };

    println!("replayed fixture '{fixture_path}'");
    println!("  nfqueue ctids observed: {}", nf_ctids.len());
    println!("  conntrack ctids observed: {}", ct_ctids.len());
    println!("  bypassed ctids: {:?}", kernel.bypassed_ctids());
    println!("  reported events: {}", reports.events().len());

    driver.cleanup();

    ExitCode::SUCCESS
}
