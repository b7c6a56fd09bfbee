//! Supervises an external DPI process and feeds it packets over a
//! line-oriented TCP protocol, applying its replies to session state as an
//! nfqueue subscriber.

pub mod cloud_reporter;
pub mod config;
pub mod lifecycle;
pub mod packet_handler;
pub mod process_manager;
pub mod signal;
pub mod socket_manager;
pub mod startup;
pub mod wire;

pub use cloud_reporter::CloudReporter;
pub use config::ClassifierConfig;
pub use packet_handler::ClassifierSubscriber;
pub use startup::ClassifierSupervisor;
