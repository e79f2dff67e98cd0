pub mod address;
pub mod broker;
pub mod config;
pub mod error;
pub mod job;
pub mod kafka;
pub mod metrics_consts;
pub mod provisioner;
pub mod publish;
pub mod router;
pub mod routing;
pub mod test_utils;
