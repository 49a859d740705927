// Library for tests to access modules

pub mod bootstrap;
pub mod collector;
pub mod config;
pub mod error;
pub mod guest_os;
pub mod hypervisor;
pub mod inventory_repo;
pub mod models;
pub mod reconciler;
pub mod routes;
pub mod scanner;
pub mod utilization;
pub mod version;
pub mod worker;
