#![allow(clippy::too_many_lines)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::similar_names)]

pub mod calendar_cli_opts;
pub mod config;
pub mod models;
pub mod pgpool;
pub mod store;
