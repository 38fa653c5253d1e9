//! CLI command implementations.
//!
//! | Module      | Commands handled |
//! |-------------|------------------|
//! | `serve`     | `Serve`          |
//! | `playbooks` | `Playbooks`      |
//! | `config`    | `Config`         |

pub mod config;
pub mod playbooks;
pub mod serve;

pub use config::{cmd_config, cmd_config_init};
pub use playbooks::cmd_playbooks;
pub use serve::cmd_serve;
