//! 命令定义和实现

pub mod config;
pub mod home;
pub mod pid;
pub mod run;
pub mod status;
pub mod torque;

pub use config::ConfigCommand;
pub use home::HomeCommand;
pub use pid::PidCommand;
pub use run::RunCommand;
pub use status::StatusCommand;
pub use torque::TorqueCommand;
