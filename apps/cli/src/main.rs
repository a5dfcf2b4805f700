//! # Camrig CLI
//!
//! Command-line interface for camera rig motion control.
//!
//! ```bash
//! # 生成默认配置
//! camrig-cli config init
//!
//! # 回放轨迹（Ctrl-C 停止）
//! camrig-cli run orbit.json --focus-points points.json
//!
//! # 无硬件试运行
//! camrig-cli --mock run orbit.json
//!
//! # 维护
//! camrig-cli status --axes pan,tilt
//! camrig-cli torque off
//! camrig-cli pid set-velocity --axes slider --p 1200 --i 20
//! camrig-cli home turntable
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod connection;

use camrig_control::SessionOutcome;
use commands::{ConfigCommand, HomeCommand, PidCommand, RunCommand, StatusCommand, TorqueCommand};
use connection::ConnectionArgs;

/// Camrig CLI - 相机云台命令行工具
#[derive(Parser, Debug)]
#[command(name = "camrig-cli")]
#[command(about = "Command-line interface for camera rig motion control", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 配置管理
    #[command(subcommand)]
    Config(ConfigCommand),

    /// 回放轨迹文件
    Run {
        #[command(flatten)]
        args: RunCommand,
    },

    /// 查询轴状态
    Status {
        #[command(flatten)]
        args: StatusCommand,
    },

    /// 打开/关闭力矩
    Torque {
        #[command(flatten)]
        args: TorqueCommand,
    },

    /// 读取或写入 PID 增益
    #[command(subcommand)]
    Pid(PidCommand),

    /// 把当前位置设为零点
    Home {
        #[command(flatten)]
        args: HomeCommand,
    },
}

fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("camrig=info,camrig_cli=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config(cmd) => cmd.execute(&cli.connection),

        Commands::Run { args } => {
            let outcome = args.execute(cli.connection.connect()?)?;
            if let SessionOutcome::Failed { reason, .. } = outcome {
                anyhow::bail!("会话失败: {}", reason);
            }
            Ok(())
        },

        Commands::Status { args } => args.execute(&cli.connection.connect()?),

        Commands::Torque { args } => args.execute(&cli.connection.connect()?),

        Commands::Pid(cmd) => cmd.execute(&cli.connection.connect()?),

        Commands::Home { args } => args.execute(&cli.connection.connect()?),
    }
}
