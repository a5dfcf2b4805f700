//! 配置管理命令
//!
//! 生成、查看、校验云台配置文件。

use crate::connection::{ConnectionArgs, default_config_path};
use anyhow::{Context, Result};
use camrig_tools::RigConfig;
use clap::Subcommand;
use std::fs;
use std::path::PathBuf;

/// 配置命令
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// 写出默认配置
    Init {
        /// 目标路径（默认 ~/.config/camrig/camrig.toml）
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// 覆盖已存在的文件
        #[arg(long)]
        force: bool,
    },

    /// 显示生效的配置
    Show,

    /// 校验配置并列出未标定的字段
    Check,
}

impl ConfigCommand {
    pub fn execute(&self, args: &ConnectionArgs) -> Result<()> {
        match self {
            ConfigCommand::Init { output, force } => {
                let path = match output {
                    Some(path) => path.clone(),
                    None => default_config_path()?,
                };
                if path.exists() && !force {
                    anyhow::bail!("{} 已存在，使用 --force 覆盖", path.display());
                }
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).context("创建配置目录失败")?;
                }
                RigConfig::default().save_to_file(&path)?;
                println!("✅ 已写入默认配置: {}", path.display());
            },

            ConfigCommand::Show => {
                let config = args.load_config()?;
                print!("{}", config.to_toml_string()?);
            },

            ConfigCommand::Check => {
                match args.config_path()? {
                    Some(path) => println!("配置文件: {}", path.display()),
                    None => println!("配置文件: (未找到，使用默认值)"),
                }
                let config = args.load_config()?;
                println!("✅ 配置有效（{} 个轴）", config.axes.len());
                let uncalibrated = config.uncalibrated();
                if !uncalibrated.is_empty() {
                    println!("⚠️  以下字段使用临时值，需要上机标定:");
                    for field in uncalibrated {
                        println!("  - {}", field);
                    }
                }
            },
        }
        Ok(())
    }
}
