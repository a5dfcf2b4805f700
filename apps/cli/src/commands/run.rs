//! run 命令
//!
//! 回放轨迹文件；Ctrl-C 协作式停止会话。

use crate::connection::Connection;
use anyhow::{Context, Result};
use camrig_control::{MotionController, SessionOutcome, SessionRequest, SessionState};
use camrig_tools::{FocusPoint, InMemoryFocusPointStore, Profile};
use clap::Args;
use crossbeam_channel::RecvTimeoutError;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::warn;

/// 轨迹回放命令参数
#[derive(Args, Debug)]
pub struct RunCommand {
    /// 轨迹文件路径（JSON）
    pub profile: PathBuf,

    /// 对焦点文件（JSON 数组），轨迹引用对焦点时需要
    #[arg(short, long)]
    pub focus_points: Option<PathBuf>,

    /// 以 JSON 输出会话结果
    #[arg(long)]
    pub json: bool,
}

/// 读取对焦点文件
pub fn load_focus_points(path: &Path) -> Result<InMemoryFocusPointStore> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("读取对焦点文件失败: {}", path.display()))?;
    let points: Vec<FocusPoint> =
        serde_json::from_str(&content).context("对焦点文件格式错误")?;
    Ok(points.into_iter().collect())
}

impl RunCommand {
    pub fn execute(&self, connection: Connection) -> Result<SessionOutcome> {
        let profile = Profile::load_from_file(&self.profile)
            .with_context(|| format!("加载轨迹失败: {}", self.profile.display()))?;
        println!("📋 轨迹: {} ({} 个路点)", profile.name, profile.points.len());

        let store = self.focus_points.as_deref().map(load_focus_points).transpose()?;
        let request = SessionRequest::from_profile(
            &profile,
            store.as_ref().map(|s| s as &dyn camrig_tools::FocusPointStore),
        )?;
        println!("⏱️  时长: {:.2} 秒", request.duration.as_secs_f64());
        if let Some(point) = &request.focus_point {
            println!("🎯 对焦点: ({:.1}, {:.1}, {:.1})", point.x, point.y, point.z);
        }

        let (capture_tx, capture_rx) = crossbeam_channel::bounded(64);
        let controller =
            MotionController::new(connection.bus, connection.config)?.with_capture(capture_tx);

        let interrupted = Arc::new(AtomicBool::new(false));
        let flag = interrupted.clone();
        if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
            warn!("Failed to install Ctrl-C handler, interrupt will not stop the session: {}", e);
        }

        let handle = controller.start_session(request)?;
        println!("▶️  会话 {} 开始", handle.id());

        loop {
            if interrupted.load(Ordering::SeqCst) {
                println!("\n🛑 收到中断，停止会话...");
                break;
            }
            match capture_rx.recv_timeout(Duration::from_millis(20)) {
                Ok(event) => println!(
                    "📸 路点 {} @ {:.2}s",
                    event.waypoint_index,
                    event.time_offset.as_secs_f64()
                ),
                Err(RecvTimeoutError::Timeout) => {},
                Err(RecvTimeoutError::Disconnected) => break,
            }
            if controller.session_state() != SessionState::Running {
                break;
            }
        }

        let outcome = if interrupted.load(Ordering::SeqCst) {
            controller.stop_session(handle)
        } else {
            controller.wait_session(handle)
        }
        .ok_or_else(|| anyhow::anyhow!("会话结果已被取走"))?;

        self.report(&outcome);
        Ok(outcome)
    }

    fn report(&self, outcome: &SessionOutcome) {
        let stats = outcome.stats();
        if self.json {
            let (state, reason) = match outcome {
                SessionOutcome::Completed(_) => ("completed", None),
                SessionOutcome::Stopped(_) => ("stopped", None),
                SessionOutcome::Failed { reason, .. } => ("failed", Some(reason.as_str())),
            };
            let value = serde_json::json!({
                "state": state,
                "reason": reason,
                "ticks": stats.ticks,
                "failed_ticks": stats.failed_ticks,
                "partial_ticks": stats.partial_ticks,
                "overruns": stats.overruns,
            });
            println!("{value}");
            return;
        }

        match outcome {
            SessionOutcome::Completed(_) => println!("✅ 会话完成"),
            SessionOutcome::Stopped(_) => println!("⏹️  会话已停止"),
            SessionOutcome::Failed { reason, .. } => println!("❌ 会话失败: {}", reason),
        }
        println!("📊 统计:");
        println!("  周期: {}", stats.ticks);
        println!("  失败: {}", stats.failed_ticks);
        println!("  部分应答: {}", stats.partial_ticks);
        println!("  超时: {}", stats.overruns);
    }
}
