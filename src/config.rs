//! 运行配置 - 命令行参数 / JSON配置文件 / 单次运行配置

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// 视频检测回放参数
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "视频目标检测/跟踪 + 原始/标注帧同步回放", long_about = None)]
pub struct Args {
    /// 输入视频文件 (ffmpeg特性) 或图片目录
    #[arg(short, long)]
    pub input: PathBuf,

    /// ONNX检测模型路径 (名称包含 obb 时按旋转框模型处理)
    #[arg(short, long, default_value = "models/yolov8n.onnx")]
    pub model: PathBuf,

    /// 处理目标帧率 (最小 1)
    #[arg(long, default_value_t = 25, value_parser = clap::value_parser!(u32).range(1..))]
    pub target_fps: u32,

    /// 关闭目标检测 (帧原样通过)
    #[arg(long, default_value_t = false)]
    pub no_detection: bool,

    /// 关闭目标跟踪
    #[arg(long, default_value_t = false)]
    pub no_tracking: bool,

    /// 跟踪算法: bytetrack 或 botsort
    #[arg(long, default_value = "bytetrack")]
    pub tracker: String,

    /// 保存 YOLO 格式标签
    #[arg(long, default_value_t = false)]
    pub save_txt: bool,

    /// 标签中包含置信度
    #[arg(long, default_value_t = false)]
    pub save_conf: bool,

    /// 标签输出目录 (默认 runs/labels/<视频名>)
    #[arg(long)]
    pub label_dir: Option<PathBuf>,

    /// 回放帧率
    #[arg(long, default_value_t = 10.0)]
    pub playback_fps: f64,

    /// 播放到末尾后停止 (默认循环)
    #[arg(long, default_value_t = false)]
    pub no_loop: bool,

    /// 回放预览输出目录 (原始 | 标注 并排 PNG)
    #[arg(long)]
    pub preview_dir: Option<PathBuf>,

    /// 处理完成后回放的循环次数
    #[arg(long, default_value_t = 1)]
    pub loops: u32,

    /// 图片目录源的帧率
    #[arg(long, default_value_t = 30.0)]
    pub source_fps: f64,

    /// JSON 配置文件
    #[arg(long, default_value = "replay_config.json")]
    pub settings: PathBuf,

    /// 检测日志输出 (JSON)
    #[arg(long)]
    pub results_json: Option<PathBuf>,

    /// 检测日志输出 (CSV, 每个对象一行)
    #[arg(long)]
    pub results_csv: Option<PathBuf>,

    /// 标签字体 (TTF/OTF), 不指定则只画框
    #[arg(long)]
    pub font: Option<PathBuf>,

    /// 日志级别
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// 跟踪算法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrackerVariant {
    #[default]
    ByteTrack,
    BotSort,
}

impl TrackerVariant {
    /// 按名称解析, 未知名称回退到 ByteTrack
    pub fn parse_lossy(name: &str) -> Self {
        name.parse().unwrap_or_else(|_| {
            log::warn!("⚠️ 未知跟踪器 '{}', 使用 ByteTrack", name);
            Self::ByteTrack
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ByteTrack => "ByteTrack",
            Self::BotSort => "BoT-SORT",
        }
    }
}

impl FromStr for TrackerVariant {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let key = s.trim().to_lowercase();
        let key = key.strip_suffix(".yaml").unwrap_or(&key);
        match key {
            "bytetrack" => Ok(Self::ByteTrack),
            "botsort" | "bot-sort" => Ok(Self::BotSort),
            _ => Err(PipelineError::configuration(format!("未知跟踪器: {}", s))),
        }
    }
}

impl fmt::Display for TrackerVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 标签导出设置
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportSettings {
    pub save_txt: bool,
    pub save_conf: bool,
    pub output_dir: Option<PathBuf>,
}

/// 单次运行配置, 每次 start 重新构建
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub target_rate: f64,
    pub detection_enabled: bool,
    pub tracking_enabled: bool,
    pub tracker: TrackerVariant,
    pub export: ExportSettings,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            target_rate: 25.0,
            detection_enabled: true,
            tracking_enabled: true,
            tracker: TrackerVariant::ByteTrack,
            export: ExportSettings::default(),
        }
    }
}

impl RunConfig {
    pub fn from_args(args: &Args) -> Self {
        Self {
            target_rate: args.target_fps.max(1) as f64,
            detection_enabled: !args.no_detection,
            tracking_enabled: !args.no_tracking,
            tracker: TrackerVariant::parse_lossy(&args.tracker),
            export: ExportSettings {
                save_txt: args.save_txt,
                save_conf: args.save_conf,
                output_dir: args.label_dir.clone(),
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.target_rate.is_finite() || self.target_rate < 1.0 {
            return Err(PipelineError::configuration(format!(
                "目标帧率必须 >= 1, 当前 {}",
                self.target_rate
            )));
        }
        Ok(())
    }
}

/// 跟踪器参数 (ByteTrack 关联)
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackerParams {
    pub max_lost_frames: u32,      // 最大丢失帧数
    pub high_score_threshold: f32, // 高分阈值
    pub low_score_threshold: f32,  // 低分阈值
    pub high_iou_threshold: f32,   // 高分IOU阈值
    pub low_iou_threshold: f32,    // 低分IOU阈值
    pub process_noise: f32,        // 卡尔曼过程噪声
    pub obs_noise: f32,            // 卡尔曼观测噪声
}

impl TrackerParams {
    pub fn bytetrack() -> Self {
        Self {
            max_lost_frames: 60,
            high_score_threshold: 0.4,
            low_score_threshold: 0.1,
            high_iou_threshold: 0.4,
            low_iou_threshold: 0.3,
            process_noise: 0.1,
            obs_noise: 0.5,
        }
    }

    pub fn botsort() -> Self {
        Self {
            max_lost_frames: 30,
            high_score_threshold: 0.25,
            low_score_threshold: 0.1,
            high_iou_threshold: 0.2,
            low_iou_threshold: 0.5,
            process_noise: 0.1,
            obs_noise: 1.5,
        }
    }
}

/// 流水线参数配置 (JSON)
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // === 检测参数 ===
    pub detection_conf_threshold: f32, // 检测置信度阈值
    pub detection_iou_threshold: f32,  // NMS IOU阈值
    pub input_size: u32,               // 推理输入尺寸

    // === 跟踪参数 ===
    pub bytetrack: TrackerParams,
    pub botsort: TrackerParams,

    // === 速率上报 ===
    pub rate_interval_ms: u64, // 上报间隔
    pub rate_window_ms: u64,   // 滑动窗口

    // === 其他 ===
    pub info_events: bool,        // 发送逐帧检测信息
    pub stats_interval: u64,      // 统计日志间隔(处理帧)
    pub source_queue_capacity: usize, // 解码队列容量
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            detection_conf_threshold: 0.25,
            detection_iou_threshold: 0.45,
            input_size: 640,

            bytetrack: TrackerParams::bytetrack(),
            botsort: TrackerParams::botsort(),

            rate_interval_ms: 500,
            rate_window_ms: 2000,

            info_events: true,
            stats_interval: 30,
            source_queue_capacity: 8,
        }
    }
}

impl Settings {
    /// 从JSON文件加载配置, 文件不存在时写入默认配置
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(settings) => {
                    log::info!("✅ 配置已从 {} 加载", path.display());
                    settings
                }
                Err(e) => {
                    log::warn!("⚠️ 配置文件解析失败: {}, 使用默认值", e);
                    Self::default()
                }
            },
            Err(_) => {
                log::info!("📝 配置文件不存在, 创建默认配置...");
                let settings = Self::default();
                if let Err(e) = settings.save(path) {
                    log::warn!("❌ {}", e);
                }
                settings
            }
        }
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| PipelineError::Settings {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        fs::write(path, json).map_err(|e| PipelineError::Settings {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        log::info!("💾 配置已保存到 {}", path.display());
        Ok(())
    }

    pub fn tracker_params(&self, variant: TrackerVariant) -> TrackerParams {
        match variant {
            TrackerVariant::ByteTrack => self.bytetrack,
            TrackerVariant::BotSort => self.botsort,
        }
    }

    /// 打印当前配置
    pub fn log_summary(&self) {
        log::info!("🎛️ 当前配置:");
        log::info!("  检测置信度: {:.2}", self.detection_conf_threshold);
        log::info!("  NMS IOU: {:.2}", self.detection_iou_threshold);
        log::info!(
            "  ByteTrack最大丢失帧: {}",
            self.bytetrack.max_lost_frames
        );
        log::info!("  BoT-SORT最大丢失帧: {}", self.botsort.max_lost_frames);
        log::info!(
            "  速率上报: 每{}ms, 窗口{}ms",
            self.rate_interval_ms,
            self.rate_window_ms
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_variant_names() {
        for name in ["bytetrack", "ByteTrack", "bytetrack.yaml"] {
            assert_eq!(TrackerVariant::parse_lossy(name), TrackerVariant::ByteTrack);
        }
        for name in ["botsort", "BoT-SORT", "botsort.yaml"] {
            assert_eq!(TrackerVariant::parse_lossy(name), TrackerVariant::BotSort);
        }
        assert_eq!(TrackerVariant::parse_lossy("deepsort"), TrackerVariant::ByteTrack);
        assert!("deepsort".parse::<TrackerVariant>().is_err());
    }

    #[test]
    fn test_run_config_validate() {
        let mut config = RunConfig::default();
        assert!(config.validate().is_ok());
        config.target_rate = 0.5;
        assert!(matches!(
            config.validate(),
            Err(PipelineError::Configuration(_))
        ));
        config.target_rate = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_run_config_from_args() {
        let args = Args::parse_from([
            "yolo-replay",
            "--input",
            "clip.mp4",
            "--target-fps",
            "10",
            "--tracker",
            "botsort.yaml",
            "--save-txt",
            "--no-tracking",
        ]);
        let config = RunConfig::from_args(&args);
        assert_eq!(config.target_rate, 10.0);
        assert_eq!(config.tracker, TrackerVariant::BotSort);
        assert!(!config.tracking_enabled);
        assert!(config.detection_enabled);
        assert!(config.export.save_txt);
        assert!(!config.export.save_conf);
        assert!(config.export.output_dir.is_none());
    }

    #[test]
    fn test_target_fps_minimum() {
        let parsed = Args::try_parse_from(["yolo-replay", "--input", "a.mp4", "--target-fps", "0"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_settings_load_creates_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let settings = Settings::load(&path);
        assert!(path.exists());
        assert_eq!(settings.rate_interval_ms, 500);

        let mut changed = settings.clone();
        changed.rate_window_ms = 4000;
        changed.save(&path).unwrap();
        assert_eq!(Settings::load(&path).rate_window_ms, 4000);
    }

    #[test]
    fn test_settings_parse_failure_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        let settings = Settings::load(&path);
        assert_eq!(settings.stats_interval, 30);
    }

    #[test]
    fn test_settings_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.json");
        fs::write(&path, r#"{ "detection_conf_threshold": 0.5 }"#).unwrap();
        let settings = Settings::load(&path);
        assert_eq!(settings.detection_conf_threshold, 0.5);
        assert_eq!(settings.tracker_params(TrackerVariant::BotSort), TrackerParams::botsort());
    }
}
