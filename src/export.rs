//! 标签导出 (YOLO txt) + 检测日志 (JSON)
//!
//! 标签行格式 (坐标按图像尺寸归一化到 [0,1], 6 位小数):
//! - 轴对齐框: `class cx cy w h [conf]`
//! - 旋转框:   `class x1 y1 x2 y2 x3 y3 x4 y4 [conf]`

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::ExportSettings;
use crate::detection::{Detection, FrameResult, Geometry};
use crate::error::{PipelineError, Result};

/// 未指定输出目录时的默认位置: `runs/labels/<stem>`
pub fn default_label_dir(stem: &str) -> PathBuf {
    Path::new("runs").join("labels").join(stem)
}

fn norm(value: f32, extent: u32) -> f32 {
    if extent == 0 {
        return 0.0;
    }
    (value / extent as f32).clamp(0.0, 1.0)
}

/// 单帧检测 → 标签行 (每个检测一行)
pub fn format_detections(
    detections: &[Detection],
    width: u32,
    height: u32,
    include_conf: bool,
) -> Vec<String> {
    detections
        .iter()
        .map(|det| {
            let mut line = det.class_id.to_string();
            match det.geometry {
                Geometry::Aabb { x1, y1, x2, y2 } => {
                    let (x1, x2) = (norm(x1, width), norm(x2, width));
                    let (y1, y2) = (norm(y1, height), norm(y2, height));
                    let _ = write!(
                        line,
                        " {:.6} {:.6} {:.6} {:.6}",
                        (x1 + x2) / 2.0,
                        (y1 + y2) / 2.0,
                        (x2 - x1).abs(),
                        (y2 - y1).abs()
                    );
                }
                Geometry::Obb { points } => {
                    for (x, y) in points {
                        let _ = write!(line, " {:.6} {:.6}", norm(x, width), norm(y, height));
                    }
                }
            }
            if include_conf {
                let _ = write!(line, " {:.6}", det.confidence);
            }
            line
        })
        .collect()
}

/// 每个处理帧写一个标签文件: `<dir>/<stem>_<index:06>.txt`
#[derive(Debug)]
pub struct LabelWriter {
    dir: PathBuf,
    stem: String,
    include_conf: bool,
}

impl LabelWriter {
    /// 创建输出目录 (已存在则复用); 目录中已有标签时提示会覆盖
    pub fn create(settings: &ExportSettings, stem: &str) -> Result<Self> {
        let dir = settings
            .output_dir
            .clone()
            .unwrap_or_else(|| default_label_dir(stem));

        fs::create_dir_all(&dir).map_err(|e| PipelineError::export(&dir, e))?;

        let existing = fs::read_dir(&dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| e.path().extension().is_some_and(|ext| ext == "txt"))
                    .count()
            })
            .unwrap_or(0);
        if existing > 0 {
            log::warn!(
                "⚠️ 标签目录 {} 已有 {} 个标签文件, 同序号文件将被覆盖",
                dir.display(),
                existing
            );
        }

        log::info!("💾 标签导出目录: {}", dir.display());
        Ok(Self {
            dir,
            stem: stem.to_string(),
            include_conf: settings.save_conf,
        })
    }

    pub fn path_for(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{}_{:06}.txt", self.stem, index))
    }

    /// 写入一帧的标签, 无检测时写空文件
    pub fn write(
        &self,
        index: usize,
        detections: &[Detection],
        width: u32,
        height: u32,
    ) -> Result<PathBuf> {
        let path = self.path_for(index);
        let mut text = String::new();
        for line in format_detections(detections, width, height, self.include_conf) {
            text.push_str(&line);
            text.push('\n');
        }
        fs::write(&path, text).map_err(|e| PipelineError::export(&path, e))?;
        Ok(path)
    }
}

// ========== 检测日志 ==========

#[derive(Clone, Debug, Serialize)]
pub struct ObjectRecord {
    pub bbox: Vec<f32>,
    pub bbox_type: &'static str,
    pub confidence: f32,
    pub class_id: u32,
    pub class_name: String,
    pub track_id: Option<u32>,
}

impl From<&Detection> for ObjectRecord {
    fn from(det: &Detection) -> Self {
        let (bbox, bbox_type) = match det.geometry {
            Geometry::Aabb { x1, y1, x2, y2 } => (vec![x1, y1, x2, y2], "xyxy"),
            Geometry::Obb { points } => {
                (points.iter().flat_map(|&(x, y)| [x, y]).collect(), "obb")
            }
        };
        Self {
            bbox,
            bbox_type,
            confidence: det.confidence,
            class_id: det.class_id,
            class_name: det.class_name.clone(),
            track_id: det.track_id,
        }
    }
}

impl ObjectRecord {
    /// 轴对齐外接框 (x1, y1, x2, y2), 旋转框取角点范围
    pub fn bounds(&self) -> (f32, f32, f32, f32) {
        let xs = self.bbox.iter().step_by(2);
        let ys = self.bbox.iter().skip(1).step_by(2);
        let (x1, x2) = xs.fold((f32::MAX, f32::MIN), |(lo, hi), &x| (lo.min(x), hi.max(x)));
        let (y1, y2) = ys.fold((f32::MAX, f32::MIN), |(lo, hi), &y| (lo.min(y), hi.max(y)));
        (x1, y1, x2, y2)
    }
}

/// CSV 中每个对象一行
#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    frame_id: u64,
    object_id: Option<u32>,
    class_id: u32,
    class_name: &'a str,
    confidence: f32,
    bbox_x1: f32,
    bbox_y1: f32,
    bbox_x2: f32,
    bbox_y2: f32,
}

const CSV_HEADER: [&str; 9] = [
    "frame_id",
    "object_id",
    "class_id",
    "class_name",
    "confidence",
    "bbox_x1",
    "bbox_y1",
    "bbox_x2",
    "bbox_y2",
];

/// 单帧记录, `frame_id` 为原生帧序号
#[derive(Clone, Debug, Serialize)]
pub struct FrameRecord {
    pub frame_id: u64,
    pub objects: Vec<ObjectRecord>,
    pub count: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DetectionSummary {
    pub total_frames: usize,
    pub total_detections: usize,
    pub average_detections_per_frame: f64,
    pub class_counts: BTreeMap<String, usize>,
}

/// 整次运行的检测日志
#[derive(Clone, Debug, Default)]
pub struct DetectionLog {
    records: Vec<FrameRecord>,
}

impl DetectionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a FrameResult>) -> Self {
        let mut log = Self::new();
        for result in results {
            log.push(result);
        }
        log
    }

    pub fn push(&mut self, result: &FrameResult) {
        self.records.push(FrameRecord {
            frame_id: result.native_index,
            objects: result.detections.iter().map(ObjectRecord::from).collect(),
            count: result.detections.len(),
        });
    }

    pub fn records(&self) -> &[FrameRecord] {
        &self.records
    }

    pub fn summary(&self) -> DetectionSummary {
        let total_frames = self.records.len();
        let total_detections: usize = self.records.iter().map(|r| r.count).sum();
        let mut class_counts = BTreeMap::new();
        for object in self.records.iter().flat_map(|r| &r.objects) {
            *class_counts.entry(object.class_name.clone()).or_insert(0) += 1;
        }
        DetectionSummary {
            total_frames,
            total_detections,
            average_detections_per_frame: if total_frames > 0 {
                total_detections as f64 / total_frames as f64
            } else {
                0.0
            },
            class_counts,
        }
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.records)
            .map_err(|e| PipelineError::export(path, std::io::Error::other(e)))?;
        fs::write(path, json).map_err(|e| PipelineError::export(path, e))?;
        log::info!("💾 检测结果已导出: {} ({} 帧)", path.display(), self.records.len());
        Ok(())
    }

    /// 每个对象一行; 没有检测时只写表头
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let to_export = |e: csv::Error| PipelineError::export(path, std::io::Error::other(e));
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(path)
            .map_err(to_export)?;
        writer.write_record(CSV_HEADER).map_err(to_export)?;

        let mut rows = 0;
        for record in &self.records {
            for object in &record.objects {
                let (bbox_x1, bbox_y1, bbox_x2, bbox_y2) = object.bounds();
                writer
                    .serialize(CsvRow {
                        frame_id: record.frame_id,
                        object_id: object.track_id,
                        class_id: object.class_id,
                        class_name: &object.class_name,
                        confidence: object.confidence,
                        bbox_x1,
                        bbox_y1,
                        bbox_x2,
                        bbox_y2,
                    })
                    .map_err(to_export)?;
                rows += 1;
            }
        }
        writer
            .flush()
            .map_err(|e| PipelineError::export(path, e))?;
        log::info!("💾 检测结果已导出: {} ({} 个对象)", path.display(), rows);
        Ok(())
    }
}
