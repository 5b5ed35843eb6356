// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// YOLO ONNX 检测模型
// 包含: 延迟加载、预处理(letterbox)、推理、后处理(检测框 / 旋转框)

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use fast_image_resize as fr;
use image::RgbaImage;
use ndarray::ArrayView2;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;

use super::{class_name, non_max_suppression, parse_class_names};
use crate::config::Settings;
use crate::detection::{Detect, Detection, Geometry};
use crate::error::{PipelineError, Result};

const CXYWH_OFFSET: usize = 4;

/// 模型配置
#[derive(Clone, Debug)]
pub struct YoloConfig {
    pub model_path: PathBuf,
    pub input_size: u32,
    pub conf: f32,
    pub iou: f32,
}

impl YoloConfig {
    pub fn new(model_path: impl Into<PathBuf>, settings: &Settings) -> Self {
        Self {
            model_path: model_path.into(),
            input_size: settings.input_size,
            conf: settings.detection_conf_threshold,
            iou: settings.detection_iou_threshold,
        }
    }

    /// 文件名包含 obb 时按旋转框模型处理
    pub fn is_obb(&self) -> bool {
        self.model_path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.to_lowercase().contains("obb"))
            .unwrap_or(false)
    }

    pub fn model_id(&self) -> String {
        self.model_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("model")
            .to_string()
    }
}

/// YOLO 检测器, 首次 `load` 时创建会话
pub struct YoloDetector {
    config: YoloConfig,
    session: Option<Session>,
    names: Vec<String>,
    obb: bool,
    resizer: fr::Resizer,
}

impl YoloDetector {
    pub fn new(config: YoloConfig) -> Self {
        let obb = config.is_obb();
        Self {
            config,
            session: None,
            names: Vec::new(),
            obb,
            resizer: fr::Resizer::new(),
        }
    }

    fn scale_wh(&self, w0: f32, h0: f32) -> (f32, u32, u32) {
        let size = self.config.input_size as f32;
        let r = (size / w0).min(size / h0);
        (r, ((w0 * r).round() as u32).max(1), ((h0 * r).round() as u32).max(1))
    }

    /// letterbox (左上对齐, 灰色填充) → NCHW f32
    fn preprocess(&mut self, frame: &RgbaImage) -> anyhow::Result<(Vec<f32>, f32)> {
        let size = self.config.input_size as usize;
        let (ratio, w_new, h_new) = self.scale_wh(frame.width() as f32, frame.height() as f32);

        let src = fr::images::Image::from_vec_u8(
            frame.width(),
            frame.height(),
            frame.as_raw().clone(),
            fr::PixelType::U8x4,
        )?;
        let mut dst = fr::images::Image::new(w_new, h_new, fr::PixelType::U8x4);
        let options = fr::ResizeOptions::new()
            .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear));
        self.resizer.resize(&src, &mut dst, &options)?;

        let plane = size * size;
        let mut data = vec![144.0 / 255.0; 3 * plane];
        let (w_new, h_new) = (w_new as usize, h_new as usize);
        for (i, px) in dst.buffer().chunks_exact(4).enumerate() {
            let (x, y) = (i % w_new, i / w_new);
            if x >= size || y >= size || y >= h_new {
                continue;
            }
            let offset = y * size + x;
            data[offset] = px[0] as f32 / 255.0;
            data[plane + offset] = px[1] as f32 / 255.0;
            data[2 * plane + offset] = px[2] as f32 / 255.0;
        }
        Ok((data, ratio))
    }

    fn run(&mut self, frame: &RgbaImage) -> anyhow::Result<Vec<Detection>> {
        let (data, ratio) = self.preprocess(frame)?;
        let size = self.config.input_size as usize;
        let input = Tensor::from_array((vec![1usize, 3, size, size], data.into_boxed_slice()))?;

        let session = self.session.as_mut().ok_or_else(|| anyhow!("模型未加载"))?;
        let outputs = session.run(ort::inputs![input])?;
        let output = outputs
            .get("output0")
            .ok_or_else(|| anyhow!("缺少 output0 输出"))?;
        let (shape, values) = output.try_extract_tensor::<f32>()?;
        let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
        if dims.len() != 3 || dims[0] != 1 {
            return Err(anyhow!("不支持的输出形状: {:?}", dims));
        }

        // [1, features, anchors]
        let preds = ArrayView2::from_shape((dims[1], dims[2]), values)?;
        self.postprocess(preds, ratio, frame.width() as f32, frame.height() as f32)
    }

    fn postprocess(
        &self,
        preds: ArrayView2<f32>,
        ratio: f32,
        width: f32,
        height: f32,
    ) -> anyhow::Result<Vec<Detection>> {
        let features = preds.nrows();
        // 旋转框模型末尾多一个角度
        let nc = features
            .checked_sub(CXYWH_OFFSET + usize::from(self.obb))
            .filter(|&n| n > 0)
            .ok_or_else(|| anyhow!("输出特征数异常: {}", features))?;

        let mut data = Vec::new();
        for pred in preds.columns() {
            let Some((id, confidence)) = (0..nc)
                .map(|c| (c, pred[CXYWH_OFFSET + c]))
                .reduce(|max, x| if x.1 > max.1 { x } else { max })
            else {
                continue;
            };
            if confidence < self.config.conf {
                continue;
            }

            let cx = pred[0] / ratio;
            let cy = pred[1] / ratio;
            let w = pred[2] / ratio;
            let h = pred[3] / ratio;

            let geometry = if self.obb {
                obb_corners(cx, cy, w, h, pred[CXYWH_OFFSET + nc])
            } else {
                Geometry::Aabb {
                    x1: (cx - w / 2.0).clamp(0.0, width),
                    y1: (cy - h / 2.0).clamp(0.0, height),
                    x2: (cx + w / 2.0).clamp(0.0, width),
                    y2: (cy + h / 2.0).clamp(0.0, height),
                }
            };
            let class_id = id as u32;
            data.push(Detection::new(
                geometry,
                class_id,
                class_name(&self.names, class_id),
                confidence,
            ));
        }

        non_max_suppression(&mut data, self.config.iou);
        Ok(data)
    }
}

/// (cx, cy, w, h, θ) → 4 个角点
fn obb_corners(cx: f32, cy: f32, w: f32, h: f32, angle: f32) -> Geometry {
    let (sin, cos) = angle.sin_cos();
    let v1 = (w / 2.0 * cos, w / 2.0 * sin);
    let v2 = (-h / 2.0 * sin, h / 2.0 * cos);
    Geometry::Obb {
        points: [
            (cx + v1.0 + v2.0, cy + v1.1 + v2.1),
            (cx + v1.0 - v2.0, cy + v1.1 - v2.1),
            (cx - v1.0 - v2.0, cy - v1.1 - v2.1),
            (cx - v1.0 + v2.0, cy - v1.1 + v2.1),
        ],
    }
}

/// 创建 ONNX Runtime 会话 (cuda 特性时优先 CUDA)
fn create_session(model_path: &Path) -> anyhow::Result<Session> {
    let model_bytes = std::fs::read(model_path)
        .with_context(|| format!("读取模型文件失败: {}", model_path.display()))?;

    let builder = Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

    #[cfg(feature = "cuda")]
    {
        use ort::execution_providers::CUDAExecutionProvider;
        if let Ok(cuda_builder) = builder
            .clone()
            .with_execution_providers([CUDAExecutionProvider::default().build()])
        {
            if let Ok(session) = cuda_builder.commit_from_memory(&model_bytes) {
                log::info!("✅ 使用 CUDA 推理");
                return Ok(session);
            }
        }
        log::warn!("⚠️ CUDA 不可用, 回退到 CPU");
    }

    Ok(builder.commit_from_memory(&model_bytes)?)
}

impl Detect for YoloDetector {
    fn load(&mut self) -> Result<String> {
        if self.session.is_none() {
            let path = &self.config.model_path;
            if !path.exists() {
                return Err(PipelineError::inference(format!(
                    "模型文件不存在: {}",
                    path.display()
                )));
            }
            log::info!("📦 正在加载模型: {}", path.display());
            let session = create_session(path)?;

            self.names = session
                .metadata()
                .ok()
                .and_then(|meta| meta.custom("names").ok().flatten())
                .map(|raw| parse_class_names(&raw))
                .unwrap_or_default();
            self.session = Some(session);

            log::info!(
                "✅ 模型加载成功: {} ({} 类, {})",
                self.config.model_id(),
                self.names.len(),
                if self.obb { "旋转框" } else { "检测框" }
            );
        }
        Ok(self.config.model_id())
    }

    fn detect(&mut self, frame: &RgbaImage) -> Result<Vec<Detection>> {
        Ok(self.run(frame)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn detector(obb: bool) -> YoloDetector {
        let name = if obb { "yolov8n-obb.onnx" } else { "yolov8n.onnx" };
        YoloDetector::new(YoloConfig::new(name, &Settings::default()))
    }

    #[test]
    fn test_obb_from_name() {
        assert!(detector(true).obb);
        assert!(!detector(false).obb);
    }

    #[test]
    fn test_postprocess_aabb() {
        let d = detector(false);
        // 2 个候选, 2 个类别: [cx, cy, w, h, c0, c1]
        let preds = Array2::from_shape_vec(
            (6, 2),
            vec![
                100.0, 300.0, // cx
                100.0, 300.0, // cy
                40.0, 20.0, // w
                40.0, 20.0, // h
                0.9, 0.1, // c0
                0.05, 0.2, // c1
            ],
        )
        .unwrap();
        let dets = d.postprocess(preds.view(), 0.5, 1280.0, 720.0).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class_id, 0);
        assert_eq!(dets[0].class_name, "Class_0");
        assert_eq!(
            dets[0].geometry,
            Geometry::Aabb { x1: 160.0, y1: 160.0, x2: 240.0, y2: 240.0 }
        );
    }

    #[test]
    fn test_obb_corners_axis_aligned() {
        let Geometry::Obb { points } = obb_corners(10.0, 10.0, 4.0, 2.0, 0.0) else {
            panic!("expected obb");
        };
        assert_eq!(points, [(12.0, 11.0), (12.0, 9.0), (8.0, 9.0), (8.0, 11.0)]);
    }
}
