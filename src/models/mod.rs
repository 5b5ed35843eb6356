/// 模型实现
///
/// - YoloDetector: ONNX Runtime YOLO 检测/旋转框模型 (onnx 特性)
/// - 后处理公共函数: NMS / 类别名解析
#[cfg(feature = "onnx")]
pub mod yolov8;

#[cfg(feature = "onnx")]
pub use yolov8::{YoloConfig, YoloDetector};

use crate::detection::{compute_iou, Detection};

/// 非极大值抑制 (同类别), 结果按置信度降序
pub fn non_max_suppression(xs: &mut Vec<Detection>, iou_threshold: f32) {
    xs.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let candidate = xs[index].bbox();
        let drop = xs[..current_index].iter().any(|kept| {
            kept.class_id == candidate.class_id
                && compute_iou(&kept.bbox(), &candidate) > iou_threshold
        });
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}

/// 解析模型元数据中的类别名: `{0: 'person', 1: 'bicycle', ...}`
pub fn parse_class_names(raw: &str) -> Vec<String> {
    let mut entries: Vec<(u32, String)> = raw
        .trim()
        .trim_start_matches('{')
        .trim_end_matches('}')
        .split(',')
        .filter_map(|entry| {
            let (id, name) = entry.split_once(':')?;
            let id = id.trim().parse().ok()?;
            let name = name.trim().trim_matches(|c| c == '\'' || c == '"');
            Some((id, name.to_string()))
        })
        .collect();
    entries.sort_by_key(|(id, _)| *id);
    entries.into_iter().map(|(_, name)| name).collect()
}

/// 类别名, 超出范围时为 `Class_{id}`
pub fn class_name(names: &[String], class_id: u32) -> String {
    names
        .get(class_id as usize)
        .cloned()
        .unwrap_or_else(|| format!("Class_{}", class_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Geometry;

    fn det(class_id: u32, x: f32, confidence: f32) -> Detection {
        Detection::new(
            Geometry::Aabb { x1: x, y1: 0.0, x2: x + 10.0, y2: 10.0 },
            class_id,
            "obj",
            confidence,
        )
    }

    #[test]
    fn test_nms_keeps_best_per_overlap() {
        let mut xs = vec![det(0, 0.0, 0.6), det(0, 1.0, 0.9), det(0, 50.0, 0.5), det(1, 0.0, 0.4)];
        non_max_suppression(&mut xs, 0.45);
        let kept: Vec<(u32, f32)> = xs.iter().map(|d| (d.class_id, d.confidence)).collect();
        assert_eq!(kept, vec![(0, 0.9), (0, 0.5), (1, 0.4)]);
    }

    #[test]
    fn test_parse_class_names() {
        let names = parse_class_names("{0: 'person', 2: 'car', 1: 'bicycle'}");
        assert_eq!(names, vec!["person", "bicycle", "car"]);
        assert_eq!(class_name(&names, 2), "car");
        assert_eq!(class_name(&names, 9), "Class_9");
        assert!(parse_class_names("").is_empty());
    }
}
