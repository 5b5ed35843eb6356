//! 检测结果标注 (边界框 / 旋转框 / 标签)

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{
    draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut, text_size,
};
use imageproc::rect::Rect;

use super::types::{Detection, Geometry};
use crate::error::{PipelineError, Result};

/// 类别颜色表 (class_id % 10)
pub const CLASS_PALETTE: [(u8, u8, u8); 10] = [
    (255, 0, 0),     // 红色
    (0, 255, 0),     // 绿色
    (0, 0, 255),     // 蓝色
    (255, 255, 0),   // 黄色
    (255, 0, 255),   // 品红
    (0, 255, 255),   // 青色
    (128, 0, 128),   // 紫色
    (255, 165, 0),   // 橙色
    (255, 192, 203), // 粉色
    (0, 128, 0),     // 深绿色
];

pub fn class_color(class_id: u32) -> Rgba<u8> {
    let (r, g, b) = CLASS_PALETTE[class_id as usize % CLASS_PALETTE.len()];
    Rgba([r, g, b, 255])
}

/// 帧标注器
pub struct Annotator {
    font: Option<FontVec>,
    scale: PxScale,
    thickness: i32,
}

impl Default for Annotator {
    fn default() -> Self {
        Self {
            font: None,
            scale: PxScale::from(16.0),
            thickness: 2,
        }
    }
}

impl Annotator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 加载标签字体, 不加载时只画框
    pub fn with_font(mut self, path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| {
            PipelineError::configuration(format!("字体读取失败 {}: {}", path.display(), e))
        })?;
        let font = FontVec::try_from_vec(data).map_err(|e| {
            PipelineError::configuration(format!("字体解析失败 {}: {}", path.display(), e))
        })?;
        log::info!("✅ 标签字体加载成功: {}", path.display());
        self.font = Some(font);
        Ok(self)
    }

    pub fn annotate(&self, image: &mut RgbaImage, detections: &[Detection]) {
        for det in detections {
            let color = class_color(det.class_id);
            match det.geometry {
                Geometry::Aabb { x1, y1, x2, y2 } => self.draw_box(image, x1, y1, x2, y2, color),
                Geometry::Obb { points } => self.draw_polygon(image, &points, color),
            }
            if let Some(font) = &self.font {
                let (x1, y1, _, _) = det.geometry.bounds();
                self.draw_label(image, font, &det.label(), x1 as i32, y1 as i32, color);
            }
        }
    }

    fn draw_box(&self, image: &mut RgbaImage, x1: f32, y1: f32, x2: f32, y2: f32, color: Rgba<u8>) {
        let w = (x2 - x1).round().max(1.0) as u32;
        let h = (y2 - y1).round().max(1.0) as u32;
        for offset in 0..self.thickness {
            let rect = Rect::at(x1 as i32 - offset, y1 as i32 - offset)
                .of_size(w + 2 * offset as u32, h + 2 * offset as u32);
            draw_hollow_rect_mut(image, rect, color);
        }
    }

    fn draw_polygon(&self, image: &mut RgbaImage, points: &[(f32, f32); 4], color: Rgba<u8>) {
        for i in 0..points.len() {
            let start = points[i];
            let end = points[(i + 1) % points.len()];
            for offset in 0..self.thickness {
                let d = offset as f32;
                draw_line_segment_mut(image, (start.0 + d, start.1), (end.0 + d, end.1), color);
                draw_line_segment_mut(image, (start.0, start.1 + d), (end.0, end.1 + d), color);
            }
        }
    }

    /// 框上方绘制填充背景 + 白色文字
    fn draw_label(
        &self,
        image: &mut RgbaImage,
        font: &FontVec,
        text: &str,
        x: i32,
        y: i32,
        color: Rgba<u8>,
    ) {
        let (tw, th) = text_size(self.scale, font, text);
        let top = (y - th as i32 - 6).max(0);
        draw_filled_rect_mut(image, Rect::at(x, top).of_size(tw.max(1), th + 6), color);
        draw_text_mut(
            image,
            Rgba([255, 255, 255, 255]),
            x,
            top + 3,
            self.scale,
            font,
            text,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_palette_wraps() {
        assert_eq!(class_color(0), class_color(10));
        assert_ne!(class_color(0), class_color(1));
    }

    #[test]
    fn test_annotate_draws_box_edges() {
        let mut image = RgbaImage::from_pixel(64, 64, Rgba([0, 0, 0, 255]));
        let det = Detection::new(
            Geometry::Aabb { x1: 10.0, y1: 10.0, x2: 40.0, y2: 40.0 },
            1,
            "car",
            0.9,
        );
        Annotator::new().annotate(&mut image, &[det]);
        assert_eq!(*image.get_pixel(10, 20), class_color(1));
        assert_eq!(*image.get_pixel(25, 25), Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn test_annotate_obb() {
        let mut image = RgbaImage::from_pixel(64, 64, Rgba([0, 0, 0, 255]));
        let det = Detection::new(
            Geometry::Obb {
                points: [(10.0, 10.0), (50.0, 10.0), (50.0, 50.0), (10.0, 50.0)],
            },
            2,
            "ship",
            0.7,
        );
        Annotator::new().annotate(&mut image, &[det]);
        assert_eq!(*image.get_pixel(30, 10), class_color(2));
    }
}
