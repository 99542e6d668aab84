//! PDF 提取协作方 - 基础设施层
//!
//! 持有 PDFium 绑定这一稀缺资源，只暴露"文件路径 → 逐页
//! PageContent"一个能力。PDFium 非线程安全，每个三元组任务
//! 各自创建实例，并在阻塞线程上调用。
//!
//! 提取失败不重试：损坏的 PDF 在此中止所在三元组并上报。

use crate::error::{AppError, AppResult, ExtractionError};
use crate::models::{BoundingBox, ImageBlob, PageContent, TextRun};
use image::ImageFormat;
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::{debug, warn};

/// 同一行的纵向容差（pt）
const Y_TOLERANCE: f32 = 5.0;
/// 字符间距超过此值视为词间隔，切分为独立文本段
const SPACE_THRESHOLD: f32 = 10.0;

/// PDF 提取器
pub struct PdfExtractor {
    pdfium: Pdfium,
}

impl PdfExtractor {
    /// 绑定 PDFium 动态库（先找本地，再找系统）
    pub fn new() -> AppResult<Self> {
        let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(
                    "/opt/pdfium/lib",
                ))
            })
            .or_else(|_| Pdfium::bind_to_system_library())
            .map_err(|e| {
                AppError::Extraction(ExtractionError::LibraryInitFailed {
                    source: Box::new(e),
                })
            })?;
        Ok(Self {
            pdfium: Pdfium::new(bindings),
        })
    }

    /// 提取一份 PDF 的全部页面
    ///
    /// 只尝试一次；任何失败向上传播为提取错误。
    pub fn extract_pages(&self, path: &Path) -> AppResult<Vec<PageContent>> {
        let path_str = path.display().to_string();
        let document = self
            .pdfium
            .load_pdf_from_file(path, None)
            .map_err(|e| AppError::pdf_open_failed(&path_str, e))?;

        let pages = document.pages();
        let mut contents = Vec::with_capacity(pages.len() as usize);

        for page_index in 0..pages.len() {
            let page = pages
                .get(page_index)
                .map_err(|e| AppError::pdf_page_failed(&path_str, page_index as usize, e))?;

            let runs = extract_text_runs(&page);
            let images = extract_images(&document, &page, page_index as usize);

            contents.push(PageContent {
                page_index: page_index as usize,
                width: page.width().value,
                height: page.height().value,
                runs,
                images,
            });
        }

        debug!("提取完成: {}，共 {} 页", path_str, contents.len());
        Ok(contents)
    }
}

/// 逐字符收集位置，按行归并后再按词间距切成文本段
fn extract_text_runs(page: &PdfPage) -> Vec<TextRun> {
    let text_obj = match page.text() {
        Ok(t) => t,
        Err(_) => return Vec::new(),
    };

    // (字符, 左, 上, 右, 下)
    let mut chars_with_pos: Vec<(char, f32, f32, f32, f32)> = Vec::new();
    for segment in text_obj.segments().iter() {
        if let Ok(chars) = segment.chars() {
            for char_result in chars.iter() {
                if let Some(c) = char_result.unicode_char() {
                    if let Ok(bounds) = char_result.loose_bounds() {
                        chars_with_pos.push((
                            c,
                            bounds.left().value,
                            bounds.top().value,
                            bounds.right().value,
                            bounds.bottom().value,
                        ));
                    }
                }
            }
        }
    }

    if chars_with_pos.is_empty() {
        return Vec::new();
    }

    // 先上后下，再左后右
    chars_with_pos.sort_by(|a, b| {
        b.2.partial_cmp(&a.2)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
    });

    // 按纵向容差归并成行
    let mut lines: Vec<Vec<(char, f32, f32, f32, f32)>> = Vec::new();
    for item in chars_with_pos {
        match lines.last_mut() {
            Some(line) if (line[0].2 - item.2).abs() <= Y_TOLERANCE => line.push(item),
            _ => lines.push(vec![item]),
        }
    }

    // 行内按词间距切段
    let mut runs = Vec::new();
    for mut line in lines {
        line.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut current = String::new();
        let mut bbox: Option<BoundingBox> = None;
        let mut prev_right: Option<f32> = None;

        for (c, left, top, right, bottom) in line {
            let gap = prev_right.map(|pr| left - pr).unwrap_or(0.0);
            if gap > SPACE_THRESHOLD && !current.trim().is_empty() {
                if let Some(b) = bbox.take() {
                    runs.push(TextRun::new(current.trim().to_string(), b));
                }
                current = String::new();
            }
            if c != '\r' && c != '\n' {
                current.push(c);
                bbox = Some(match bbox {
                    Some(b) => BoundingBox::new(
                        b.x0.min(left),
                        b.y0.min(bottom),
                        b.x1.max(right),
                        b.y1.max(top),
                    ),
                    None => BoundingBox::new(left, bottom, right, top),
                });
            }
            prev_right = Some(right);
        }
        if let (false, Some(b)) = (current.trim().is_empty(), bbox) {
            runs.push(TextRun::new(current.trim().to_string(), b));
        }
    }
    runs
}

/// 提取页面内嵌图片并转为 PNG 字节
fn extract_images(document: &PdfDocument, page: &PdfPage, page_index: usize) -> Vec<ImageBlob> {
    let mut images = Vec::new();
    for object in page.objects().iter() {
        let Some(image_object) = object.as_image_object() else {
            continue;
        };
        let Ok(dynamic_image) = image_object.get_processed_image(document) else {
            warn!("页 {} 的内嵌图片渲染失败，跳过", page_index + 1);
            continue;
        };
        let mut png_bytes = Vec::new();
        if dynamic_image
            .write_to(&mut std::io::Cursor::new(&mut png_bytes), ImageFormat::Png)
            .is_err()
        {
            warn!("页 {} 的内嵌图片 PNG 编码失败，跳过", page_index + 1);
            continue;
        }
        let bbox = match object.bounds() {
            Ok(b) => BoundingBox::new(
                b.left().value,
                b.bottom().value,
                b.right().value,
                b.top().value,
            ),
            Err(_) => BoundingBox::new(0.0, 0.0, 0.0, 0.0),
        };
        images.push(ImageBlob {
            bbox,
            width: dynamic_image.width(),
            height: dynamic_image.height(),
            png_bytes,
        });
    }
    images
}
