//! 版面数据模型
//!
//! PDF 提取协作方（infrastructure 层）输出的逐页原始数据，
//! 以及分块器（block_extractor）产出的带类型文本块。

use serde::{Deserialize, Serialize};

/// 页面上的矩形范围（PDF 坐标，y 向上）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BoundingBox {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// 横向中点，用于答案表格的列对齐
    pub fn x_mid(&self) -> f32 {
        (self.x0 + self.x1) / 2.0
    }

    /// 上缘坐标（阅读顺序以此排序）
    pub fn top(&self) -> f32 {
        self.y1.max(self.y0)
    }
}

/// 一段带位置的文本（提取协作方的最小单位）
#[derive(Debug, Clone)]
pub struct TextRun {
    pub text: String,
    pub bbox: BoundingBox,
}

impl TextRun {
    pub fn new(text: impl Into<String>, bbox: BoundingBox) -> Self {
        Self {
            text: text.into(),
            bbox,
        }
    }
}

/// 页面内嵌图片（已转为 PNG 字节）
#[derive(Debug, Clone)]
pub struct ImageBlob {
    pub bbox: BoundingBox,
    pub width: u32,
    pub height: u32,
    pub png_bytes: Vec<u8>,
}

/// 提取协作方的单页结果
#[derive(Debug, Clone)]
pub struct PageContent {
    pub page_index: usize,
    pub width: f32,
    pub height: f32,
    pub runs: Vec<TextRun>,
    pub images: Vec<ImageBlob>,
}

impl PageContent {
    /// 本页所有文本拼接（原始文本侧写用）
    pub fn plain_text(&self) -> String {
        let mut out = String::new();
        for run in &self.runs {
            out.push_str(&run.text);
            out.push('\n');
        }
        out
    }
}

/// 图片资源 ID：文档 + 页码 + 页内序号，确定性生成
pub fn image_asset_id(doc_id: &str, page_index: usize, image_index: usize) -> String {
    format!("{}_p{:02}_i{:02}", doc_id, page_index, image_index)
}

/// 文本块类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockKind {
    /// 卷头（考试名称、科目、代号等）
    Heading,
    /// 题干（携带题号）
    Stem,
    /// 选项（携带选项标签）
    Option,
    /// 答案键（携带题号与答案字母）
    AnswerKey,
    /// 图片引用（携带 asset_id）
    ImageRef,
    /// 备注/更正说明
    NoteText,
    /// 无法归类（保留并上报，绝不丢弃）
    Unclassified,
}

/// 带类型的文本块
///
/// 提取完成后不可变；`order_index` 是跨页递增的全文档序号。
#[derive(Debug, Clone)]
pub struct Block {
    pub kind: BlockKind,
    pub page_index: usize,
    pub order_index: usize,
    pub raw_text: String,
    pub bbox: Option<BoundingBox>,
    /// 题号（Stem / AnswerKey）
    pub number: Option<u32>,
    /// 选项标签（Option，已归一为大写 ASCII）
    pub label: Option<String>,
    /// 图片资源 ID（ImageRef）
    pub asset_id: Option<String>,
}

impl Block {
    pub fn new(
        kind: BlockKind,
        page_index: usize,
        order_index: usize,
        raw_text: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            page_index,
            order_index,
            raw_text: raw_text.into(),
            bbox: None,
            number: None,
            label: None,
            asset_id: None,
        }
    }

    pub fn with_bbox(mut self, bbox: BoundingBox) -> Self {
        self.bbox = Some(bbox);
        self
    }

    pub fn with_number(mut self, number: u32) -> Self {
        self.number = Some(number);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_asset_id(mut self, asset_id: impl Into<String>) -> Self {
        self.asset_id = Some(asset_id.into());
        self
    }

    /// 追加续行文本（跨行/跨页的题干与选项）
    pub fn append_text(&mut self, text: &str) {
        if !self.raw_text.is_empty() {
            self.raw_text.push(' ');
        }
        self.raw_text.push_str(text);
    }
}
