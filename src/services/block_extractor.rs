//! 分块服务 - 业务能力层
//!
//! 把提取协作方的逐页文本段归并成行，再分类为带类型的块序列。
//! 只做"文本 → 块"这一件事，不理解题目之间的关系。
//!
//! 分类规则（按行，自上而下）：
//! - `12. B` / `答案：Ｃ` 形式 → AnswerKey
//! - `12.` 开头且后接题干文字 → Stem
//! - `(A)` / `Ａ.` / `(1)` 开头 → Option
//! - `備註` / `更正` 开头 → NoteText
//! - 答案卷的「題號/答案」对照表 → 按列位逐格配对成 AnswerKey
//! - 首个内容块出现之前的行 → Heading
//! - 其余紧跟题干/选项/备注的行 → 续行，并入前块
//! - 无上下文可依附的行 → Unclassified 块并上报，绝不丢弃

use crate::models::{Block, BlockKind, BoundingBox, IssueKind, IssueReport, PageContent, TextRun};
use crate::utils::logging::truncate_text;
use regex::Regex;
use tracing::{debug, warn};

/// 同一行的纵向容差（pt），与答案表格解析共用
const Y_GROUPING_TOLERANCE: f32 = 5.0;
/// 題號行与答案行的最大纵向间距（pt）
const GRID_ROW_MAX_GAP: f32 = 40.0;
/// 题号与答案的最大横向偏移（pt）
const GRID_COL_MAX_OFFSET: f32 = 25.0;

/// 归并后的一行
#[derive(Debug, Clone)]
struct Line {
    top: f32,
    text: String,
    runs: Vec<TextRun>,
}

impl Line {
    fn bbox(&self) -> Option<BoundingBox> {
        let first = self.runs.first()?;
        let mut bbox = first.bbox;
        for run in &self.runs[1..] {
            bbox.x0 = bbox.x0.min(run.bbox.x0);
            bbox.y0 = bbox.y0.min(run.bbox.y0);
            bbox.x1 = bbox.x1.max(run.bbox.x1);
            bbox.y1 = bbox.y1.max(run.bbox.y1);
        }
        Some(bbox)
    }
}

/// 表格里的一格（题号或答案字母）
#[derive(Debug, Clone)]
struct GridCell {
    text: String,
    x_mid: f32,
}

/// 分块服务
pub struct BlockExtractor {
    bare_key_re: Regex,
    stem_re: Regex,
    option_re: Regex,
    paren_num_option_re: Regex,
    answer_line_re: Regex,
    note_re: Regex,
    qnum_row_re: Regex,
}

impl BlockExtractor {
    pub fn new() -> Self {
        Self {
            // "12. B" / "5．Ｃ" / "3: 送分" —— 题号直接跟答案
            bare_key_re: Regex::new(
                r"^(\d{1,3})\s*[\.\)、．]?\s*[:：]?\s*([A-EＡ-Ｅ#＃]|送分)\s*$",
            )
            .expect("bare_key_re"),
            // "12. 下列何者…" —— 题干开头
            stem_re: Regex::new(r"^(\d{1,3})\s*[\.\)、．]\s*(.*)$").expect("stem_re"),
            // "(A) xxx" / "Ａ. xxx" —— 字母选项
            option_re: Regex::new(r"^[\(（]?([A-Ea-eＡ-Ｅａ-ｅ])[\)）\.、．]\s*(.*)$")
                .expect("option_re"),
            // "(1) xxx" —— 括号数字选项（只在题干已开启时生效，避免与题号混淆）
            paren_num_option_re: Regex::new(r"^[\(（](\d{1,2})[\)）]\s*(.*)$")
                .expect("paren_num_option_re"),
            // "答案：Ｃ" / "Answer: C" / "Ans - C"
            answer_line_re: Regex::new(
                r"^(?:答\s*案|(?i:Answer|Ans))\s*[:：\-－]?\s*([A-EＡ-Ｅ#＃]|送分)\s*$",
            )
            .expect("answer_line_re"),
            // "備註：…" / "更正：…" / "Correction: …"
            note_re: Regex::new(r"^(?:備\s*註|备\s*注|附\s*註|更正|(?i:Correction))\s*[:：]?\s*(.*)$")
                .expect("note_re"),
            // 答案表格的題號行
            qnum_row_re: Regex::new(r"題\s*號|题\s*号|^序").expect("qnum_row_re"),
        }
    }

    /// 将整份文档的页面序列转换为有序块序列
    ///
    /// `doc_id` 用于生成图片资源 ID；`order_index` 跨页单调递增。
    pub fn extract(&self, doc_id: &str, pages: &[PageContent]) -> (Vec<Block>, IssueReport) {
        let mut blocks: Vec<Block> = Vec::new();
        let mut report = IssueReport::new();
        let mut order_index = 0usize;
        // 首个内容块（Stem/Option/AnswerKey）出现前的行视为卷头
        let mut heading_phase = true;

        for page in pages {
            let lines = group_runs_into_lines(&page.runs);
            let grid = self.detect_answer_grid(&lines);

            // 行与图片统一按页面位置排序，图片插在其出现位置
            let mut items: Vec<PageItem> = Vec::new();
            for (idx, line) in lines.iter().enumerate() {
                items.push(PageItem::Line(idx, line.top));
            }
            for (idx, image) in page.images.iter().enumerate() {
                items.push(PageItem::Image(idx, image.bbox.top()));
            }
            items.sort_by(|a, b| {
                b.top()
                    .partial_cmp(&a.top())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

            for item in items {
                match item {
                    PageItem::Image(idx, _) => {
                        let image = &page.images[idx];
                        let asset_id =
                            crate::models::block::image_asset_id(doc_id, page.page_index, idx);
                        blocks.push(
                            Block::new(BlockKind::ImageRef, page.page_index, order_index, "")
                                .with_bbox(image.bbox)
                                .with_asset_id(asset_id),
                        );
                        order_index += 1;
                    }
                    PageItem::Line(idx, _) => {
                        if let Some(cells) = grid.keys_at(idx) {
                            // 表格配对产出的答案键，按列顺序展开
                            for (number, key) in cells {
                                blocks.push(
                                    Block::new(
                                        BlockKind::AnswerKey,
                                        page.page_index,
                                        order_index,
                                        format!("{}. {}", number, key),
                                    )
                                    .with_number(*number)
                                    .with_label(key.clone()),
                                );
                                order_index += 1;
                            }
                            heading_phase = false;
                            continue;
                        }
                        if grid.is_consumed(idx) {
                            continue;
                        }

                        let line = &lines[idx];
                        let outcome = self.classify_line(
                            line,
                            page.page_index,
                            order_index,
                            heading_phase,
                            &mut blocks,
                            &mut report,
                        );
                        if outcome.emitted {
                            order_index += 1;
                        }
                        if outcome.content_started {
                            heading_phase = false;
                        }
                    }
                }
            }
        }

        debug!("文档 {} 分块完成: {} 个块", doc_id, blocks.len());
        (blocks, report)
    }

    /// 分类单行；返回是否新增了块、是否结束卷头阶段
    fn classify_line(
        &self,
        line: &Line,
        page_index: usize,
        order_index: usize,
        heading_phase: bool,
        blocks: &mut Vec<Block>,
        report: &mut IssueReport,
    ) -> ClassifyOutcome {
        let text = line.text.trim();
        if text.is_empty() {
            return ClassifyOutcome::skipped();
        }

        // 题号直接跟答案：答案卷的简单列表样式
        if let Some(caps) = self.bare_key_re.captures(text) {
            let number: u32 = caps[1].parse().unwrap_or(0);
            if number > 0 {
                let key = normalize_answer_text(&caps[2]);
                let mut block = Block::new(BlockKind::AnswerKey, page_index, order_index, text)
                    .with_number(number)
                    .with_label(key);
                if let Some(bbox) = line.bbox() {
                    block = block.with_bbox(bbox);
                }
                blocks.push(block);
                return ClassifyOutcome::content();
            }
        }

        // 题干开头
        if let Some(caps) = self.stem_re.captures(text) {
            let number: u32 = caps[1].parse().unwrap_or(0);
            if number > 0 {
                let mut block =
                    Block::new(BlockKind::Stem, page_index, order_index, caps[2].trim())
                        .with_number(number);
                if let Some(bbox) = line.bbox() {
                    block = block.with_bbox(bbox);
                }
                blocks.push(block);
                return ClassifyOutcome::content();
            }
        }

        // 字母选项；括号数字选项只在已有题干时生效
        let option_caps = self.option_re.captures(text).or_else(|| {
            if last_kind_is(blocks, &[BlockKind::Stem, BlockKind::Option]) {
                self.paren_num_option_re.captures(text)
            } else {
                None
            }
        });
        if let Some(caps) = option_caps {
            let label = normalize_option_label(&caps[1]);
            let mut block = Block::new(BlockKind::Option, page_index, order_index, caps[2].trim())
                .with_label(label);
            if let Some(bbox) = line.bbox() {
                block = block.with_bbox(bbox);
            }
            blocks.push(block);
            return ClassifyOutcome::content();
        }

        // "答案：X" 行：题号取最近一个题干
        if let Some(caps) = self.answer_line_re.captures(text) {
            let number = blocks
                .iter()
                .rev()
                .find(|b| b.kind == BlockKind::Stem)
                .and_then(|b| b.number);
            if let Some(number) = number {
                let key = normalize_answer_text(&caps[1]);
                blocks.push(
                    Block::new(BlockKind::AnswerKey, page_index, order_index, text)
                        .with_number(number)
                        .with_label(key),
                );
                return ClassifyOutcome::content();
            }
            // 找不到所属题干，保留为无法归类
            warn!("页 {} 答案行找不到所属题干: {}", page_index + 1, text);
        }

        // 备注/更正
        if let Some(caps) = self.note_re.captures(text) {
            blocks.push(Block::new(
                BlockKind::NoteText,
                page_index,
                order_index,
                caps[1].trim(),
            ));
            return ClassifyOutcome::content();
        }

        // 卷头阶段：未命中任何模式的行视为卷头文字
        if heading_phase {
            blocks.push(Block::new(
                BlockKind::Heading,
                page_index,
                order_index,
                text,
            ));
            return ClassifyOutcome::emitted_only();
        }

        // 续行：并入前一个题干/选项/备注块
        if let Some(last) = blocks.last_mut() {
            if matches!(
                last.kind,
                BlockKind::Stem | BlockKind::Option | BlockKind::NoteText
            ) {
                last.append_text(text);
                return ClassifyOutcome::skipped();
            }
        }

        // 无上下文可依附：保留并上报
        report.push(
            format!("block@{}", order_index),
            IssueKind::UnclassifiedBlock,
            format!("页 {} 无法归类: {}", page_index + 1, truncate_text(text, 60)),
        );
        blocks.push(Block::new(
            BlockKind::Unclassified,
            page_index,
            order_index,
            text,
        ));
        ClassifyOutcome::emitted_only()
    }

    /// 识别答案卷的「題號/答案」对照表并按列位配对
    ///
    /// 題號行的数字格与其下方 40pt 内最近的答案行按 x 中点对齐，
    /// 偏移超过 25pt 的列记为 `#`（原卷无法对位）。
    fn detect_answer_grid(&self, lines: &[Line]) -> AnswerGrid {
        let mut grid = AnswerGrid::default();

        let mut q_rows: Vec<(usize, Vec<GridCell>, f32)> = Vec::new();
        let mut a_rows: Vec<(usize, Vec<GridCell>, f32)> = Vec::new();

        for (idx, line) in lines.iter().enumerate() {
            if self.qnum_row_re.is_match(&line.text)
                && line.text.chars().any(|c| c.is_ascii_digit())
            {
                let cells: Vec<GridCell> = line
                    .runs
                    .iter()
                    .filter(|r| {
                        let t = r.text.trim();
                        !t.is_empty() && t.chars().all(|c| c.is_ascii_digit())
                    })
                    .map(|r| GridCell {
                        text: r.text.trim().to_string(),
                        x_mid: r.bbox.x_mid(),
                    })
                    .collect();
                if !cells.is_empty() {
                    q_rows.push((idx, cells, line.top));
                }
            } else if line.text.contains("答案") {
                let mut cells = Vec::new();
                for run in &line.runs {
                    let t = run.text.trim();
                    if let Some(ch) = answer_cell_char(t) {
                        cells.push(GridCell {
                            text: ch,
                            x_mid: run.bbox.x_mid(),
                        });
                    }
                }
                if !cells.is_empty() {
                    a_rows.push((idx, cells, line.top));
                }
            }
        }

        let mut used_a_rows: Vec<usize> = Vec::new();
        for (q_idx, q_cells, q_top) in &q_rows {
            // 最近的、位于題號行下方的答案行
            let mut best: Option<(usize, f32)> = None;
            for (a_pos, (a_idx, _, a_top)) in a_rows.iter().enumerate() {
                if a_idx <= q_idx || used_a_rows.contains(&a_pos) {
                    continue;
                }
                let gap = q_top - a_top;
                if gap > 0.0 && gap < GRID_ROW_MAX_GAP {
                    if best.map(|(_, g)| gap < g).unwrap_or(true) {
                        best = Some((a_pos, gap));
                    }
                }
            }

            let Some((a_pos, _)) = best else { continue };
            used_a_rows.push(a_pos);
            let (a_idx, a_cells, _) = &a_rows[a_pos];

            let mut keys = Vec::new();
            for q_cell in q_cells {
                let number: u32 = match q_cell.text.parse() {
                    Ok(n) if n > 0 => n,
                    _ => continue,
                };
                let mut best_key: Option<(&GridCell, f32)> = None;
                for a_cell in a_cells {
                    let dist = (q_cell.x_mid - a_cell.x_mid).abs();
                    if dist < GRID_COL_MAX_OFFSET
                        && best_key.map(|(_, d)| dist < d).unwrap_or(true)
                    {
                        best_key = Some((a_cell, dist));
                    }
                }
                match best_key {
                    Some((cell, _)) => keys.push((number, cell.text.clone())),
                    None => {
                        warn!("題號 {} 在答案行中找不到对位的答案，记为 #", number);
                        keys.push((number, "#".to_string()));
                    }
                }
            }
            grid.add(*q_idx, *a_idx, keys);
        }

        grid
    }
}

impl Default for BlockExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// 页面项：行或图片，统一排序
enum PageItem {
    Line(usize, f32),
    Image(usize, f32),
}

impl PageItem {
    fn top(&self) -> f32 {
        match self {
            PageItem::Line(_, top) | PageItem::Image(_, top) => *top,
        }
    }
}

#[derive(Debug, Default)]
struct AnswerGrid {
    /// 題號行索引 → 配对结果
    keys_by_line: Vec<(usize, Vec<(u32, String)>)>,
    /// 已被表格消费的行索引（題號行与答案行）
    consumed: Vec<usize>,
}

impl AnswerGrid {
    fn add(&mut self, q_idx: usize, a_idx: usize, keys: Vec<(u32, String)>) {
        self.consumed.push(q_idx);
        self.consumed.push(a_idx);
        self.keys_by_line.push((q_idx, keys));
    }

    fn keys_at(&self, line_idx: usize) -> Option<&Vec<(u32, String)>> {
        self.keys_by_line
            .iter()
            .find(|(idx, _)| *idx == line_idx)
            .map(|(_, keys)| keys)
    }

    fn is_consumed(&self, line_idx: usize) -> bool {
        self.consumed.contains(&line_idx)
    }
}

struct ClassifyOutcome {
    emitted: bool,
    content_started: bool,
}

impl ClassifyOutcome {
    fn content() -> Self {
        Self {
            emitted: true,
            content_started: true,
        }
    }
    fn emitted_only() -> Self {
        Self {
            emitted: true,
            content_started: false,
        }
    }
    fn skipped() -> Self {
        Self {
            emitted: false,
            content_started: false,
        }
    }
}

/// 把散落的文本段按纵向容差归并成行（先上后下，再左后右）
fn group_runs_into_lines(runs: &[TextRun]) -> Vec<Line> {
    let mut sorted: Vec<&TextRun> = runs.iter().filter(|r| !r.text.trim().is_empty()).collect();
    sorted.sort_by(|a, b| {
        b.bbox
            .top()
            .partial_cmp(&a.bbox.top())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(
                a.bbox
                    .x0
                    .partial_cmp(&b.bbox.x0)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
    });

    let mut lines: Vec<Vec<&TextRun>> = Vec::new();
    for run in sorted {
        match lines.last_mut() {
            Some(current)
                if (current[0].bbox.top() - run.bbox.top()).abs() < Y_GROUPING_TOLERANCE =>
            {
                current.push(run);
            }
            _ => lines.push(vec![run]),
        }
    }

    lines
        .into_iter()
        .map(|mut line_runs| {
            line_runs.sort_by(|a, b| {
                a.bbox
                    .x0
                    .partial_cmp(&b.bbox.x0)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            let text = line_runs
                .iter()
                .map(|r| r.text.trim())
                .collect::<Vec<_>>()
                .join(" ");
            Line {
                top: line_runs[0].bbox.top(),
                text,
                runs: line_runs.into_iter().cloned().collect(),
            }
        })
        .collect()
}

fn last_kind_is(blocks: &[Block], kinds: &[BlockKind]) -> bool {
    blocks
        .last()
        .map(|b| kinds.contains(&b.kind))
        .unwrap_or(false)
}

/// 全角答案字符归一为 ASCII；「送分」原样保留
fn normalize_answer_text(s: &str) -> String {
    s.trim()
        .chars()
        .map(|c| match c {
            'Ａ'..='Ｚ' => char::from_u32(c as u32 - 'Ａ' as u32 + 'A' as u32).unwrap_or(c),
            '＃' => '#',
            other => other,
        })
        .collect()
}

fn normalize_option_label(s: &str) -> String {
    normalize_answer_text(s).to_uppercase()
}

/// 表格答案行的一格是否是答案字符（`B` / `答案B` / `＃`）
fn answer_cell_char(t: &str) -> Option<String> {
    let normalized = normalize_answer_text(t);
    let mut chars = normalized.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_uppercase() || c == '#' => Some(c.to_string()),
        _ => {
            // "答案B" 粘连格
            let stripped = normalized.strip_prefix("答案")?;
            let mut it = stripped.chars();
            match (it.next(), it.next()) {
                (Some(c), None) if c.is_ascii_uppercase() || c == '#' => Some(c.to_string()),
                _ => None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ImageBlob;

    fn run(text: &str, x: f32, y: f32) -> TextRun {
        TextRun::new(text, BoundingBox::new(x, y, x + 20.0, y + 10.0))
    }

    /// 一行一段文本的简易页面：行距 20pt，自上而下
    fn page_of_lines(page_index: usize, lines: &[&str]) -> PageContent {
        let runs = lines
            .iter()
            .enumerate()
            .map(|(i, text)| run(text, 50.0, 800.0 - i as f32 * 20.0))
            .collect();
        PageContent {
            page_index,
            width: 595.0,
            height: 842.0,
            runs,
            images: Vec::new(),
        }
    }

    #[test]
    fn classifies_stem_options_and_continuation() {
        let page = page_of_lines(
            0,
            &[
                "111年第二次專門職業及技術人員高等考試",
                "12. 下列何者為正常",
                "靜止心率範圍？",
                "(A) 40-60",
                "(B) 60-100",
                "(C) 100-140",
            ],
        );
        let extractor = BlockExtractor::new();
        let (blocks, report) = extractor.extract("doc", &[page]);

        assert!(report.is_empty());
        assert_eq!(blocks[0].kind, BlockKind::Heading);
        let stem = &blocks[1];
        assert_eq!(stem.kind, BlockKind::Stem);
        assert_eq!(stem.number, Some(12));
        // 续行并入题干
        assert!(stem.raw_text.contains("靜止心率範圍"));
        let labels: Vec<_> = blocks
            .iter()
            .filter(|b| b.kind == BlockKind::Option)
            .map(|b| b.label.clone().unwrap())
            .collect();
        assert_eq!(labels, vec!["A", "B", "C"]);
    }

    #[test]
    fn bare_number_letter_is_answer_key_not_stem() {
        let page = page_of_lines(0, &["12. Ｂ", "13. 送分"]);
        let extractor = BlockExtractor::new();
        let (blocks, _) = extractor.extract("ans", &[page]);

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].kind, BlockKind::AnswerKey);
        assert_eq!(blocks[0].number, Some(12));
        assert_eq!(blocks[0].label.as_deref(), Some("B"));
        assert_eq!(blocks[1].label.as_deref(), Some("送分"));
    }

    #[test]
    fn unclassified_line_is_kept_and_reported() {
        let page = page_of_lines(0, &["1. 題幹", "(A) 甲", "(B) 乙", "12. Ｂ", "孤立的一行文字"]);
        let extractor = BlockExtractor::new();
        let (blocks, report) = extractor.extract("doc", &[page]);

        // AnswerKey 之后的散行没有可依附的上下文
        assert_eq!(report.count_of(IssueKind::UnclassifiedBlock), 1);
        assert!(blocks.iter().any(|b| b.kind == BlockKind::Unclassified));
    }

    #[test]
    fn answer_grid_pairs_by_column_position() {
        // 題號  1    2    3
        // 答案  Ａ   Ｂ   Ｃ    （第 3 列故意偏移 30pt，应记为 #）
        let runs = vec![
            run("題號", 40.0, 700.0),
            run("1", 100.0, 700.0),
            run("2", 150.0, 700.0),
            run("3", 200.0, 700.0),
            run("答案", 40.0, 680.0),
            run("Ａ", 100.0, 680.0),
            run("Ｂ", 150.0, 680.0),
            run("Ｃ", 230.0, 680.0),
        ];
        let page = PageContent {
            page_index: 0,
            width: 595.0,
            height: 842.0,
            runs,
            images: Vec::new(),
        };
        let extractor = BlockExtractor::new();
        let (blocks, _) = extractor.extract("ans", &[page]);

        let keys: Vec<_> = blocks
            .iter()
            .filter(|b| b.kind == BlockKind::AnswerKey)
            .map(|b| (b.number.unwrap(), b.label.clone().unwrap()))
            .collect();
        assert_eq!(
            keys,
            vec![
                (1, "A".to_string()),
                (2, "B".to_string()),
                (3, "#".to_string())
            ]
        );
    }

    #[test]
    fn note_line_starts_note_block_and_absorbs_continuation() {
        let page = page_of_lines(
            0,
            &["1. 題幹", "(A) 甲", "(B) 乙", "備註：第1題答案更正為Ｂ，", "原公布答案有誤。"],
        );
        let extractor = BlockExtractor::new();
        let (blocks, _) = extractor.extract("doc", &[page]);

        let note = blocks
            .iter()
            .find(|b| b.kind == BlockKind::NoteText)
            .expect("应有备注块");
        assert!(note.raw_text.contains("更正為Ｂ"));
        assert!(note.raw_text.contains("原公布答案有誤"));
    }

    #[test]
    fn image_becomes_image_ref_at_page_position() {
        let mut page = page_of_lines(0, &["1. 題幹", "(A) 甲", "(B) 乙"]);
        // 图片位于选项 (A) 与 (B) 之间
        page.images.push(ImageBlob {
            bbox: BoundingBox::new(60.0, 765.0, 160.0, 775.0),
            width: 100,
            height: 10,
            png_bytes: vec![0u8; 4],
        });
        let extractor = BlockExtractor::new();
        let (blocks, _) = extractor.extract("doc", &[page]);

        let kinds: Vec<_> = blocks.iter().map(|b| b.kind).collect();
        assert_eq!(
            kinds,
            vec![
                BlockKind::Stem,
                BlockKind::Option,
                BlockKind::ImageRef,
                BlockKind::Option
            ]
        );
        assert_eq!(blocks[2].asset_id.as_deref(), Some("doc_p00_i00"));
    }
}
