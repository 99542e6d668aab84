//! 图片归属服务 - 业务能力层
//!
//! 图片默认跟随它所说明的内容：每个图片引用归属于同页中
//! 块序号紧邻其前的候选题目。页面开头的图片归给该页最先
//! 开启的候选；该页没有候选则记为孤儿图片。

use crate::models::{
    Block, BlockKind, ImageAsset, IssueKind, IssueReport, PageContent, QuestionCandidate,
};
use std::collections::HashMap;
use tracing::debug;

/// 图片归属结果：asset_id → 题号
#[derive(Debug, Default)]
pub struct ImageAssignment {
    pub by_asset: HashMap<String, u32>,
    /// 未能归属的资源（仍然保留）
    pub orphans: Vec<ImageAsset>,
    pub report: IssueReport,
}

/// 从页面数据构建资源清单
///
/// 资源 ID 与分块器给 ImageRef 块的 ID 同源（文档 + 页码 + 页内序号）。
/// 资源在归属完成前由本服务独占持有；归属后通过 `ImageAssignment`
/// 把所有权（按引用）移交给对应题目。
pub fn collect_assets(doc_id: &str, pages: &[PageContent]) -> Vec<ImageAsset> {
    let mut assets = Vec::new();
    for page in pages {
        for (idx, image) in page.images.iter().enumerate() {
            assets.push(ImageAsset {
                asset_id: crate::models::block::image_asset_id(doc_id, page.page_index, idx),
                page_index: page.page_index,
                bounding_box: image.bbox,
                png_bytes: image.png_bytes.clone(),
            });
        }
    }
    assets
}

/// 把图片引用分配给候选题目
pub fn associate(blocks: &[Block], candidates: &[QuestionCandidate]) -> ImageAssignment {
    let mut assignment = ImageAssignment::default();

    // 每页最先开启的候选，兜底页首图片
    let mut first_on_page: HashMap<usize, u32> = HashMap::new();
    for candidate in candidates {
        for block in candidate
            .stem_blocks
            .iter()
            .chain(candidate.option_blocks.iter())
        {
            first_on_page.entry(block.page_index).or_insert(candidate.number);
        }
    }

    for block in blocks {
        if block.kind != BlockKind::ImageRef {
            continue;
        }
        let Some(asset_id) = &block.asset_id else {
            continue;
        };

        // 同页中块序号最接近的前置内容块所在的候选
        let mut best: Option<(u32, usize)> = None;
        for candidate in candidates {
            for content in candidate
                .stem_blocks
                .iter()
                .chain(candidate.option_blocks.iter())
            {
                if content.kind == BlockKind::ImageRef {
                    continue;
                }
                if content.page_index == block.page_index
                    && content.order_index < block.order_index
                {
                    let distance = block.order_index - content.order_index;
                    if best.map(|(_, d)| distance < d).unwrap_or(true) {
                        best = Some((candidate.number, distance));
                    }
                }
            }
        }
        let number = best
            .map(|(n, _)| n)
            .or_else(|| first_on_page.get(&block.page_index).copied());

        match number {
            Some(number) => {
                debug!("图片 {} 归属题 {}", asset_id, number);
                assignment.by_asset.insert(asset_id.clone(), number);
            }
            None => {
                assignment.report.push(
                    asset_id.clone(),
                    IssueKind::OrphanImage,
                    format!("页 {} 没有开启任何候选题目", block.page_index + 1),
                );
            }
        }
    }

    assignment
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Block;

    fn stem(page: usize, order: usize, number: u32) -> Block {
        Block::new(BlockKind::Stem, page, order, "題幹").with_number(number)
    }

    fn image_ref(page: usize, order: usize, id: &str) -> Block {
        Block::new(BlockKind::ImageRef, page, order, "").with_asset_id(id)
    }

    fn candidate_of(blocks: &[Block], number: u32) -> QuestionCandidate {
        QuestionCandidate {
            number,
            stem_blocks: blocks
                .iter()
                .filter(|b| b.kind == BlockKind::Stem && b.number == Some(number))
                .cloned()
                .collect(),
            option_blocks: blocks
                .iter()
                .filter(|b| b.kind == BlockKind::Option && b.number == Some(number))
                .cloned()
                .collect(),
            source_document_id: "doc".to_string(),
        }
    }

    #[test]
    fn image_follows_closest_preceding_content() {
        let blocks = vec![
            stem(0, 0, 1),
            image_ref(0, 1, "img_a"),
            stem(0, 2, 2),
            image_ref(0, 3, "img_b"),
        ];
        let candidates = vec![candidate_of(&blocks, 1), candidate_of(&blocks, 2)];
        let assignment = associate(&blocks, &candidates);

        assert_eq!(assignment.by_asset["img_a"], 1);
        assert_eq!(assignment.by_asset["img_b"], 2);
        assert!(assignment.report.is_empty());
    }

    #[test]
    fn page_leading_image_goes_to_first_candidate_on_page() {
        // 图片在第 2 页开头，内容块都在它之后
        let blocks = vec![
            stem(0, 0, 1),
            image_ref(1, 1, "img_top"),
            stem(1, 2, 2),
        ];
        let candidates = vec![candidate_of(&blocks, 1), candidate_of(&blocks, 2)];
        let assignment = associate(&blocks, &candidates);

        assert_eq!(assignment.by_asset["img_top"], 2);
    }

    #[test]
    fn image_on_candidate_free_page_is_orphaned() {
        let blocks = vec![stem(0, 0, 1), image_ref(3, 1, "img_lost")];
        let candidates = vec![candidate_of(&blocks, 1)];
        let assignment = associate(&blocks, &candidates);

        assert!(assignment.by_asset.is_empty());
        assert_eq!(assignment.report.count_of(IssueKind::OrphanImage), 1);
    }
}
