//! 医检师国考科目表
//!
//! 目录名、卷头科目名称都可能带缩写或多余空白，
//! 这里用静态别名表做归一。未收录的科目名不视为错误，
//! 照原样写入输出，只是拿不到标准代码。

use phf::phf_map;

/// 科目枚举（代码取自历年试卷卷头的「代号」前两位惯例）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Subject {
    /// 临床生理学与病理学
    PhysiologyPathology = 1101,
    /// 临床血清免疫学与临床病毒学
    SerologyImmunology = 1102,
    /// 医学分子检验学与临床镜检学
    MolecularMicroscopy = 1103,
    /// 临床血液学与血库学
    HematologyBloodBank = 1104,
    /// 生物化学与临床生化学
    Biochemistry = 1105,
    /// 微生物学与临床微生物学
    Microbiology = 1106,
}

/// 别名 → 科目 静态表（全名、简称、惯用缩写）
static SUBJECT_ALIASES: phf::Map<&'static str, Subject> = phf_map! {
    "臨床生理學與病理學" => Subject::PhysiologyPathology,
    "临床生理学与病理学" => Subject::PhysiologyPathology,
    "生理" => Subject::PhysiologyPathology,
    "病理" => Subject::PhysiologyPathology,
    "臨床血清免疫學與臨床病毒學" => Subject::SerologyImmunology,
    "血清免疫學" => Subject::SerologyImmunology,
    "血清" => Subject::SerologyImmunology,
    "免疫" => Subject::SerologyImmunology,
    "醫學分子檢驗學與臨床鏡檢學" => Subject::MolecularMicroscopy,
    "分子檢驗" => Subject::MolecularMicroscopy,
    "鏡檢" => Subject::MolecularMicroscopy,
    "臨床血液學與血庫學" => Subject::HematologyBloodBank,
    "血液學" => Subject::HematologyBloodBank,
    "血液" => Subject::HematologyBloodBank,
    "血庫" => Subject::HematologyBloodBank,
    "生物化學與臨床生化學" => Subject::Biochemistry,
    "生化學" => Subject::Biochemistry,
    "生化" => Subject::Biochemistry,
    "微生物學與臨床微生物學" => Subject::Microbiology,
    "微生物" => Subject::Microbiology,
};

impl Subject {
    /// 获取科目代码
    pub fn code(self) -> u16 {
        self as u16
    }

    /// 获取标准名称（繁体，与卷面一致）
    pub fn name(self) -> &'static str {
        match self {
            Subject::PhysiologyPathology => "臨床生理學與病理學",
            Subject::SerologyImmunology => "臨床血清免疫學與臨床病毒學",
            Subject::MolecularMicroscopy => "醫學分子檢驗學與臨床鏡檢學",
            Subject::HematologyBloodBank => "臨床血液學與血庫學",
            Subject::Biochemistry => "生物化學與臨床生化學",
            Subject::Microbiology => "微生物學與臨床微生物學",
        }
    }

    /// 精确匹配别名表
    pub fn from_alias(s: &str) -> Option<Self> {
        SUBJECT_ALIASES.get(s.trim()).copied()
    }

    /// 智能查找（先精确，再子串包含）
    pub fn find(s: &str) -> Option<Self> {
        if let Some(subject) = Self::from_alias(s) {
            return Some(subject);
        }
        let trimmed = s.trim();
        for (alias, subject) in SUBJECT_ALIASES.entries() {
            // 短别名（两字）只做精确匹配，避免误伤
            if alias.chars().count() >= 3 && trimmed.contains(alias) {
                return Some(*subject);
            }
        }
        None
    }
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_alias_lookup() {
        assert_eq!(
            Subject::from_alias("生物化學與臨床生化學"),
            Some(Subject::Biochemistry)
        );
        assert_eq!(Subject::from_alias("生化"), Some(Subject::Biochemistry));
        assert_eq!(Subject::from_alias("不存在的科目"), None);
    }

    #[test]
    fn fuzzy_find_by_substring() {
        // 卷头常见写法：「科目名稱：臨床血液學與血庫學（包括輸血醫學）」
        assert_eq!(
            Subject::find("臨床血液學與血庫學（包括輸血醫學）"),
            Some(Subject::HematologyBloodBank)
        );
    }

    #[test]
    fn code_roundtrip() {
        assert_eq!(Subject::Microbiology.code(), 1106);
    }
}
