//! 自动分类服务
//!
//! 为每个最终聚类提取关键词，按规则加权给已有分类打分：
//! 最高分达到 `confidence_threshold` 时归入该分类，否则用关键词新建分类。
//! 单条规则求值失败只影响该规则（记 0 分），不会中断整个运行。

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clustering::math::cosine_similarity;
use crate::config::CategorizationConfig;
use crate::error::{ClusterError, Result};
use crate::models::{
    CategoryRule, MemoryCategory, MemoryCluster, MemoryItem, RecategorizationCandidate,
};

const MIN_KEYWORD_CHARS: usize = 3;
const CATEGORY_NAME_KEYWORDS: usize = 3;

static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her",
        "was", "one", "our", "out", "has", "have", "his", "how", "its", "may", "new", "now",
        "old", "see", "two", "way", "who", "did", "get", "got", "let", "put", "say", "she",
        "too", "use", "used", "using", "that", "this", "with", "from", "they", "them", "then",
        "than", "there", "their", "what", "when", "where", "which", "while", "will", "would",
        "could", "should", "about", "after", "before", "into", "onto", "over", "under", "also",
        "just", "like", "some", "such", "only", "very", "more", "most", "been", "being", "were",
        "does", "doing", "done", "each", "other", "these", "those", "because", "here", "your",
        "yours", "ours", "mine",
    ])
});

/// 单个分类的打分结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryMatch {
    pub category_id: String,
    pub category_name: String,
    pub score: f32,
}

/// 对一个聚类的分类判定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum CategoryDecision {
    /// 归入已有分类
    Matched {
        cluster_id: String,
        category_id: String,
        score: f32,
    },
    /// 新建分类
    Created {
        cluster_id: String,
        category_id: String,
        keywords: Vec<String>,
    },
    /// 未分类（规则出错或没有可用关键词）
    Uncategorized { cluster_id: String, reason: String },
}

impl CategoryDecision {
    pub fn cluster_id(&self) -> &str {
        match self {
            CategoryDecision::Matched { cluster_id, .. }
            | CategoryDecision::Created { cluster_id, .. }
            | CategoryDecision::Uncategorized { cluster_id, .. } => cluster_id,
        }
    }

    pub fn category_id(&self) -> Option<&str> {
        match self {
            CategoryDecision::Matched { category_id, .. }
            | CategoryDecision::Created { category_id, .. } => Some(category_id),
            CategoryDecision::Uncategorized { .. } => None,
        }
    }
}

/// 与已有分类表比对的结果（只读）
#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    /// 提取出的关键词
    pub keywords: Vec<String>,
    /// 最高分分类（不论是否过阈值）
    pub best: Option<(usize, f32)>,
    /// 是否有规则求值失败
    pub rule_failed: bool,
}

/// 自动分类器
pub struct AutoCategorizer<'a> {
    config: &'a CategorizationConfig,
}

impl<'a> AutoCategorizer<'a> {
    pub fn new(config: &'a CategorizationConfig) -> Self {
        Self { config }
    }

    /// 停用词过滤后的词频统计，显式标签各计一次
    ///
    /// 按词频降序、词典序升序排列，最多返回 `max_keywords` 个。
    pub fn extract_keywords(&self, members: &[&MemoryItem]) -> Vec<String> {
        let mut freq: HashMap<String, usize> = HashMap::new();

        for item in members {
            for token in item
                .content
                .split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-'))
                .map(|t| t.trim_matches('-').to_lowercase())
            {
                if is_keyword(&token) {
                    *freq.entry(token).or_insert(0) += 1;
                }
            }
            for tag in &item.tags {
                let tag = tag.trim().to_lowercase();
                if !tag.is_empty() {
                    *freq.entry(tag).or_insert(0) += 1;
                }
            }
        }

        let mut ranked: Vec<(String, usize)> = freq.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked
            .into_iter()
            .take(self.config.max_keywords)
            .map(|(term, _)| term)
            .collect()
    }

    /// 按规则加权给分类打分，返回 (分数, 失败的规则数)
    pub fn score_category(
        &self,
        category: &MemoryCategory,
        cluster: &MemoryCluster,
        members: &[&MemoryItem],
        keywords: &[String],
    ) -> (f32, usize) {
        let implicit;
        let rules: &[CategoryRule] = if category.rules.is_empty() {
            implicit = implicit_rules(category);
            &implicit
        } else {
            &category.rules
        };

        let mut weighted = 0.0f32;
        let mut total_weight = 0.0f32;
        let mut failures = 0;

        for rule in rules {
            let weight = rule.weight();
            total_weight += weight;
            match evaluate_rule(rule, cluster, members, keywords) {
                Ok(score) => weighted += weight * score.clamp(0.0, 1.0),
                Err(e) => {
                    failures += 1;
                    warn!(
                        category = %category.name,
                        cluster_id = %cluster.id,
                        rule = rule.kind(),
                        error = %e,
                        "Category rule evaluation failed, treating as non-matching"
                    );
                }
            }
        }

        let score = if total_weight > 0.0 {
            weighted / total_weight
        } else {
            0.0
        };
        (score, failures)
    }

    /// 与分类表比对，不修改任何状态。同分时先注册的分类优先。
    pub fn best_match(
        &self,
        categories: &[MemoryCategory],
        cluster: &MemoryCluster,
        members: &[&MemoryItem],
    ) -> MatchOutcome {
        let keywords = self.extract_keywords(members);
        let mut outcome = MatchOutcome {
            keywords,
            ..MatchOutcome::default()
        };

        for (idx, category) in categories.iter().enumerate() {
            let (score, failures) =
                self.score_category(category, cluster, members, &outcome.keywords);
            outcome.rule_failed |= failures > 0;
            if outcome.best.is_none_or(|(_, best)| score > best) {
                outcome.best = Some((idx, score));
            }
        }
        outcome
    }

    /// 只读匹配：最高分达到阈值时返回该分类
    pub fn match_cluster(
        &self,
        categories: &[MemoryCategory],
        cluster: &MemoryCluster,
        members: &[&MemoryItem],
    ) -> Option<CategoryMatch> {
        let outcome = self.best_match(categories, cluster, members);
        outcome
            .best
            .filter(|(_, score)| *score >= self.config.confidence_threshold)
            .map(|(idx, score)| CategoryMatch {
                category_id: categories[idx].id.clone(),
                category_name: categories[idx].name.clone(),
                score,
            })
    }

    /// 为聚类选择或新建分类，并增量更新分类统计
    pub fn categorize(
        &self,
        categories: &mut Vec<MemoryCategory>,
        cluster: &mut MemoryCluster,
        members: &[&MemoryItem],
    ) -> CategoryDecision {
        let outcome = self.best_match(categories, cluster, members);

        if let Some((idx, score)) = outcome.best {
            if score >= self.config.confidence_threshold {
                let category = &mut categories[idx];
                category.absorb_cluster(&cluster.id, cluster.size(), cluster.coherence);
                cluster.assign_category(&category.id);
                debug!(
                    cluster_id = %cluster.id,
                    category = %category.name,
                    score,
                    "Cluster matched existing category"
                );
                return CategoryDecision::Matched {
                    cluster_id: cluster.id.clone(),
                    category_id: category.id.clone(),
                    score,
                };
            }
        }

        if outcome.rule_failed {
            return CategoryDecision::Uncategorized {
                cluster_id: cluster.id.clone(),
                reason: "rule evaluation failed and no category reached the confidence threshold"
                    .to_string(),
            };
        }
        if outcome.keywords.is_empty() {
            return CategoryDecision::Uncategorized {
                cluster_id: cluster.id.clone(),
                reason: "no keywords could be extracted".to_string(),
            };
        }

        let mut category = self.synthesize(&outcome.keywords, cluster.size());
        category.absorb_cluster(&cluster.id, cluster.size(), cluster.coherence);
        cluster.assign_category(&category.id);
        info!(
            cluster_id = %cluster.id,
            category = %category.name,
            "Created category from cluster keywords"
        );
        let decision = CategoryDecision::Created {
            cluster_id: cluster.id.clone(),
            category_id: category.id.clone(),
            keywords: outcome.keywords,
        };
        categories.push(category);
        decision
    }

    /// 未能分类的聚类给出重新分类建议
    pub fn recategorization_candidates(
        &self,
        decisions: &[CategoryDecision],
    ) -> Vec<RecategorizationCandidate> {
        decisions
            .iter()
            .filter_map(|decision| match decision {
                CategoryDecision::Uncategorized { cluster_id, reason } => {
                    Some(RecategorizationCandidate {
                        cluster_id: cluster_id.clone(),
                        current_category: None,
                        reason: reason.clone(),
                    })
                }
                _ => None,
            })
            .collect()
    }

    fn synthesize(&self, keywords: &[String], member_count: usize) -> MemoryCategory {
        let name = keywords
            .iter()
            .take(CATEGORY_NAME_KEYWORDS)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("-");
        let terms: Vec<&str> = keywords.iter().map(String::as_str).collect();
        MemoryCategory::new(
            &name,
            &format!("Auto-generated from a cluster of {member_count} memories"),
            self.config.default_confidence,
        )
        .with_keyword_rule(&terms, 1.0)
    }
}

fn is_keyword(token: &str) -> bool {
    token.chars().count() >= MIN_KEYWORD_CHARS
        && !token.chars().all(|c| c.is_ascii_digit())
        && !STOP_WORDS.contains(token)
}

/// 没有显式规则的分类用其关键词和模式充当规则
fn implicit_rules(category: &MemoryCategory) -> Vec<CategoryRule> {
    let mut rules = Vec::new();
    if !category.keywords.is_empty() {
        rules.push(CategoryRule::Keyword {
            keywords: category.keywords.clone(),
            weight: 1.0,
        });
    }
    rules.extend(category.patterns.iter().map(|p| CategoryRule::Pattern {
        pattern: p.clone(),
        weight: 1.0,
    }));
    rules
}

fn rule_error(rule: &CategoryRule, message: impl Into<String>) -> ClusterError {
    ClusterError::CategorizationRule {
        rule: rule.kind().to_string(),
        message: message.into(),
    }
}

/// 单条规则的分数，范围 [0, 1]
pub fn evaluate_rule(
    rule: &CategoryRule,
    cluster: &MemoryCluster,
    members: &[&MemoryItem],
    keywords: &[String],
) -> Result<f32> {
    match rule {
        CategoryRule::Keyword { keywords: wanted, .. } => {
            if wanted.is_empty() {
                return Err(rule_error(rule, "keyword rule has no keywords"));
            }
            let extracted: HashSet<&str> = keywords.iter().map(String::as_str).collect();
            let hits = wanted
                .iter()
                .filter(|k| extracted.contains(k.to_lowercase().as_str()))
                .count();
            Ok(hits as f32 / wanted.len() as f32)
        }
        CategoryRule::Pattern { pattern, .. } => {
            let regex = Regex::new(pattern)?;
            Ok(fraction(members, |item| regex.is_match(&item.content)))
        }
        CategoryRule::Semantic {
            reference,
            min_similarity,
            ..
        } => {
            if reference.len() != cluster.centroid.len() {
                return Err(rule_error(
                    rule,
                    ClusterError::DimensionMismatch {
                        expected: cluster.centroid.len(),
                        found: reference.len(),
                    }
                    .to_string(),
                ));
            }
            let similarity = cosine_similarity(&cluster.centroid, reference);
            Ok(if similarity >= *min_similarity {
                similarity
            } else {
                0.0
            })
        }
        CategoryRule::Length {
            min_chars,
            max_chars,
            ..
        } => {
            if min_chars > max_chars {
                return Err(rule_error(
                    rule,
                    format!("min_chars {min_chars} exceeds max_chars {max_chars}"),
                ));
            }
            Ok(fraction(members, |item| {
                let len = item.content.chars().count();
                len >= *min_chars && len <= *max_chars
            }))
        }
        CategoryRule::Frequency {
            term,
            min_occurrences,
            ..
        } => {
            if term.trim().is_empty() {
                return Err(rule_error(rule, "frequency rule has an empty term"));
            }
            if *min_occurrences == 0 {
                return Ok(1.0);
            }
            let term = term.to_lowercase();
            let count: usize = members
                .iter()
                .map(|item| item.content.to_lowercase().matches(term.as_str()).count())
                .sum();
            Ok((count as f32 / *min_occurrences as f32).min(1.0))
        }
    }
}

fn fraction(members: &[&MemoryItem], predicate: impl Fn(&MemoryItem) -> bool) -> f32 {
    if members.is_empty() {
        return 0.0;
    }
    members.iter().filter(|&&item| predicate(item)).count() as f32 / members.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn items(contents: &[&str]) -> Vec<MemoryItem> {
        contents
            .iter()
            .enumerate()
            .map(|(i, c)| MemoryItem::new(&format!("m{i}"), c, vec![1.0, 0.0]))
            .collect()
    }

    fn cluster_of(items: &[MemoryItem]) -> MemoryCluster {
        let ids: BTreeSet<String> = items.iter().map(|i| i.id.clone()).collect();
        MemoryCluster::new(vec![1.0, 0.0], ids, items.len(), 0.9, 1.0)
    }

    fn refs(items: &[MemoryItem]) -> Vec<&MemoryItem> {
        items.iter().collect()
    }

    #[test]
    fn test_extract_keywords_ranks_by_frequency() {
        let config = CategorizationConfig::default();
        let mut items = items(&[
            "The borrow checker rejects this borrow",
            "Cargo builds the crate; the borrow checker agrees",
        ]);
        items[0].add_tag("rust");
        let keywords = AutoCategorizer::new(&config).extract_keywords(&refs(&items));
        assert_eq!(keywords[0], "borrow");
        assert_eq!(keywords[1], "checker");
        assert!(keywords.contains(&"rust".to_string()));
        assert!(!keywords.contains(&"the".to_string()));
        assert!(!keywords.contains(&"this".to_string()));
    }

    #[test]
    fn test_max_keywords_respected() {
        let config = CategorizationConfig {
            max_keywords: 2,
            ..CategorizationConfig::default()
        };
        let items = items(&["alpha beta gamma delta epsilon"]);
        let keywords = AutoCategorizer::new(&config).extract_keywords(&refs(&items));
        assert_eq!(keywords, vec!["alpha", "beta"]);
    }

    #[test]
    fn test_matches_existing_category() {
        let config = CategorizationConfig::default();
        let items = items(&["rust cargo borrow", "cargo borrow rust", "rust borrow cargo"]);
        let mut cluster = cluster_of(&items);
        let mut categories = vec![
            MemoryCategory::new("rust", "", 0.8)
                .with_keyword_rule(&["rust", "cargo", "borrow"], 1.0),
        ];

        let decision =
            AutoCategorizer::new(&config).categorize(&mut categories, &mut cluster, &refs(&items));
        assert!(matches!(decision, CategoryDecision::Matched { score, .. } if score == 1.0));
        assert_eq!(categories.len(), 1);
        assert!(categories[0].cluster_ids.contains(&cluster.id));
        assert_eq!(cluster.category_id.as_deref(), Some(categories[0].id.as_str()));
    }

    #[test]
    fn test_synthesizes_new_category() {
        let config = CategorizationConfig::default();
        let items = items(&["garden tomato soil", "tomato soil water", "tomato garden"]);
        let mut cluster = cluster_of(&items);
        let mut categories =
            vec![MemoryCategory::new("rust", "", 0.8).with_keyword_rule(&["rust"], 1.0)];

        let decision =
            AutoCategorizer::new(&config).categorize(&mut categories, &mut cluster, &refs(&items));
        assert!(matches!(decision, CategoryDecision::Created { .. }));
        assert_eq!(categories.len(), 2);
        let created = &categories[1];
        assert_eq!(created.name, "tomato-garden-soil");
        assert_eq!(created.confidence, config.default_confidence);
        assert_eq!(created.stats.total_items, 3);
    }

    #[test]
    fn test_rule_error_leaves_cluster_uncategorized() {
        let config = CategorizationConfig::default();
        let items = items(&["anything at all here"]);
        let mut cluster = cluster_of(&items);
        let mut categories =
            vec![MemoryCategory::new("broken", "", 0.8).with_pattern_rule("([unclosed", 1.0)];

        let categorizer = AutoCategorizer::new(&config);
        let decision = categorizer.categorize(&mut categories, &mut cluster, &refs(&items));
        assert!(matches!(decision, CategoryDecision::Uncategorized { .. }));
        assert!(cluster.category_id.is_none());
        assert_eq!(categories.len(), 1);
        assert_eq!(categorizer.recategorization_candidates(&[decision]).len(), 1);
    }

    #[test]
    fn test_weighted_rule_scoring() {
        let config = CategorizationConfig::default();
        let items = items(&["deadline friday", "deadline monday"]);
        let cluster = cluster_of(&items);
        let category = MemoryCategory::new("work", "", 0.8)
            .with_rule(CategoryRule::Frequency {
                term: "deadline".into(),
                min_occurrences: 2,
                weight: 3.0,
            })
            .with_rule(CategoryRule::Length {
                min_chars: 100,
                max_chars: 200,
                weight: 1.0,
            });
        let (score, failures) = AutoCategorizer::new(&config).score_category(
            &category,
            &cluster,
            &refs(&items),
            &[],
        );
        assert_eq!(failures, 0);
        assert!((score - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_semantic_rule() {
        let items = items(&["x"]);
        let cluster = cluster_of(&items);
        let near = CategoryRule::Semantic {
            reference: vec![1.0, 0.0],
            min_similarity: 0.5,
            weight: 1.0,
        };
        assert_eq!(evaluate_rule(&near, &cluster, &refs(&items), &[]).unwrap(), 1.0);

        let far = CategoryRule::Semantic {
            reference: vec![0.0, 1.0],
            min_similarity: 0.5,
            weight: 1.0,
        };
        assert_eq!(evaluate_rule(&far, &cluster, &refs(&items), &[]).unwrap(), 0.0);

        let wrong_dim = CategoryRule::Semantic {
            reference: vec![1.0],
            min_similarity: 0.5,
            weight: 1.0,
        };
        let err = evaluate_rule(&wrong_dim, &cluster, &refs(&items), &[]).unwrap_err();
        assert_eq!(err.code(), "CATEGORIZATION_RULE_ERROR");
    }

    #[test]
    fn test_match_cluster_is_read_only() {
        let config = CategorizationConfig::default();
        let items = items(&["rust cargo", "cargo rust"]);
        let cluster = cluster_of(&items);
        let categories =
            vec![MemoryCategory::new("rust", "", 0.8).with_keyword_rule(&["rust", "cargo"], 1.0)];

        let found = AutoCategorizer::new(&config)
            .match_cluster(&categories, &cluster, &refs(&items))
            .unwrap();
        assert_eq!(found.category_name, "rust");
        assert!(categories[0].cluster_ids.is_empty());
    }
}
