//! Three-pass duplicate detection and master-record selection (§4.3).

use crate::config::DuplicateConfig;
use crate::error::DedupError;
use crate::group::DuplicateGroup;
use crate::item::DedupItem;
use crate::union_find::UnionFind;
use catnorm_protocol::DuplicateGroupType;
use std::collections::{HashMap, HashSet};

/// Run every enabled pass over `items`, merge if requested, and select a
/// master record for each surviving group.
pub fn analyze(items: &[DedupItem], config: &DuplicateConfig) -> Result<Vec<DuplicateGroup>, DedupError> {
    config.validate()?;

    if items.is_empty() {
        return Ok(Vec::new());
    }

    let filtered: Vec<&DedupItem> = items.iter().filter(|it| !it.normalized_name.is_empty()).collect();
    if filtered.len() < 2 {
        return Ok(Vec::new());
    }

    let mut raw_groups: Vec<RawGroup> = Vec::new();

    if config.use_exact {
        raw_groups.extend(exact_pass(&filtered));
    }
    if config.use_fuzzy {
        raw_groups.extend(fuzzy_pass(&filtered, config.threshold));
    }
    raw_groups.extend(word_pass(&filtered, config.threshold, config.word_based_use_stopwords));

    let raw_groups = if config.merge_overlapping {
        merge_overlapping(raw_groups)
    } else {
        raw_groups
    };

    let mut groups: Vec<DuplicateGroup> = raw_groups
        .into_iter()
        .filter(|g| g.confidence >= config.min_confidence)
        .map(|g| finalize_group(&filtered, g))
        .collect();

    groups.sort_by(|a, b| a.suggested_master.as_uuid().cmp(b.suggested_master.as_uuid()));
    Ok(groups)
}

/// Pre-finalization group: indices into `filtered`, not yet scored for a
/// master record.
struct RawGroup {
    group_type: DuplicateGroupType,
    indices: Vec<u32>,
    similarity: f64,
    confidence: f64,
}

fn exact_pass(items: &[&DedupItem]) -> Vec<RawGroup> {
    let mut buckets: HashMap<(&str, &str), Vec<u32>> = HashMap::new();
    for (i, item) in items.iter().enumerate() {
        buckets
            .entry((item.category.as_str(), item.normalized_name.as_str()))
            .or_default()
            .push(i as u32);
    }

    buckets
        .into_values()
        .filter(|indices| indices.len() > 1)
        .map(|indices| RawGroup {
            group_type: DuplicateGroupType::Exact,
            indices,
            similarity: 1.0,
            confidence: 1.0,
        })
        .collect()
}

fn category_buckets<'a>(items: &[&'a DedupItem]) -> HashMap<&'a str, Vec<u32>> {
    let mut buckets: HashMap<&str, Vec<u32>> = HashMap::new();
    for (i, item) in items.iter().enumerate() {
        buckets.entry(item.category.as_str()).or_default().push(i as u32);
    }
    buckets
}

fn fuzzy_pass(items: &[&DedupItem], threshold: f64) -> Vec<RawGroup> {
    let mut groups = Vec::new();

    for (_, bucket) in category_buckets(items) {
        if bucket.len() < 2 {
            continue;
        }

        let mut uf = UnionFind::new(items.len());
        let mut touched: HashSet<u32> = HashSet::new();

        for i in 0..bucket.len() {
            for j in (i + 1)..bucket.len() {
                let a = items[bucket[i] as usize];
                let b = items[bucket[j] as usize];

                let ngram_score = catnorm_strmetrics::ngram_jaccard(&a.normalized_name, &b.normalized_name, 3);
                if ngram_score < threshold {
                    continue;
                }

                let lev = catnorm_strmetrics::levenshtein_similarity(&a.normalized_name, &b.normalized_name);
                let phonetic_match = if catnorm_strmetrics::metaphone_ru(&a.normalized_name)
                    == catnorm_strmetrics::metaphone_ru(&b.normalized_name)
                {
                    1.0
                } else {
                    0.0
                };
                let score = 0.5 * lev + 0.3 * ngram_score + 0.2 * phonetic_match;

                if score >= threshold {
                    uf.union(bucket[i], bucket[j]);
                    touched.insert(bucket[i]);
                    touched.insert(bucket[j]);
                }
            }
        }

        for component in uf.components() {
            let component: Vec<u32> = component.into_iter().filter(|i| touched.contains(i)).collect();
            if component.len() < 2 {
                continue;
            }
            let mean_score = mean_pairwise(items, &component, |a, b| {
                let lev = catnorm_strmetrics::levenshtein_similarity(a, b);
                let ngram = catnorm_strmetrics::ngram_jaccard(a, b, 3);
                let phonetic = if catnorm_strmetrics::metaphone_ru(a) == catnorm_strmetrics::metaphone_ru(b) {
                    1.0
                } else {
                    0.0
                };
                0.5 * lev + 0.3 * ngram + 0.2 * phonetic
            });
            groups.push(RawGroup {
                group_type: DuplicateGroupType::Fuzzy,
                indices: component,
                similarity: mean_score,
                confidence: mean_score,
            });
        }
    }

    groups
}

fn word_pass(items: &[&DedupItem], threshold: f64, use_stopwords: bool) -> Vec<RawGroup> {
    let mut groups = Vec::new();
    let token_sets: Vec<HashSet<String>> = items
        .iter()
        .map(|item| {
            let tokens = catnorm_text::tokenize(&item.normalized_name);
            tokens
                .into_iter()
                .filter(|t| !use_stopwords || !is_stop_word(t))
                .collect()
        })
        .collect();

    for (_, bucket) in category_buckets(items) {
        if bucket.len() < 2 {
            continue;
        }

        let mut uf = UnionFind::new(items.len());
        let mut touched: HashSet<u32> = HashSet::new();

        for i in 0..bucket.len() {
            for j in (i + 1)..bucket.len() {
                let a = &token_sets[bucket[i] as usize];
                let b = &token_sets[bucket[j] as usize];
                if a.is_empty() && b.is_empty() {
                    continue;
                }
                let score = token_jaccard(a, b);
                if score >= threshold {
                    uf.union(bucket[i], bucket[j]);
                    touched.insert(bucket[i]);
                    touched.insert(bucket[j]);
                }
            }
        }

        for component in uf.components() {
            let component: Vec<u32> = component.into_iter().filter(|i| touched.contains(i)).collect();
            if component.len() < 2 {
                continue;
            }
            let mean_score = mean_pairwise_tokens(&token_sets, &component);
            groups.push(RawGroup {
                group_type: DuplicateGroupType::Semantic,
                indices: component,
                similarity: mean_score,
                confidence: mean_score,
            });
        }
    }

    groups
}

fn token_jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

fn is_stop_word(token: &str) -> bool {
    // Re-derive the same closed set catnorm_text uses internally; kept as
    // a local copy so this pass doesn't need to normalize() again just
    // to toggle stop words.
    const STOP_WORDS: &[&str] = &[
        "и", "в", "во", "на", "с", "со", "по", "для", "от", "до", "из", "к", "о", "об", "у", "за",
        "под", "над", "при", "без", "или", "а", "но", "же", "бы", "ли", "то", "это",
    ];
    STOP_WORDS.contains(&token)
}

fn mean_pairwise(items: &[&DedupItem], indices: &[u32], score_fn: impl Fn(&str, &str) -> f64) -> f64 {
    let mut total = 0.0;
    let mut count = 0u32;
    for i in 0..indices.len() {
        for j in (i + 1)..indices.len() {
            let a = &items[indices[i] as usize].normalized_name;
            let b = &items[indices[j] as usize].normalized_name;
            total += score_fn(a, b);
            count += 1;
        }
    }
    if count == 0 {
        1.0
    } else {
        total / count as f64
    }
}

fn mean_pairwise_tokens(token_sets: &[HashSet<String>], indices: &[u32]) -> f64 {
    let mut total = 0.0;
    let mut count = 0u32;
    for i in 0..indices.len() {
        for j in (i + 1)..indices.len() {
            total += token_jaccard(&token_sets[indices[i] as usize], &token_sets[indices[j] as usize]);
            count += 1;
        }
    }
    if count == 0 {
        1.0
    } else {
        total / count as f64
    }
}

fn merge_overlapping(raw_groups: Vec<RawGroup>) -> Vec<RawGroup> {
    if raw_groups.is_empty() {
        return raw_groups;
    }

    let mut uf = UnionFind::new(raw_groups.len());
    for i in 0..raw_groups.len() {
        for j in (i + 1)..raw_groups.len() {
            let shares = raw_groups[i]
                .indices
                .iter()
                .any(|idx| raw_groups[j].indices.contains(idx));
            if shares {
                uf.union(i as u32, j as u32);
            }
        }
    }

    let mut merged: HashMap<u32, RawGroup> = HashMap::new();
    for (i, group) in raw_groups.into_iter().enumerate() {
        let root = uf.find(i as u32);
        merged
            .entry(root)
            .and_modify(|existing| {
                for idx in &group.indices {
                    if !existing.indices.contains(idx) {
                        existing.indices.push(*idx);
                    }
                }
                existing.confidence = existing.confidence.max(group.confidence);
                existing.similarity = existing.similarity.max(group.similarity);
                // A group absorbing a different-typed group becomes
                // semantic: it is the broadest of the three passes.
                if existing.group_type != group.group_type {
                    existing.group_type = DuplicateGroupType::Semantic;
                }
            })
            .or_insert(group);
    }

    merged.into_values().collect()
}

fn finalize_group(items: &[&DedupItem], raw: RawGroup) -> DuplicateGroup {
    let members: Vec<&DedupItem> = raw.indices.iter().map(|&i| items[i as usize]).collect();

    let max_attrs = members.iter().map(|m| m.attribute_count).max().unwrap_or(0).max(1);
    let max_name_len = members.iter().map(|m| m.name_length()).max().unwrap_or(1).max(1);

    let mut scored: Vec<(f64, &DedupItem)> = members
        .iter()
        .map(|item| {
            let merged_norm = (item.merged_count as f64 / 10.0).min(1.0);
            let attr_norm = item.attribute_count as f64 / max_attrs as f64;
            let len_norm = item.name_length() as f64 / max_name_len as f64;
            let score = 0.40 * item.quality_score
                + 0.25 * item.processing_level.normalized_rank()
                + 0.15 * merged_norm
                + 0.10 * attr_norm
                + 0.10 * len_norm;
            (score, *item)
        })
        .collect();

    scored.sort_by(|(score_a, item_a), (score_b, item_b)| {
        score_b
            .partial_cmp(score_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| item_a.id.as_uuid().cmp(item_b.id.as_uuid()))
    });

    let suggested_master = scored[0].1.id;

    DuplicateGroup {
        group_type: raw.group_type,
        items: members.iter().map(|m| m.id).collect(),
        similarity: raw.similarity,
        confidence: raw.confidence,
        suggested_master,
        reason: format!(
            "{} match across {} item(s); selected by quality score {:.3}",
            raw.group_type,
            members.len(),
            scored[0].0
        ),
    }
}
