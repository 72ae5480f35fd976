//! 选择引擎
//!
//! 对句柄缓存的条目集合做纯函数式的子集解析。三种选择器：
//! - `all`：全部条目，保持原始顺序
//! - 索引列表：基于原始顺序的位置下标，越界下标直接丢弃
//! - 条件对象：对上下文快照的合取谓词，空条件匹配全部
//!
//! 解析结果永远是物化结果集的子集，绝不触达后端，也绝不凭空
//! 产生新的条目 ID。

use std::collections::{HashMap, HashSet};

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::model::{ItemContext, ItemId};

/// 条件选择器：所有给定的条件必须同时满足（逻辑与）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SelectionCriteria {
    /// 状态在给定集合内
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub states: Option<Vec<String>>,
    /// 条目类型在给定集合内
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_types: Option<Vec<String>>,
    /// 标签有交集
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    /// 标题包含任一子串（不区分大小写）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_contains: Option<Vec<String>>,
    /// 负责人在给定集合内
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<Vec<String>>,
    /// 不活跃天数下限
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_inactive_min: Option<u32>,
    /// 不活跃天数上限
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_inactive_max: Option<u32>,
}

impl SelectionCriteria {
    /// 判断单个条目的上下文是否满足全部条件
    pub fn matches(&self, ctx: &ItemContext) -> bool {
        if let Some(states) = &self.states {
            let matched = ctx
                .state
                .as_deref()
                .map(|s| states.iter().any(|want| want == s))
                .unwrap_or(false);
            if !matched {
                return false;
            }
        }
        if let Some(types) = &self.item_types {
            let matched = ctx
                .item_type
                .as_deref()
                .map(|t| types.iter().any(|want| want == t))
                .unwrap_or(false);
            if !matched {
                return false;
            }
        }
        if let Some(tags) = &self.tags {
            let overlap = ctx.tags.iter().any(|t| tags.contains(t));
            if !overlap {
                return false;
            }
        }
        if let Some(fragments) = &self.title_contains {
            let title = ctx.title.as_deref().unwrap_or("").to_lowercase();
            let matched = fragments
                .iter()
                .any(|fragment| title.contains(&fragment.to_lowercase()));
            if !matched {
                return false;
            }
        }
        if let Some(assignees) = &self.assigned_to {
            let matched = ctx
                .assigned_to
                .as_deref()
                .map(|a| assignees.iter().any(|want| want == a))
                .unwrap_or(false);
            if !matched {
                return false;
            }
        }
        if let Some(min) = self.days_inactive_min {
            match ctx.days_inactive {
                Some(days) if days >= min => {}
                _ => return false,
            }
        }
        if let Some(max) = self.days_inactive_max {
            match ctx.days_inactive {
                Some(days) if days <= max => {}
                _ => return false,
            }
        }
        true
    }
}

/// 条目选择器
#[derive(Debug, Clone)]
pub enum ItemSelector {
    /// 全部条目
    All,
    /// 基于原始顺序的位置下标
    Indices(Vec<usize>),
    /// 条件合取
    Criteria(SelectionCriteria),
}

// 工具分发层传入的 JSON 形态：字符串 "all"、下标数组或条件对象
#[derive(Deserialize)]
#[serde(untagged)]
enum SelectorRepr {
    Text(String),
    Indices(Vec<usize>),
    Criteria(SelectionCriteria),
}

impl<'de> Deserialize<'de> for ItemSelector {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match SelectorRepr::deserialize(deserializer)? {
            SelectorRepr::Text(text) => {
                if text.eq_ignore_ascii_case("all") {
                    Ok(ItemSelector::All)
                } else {
                    Err(D::Error::custom(format!(
                        "unknown selector keyword: {text}"
                    )))
                }
            }
            SelectorRepr::Indices(indices) => Ok(ItemSelector::Indices(indices)),
            SelectorRepr::Criteria(criteria) => Ok(ItemSelector::Criteria(criteria)),
        }
    }
}

impl Serialize for ItemSelector {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            ItemSelector::All => serializer.serialize_str("all"),
            ItemSelector::Indices(indices) => indices.serialize(serializer),
            ItemSelector::Criteria(criteria) => criteria.serialize(serializer),
        }
    }
}

/// 解析选择器，返回命中的条目 ID（子集，保持确定性顺序）
///
/// - 越界下标丢弃，不报错（部分过期的下标不应让整批失败）
/// - 重复下标按首次出现去重
/// - 缺失上下文的条目按空快照参与条件匹配
/// - 零命中返回空集合，由调用方按"无操作"处理
pub fn resolve(
    item_ids: &[ItemId],
    context: &HashMap<ItemId, ItemContext>,
    selector: &ItemSelector,
) -> Vec<ItemId> {
    match selector {
        ItemSelector::All => item_ids.to_vec(),
        ItemSelector::Indices(indices) => {
            let mut seen = HashSet::new();
            indices
                .iter()
                .filter(|&&idx| idx < item_ids.len())
                .filter(|&&idx| seen.insert(idx))
                .map(|&idx| item_ids[idx])
                .collect()
        }
        ItemSelector::Criteria(criteria) => {
            let empty = ItemContext::default();
            item_ids
                .iter()
                .filter(|id| criteria.matches(context.get(*id).unwrap_or(&empty)))
                .copied()
                .collect()
        }
    }
}
