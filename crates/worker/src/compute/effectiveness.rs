use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use tabletop_core::{RuntimeError, RuntimeResult};

/// 克制倍率表：攻击方类型 -> 防守方类型 -> 倍率
pub type EffectivenessTable = HashMap<String, HashMap<String, f64>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attacker {
    pub kind: String,
    pub power: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Defender {
    pub kind: String,
    pub defense: f64,
}

/// `CALCULATE_EFFECTIVENESS` 请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectivenessRequest {
    pub attacker: Attacker,
    pub defender: Defender,
    /// 请求自带的倍率表，优先于Worker配置
    #[serde(default)]
    pub table: Option<EffectivenessTable>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effectiveness {
    SuperEffective,
    Neutral,
    NotVeryEffective,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectivenessResult {
    pub multiplier: f64,
    pub score: f64,
    pub win_probability: f64,
    pub effectiveness: Effectiveness,
}

fn lookup(table: &EffectivenessTable, attacker: &str, defender: &str) -> Option<f64> {
    table.get(attacker).and_then(|row| row.get(defender)).copied()
}

/// 查表并估算胜率
///
/// 倍率按"请求表 -> 配置表 -> 1.0"的顺序查找，胜率限制在 `[floor, ceiling]`。
pub fn calculate(
    request: &EffectivenessRequest,
    configured: &EffectivenessTable,
    floor: f64,
    ceiling: f64,
) -> RuntimeResult<EffectivenessResult> {
    let power = request.attacker.power;
    let defense = request.defender.defense;
    if !power.is_finite() || !defense.is_finite() || power < 0.0 || defense < 0.0 {
        return Err(RuntimeError::invalid_payload(format!(
            "攻击力与防御力必须为非负数: power={power}, defense={defense}"
        )));
    }

    let attacker = request.attacker.kind.as_str();
    let defender = request.defender.kind.as_str();
    let multiplier = request
        .table
        .as_ref()
        .and_then(|table| lookup(table, attacker, defender))
        .or_else(|| lookup(configured, attacker, defender))
        .unwrap_or(1.0);

    let score = power * multiplier;
    let raw = if score + defense == 0.0 {
        0.5
    } else {
        score / (score + defense)
    };

    let effectiveness = if multiplier > 1.0 {
        Effectiveness::SuperEffective
    } else if multiplier < 1.0 {
        Effectiveness::NotVeryEffective
    } else {
        Effectiveness::Neutral
    };

    Ok(EffectivenessResult {
        multiplier,
        score,
        win_probability: raw.clamp(floor, ceiling),
        effectiveness,
    })
}
