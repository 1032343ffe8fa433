//! 游戏逻辑计算Worker
//!
//! 处理洗牌、抽牌、路径搜索、克制计算和批处理。所有计算都在Worker自己的任务中执行，
//! 牌堆缓存为Worker私有状态。

pub mod batch;
pub mod effectiveness;
pub mod pathfinding;
pub mod shuffle;

use std::collections::HashMap;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use tabletop_core::{ComputeConfig, Envelope, RuntimeError, RuntimeResult, Worker, WorkerOutbox};

pub use batch::{BatchOperation, BatchRecord, BatchRequest, BatchStatus, BatchSummary};
pub use effectiveness::{EffectivenessRequest, EffectivenessResult};
pub use pathfinding::{PathRequest, PathResult};

pub const SHUFFLE_DECK: &str = "SHUFFLE_DECK";
pub const DRAW_CARDS: &str = "DRAW_CARDS";
pub const CLEAR_CACHE: &str = "CLEAR_CACHE";
pub const FIND_PATHS: &str = "FIND_PATHS";
pub const CALCULATE_EFFECTIVENESS: &str = "CALCULATE_EFFECTIVENESS";
pub const PROCESS_BATCH: &str = "PROCESS_BATCH";

const SUPPORTED: [&str; 6] = [
    SHUFFLE_DECK,
    DRAW_CARDS,
    CLEAR_CACHE,
    FIND_PATHS,
    CALCULATE_EFFECTIVENESS,
    PROCESS_BATCH,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShuffleRequest {
    pub cards: Vec<Value>,
    /// 指定时把洗好的牌堆缓存起来供 `DRAW_CARDS` 使用
    #[serde(default)]
    pub deck_id: Option<String>,
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawRequest {
    pub deck_id: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearCacheRequest {
    #[serde(default)]
    pub deck_id: Option<String>,
}

/// 游戏逻辑Worker接受的命令
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComputeRequest {
    ShuffleDeck(ShuffleRequest),
    DrawCards(DrawRequest),
    ClearCache(ClearCacheRequest),
    FindPaths(PathRequest),
    CalculateEffectiveness(EffectivenessRequest),
    ProcessBatch(BatchRequest),
}

pub struct GameLogicWorker {
    config: ComputeConfig,
    rng: StdRng,
    deck_cache: HashMap<String, Vec<Value>>,
}

impl GameLogicWorker {
    pub fn new(config: ComputeConfig) -> Self {
        Self {
            config,
            rng: StdRng::from_os_rng(),
            deck_cache: HashMap::new(),
        }
    }

    pub fn with_seed(config: ComputeConfig, seed: u64) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
            deck_cache: HashMap::new(),
        }
    }

    pub fn cached_decks(&self) -> usize {
        self.deck_cache.len()
    }

    fn parse(envelope: &Envelope) -> RuntimeResult<ComputeRequest> {
        if !SUPPORTED.contains(&envelope.message_type.as_str()) {
            return Err(RuntimeError::UnsupportedMessage(envelope.message_type.clone()));
        }
        envelope.parse()
    }

    async fn shuffle_deck(&mut self, request: ShuffleRequest) -> RuntimeResult<Value> {
        let mut cards = request.cards;
        let interval = self.config.shuffle_yield_interval;
        match request.seed {
            Some(seed) => {
                let mut rng = StdRng::seed_from_u64(seed);
                shuffle::shuffle(&mut cards, &mut rng, interval).await;
            }
            None => shuffle::shuffle(&mut cards, &mut self.rng, interval).await,
        }

        debug!("洗牌完成: {} 张", cards.len());
        if let Some(deck_id) = &request.deck_id {
            self.deck_cache.insert(deck_id.clone(), cards.clone());
        }
        Ok(json!({ "cards": cards, "deckId": request.deck_id }))
    }

    fn draw_cards(&mut self, request: DrawRequest) -> RuntimeResult<Value> {
        let deck = self.deck_cache.get_mut(&request.deck_id).ok_or_else(|| {
            RuntimeError::invalid_payload(format!("牌堆不存在: {}", request.deck_id))
        })?;
        let count = request.count.min(deck.len());
        let drawn: Vec<Value> = deck.drain(..count).collect();
        Ok(json!({ "cards": drawn, "remaining": deck.len() }))
    }

    fn clear_cache(&mut self, request: ClearCacheRequest) -> Value {
        let cleared = match request.deck_id {
            Some(deck_id) => usize::from(self.deck_cache.remove(&deck_id).is_some()),
            None => {
                let cleared = self.deck_cache.len();
                self.deck_cache.clear();
                cleared
            }
        };
        info!("清理牌堆缓存: {} 个", cleared);
        json!({ "cleared": cleared })
    }

    /// 执行单个非批处理命令
    async fn execute(&mut self, request: ComputeRequest) -> RuntimeResult<Value> {
        match request {
            ComputeRequest::ShuffleDeck(req) => self.shuffle_deck(req).await,
            ComputeRequest::DrawCards(req) => self.draw_cards(req),
            ComputeRequest::ClearCache(req) => Ok(self.clear_cache(req)),
            ComputeRequest::FindPaths(req) => {
                let result = pathfinding::find_paths(
                    &req,
                    self.config.max_explored_states,
                    self.config.default_top_k,
                )?;
                if result.truncated {
                    warn!(
                        "路径搜索达到探索上限: {} -> {} (已探索 {})",
                        req.from, req.to, result.explored
                    );
                }
                Ok(serde_json::to_value(result)?)
            }
            ComputeRequest::CalculateEffectiveness(req) => {
                let result = effectiveness::calculate(
                    &req,
                    &self.config.effectiveness_table,
                    self.config.win_probability_floor,
                    self.config.win_probability_ceiling,
                )?;
                Ok(serde_json::to_value(result)?)
            }
            ComputeRequest::ProcessBatch(_) => Err(RuntimeError::UnsupportedMessage(
                "不支持嵌套的 PROCESS_BATCH".to_string(),
            )),
        }
    }

    /// 依次执行批处理中的每个操作；单个操作失败不影响后续操作
    async fn process_batch(&mut self, request: BatchRequest) -> RuntimeResult<Value> {
        let mut summary = BatchSummary::default();
        for (index, operation) in request.operations.iter().enumerate() {
            let outcome = match Self::parse(&operation.to_envelope()) {
                Ok(command) => self.execute(command).await,
                Err(e) => Err(e),
            };
            let record = match outcome {
                Ok(result) => BatchRecord::success(index, result),
                Err(e) => BatchRecord::failure(index, e.to_string()),
            };
            summary.push(record);
        }

        debug!(
            "批处理完成: 成功 {}, 失败 {}",
            summary.succeeded, summary.failed
        );
        Ok(serde_json::to_value(summary)?)
    }
}

#[async_trait]
impl Worker for GameLogicWorker {
    fn worker_type(&self) -> &str {
        crate::GAME_LOGIC_WORKER
    }

    async fn handle_message(
        &mut self,
        envelope: Envelope,
        _outbox: &WorkerOutbox,
    ) -> RuntimeResult<Value> {
        match Self::parse(&envelope)? {
            ComputeRequest::ProcessBatch(batch) => self.process_batch(batch).await,
            command => self.execute(command).await,
        }
    }
}
