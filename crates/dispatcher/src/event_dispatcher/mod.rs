//! 事件分发器
//!
//! 事件按类型分为顺序、并行安全和未分类三类：
//!
//! | 类别 | 类型 | 成批规则 |
//! |------|------|----------|
//! | 顺序 | `move` `turn-end` `game-start` `game-end` | 单独成批 |
//! | 并行安全 | `animation` `sound` `ui-update` `notification` `highlight` | 与相邻的并行安全事件同批 |
//! | 未分类 | 其他 | 单独成批 |

pub mod batching;
mod dispatcher;
mod handler;

pub use batching::{enqueue, form_batch};
pub use dispatcher::{BatchReport, DispatcherStats, EventDispatcher};
pub use handler::{handler_fn, EventHandler};
